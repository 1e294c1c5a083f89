//! Immutable key set snapshots and token verification against them.

// crates.io
use jsonwebtoken::{
	DecodingKey, TokenData, Validation,
	jwk::{Jwk, JwkSet},
};
use serde::de::DeserializeOwned;
// self
use crate::_prelude::*;

/// Snapshot of the verification keys published by an issuer.
///
/// Cloning is cheap; every refresh produces a new snapshot instead of mutating an existing one.
#[derive(Clone, Debug)]
pub struct KeySet {
	jwks: Arc<JwkSet>,
}
impl KeySet {
	/// Wrap a freshly fetched key set.
	pub fn new(jwks: JwkSet) -> Self {
		Self { jwks: Arc::new(jwks) }
	}

	/// Underlying JWKS document.
	pub fn jwks(&self) -> &JwkSet {
		&self.jwks
	}

	/// Number of keys in the set.
	pub fn len(&self) -> usize {
		self.jwks.keys.len()
	}

	/// Whether the set contains no keys.
	pub fn is_empty(&self) -> bool {
		self.jwks.keys.is_empty()
	}

	/// Whether both handles point at the same snapshot.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.jwks, &other.jwks)
	}

	/// Key ids present in the set.
	pub fn key_ids(&self) -> impl Iterator<Item = &str> {
		self.jwks.keys.iter().filter_map(|jwk| jwk.common.key_id.as_deref())
	}

	/// Select the key for `kid`; a token without `kid` only matches a single-key set.
	pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
		match kid {
			Some(kid) => self.jwks.find(kid),
			None if self.jwks.keys.len() == 1 => self.jwks.keys.first(),
			None => None,
		}
	}

	/// Build a decoding key for `kid`.
	pub fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey> {
		let jwk =
			self.find(kid).ok_or_else(|| Error::KeyNotFound { kid: kid.map(str::to_owned) })?;

		Ok(DecodingKey::from_jwk(jwk)?)
	}

	/// Verify a compact JWT signed by one of these keys and issued by `issuer`.
	///
	/// Audience is only checked when `audience` is non-empty. Any failure rejects the token.
	pub fn verify<C>(&self, token: &str, issuer: &str, audience: &[&str]) -> Result<TokenData<C>>
	where
		C: DeserializeOwned,
	{
		let header = jsonwebtoken::decode_header(token)?;
		let key = self.decoding_key(header.kid.as_deref())?;
		let mut validation = Validation::new(header.alg);

		validation.set_issuer(&[issuer]);

		if audience.is_empty() {
			validation.validate_aud = false;
		} else {
			validation.set_audience(audience);
		}

		Ok(jsonwebtoken::decode::<C>(token, &key, &validation)?)
	}
}
impl From<JwkSet> for KeySet {
	fn from(value: JwkSet) -> Self {
		Self::new(value)
	}
}

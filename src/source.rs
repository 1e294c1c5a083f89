//! Key material sources backing a [`VerificationCache`](crate::VerificationCache).

// std
use std::future::Future;
// crates.io
use jsonwebtoken::jwk::JwkSet;
use url::Url;
// self
use crate::_prelude::*;

/// Fetches the published key set of an issuer.
///
/// Implementations are cloned once per configured issuer. The cache bounds every call with
/// `attempt_timeout` on its own, so implementations may use it as a hint for transport timeouts.
pub trait KeySource: Clone + Send + Sync + 'static {
	/// Fetch the current key set published by `issuer`.
	fn fetch_keys(
		&self,
		issuer: &Url,
		attempt_timeout: Duration,
	) -> impl Future<Output = Result<JwkSet>> + Send;
}

//! HTTP key source performing OpenID Connect discovery and JWKS retrieval.

// crates.io
use jsonwebtoken::jwk::JwkSet;
use reqwest::{Client, Response, redirect::Policy};
use serde::{Deserialize, de::DeserializeOwned};
use url::Url;
// self
use crate::{_prelude::*, config::IssuerConfig, security, source::KeySource};

/// Path of the discovery document relative to the issuer URL.
pub const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

const ERROR_BODY_LIMIT: usize = 512;

/// Subset of the OpenID provider metadata needed to locate the key set.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderMetadata {
	/// Issuer identifier advertised by the provider.
	pub issuer: String,
	/// Location of the provider's JWKS document.
	pub jwks_uri: Url,
}

/// [`KeySource`] backed by a shared reqwest client.
#[derive(Clone, Debug)]
pub struct HttpKeySource {
	client: Client,
	max_response_bytes: u64,
	require_https: bool,
}
impl HttpKeySource {
	/// Build a source from the issuer configuration with the default reqwest client.
	pub fn new(config: &IssuerConfig) -> Result<Self> {
		let client = Client::builder()
			.redirect(Policy::limited(3))
			.user_agent(format!("issuer-cache/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self::with_client(client, config.max_response_bytes, config.require_https))
	}

	/// Build a source around an existing client (primarily for tests).
	pub fn with_client(client: Client, max_response_bytes: u64, require_https: bool) -> Self {
		Self { client, max_response_bytes, require_https }
	}

	/// Fetch and validate the discovery document of `issuer`.
	pub async fn discover(
		&self,
		issuer: &Url,
		attempt_timeout: Duration,
	) -> Result<ProviderMetadata> {
		let metadata: ProviderMetadata =
			self.get_json(&discovery_url(issuer)?, attempt_timeout).await?;

		if trim_issuer(&metadata.issuer) != trim_issuer(issuer.as_str()) {
			return Err(Error::Discovery {
				issuer: issuer.clone(),
				reason: format!("Provider advertises issuer '{}'.", metadata.issuer),
			});
		}
		if self.require_https {
			security::enforce_https(&metadata.jwks_uri)?;
		}

		Ok(metadata)
	}

	async fn get_json<T>(&self, url: &Url, attempt_timeout: Duration) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let start = Instant::now();
		let mut response = self
			.client
			.get(url.clone())
			.header("accept", "application/json")
			.timeout(attempt_timeout)
			.send()
			.await?;
		let status = response.status();

		if !status.is_success() {
			let body = read_capped(&mut response, ERROR_BODY_LIMIT).await.ok().map(
				|(bytes, truncated)| {
					let mut body = String::from_utf8_lossy(&bytes).into_owned();

					if truncated {
						body.push_str("...");
					}

					body
				},
			);

			return Err(Error::HttpStatus { status, url: url.clone(), body });
		}
		if let Some(length) = response.content_length() {
			self.guard_size(length)?;
		}

		let limit = usize::try_from(self.max_response_bytes).unwrap_or(usize::MAX);
		let (bytes, truncated) = read_capped(&mut response, limit).await?;

		if truncated {
			return Err(self.oversized("Streamed response body"));
		}

		tracing::debug!(url = %url, status = %status, elapsed = ?start.elapsed(), "document fetched");

		Ok(serde_json::from_slice(&bytes)?)
	}

	fn guard_size(&self, size: u64) -> Result<()> {
		if size > self.max_response_bytes {
			return Err(self.oversized(&format!("Response size {size} bytes")));
		}

		Ok(())
	}

	fn oversized(&self, what: &str) -> Error {
		Error::Validation {
			field: "max_response_bytes",
			reason: format!(
				"{what} exceeds the configured guard of {limit} bytes.",
				limit = self.max_response_bytes
			),
		}
	}
}
impl KeySource for HttpKeySource {
	async fn fetch_keys(&self, issuer: &Url, attempt_timeout: Duration) -> Result<JwkSet> {
		if self.require_https {
			security::enforce_https(issuer)?;
		}

		let metadata = self.discover(issuer, attempt_timeout).await?;
		let jwks: JwkSet = self.get_json(&metadata.jwks_uri, attempt_timeout).await?;

		tracing::debug!(
			issuer = %issuer,
			jwks_uri = %metadata.jwks_uri,
			keys = jwks.keys.len(),
			"issuer key set fetched"
		);

		Ok(jwks)
	}
}

/// Location of the discovery document for `issuer`.
pub fn discovery_url(issuer: &Url) -> Result<Url> {
	let raw = format!("{}/{DISCOVERY_PATH}", trim_issuer(issuer.as_str()));

	Url::parse(&raw).map_err(|err| Error::Discovery {
		issuer: issuer.clone(),
		reason: format!("Invalid discovery URL '{raw}': {err}."),
	})
}

// Read at most `cap` bytes of the body, reporting whether more remained.
async fn read_capped(response: &mut Response, cap: usize) -> Result<(Vec<u8>, bool)> {
	let mut body = Vec::new();

	while let Some(chunk) = response.chunk().await? {
		let room = cap - body.len();

		if chunk.len() > room {
			body.extend_from_slice(&chunk[..room]);

			return Ok((body, true));
		}

		body.extend_from_slice(&chunk);
	}

	Ok((body, false))
}

fn trim_issuer(issuer: &str) -> &str {
	issuer.trim_end_matches('/')
}

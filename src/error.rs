//! Crate-wide error types and `Result` alias.

// std
use std::sync::Arc;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for issuer resolution and key caching.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),

	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Invalid issuer URL '{url}': {source}")]
	Configuration {
		url: String,
		#[source]
		source: url::ParseError,
	},
	#[error("Discovery failed for issuer {issuer}: {reason}")]
	Discovery { issuer: url::Url, reason: String },
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, body: Option<String> },
	#[error("No signing key matches kid {kid:?}.")]
	KeyNotFound { kid: Option<String> },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("No issuer configured for domain {domain:?} and no default issuer is available.")]
	NoIssuerConfigured { domain: Option<String> },
	#[error("Refreshing keys of issuer {issuer} failed: {source}")]
	Refresh {
		issuer: String,
		#[source]
		source: Arc<Error>,
	},
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Fetching {url} timed out after {timeout:?}.")]
	Timeout { url: url::Url, timeout: std::time::Duration },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
	#[error("Verification unavailable for issuer {issuer}: {source}")]
	VerificationUnavailable {
		issuer: String,
		#[source]
		source: Arc<Error>,
	},
}
impl Error {
	/// Whether the error describes a failed attempt to fetch key material.
	pub fn is_fetch_error(&self) -> bool {
		matches!(
			self,
			Self::Reqwest(_)
				| Self::Serde(_)
				| Self::Cache(_)
				| Self::Discovery { .. }
				| Self::HttpStatus { .. }
				| Self::Security(_)
				| Self::Timeout { .. }
				| Self::Validation { .. }
		)
	}
}

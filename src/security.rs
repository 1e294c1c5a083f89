//! Transport security checks for issuer and key set URLs.

// crates.io
use url::Url;
// self
use crate::_prelude::*;

/// Ensure `url` uses HTTPS.
pub fn enforce_https(url: &Url) -> Result<()> {
	if url.scheme() != "https" {
		return Err(Error::Security(format!("Refusing non-HTTPS URL '{url}'.")));
	}

	Ok(())
}

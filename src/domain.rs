//! Routing key derivation for issuer URLs.

// std
use std::sync::LazyLock;
// crates.io
use regex::Regex;

static SCHEME_AND_HOST: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^(?i)[A-Za-z0-9_]+://[^/]+").expect("scheme and host pattern must compile")
});

/// Extract the lowercase `scheme://host` prefix of `raw_url`.
///
/// Inputs that do not start with `scheme://host` are returned unchanged, so callers must tolerate
/// keys that are not actually shaped like a scheme and host.
pub fn extract_domain_key(raw_url: &str) -> String {
	match SCHEME_AND_HOST.find(raw_url) {
		Some(found) => found.as_str().to_lowercase(),
		None => raw_url.to_owned(),
	}
}

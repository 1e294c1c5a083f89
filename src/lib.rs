//! Issuer routing and fault-tolerant verification key caching for OpenID Connect token issuers.
//!
//! An [`IssuerManager`] is built once from an [`IssuerConfig`] and maps the `scheme://host` of
//! every configured issuer to a [`VerificationCache`]. Request handling resolves the cache for a
//! request through [`IssuerManager::resolve`] and asks it for the current [`KeySet`].

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod context;
pub mod domain;
pub mod http;
pub mod keys;
pub mod metrics;
pub mod security;
pub mod source;

mod config;
mod error;
mod registry;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

pub use crate::{
	cache::{manager::VerificationCache, state::CacheState},
	config::{
		DEFAULT_CACHE_TTL, DEFAULT_ERROR_TOLERANCE, DEFAULT_MAX_RESPONSE_BYTES, IssuerConfig,
		JitterStrategy, RetryPolicy,
	},
	context::{IssuerContext, IssuerDomain},
	domain::extract_domain_key,
	error::{Error, Result},
	http::client::HttpKeySource,
	keys::KeySet,
	registry::{IssuerManager, IssuerStatus},
	source::KeySource,
};
#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;

//! Per-issuer verification key caching.

pub mod entry;
pub mod manager;
pub mod state;

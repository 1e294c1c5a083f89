//! HTTP helpers for key retrieval.

pub mod client;
pub mod retry;

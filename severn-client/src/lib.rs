//! `severn-client` — client library for the Severn key-value store.
//!
//! Speaks the newline-delimited JSON protocol and implements the redirect
//! contract: a mutation answered with `redirect` is retried against the
//! address named in the response, up to three times with 500 ms between
//! attempts.

pub mod client;
pub mod errors;

pub use client::{extract_server_addr, KvClient};
pub use errors::{ClientError, Result};

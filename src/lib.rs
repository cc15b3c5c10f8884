//! Cassette proxy - transparent HTTP record-replay intermediary
//!
//! Requests are fingerprinted by method and path. Each fingerprint names a
//! cassette file holding earlier interactions; a match is replayed, anything
//! new is fetched from the real service and appended.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions,
    clippy::cargo_common_metadata
)]

pub mod cassette;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod headers;
pub mod network;
pub mod proxy;
pub mod request;

pub use error::{ProxyError, Result};

//! Cassettes: persisted, named sequences of recorded interactions

mod format;
pub mod matcher;
pub mod policy;
mod store;

pub use format::{body_bytes, Cassette, CassetteOptions, Interaction, RecordMode};
pub use policy::Decision;
pub use store::{CassetteStore, CASSETTE_EXTENSION};

// src/core/keys/mod.rs

//! Client API-key records and their lifecycle.

pub mod registry;
pub mod types;

pub use registry::KeyRegistry;
pub use types::{ApiConsumer, ApiKeyRecord, CreateKeyRequest};

//! Envelope encryption for stored credentials, with versioned master keys and
//! batch key rotation.

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod rotation;
pub mod store;
pub mod types;

pub use envelope::EnvelopeService;
pub use error::{CofferError, Result};
pub use registry::MasterKeyRegistry;

pub mod queries;
pub mod schema;

pub use queries::{BatchOutcome, CredentialDb};

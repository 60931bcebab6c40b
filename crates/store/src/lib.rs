//! Durable storage for upstream identities
//!
//! One record per upstream refresh-token-backed identity: encrypted refresh
//! token, last-known metadata, health status, usage counters, and
//! visibility/ownership. [`PersistentStore`] is the contract the credential
//! and allocation cores depend on; [`JsonFileStore`] is the one concrete,
//! file-backed implementation.

mod crypto;
mod error;
mod file_store;
mod model;

pub use crypto::EncryptionKey;
pub use error::{Error, Result};
pub use file_store::{JsonFileStore, PersistentStore};
pub use model::{IdentityRecord, Status, TokenCredentials, Visibility};

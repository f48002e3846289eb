//! boba-core - Core library for Boba
//!
//! This crate contains the shared record model, free-text field
//! extraction, the offline-first local store, the remote record
//! gateway, and the reconciler that decides where each operation lands.

pub mod error;
pub mod export;
pub mod extract;
pub mod gateway;
pub mod models;
pub mod reconciler;
pub mod store;
pub mod util;

pub use error::{Error, Result};
pub use models::{PurchaseRecord, RecordDraft, RecordId, RecordPatch, Session, SyncState};

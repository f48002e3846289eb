//! Data model shared by the store, gateway, and reconciler.

mod record;
mod session;

pub use record::{
    NutritionFacts, PurchaseRecord, RecordDraft, RecordId, RecordPatch, SyncState, LOCAL_ID_PREFIX,
};
pub use session::Session;

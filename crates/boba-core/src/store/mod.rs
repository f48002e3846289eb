//! Offline-first local record store.
//!
//! A JSON file holding the record list, the current session, and the
//! last-sync timestamp — the client-side persistent area the rest of
//! the crate reads through. Operations are synchronous, last-write-wins,
//! and single-writer by construction; a multi-threaded host must wrap
//! the store in a mutex or serialize access onto one task.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{PurchaseRecord, RecordDraft, RecordId, RecordPatch, Session, SyncState};
use crate::util::unix_timestamp_ms;

const fn default_store_version() -> u32 {
    1
}

/// On-disk shape of the client store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct StoreData {
    #[serde(default = "default_store_version")]
    version: u32,
    #[serde(default)]
    session: Option<Session>,
    #[serde(default)]
    records: Vec<PurchaseRecord>,
    /// Unix ms of the last successful sync pass.
    #[serde(default)]
    last_sync: Option<i64>,
}

/// File-backed store of purchase records, in insertion order.
#[derive(Debug)]
pub struct LocalRecordStore {
    data: StoreData,
    path: Option<PathBuf>,
}

impl LocalRecordStore {
    /// Open (or create) a store file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            StoreData::default()
        };
        Ok(Self {
            data,
            path: Some(path),
        })
    }

    /// Open an in-memory store that never touches disk (tests).
    #[must_use]
    pub fn open_in_memory() -> Self {
        Self {
            data: StoreData::default(),
            path: None,
        }
    }

    /// Path of the backing file, when there is one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// All records, insertion order. Callers sort for display.
    #[must_use]
    pub fn list(&self) -> &[PurchaseRecord] {
        &self.data.records
    }

    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&PurchaseRecord> {
        self.data.records.iter().find(|record| &record.id == id)
    }

    /// Append a new local-only record built from a validated draft.
    ///
    /// Assigns a namespaced temporary id and tags the record `Local`.
    pub fn append(&mut self, draft: RecordDraft, owner_id: Option<i64>) -> Result<PurchaseRecord> {
        draft.validate()?;
        let now = unix_timestamp_ms();
        let record = PurchaseRecord {
            id: RecordId::new_local(),
            brand: draft.brand,
            flavor: draft.flavor,
            price: draft.price,
            purchase_date: draft.purchase_date,
            calories: None,
            sugar: None,
            caffeine: None,
            fat: None,
            notes: draft.notes,
            owner_id,
            sync_state: SyncState::Local,
            created_at: now,
            updated_at: now,
        };
        self.data.records.push(record.clone());
        self.save()?;
        Ok(record)
    }

    /// Insert or replace a remote-confirmed record, keyed by its server id.
    pub fn upsert_synced(&mut self, record: PurchaseRecord) -> Result<()> {
        debug_assert!(record.is_consistent());
        match self
            .data
            .records
            .iter_mut()
            .find(|existing| existing.id == record.id)
        {
            Some(existing) => *existing = record,
            None => self.data.records.push(record),
        }
        self.save()
    }

    /// Replace the whole record list with server truth, keeping records
    /// that only exist locally.
    pub fn replace_synced(&mut self, remote: Vec<PurchaseRecord>) -> Result<()> {
        self.data
            .records
            .retain(|record| record.sync_state == SyncState::Local);
        let mut merged = remote;
        merged.append(&mut self.data.records);
        self.data.records = merged;
        self.save()
    }

    /// Merge a patch into the record matching `id`; no-op when absent.
    pub fn update(&mut self, id: &RecordId, patch: &RecordPatch) -> Result<Option<PurchaseRecord>> {
        patch.validate()?;
        let now = unix_timestamp_ms();
        let Some(record) = self
            .data
            .records
            .iter_mut()
            .find(|record| &record.id == id)
        else {
            return Ok(None);
        };
        patch.apply_to(record, now);
        let updated = record.clone();
        self.save()?;
        Ok(Some(updated))
    }

    /// Re-tag a record `Local` so a future corrective sync picks it up.
    pub fn mark_unsynced(&mut self, id: &RecordId) -> Result<()> {
        if let Some(record) = self
            .data
            .records
            .iter_mut()
            .find(|record| &record.id == id)
        {
            record.sync_state = SyncState::Local;
            self.save()?;
        }
        Ok(())
    }

    /// Remove a record by id; returns whether anything was removed.
    pub fn remove(&mut self, id: &RecordId) -> Result<bool> {
        let before = self.data.records.len();
        self.data.records.retain(|record| &record.id != id);
        let removed = self.data.records.len() != before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Records that exist only in the client store.
    #[must_use]
    pub fn unsynced_only(&self) -> Vec<PurchaseRecord> {
        self.data
            .records
            .iter()
            .filter(|record| record.sync_state == SyncState::Local)
            .cloned()
            .collect()
    }

    /// Replace a temporary id with a server id and tag the record `Synced`.
    ///
    /// Idempotent: once the local id has been replaced, calling again
    /// with the same arguments changes nothing, and the temporary id is
    /// never reused.
    pub fn mark_synced(&mut self, local_id: &RecordId, server_id: i64) -> Result<()> {
        if let Some(record) = self
            .data
            .records
            .iter_mut()
            .find(|record| &record.id == local_id)
        {
            record.id = RecordId::Server(server_id);
            record.sync_state = SyncState::Synced;
            self.save()?;
        }
        Ok(())
    }

    /// The current session, if a user is logged in.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.data.session.as_ref()
    }

    /// Persist a session (login/register).
    pub fn save_session(&mut self, session: Session) -> Result<()> {
        self.data.session = Some(session);
        self.save()
    }

    /// Clear the session (logout).
    pub fn clear_session(&mut self) -> Result<()> {
        self.data.session = None;
        self.save()
    }

    /// Unix ms of the last successful sync pass.
    #[must_use]
    pub const fn last_sync(&self) -> Option<i64> {
        self.data.last_sync
    }

    /// Record the time of a completed sync pass.
    pub fn touch_last_sync(&mut self) -> Result<()> {
        self.data.last_sync = Some(unix_timestamp_ms());
        self.save()
    }
}

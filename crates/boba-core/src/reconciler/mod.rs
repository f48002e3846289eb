//! Record reconciliation between the local store and the remote gateway.
//!
//! Single decision point for "does this operation target remote, local,
//! or both", plus the batch replay of unsynced records. The decision is
//! a pure function of `(session, connectivity, record)`: both are
//! injected at construction, never read from ambient state.

use serde::Serialize;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::extract::extract_nutrition;
use crate::gateway::{GatewayError, RecordFilter, RecordGateway, StatsSummary};
use crate::models::{PurchaseRecord, RecordDraft, RecordId, RecordPatch, Session, SyncState};
use crate::store::LocalRecordStore;

/// Where an operation finally landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitTarget {
    /// The remote store confirmed the operation; local copy is `Synced`.
    Remote,
    /// The operation was committed to the local store only.
    Local,
}

/// A committed operation and where it landed.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub record: PurchaseRecord,
    pub target: CommitTarget,
}

/// Why a `sync()` invocation did not run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot sync: not logged in")]
    NoIdentity,
    #[error("cannot sync: network unreachable")]
    Offline,
    /// A batch is already in flight; coalesce instead of double-running.
    #[error("a sync batch is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Store(#[from] Error),
}

/// Per-record outcome of a sync batch.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    /// Id the record had when the batch started.
    pub id: String,
    /// Server-assigned id after a successful replay.
    pub server_id: Option<i64>,
    pub error: Option<String>,
}

/// Aggregate result of a sync batch. One record's failure never aborts
/// the batch; overall success means `failed == 0`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub total: usize,
    pub synced: usize,
    pub failed: usize,
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncReport {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Decides, per operation, whether to target the local store or the
/// remote gateway, and drains the unsynced backlog.
pub struct Reconciler<G, C> {
    store: LocalRecordStore,
    gateway: G,
    session: Option<Session>,
    is_online: C,
    syncing: bool,
}

impl<G, C> Reconciler<G, C>
where
    G: RecordGateway,
    C: Fn() -> bool,
{
    pub fn new(
        store: LocalRecordStore,
        gateway: G,
        session: Option<Session>,
        is_online: C,
    ) -> Self {
        Self {
            store,
            gateway,
            session,
            is_online,
            syncing: false,
        }
    }

    /// The local store, for read-only inspection.
    #[must_use]
    pub const fn store(&self) -> &LocalRecordStore {
        &self.store
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Remote operations are attempted only with identity and network.
    fn remote_available(&self) -> bool {
        self.session.is_some() && (self.is_online)()
    }

    fn owner_id(&self) -> Option<i64> {
        self.session.as_ref().map(|session| session.user_id)
    }

    /// Create a record from a validated draft.
    ///
    /// Remote when possible; any remote failure degrades to the local
    /// store tagged `Local` — never silently dropped.
    pub async fn create(&mut self, draft: RecordDraft) -> Result<Committed> {
        draft.validate()?;

        if self.remote_available() {
            match self.gateway.create(&draft, self.owner_id()).await {
                Ok(record) => {
                    self.store.upsert_synced(record.clone())?;
                    return Ok(Committed {
                        record,
                        target: CommitTarget::Remote,
                    });
                }
                Err(error) => {
                    tracing::warn!(%error, "remote create failed, saving record locally");
                }
            }
        }

        let record = self.store.append(draft, None)?;
        Ok(Committed {
            record,
            target: CommitTarget::Local,
        })
    }

    /// Apply a partial update to a record.
    ///
    /// A record whose id is temporary never hits the remote gateway,
    /// regardless of connectivity. A remote failure on a server id
    /// degrades to a local overwrite re-tagged `Local`, which makes the
    /// record eligible for a future corrective sync.
    pub async fn update(&mut self, id: &RecordId, patch: RecordPatch) -> Result<Committed> {
        patch.validate()?;
        if patch.is_empty() {
            return Err(Error::InvalidInput("update changes nothing".to_string()));
        }

        if let RecordId::Server(server_id) = id {
            if self.remote_available() {
                match self.gateway.update(*server_id, &patch).await {
                    Ok(record) => {
                        self.store.upsert_synced(record.clone())?;
                        return Ok(Committed {
                            record,
                            target: CommitTarget::Remote,
                        });
                    }
                    Err(error) => {
                        tracing::warn!(%error, record_id = %id, "remote update failed, degrading to local overwrite");
                    }
                }
            }
        }

        let record = self
            .store
            .update(id, &patch)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        // Server-assigned records that diverged locally need a corrective
        // sync pass later.
        if !id.is_local() {
            self.store.mark_unsynced(id)?;
        }
        let record = self.store.get(id).cloned().unwrap_or(record);
        Ok(Committed {
            record,
            target: CommitTarget::Local,
        })
    }

    /// Delete a record from whichever store currently owns it.
    ///
    /// A synced record cannot be deleted while the remote is
    /// unreachable: the local copy would only resurrect on the next
    /// remote read.
    pub async fn delete(&mut self, id: &RecordId) -> Result<CommitTarget> {
        match id {
            RecordId::Local(_) => {
                if self.store.remove(id)? {
                    Ok(CommitTarget::Local)
                } else {
                    Err(Error::NotFound(id.to_string()))
                }
            }
            RecordId::Server(server_id) => {
                if !self.remote_available() {
                    return Err(Error::Store(
                        "cannot delete a synced record while offline".to_string(),
                    ));
                }
                match self.gateway.remove(*server_id).await {
                    Ok(()) | Err(GatewayError::NotFound) => {
                        self.store.remove(id)?;
                        Ok(CommitTarget::Remote)
                    }
                    Err(error) => Err(error.into()),
                }
            }
        }
    }

    /// List records for display, purchase-date descending.
    ///
    /// A reachable remote is the source of truth and refreshes the
    /// local cache; otherwise the local store serves the read.
    pub async fn list(&mut self, filter: &RecordFilter) -> Result<Vec<PurchaseRecord>> {
        if self.remote_available() {
            let mut remote_filter = filter.clone();
            remote_filter.owner = self.owner_id();
            match self.gateway.list(&remote_filter).await {
                Ok(remote) => {
                    // A filtered response is a partial view; replacing
                    // the cache with it would drop every synced record
                    // outside the filter.
                    if filter.is_scoped() {
                        for record in remote {
                            self.store.upsert_synced(record)?;
                        }
                    } else {
                        self.store.replace_synced(remote)?;
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "remote list failed, serving local records");
                }
            }
        }

        let mut records = self.store.list().to_vec();
        sort_for_display(&mut records);
        Ok(records)
    }

    /// Aggregate statistics: remote when reachable, computed locally
    /// otherwise.
    pub async fn stats(&self) -> Result<StatsSummary> {
        if self.remote_available() {
            match self.gateway.stats(self.owner_id()).await {
                Ok(summary) => return Ok(summary),
                Err(error) => {
                    tracing::warn!(%error, "remote stats failed, computing locally");
                }
            }
        }
        Ok(compute_local_stats(self.store.list()))
    }

    /// Apply nutrition facts extracted from a model answer to a record.
    ///
    /// Returns `None` when no fact was found (no update is issued).
    pub async fn enrich(&mut self, id: &RecordId, text: &str) -> Result<Option<Committed>> {
        let facts = extract_nutrition(text);
        if facts.is_empty() {
            return Ok(None);
        }
        self.update(id, facts.into_patch()).await.map(Some)
    }

    /// Replay the unsynced backlog against the remote gateway.
    ///
    /// Sequential by design: the remote assigns ids on create, and a
    /// concurrent replay could double-submit a record before the local
    /// store learns its server id.
    pub async fn sync(&mut self) -> std::result::Result<SyncReport, SyncError> {
        if self.syncing {
            return Err(SyncError::AlreadyRunning);
        }
        let Some(session) = self.session.clone() else {
            return Err(SyncError::NoIdentity);
        };
        if !(self.is_online)() {
            return Err(SyncError::Offline);
        }

        self.syncing = true;
        let result = self.sync_batch(session.user_id).await;
        self.syncing = false;
        result
    }

    async fn sync_batch(&mut self, owner_id: i64) -> std::result::Result<SyncReport, SyncError> {
        // Snapshot at call time: records appended mid-batch wait for the
        // next pass.
        let snapshot = self.store.unsynced_only();
        if snapshot.is_empty() {
            return Ok(SyncReport::default());
        }

        let mut report = SyncReport {
            total: snapshot.len(),
            ..SyncReport::default()
        };

        for record in snapshot {
            let outcome = self.replay_record(&record, owner_id).await;
            match outcome {
                Ok(server_id) => {
                    report.synced += 1;
                    report.outcomes.push(SyncOutcome {
                        id: record.id.to_string(),
                        server_id: Some(server_id),
                        error: None,
                    });
                }
                Err(error) => {
                    tracing::warn!(%error, record_id = %record.id, "record replay failed, keeping it local");
                    report.failed += 1;
                    report.outcomes.push(SyncOutcome {
                        id: record.id.to_string(),
                        server_id: None,
                        error: Some(error.to_string()),
                    });
                }
            }
        }

        // Force-remote read so the store reflects server-assigned ids
        // and any server-side fields.
        let filter = RecordFilter {
            owner: Some(owner_id),
            ..RecordFilter::default()
        };
        match self.gateway.list(&filter).await {
            Ok(remote) => self.store.replace_synced(remote)?,
            Err(error) => {
                tracing::warn!(%error, "post-sync refresh failed");
            }
        }
        self.store.touch_last_sync()?;

        Ok(report)
    }

    /// Replay one unsynced record; the temporary id is stripped and the
    /// owner attached. Server-id records that degraded back to `Local`
    /// are corrected via update so the replay cannot duplicate them.
    async fn replay_record(
        &mut self,
        record: &PurchaseRecord,
        owner_id: i64,
    ) -> std::result::Result<i64, SyncError> {
        match &record.id {
            RecordId::Local(_) => {
                let draft = RecordDraft {
                    brand: record.brand.clone(),
                    flavor: record.flavor.clone(),
                    price: record.price,
                    purchase_date: record.purchase_date,
                    notes: record.notes.clone(),
                };
                let created = self
                    .gateway
                    .create(&draft, Some(owner_id))
                    .await
                    .map_err(|error| SyncError::Store(error.into()))?;
                let server_id = created.id.server_id().ok_or_else(|| {
                    SyncError::Store(Error::Store(
                        "remote create returned a non-server id".to_string(),
                    ))
                })?;
                self.store.mark_synced(&record.id, server_id)?;
                Ok(server_id)
            }
            RecordId::Server(server_id) => {
                let patch = full_patch(record);
                let updated = self
                    .gateway
                    .update(*server_id, &patch)
                    .await
                    .map_err(|error| SyncError::Store(error.into()))?;
                self.store.upsert_synced(updated)?;
                Ok(*server_id)
            }
        }
    }
}

/// Purchase-date descending, newest creation first within a day.
fn sort_for_display(records: &mut [PurchaseRecord]) {
    records.sort_by(|a, b| {
        b.purchase_date
            .cmp(&a.purchase_date)
            .then(b.created_at.cmp(&a.created_at))
    });
}

/// Patch carrying every present field of `record`, for corrective sync.
fn full_patch(record: &PurchaseRecord) -> RecordPatch {
    RecordPatch {
        brand: Some(record.brand.clone()),
        flavor: Some(record.flavor.clone()),
        price: Some(record.price),
        purchase_date: Some(record.purchase_date),
        calories: record.calories,
        sugar: record.sugar,
        caffeine: record.caffeine,
        fat: record.fat,
        notes: record.notes.clone(),
    }
}

/// Offline stats over the local record list.
fn compute_local_stats(records: &[PurchaseRecord]) -> StatsSummary {
    use std::collections::BTreeMap;

    use crate::gateway::{BrandCount, FlavorCount};

    let total_count = records.len() as u64;
    let total_spent: f64 = records.iter().map(|record| record.price).sum();
    let avg_price = if records.is_empty() {
        0.0
    } else {
        total_spent / records.len() as f64
    };

    let calories: Vec<u32> = records.iter().filter_map(|record| record.calories).collect();
    let avg_calories = if calories.is_empty() {
        None
    } else {
        Some(f64::from(calories.iter().sum::<u32>()) / calories.len() as f64)
    };

    let mut brands: BTreeMap<&str, u64> = BTreeMap::new();
    let mut flavors: BTreeMap<&str, u64> = BTreeMap::new();
    for record in records {
        *brands.entry(record.brand.as_str()).or_default() += 1;
        *flavors.entry(record.flavor.as_str()).or_default() += 1;
    }

    let mut brands: Vec<BrandCount> = brands
        .into_iter()
        .map(|(brand, count)| BrandCount {
            brand: brand.to_string(),
            count,
        })
        .collect();
    brands.sort_by(|a, b| b.count.cmp(&a.count));

    let mut flavors: Vec<FlavorCount> = flavors
        .into_iter()
        .map(|(flavor, count)| FlavorCount {
            flavor: flavor.to_string(),
            count,
        })
        .collect();
    flavors.sort_by(|a, b| b.count.cmp(&a.count));

    StatsSummary {
        total_count,
        total_spent,
        avg_price,
        avg_calories,
        brands,
        flavors,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::gateway::GatewayResult;
    use crate::util::unix_timestamp_ms;

    /// In-memory gateway double; fails any operation touching a record
    /// whose brand equals `fail_brand`.
    #[derive(Default)]
    struct FakeGateway {
        records: Mutex<Vec<PurchaseRecord>>,
        next_id: AtomicI64,
        calls: AtomicU64,
        fail_brand: Option<String>,
    }

    impl FakeGateway {
        fn new() -> Self {
            Self {
                next_id: AtomicI64::new(1),
                ..Self::default()
            }
        }

        fn failing_on(brand: &str) -> Self {
            Self {
                fail_brand: Some(brand.to_string()),
                ..Self::new()
            }
        }

        fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }

        fn remote_error() -> GatewayError {
            GatewayError::Api {
                status: 500,
                message: "simulated remote error".to_string(),
            }
        }
    }

    impl RecordGateway for FakeGateway {
        async fn create(
            &self,
            draft: &RecordDraft,
            owner_id: Option<i64>,
        ) -> GatewayResult<PurchaseRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_brand.as_deref() == Some(draft.brand.as_str()) {
                return Err(Self::remote_error());
            }
            let now = unix_timestamp_ms();
            let record = PurchaseRecord {
                id: RecordId::Server(self.next_id.fetch_add(1, Ordering::SeqCst)),
                brand: draft.brand.clone(),
                flavor: draft.flavor.clone(),
                price: draft.price,
                purchase_date: draft.purchase_date,
                calories: None,
                sugar: None,
                caffeine: None,
                fat: None,
                notes: draft.notes.clone(),
                owner_id,
                sync_state: SyncState::Synced,
                created_at: now,
                updated_at: now,
            };
            self.records.lock().unwrap().push(record.clone());
            Ok(record)
        }

        async fn update(&self, id: i64, patch: &RecordPatch) -> GatewayResult<PurchaseRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut records = self.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|record| record.id == RecordId::Server(id))
                .ok_or(GatewayError::NotFound)?;
            if self.fail_brand.as_deref() == Some(record.brand.as_str()) {
                return Err(Self::remote_error());
            }
            patch.apply_to(record, unix_timestamp_ms());
            Ok(record.clone())
        }

        async fn list(&self, filter: &RecordFilter) -> GatewayResult<Vec<PurchaseRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|record| {
                    filter.owner.is_none() || record.owner_id == filter.owner
                })
                .filter(|record| {
                    filter
                        .brand
                        .as_deref()
                        .map_or(true, |brand| record.brand.contains(brand))
                })
                .cloned()
                .collect())
        }

        async fn get(&self, id: i64) -> GatewayResult<PurchaseRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let records = self.records.lock().unwrap();
            records
                .iter()
                .find(|record| record.id == RecordId::Server(id))
                .cloned()
                .ok_or(GatewayError::NotFound)
        }

        async fn remove(&self, id: i64) -> GatewayResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|record| record.id != RecordId::Server(id));
            if records.len() == before {
                return Err(GatewayError::NotFound);
            }
            Ok(())
        }

        async fn stats(&self, _owner: Option<i64>) -> GatewayResult<StatsSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(compute_local_stats(&self.records.lock().unwrap()))
        }
    }

    fn session() -> Session {
        Session {
            user_id: 1,
            username: "tester".to_string(),
            token: "jwt".to_string(),
        }
    }

    fn draft(brand: &str) -> RecordDraft {
        RecordDraft {
            brand: brand.to_string(),
            flavor: "波霸奶茶".to_string(),
            price: 17.0,
            purchase_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            notes: None,
        }
    }

    fn online_reconciler(gateway: FakeGateway) -> Reconciler<FakeGateway, fn() -> bool> {
        Reconciler::new(
            LocalRecordStore::open_in_memory(),
            gateway,
            Some(session()),
            || true,
        )
    }

    fn offline_reconciler(gateway: FakeGateway) -> Reconciler<FakeGateway, fn() -> bool> {
        Reconciler::new(
            LocalRecordStore::open_in_memory(),
            gateway,
            Some(session()),
            || false,
        )
    }

    #[tokio::test]
    async fn online_create_writes_through_as_synced() {
        let mut reconciler = online_reconciler(FakeGateway::new());
        let committed = reconciler.create(draft("一点点")).await.unwrap();

        assert_eq!(committed.target, CommitTarget::Remote);
        assert_eq!(committed.record.sync_state, SyncState::Synced);
        assert!(!committed.record.id.is_local());
        assert!(reconciler.store().unsynced_only().is_empty());
    }

    #[tokio::test]
    async fn failed_remote_create_degrades_to_local() {
        let mut reconciler = online_reconciler(FakeGateway::failing_on("一点点"));
        let committed = reconciler.create(draft("一点点")).await.unwrap();

        assert_eq!(committed.target, CommitTarget::Local);
        assert_eq!(committed.record.sync_state, SyncState::Local);
        assert!(committed.record.id.is_local());
    }

    #[tokio::test]
    async fn offline_create_then_sync_replays_each_record_once() {
        let online = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&online);
        let mut reconciler = Reconciler::new(
            LocalRecordStore::open_in_memory(),
            FakeGateway::new(),
            Some(session()),
            move || flag.load(Ordering::SeqCst),
        );

        let first = reconciler.create(draft("一点点")).await.unwrap();
        let second = reconciler.create(draft("CoCo")).await.unwrap();
        assert_eq!(first.target, CommitTarget::Local);
        assert_eq!(second.target, CommitTarget::Local);
        assert_eq!(reconciler.store().unsynced_only().len(), 2);
        assert_eq!(reconciler.gateway.call_count(), 0);

        // Back online: drain the backlog.
        online.store(true, Ordering::SeqCst);
        let report = reconciler.sync().await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.synced, 2);
        assert!(report.is_success());

        // Two creates plus the post-sync refresh list.
        assert_eq!(reconciler.gateway.call_count(), 3);
        assert!(reconciler.store().unsynced_only().is_empty());
        for record in reconciler.store().list() {
            assert!(!record.id.is_local());
            assert_eq!(record.owner_id, Some(1));
        }
        assert!(reconciler.store().last_sync().is_some());
    }

    #[tokio::test]
    async fn filtered_online_list_does_not_prune_the_cache() {
        let mut reconciler = online_reconciler(FakeGateway::new());
        reconciler.create(draft("一点点")).await.unwrap();
        reconciler.create(draft("CoCo")).await.unwrap();
        assert_eq!(reconciler.store().list().len(), 2);

        // The remote answers a filtered read with a partial view.
        let filter = RecordFilter {
            brand: Some("一点点".to_string()),
            ..RecordFilter::default()
        };
        reconciler.list(&filter).await.unwrap();

        // Both synced records stay cached for offline reads.
        assert_eq!(reconciler.store().list().len(), 2);
        assert_eq!(reconciler.gateway.records.lock().unwrap().len(), 2);

        // A full read still refreshes the whole cache.
        let all = reconciler.list(&RecordFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn sync_with_zero_unsynced_makes_no_network_call() {
        let mut reconciler = online_reconciler(FakeGateway::new());
        let report = reconciler.sync().await.unwrap();

        assert_eq!(report.total, 0);
        assert_eq!(report.synced, 0);
        assert!(report.is_success());
        assert_eq!(reconciler.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn partial_batch_failure_reports_per_record() {
        // Seed two local records offline, then sync with B failing.
        let mut reconciler = Reconciler::new(
            LocalRecordStore::open_in_memory(),
            FakeGateway::failing_on("坏品牌"),
            Some(session()),
            || true,
        );
        // Bypass the remote path to stage unsynced records.
        reconciler.store.append(draft("一点点"), None).unwrap();
        reconciler.store.append(draft("坏品牌"), None).unwrap();

        let report = reconciler.sync().await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.is_success());

        let remaining = reconciler.store().unsynced_only();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].brand, "坏品牌");
        assert_eq!(remaining[0].sync_state, SyncState::Local);
    }

    #[tokio::test]
    async fn updating_a_local_id_record_never_calls_remote() {
        let mut reconciler = online_reconciler(FakeGateway::new());
        reconciler.store.append(draft("茶百道"), None).unwrap();
        let local_id = reconciler.store().unsynced_only()[0].id.clone();

        let patch = RecordPatch {
            price: Some(19.0),
            ..RecordPatch::default()
        };
        let committed = reconciler.update(&local_id, patch).await.unwrap();

        assert_eq!(committed.target, CommitTarget::Local);
        assert_eq!(committed.record.price, 19.0);
        assert_eq!(reconciler.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn failed_remote_update_degrades_and_resyncs_later() {
        let gateway = FakeGateway::new();
        let mut reconciler = online_reconciler(gateway);
        let committed = reconciler.create(draft("霸王茶姬")).await.unwrap();
        let id = committed.record.id.clone();

        // Make the next update fail remotely.
        reconciler.gateway.fail_brand = Some("霸王茶姬".to_string());
        let patch = RecordPatch {
            price: Some(20.0),
            ..RecordPatch::default()
        };
        let committed = reconciler.update(&id, patch).await.unwrap();
        assert_eq!(committed.target, CommitTarget::Local);
        assert_eq!(committed.record.price, 20.0);
        assert_eq!(committed.record.sync_state, SyncState::Local);

        // The corrective pass replays it via update, not create.
        reconciler.gateway.fail_brand = None;
        let report = reconciler.sync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(reconciler.gateway.records.lock().unwrap().len(), 1);
        let synced = reconciler.store().get(&id).unwrap();
        assert_eq!(synced.sync_state, SyncState::Synced);
        assert_eq!(synced.price, 20.0);
    }

    #[tokio::test]
    async fn sync_requires_identity_and_network() {
        let mut anonymous = Reconciler::new(
            LocalRecordStore::open_in_memory(),
            FakeGateway::new(),
            None,
            (|| true) as fn() -> bool,
        );
        assert!(matches!(
            anonymous.sync().await,
            Err(SyncError::NoIdentity)
        ));

        let mut offline = offline_reconciler(FakeGateway::new());
        offline.store.append(draft("一点点"), None).unwrap();
        assert!(matches!(offline.sync().await, Err(SyncError::Offline)));
        assert_eq!(offline.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn enrich_skips_update_when_nothing_extracted() {
        let mut reconciler = online_reconciler(FakeGateway::new());
        let committed = reconciler.create(draft("一点点")).await.unwrap();
        let id = committed.record.id.clone();

        assert!(reconciler.enrich(&id, "聊点别的").await.unwrap().is_none());

        let committed = reconciler
            .enrich(&id, "热量：320大卡\n含糖量：35克")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(committed.record.calories, Some(320));
        assert_eq!(committed.record.sugar, Some(35.0));
    }

    #[test]
    fn local_stats_histograms_are_count_descending() {
        let mut store = LocalRecordStore::open_in_memory();
        store.append(draft("一点点"), None).unwrap();
        store.append(draft("一点点"), None).unwrap();
        store.append(draft("CoCo"), None).unwrap();

        let summary = compute_local_stats(store.list());
        assert_eq!(summary.total_count, 3);
        assert_eq!(summary.total_spent, 51.0);
        assert_eq!(summary.avg_price, 17.0);
        assert_eq!(summary.brands[0].brand, "一点点");
        assert_eq!(summary.brands[0].count, 2);
    }
}

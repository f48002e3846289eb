//! Purchase record model

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Namespace prefix for locally generated temporary ids.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Identifier for a purchase record.
///
/// Server-assigned ids are numeric; records created offline carry a
/// namespaced temporary id until a sync replaces it. The two are
/// distinguishable both in memory and in the persisted JSON (number vs
/// string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Id assigned by the remote store on create.
    Server(i64),
    /// Temporary id assigned by the local store, `local-<uuid>`.
    Local(String),
}

impl RecordId {
    /// Generate a fresh temporary id using UUID v7 (time-sortable).
    #[must_use]
    pub fn new_local() -> Self {
        Self::Local(format!("{}{}", LOCAL_ID_PREFIX, Uuid::now_v7()))
    }

    /// Whether this id was generated locally and never confirmed remotely.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// The server-assigned numeric id, when present.
    #[must_use]
    pub const fn server_id(&self) -> Option<i64> {
        match self {
            Self::Server(id) => Some(*id),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Local(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<i64>() {
            return Ok(Self::Server(id));
        }
        if s.starts_with(LOCAL_ID_PREFIX) {
            return Ok(Self::Local(s.to_string()));
        }
        Err(Error::InvalidInput(format!("invalid record id: {s}")))
    }
}

/// Whether the remote store has confirmed a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Exists only in the client store.
    Local,
    /// Confirmed by the remote store under a server-assigned id.
    Synced,
}

/// A milk-tea purchase record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub id: RecordId,
    pub brand: String,
    pub flavor: String,
    /// Price in yuan, non-negative.
    pub price: f64,
    /// Calendar date of the purchase (no time component).
    pub purchase_date: NaiveDate,
    /// Energy in kcal, filled by a later nutrition lookup.
    #[serde(default)]
    pub calories: Option<u32>,
    /// Sugar in grams.
    #[serde(default)]
    pub sugar: Option<f64>,
    /// Caffeine in milligrams.
    #[serde(default)]
    pub caffeine: Option<f64>,
    /// Fat in grams.
    #[serde(default)]
    pub fat: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Owning user; absent for anonymous/local-only records.
    #[serde(default)]
    pub owner_id: Option<i64>,
    pub sync_state: SyncState,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl PurchaseRecord {
    /// Invariant check: a synced record always carries a server id.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        match self.sync_state {
            SyncState::Synced => !self.id.is_local(),
            SyncState::Local => true,
        }
    }
}

/// A candidate record produced by the field extractor or direct entry,
/// not yet persisted anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    pub brand: String,
    pub flavor: String,
    pub price: f64,
    pub purchase_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordDraft {
    /// Validate the draft before any persistence.
    ///
    /// Rejected drafts are never retried automatically.
    pub fn validate(&self) -> Result<(), Error> {
        if self.brand.trim().is_empty() {
            return Err(Error::InvalidInput("brand must not be empty".to_string()));
        }
        if self.flavor.trim().is_empty() {
            return Err(Error::InvalidInput("flavor must not be empty".to_string()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(Error::InvalidInput(format!(
                "price must be a non-negative number, got {}",
                self.price
            )));
        }
        Ok(())
    }
}

/// Partial update: omitted fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caffeine: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RecordPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.brand.is_none()
            && self.flavor.is_none()
            && self.price.is_none()
            && self.purchase_date.is_none()
            && self.calories.is_none()
            && self.sugar.is_none()
            && self.caffeine.is_none()
            && self.fat.is_none()
            && self.notes.is_none()
    }

    /// Validate the provided fields.
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(brand) = &self.brand {
            if brand.trim().is_empty() {
                return Err(Error::InvalidInput("brand must not be empty".to_string()));
            }
        }
        if let Some(flavor) = &self.flavor {
            if flavor.trim().is_empty() {
                return Err(Error::InvalidInput("flavor must not be empty".to_string()));
            }
        }
        if let Some(price) = self.price {
            if !price.is_finite() || price < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "price must be a non-negative number, got {price}"
                )));
            }
        }
        Ok(())
    }

    /// Merge the provided fields into `record` and bump its update time.
    pub fn apply_to(&self, record: &mut PurchaseRecord, now_ms: i64) {
        if let Some(brand) = &self.brand {
            record.brand = brand.clone();
        }
        if let Some(flavor) = &self.flavor {
            record.flavor = flavor.clone();
        }
        if let Some(price) = self.price {
            record.price = price;
        }
        if let Some(purchase_date) = self.purchase_date {
            record.purchase_date = purchase_date;
        }
        if let Some(calories) = self.calories {
            record.calories = Some(calories);
        }
        if let Some(sugar) = self.sugar {
            record.sugar = Some(sugar);
        }
        if let Some(caffeine) = self.caffeine {
            record.caffeine = Some(caffeine);
        }
        if let Some(fat) = self.fat {
            record.fat = Some(fat);
        }
        if let Some(notes) = &self.notes {
            record.notes = Some(notes.clone());
        }
        record.updated_at = now_ms;
    }
}

/// Nutrition fields pulled from a model answer; any subset may be present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionFacts {
    pub calories: Option<u32>,
    pub sugar: Option<f64>,
    pub caffeine: Option<f64>,
    pub fat: Option<f64>,
}

impl NutritionFacts {
    /// No field present: the caller must not issue an update.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.calories.is_none()
            && self.sugar.is_none()
            && self.caffeine.is_none()
            && self.fat.is_none()
    }

    /// Convert to a record patch carrying only the present fields.
    #[must_use]
    pub fn into_patch(self) -> RecordPatch {
        RecordPatch {
            calories: self.calories,
            sugar: self.sugar,
            caffeine: self.caffeine,
            fat: self.fat,
            ..RecordPatch::default()
        }
    }
}

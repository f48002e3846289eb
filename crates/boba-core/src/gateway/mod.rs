//! Remote record gateway.
//!
//! Thin request/response mapping to the remote CRUD API. The gateway
//! performs no retries and no fallback of its own — every failure
//! surfaces as a typed error and retry policy lives in the reconciler.

mod auth;

use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use auth::AuthClient;

use crate::models::{PurchaseRecord, RecordDraft, RecordId, RecordPatch, SyncState};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Failures a remote call can surface.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfiguration(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Record not found on remote")]
    NotFound,
    #[error("Remote API error: {message} ({status})")]
    Api { status: u16, message: String },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Sort keys the remote list endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Brand,
    Flavor,
    Price,
    PurchaseDate,
    Calories,
}

impl SortKey {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Brand => "brand",
            Self::Flavor => "flavor",
            Self::Price => "price",
            Self::PurchaseDate => "purchaseDate",
            Self::Calories => "calories",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Filter for the remote list endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub owner: Option<i64>,
    /// Substring match on brand.
    pub brand: Option<String>,
    /// Substring match on flavor.
    pub flavor: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sort: Option<SortKey>,
    pub order: Option<SortOrder>,
}

impl RecordFilter {
    /// Whether the filter narrows the result beyond owner scoping, in
    /// which case a response is a partial view of the remote store.
    #[must_use]
    pub const fn is_scoped(&self) -> bool {
        self.brand.is_some()
            || self.flavor.is_some()
            || self.start_date.is_some()
            || self.end_date.is_some()
    }

    /// Query pairs in the wire shape; unset fields are omitted.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(owner) = self.owner {
            pairs.push(("owner", owner.to_string()));
        }
        if let Some(brand) = &self.brand {
            pairs.push(("brand", brand.clone()));
        }
        if let Some(flavor) = &self.flavor {
            pairs.push(("flavor", flavor.clone()));
        }
        if let Some(start_date) = self.start_date {
            pairs.push(("startDate", start_date.to_string()));
        }
        if let Some(end_date) = self.end_date {
            pairs.push(("endDate", end_date.to_string()));
        }
        if let Some(sort) = self.sort {
            pairs.push(("sort", sort.as_str().to_string()));
        }
        if let Some(order) = self.order {
            pairs.push(("order", order.as_str().to_string()));
        }
        pairs
    }
}

/// Aggregate statistics from the remote store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_count: u64,
    pub total_spent: f64,
    pub avg_price: f64,
    #[serde(default)]
    pub avg_calories: Option<f64>,
    #[serde(default)]
    pub brands: Vec<BrandCount>,
    #[serde(default)]
    pub flavors: Vec<FlavorCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandCount {
    pub brand: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorCount {
    pub flavor: String,
    pub count: u64,
}

/// CRUD over the network boundary, scoped by the identity the gateway
/// was constructed with. The trait seam exists so the reconciler can be
/// exercised against an in-memory fake.
pub trait RecordGateway {
    fn create(
        &self,
        draft: &RecordDraft,
        owner_id: Option<i64>,
    ) -> impl std::future::Future<Output = GatewayResult<PurchaseRecord>> + Send;

    fn update(
        &self,
        id: i64,
        patch: &RecordPatch,
    ) -> impl std::future::Future<Output = GatewayResult<PurchaseRecord>> + Send;

    fn list(
        &self,
        filter: &RecordFilter,
    ) -> impl std::future::Future<Output = GatewayResult<Vec<PurchaseRecord>>> + Send;

    fn get(&self, id: i64) -> impl std::future::Future<Output = GatewayResult<PurchaseRecord>> + Send;

    fn remove(&self, id: i64) -> impl std::future::Future<Output = GatewayResult<()>> + Send;

    fn stats(
        &self,
        owner: Option<i64>,
    ) -> impl std::future::Future<Output = GatewayResult<StatsSummary>> + Send;
}

/// Record object as the wire carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    id: i64,
    brand: String,
    flavor: String,
    price: f64,
    purchase_date: NaiveDate,
    #[serde(default)]
    calories: Option<u32>,
    #[serde(default)]
    sugar: Option<f64>,
    #[serde(default)]
    caffeine: Option<f64>,
    #[serde(default)]
    fat: Option<f64>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    owner_id: Option<i64>,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    updated_at: i64,
}

impl From<WireRecord> for PurchaseRecord {
    fn from(wire: WireRecord) -> Self {
        Self {
            id: RecordId::Server(wire.id),
            brand: wire.brand,
            flavor: wire.flavor,
            price: wire.price,
            purchase_date: wire.purchase_date,
            calories: wire.calories,
            sugar: wire.sugar,
            caffeine: wire.caffeine,
            fat: wire.fat,
            notes: wire.notes,
            owner_id: wire.owner_id,
            sync_state: SyncState::Synced,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewRecordBody<'a> {
    brand: &'a str,
    flavor: &'a str,
    price: f64,
    purchase_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_id: Option<i64>,
}

/// HTTP implementation of [`RecordGateway`].
#[derive(Debug, Clone)]
pub struct HttpRecordGateway {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpRecordGateway {
    /// Build a gateway against `base_url`, attaching `token` as a
    /// bearer credential when present.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> GatewayResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client: reqwest::Client::builder().build()?,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn expect_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> GatewayResult<T> {
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

impl RecordGateway for HttpRecordGateway {
    async fn create(
        &self,
        draft: &RecordDraft,
        owner_id: Option<i64>,
    ) -> GatewayResult<PurchaseRecord> {
        let body = NewRecordBody {
            brand: &draft.brand,
            flavor: &draft.flavor,
            price: draft.price,
            purchase_date: draft.purchase_date,
            notes: draft.notes.as_deref(),
            owner_id,
        };
        let response = self
            .request(reqwest::Method::POST, "/records")
            .json(&body)
            .send()
            .await?;
        let wire: WireRecord = Self::expect_json(response).await?;
        Ok(wire.into())
    }

    async fn update(&self, id: i64, patch: &RecordPatch) -> GatewayResult<PurchaseRecord> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/records/{id}"))
            .json(patch)
            .send()
            .await?;
        let wire: WireRecord = Self::expect_json(response).await?;
        Ok(wire.into())
    }

    async fn list(&self, filter: &RecordFilter) -> GatewayResult<Vec<PurchaseRecord>> {
        let response = self
            .request(reqwest::Method::GET, "/records")
            .query(&filter.query_pairs())
            .send()
            .await?;
        let wire: Vec<WireRecord> = Self::expect_json(response).await?;
        Ok(wire.into_iter().map(Into::into).collect())
    }

    async fn get(&self, id: i64) -> GatewayResult<PurchaseRecord> {
        let response = self
            .request(reqwest::Method::GET, &format!("/records/{id}"))
            .send()
            .await?;
        let wire: WireRecord = Self::expect_json(response).await?;
        Ok(wire.into())
    }

    async fn remove(&self, id: i64) -> GatewayResult<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/records/{id}"))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn stats(&self, owner: Option<i64>) -> GatewayResult<StatsSummary> {
        let mut request = self.request(reqwest::Method::GET, "/records/stats/summary");
        if let Some(owner) = owner {
            request = request.query(&[("owner", owner.to_string())]);
        }
        let response = request.send().await?;
        Self::expect_json(response).await
    }
}

/// Map a non-2xx response to a typed error, consuming the body.
pub(crate) async fn check_status(response: reqwest::Response) -> GatewayResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = parse_api_error(status, &body);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized(message),
        StatusCode::NOT_FOUND => GatewayError::NotFound,
        _ => GatewayError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Extract a human-readable message from an `{"error": …}` body.
pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

pub(crate) fn normalize_base_url(raw: String) -> GatewayResult<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        GatewayError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(GatewayError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn filter_query_pairs_follow_wire_shape() {
        let filter = RecordFilter {
            owner: Some(3),
            brand: Some("一点点".to_string()),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            sort: Some(SortKey::PurchaseDate),
            order: Some(SortOrder::Desc),
            ..RecordFilter::default()
        };
        assert_eq!(
            filter.query_pairs(),
            vec![
                ("owner", "3".to_string()),
                ("brand", "一点点".to_string()),
                ("startDate", "2024-01-01".to_string()),
                ("sort", "purchaseDate".to_string()),
                ("order", "desc".to_string()),
            ]
        );
        assert!(RecordFilter::default().query_pairs().is_empty());
    }

    #[test]
    fn wire_record_maps_to_synced_record() {
        let payload = r#"
        {
          "id": 12,
          "brand": "CoCo",
          "flavor": "珍珠奶茶",
          "price": 15.5,
          "purchaseDate": "2024-03-15",
          "calories": 320,
          "ownerId": 3,
          "createdAt": 1710000000000,
          "updatedAt": 1710000000000
        }
        "#;
        let record: PurchaseRecord = serde_json::from_str::<WireRecord>(payload).unwrap().into();
        assert_eq!(record.id, RecordId::Server(12));
        assert_eq!(record.sync_state, SyncState::Synced);
        assert_eq!(record.price, 15.5);
        assert_eq!(record.owner_id, Some(3));
    }

    #[test]
    fn parse_api_error_prefers_error_field() {
        let message = parse_api_error(
            StatusCode::CONFLICT,
            r#"{"error": "username already taken"}"#,
        );
        assert_eq!(message, "username already taken (409)");
    }

    #[test]
    fn parse_api_error_falls_back_to_body_text() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, ""),
            "HTTP 502".to_string()
        );
        assert_eq!(
            parse_api_error(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            "boom (500)".to_string()
        );
    }
}

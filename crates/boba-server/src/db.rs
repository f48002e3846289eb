//! SQLite persistence for users and purchase records.

use chrono::{NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, ErrorCode};
use serde::Serialize;

use crate::error::AppError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    email         TEXT UNIQUE,
    last_login    INTEGER,
    created_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    brand         TEXT NOT NULL,
    flavor        TEXT NOT NULL,
    price         REAL NOT NULL,
    purchase_date TEXT NOT NULL,
    calories      INTEGER,
    sugar         REAL,
    caffeine      REAL,
    fat           REAL,
    notes         TEXT,
    owner_id      INTEGER REFERENCES users(id),
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_purchase_date ON records(purchase_date);
CREATE INDEX IF NOT EXISTS idx_records_owner ON records(owner_id);
";

const RECORD_COLUMNS: &str = "id, brand, flavor, price, purchase_date, calories, sugar, \
                              caffeine, fat, notes, owner_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
}

/// A stored purchase record, serialized in the wire shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRow {
    pub id: i64,
    pub brand: String,
    pub flavor: String,
    pub price: f64,
    pub purchase_date: NaiveDate,
    pub calories: Option<u32>,
    pub sugar: Option<f64>,
    pub caffeine: Option<f64>,
    pub fat: Option<f64>,
    pub notes: Option<String>,
    pub owner_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub brand: String,
    pub flavor: String,
    pub price: f64,
    pub purchase_date: NaiveDate,
    pub calories: Option<u32>,
    pub sugar: Option<f64>,
    pub caffeine: Option<f64>,
    pub fat: Option<f64>,
    pub notes: Option<String>,
    pub owner_id: Option<i64>,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct RecordChanges {
    pub brand: Option<String>,
    pub flavor: Option<String>,
    pub price: Option<f64>,
    pub purchase_date: Option<NaiveDate>,
    pub calories: Option<u32>,
    pub sugar: Option<f64>,
    pub caffeine: Option<f64>,
    pub fat: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Owner whose records are visible alongside ownerless ones;
    /// `None` restricts the view to ownerless records.
    pub visible_to: Option<i64>,
    /// Narrow the view to records owned by exactly this user,
    /// intersected with visibility.
    pub owned_by: Option<i64>,
    pub brand: Option<String>,
    pub flavor: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_count: u64,
    pub total_spent: f64,
    pub avg_price: f64,
    pub avg_calories: Option<f64>,
    pub brands: Vec<BrandCount>,
    pub flavors: Vec<FlavorCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrandCount {
    pub brand: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlavorCount {
    pub flavor: String,
    pub count: u64,
}

/// Handle to the SQLite database; cloning shares the connection.
#[derive(Clone)]
pub struct Db {
    conn: tokio_rusqlite::Connection,
}

impl Db {
    pub async fn open(path: &str) -> Result<Self, AppError> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    pub async fn open_in_memory() -> Result<Self, AppError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), AppError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn create_user(
        &self,
        username: String,
        password_hash: String,
        email: Option<String>,
    ) -> Result<UserRow, AppError> {
        let now = Utc::now().timestamp_millis();
        let result = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (username, password_hash, email, last_login, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                    params![username, password_hash, email, now, now],
                )?;
                let id = conn.last_insert_rowid();
                Ok(UserRow {
                    id,
                    username,
                    password_hash,
                    email,
                })
            })
            .await;

        result.map_err(map_user_conflict)
    }

    pub async fn find_user_by_username(
        &self,
        username: String,
    ) -> Result<Option<UserRow>, AppError> {
        let user = self
            .conn
            .call(move |conn| {
                let result = conn.query_row(
                    "SELECT id, username, password_hash, email FROM users WHERE username = ?",
                    params![username],
                    parse_user,
                );
                match result {
                    Ok(user) => Ok(Some(user)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(error) => Err(error.into()),
                }
            })
            .await?;
        Ok(user)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<UserRow>, AppError> {
        let user = self
            .conn
            .call(move |conn| {
                let result = conn.query_row(
                    "SELECT id, username, password_hash, email FROM users WHERE id = ?",
                    params![id],
                    parse_user,
                );
                match result {
                    Ok(user) => Ok(Some(user)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(error) => Err(error.into()),
                }
            })
            .await?;
        Ok(user)
    }

    pub async fn touch_last_login(&self, id: i64) -> Result<(), AppError> {
        let now = Utc::now().timestamp_millis();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE users SET last_login = ? WHERE id = ?",
                    params![now, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn insert_record(&self, record: NewRecord) -> Result<RecordRow, AppError> {
        let now = Utc::now().timestamp_millis();
        let row = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO records (brand, flavor, price, purchase_date, calories, sugar,
                                          caffeine, fat, notes, owner_id, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        record.brand,
                        record.flavor,
                        record.price,
                        record.purchase_date.to_string(),
                        record.calories,
                        record.sugar,
                        record.caffeine,
                        record.fat,
                        record.notes,
                        record.owner_id,
                        now,
                        now
                    ],
                )?;
                let id = conn.last_insert_rowid();
                conn.query_row(
                    &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"),
                    params![id],
                    parse_record,
                )
                .map_err(Into::into)
            })
            .await?;
        Ok(row)
    }

    pub async fn get_record(&self, id: i64) -> Result<Option<RecordRow>, AppError> {
        let row = self
            .conn
            .call(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"),
                    params![id],
                    parse_record,
                );
                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(error) => Err(error.into()),
                }
            })
            .await?;
        Ok(row)
    }

    /// Apply a partial update; returns the updated row, or `None` when
    /// the record does not exist.
    pub async fn update_record(
        &self,
        id: i64,
        changes: RecordChanges,
    ) -> Result<Option<RecordRow>, AppError> {
        let now = Utc::now().timestamp_millis();
        let row = self
            .conn
            .call(move |conn| {
                let existing = conn.query_row(
                    &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"),
                    params![id],
                    parse_record,
                );
                let mut row = match existing {
                    Ok(row) => row,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(error) => return Err(error.into()),
                };

                if let Some(brand) = changes.brand {
                    row.brand = brand;
                }
                if let Some(flavor) = changes.flavor {
                    row.flavor = flavor;
                }
                if let Some(price) = changes.price {
                    row.price = price;
                }
                if let Some(purchase_date) = changes.purchase_date {
                    row.purchase_date = purchase_date;
                }
                if let Some(calories) = changes.calories {
                    row.calories = Some(calories);
                }
                if let Some(sugar) = changes.sugar {
                    row.sugar = Some(sugar);
                }
                if let Some(caffeine) = changes.caffeine {
                    row.caffeine = Some(caffeine);
                }
                if let Some(fat) = changes.fat {
                    row.fat = Some(fat);
                }
                if let Some(notes) = changes.notes {
                    row.notes = Some(notes);
                }
                row.updated_at = now;

                conn.execute(
                    "UPDATE records SET brand = ?, flavor = ?, price = ?, purchase_date = ?,
                                        calories = ?, sugar = ?, caffeine = ?, fat = ?,
                                        notes = ?, updated_at = ?
                     WHERE id = ?",
                    params![
                        row.brand,
                        row.flavor,
                        row.price,
                        row.purchase_date.to_string(),
                        row.calories,
                        row.sugar,
                        row.caffeine,
                        row.fat,
                        row.notes,
                        row.updated_at,
                        id
                    ],
                )?;
                Ok(Some(row))
            })
            .await?;
        Ok(row)
    }

    pub async fn delete_record(&self, id: i64) -> Result<bool, AppError> {
        let deleted = self
            .conn
            .call(move |conn| {
                let affected = conn.execute("DELETE FROM records WHERE id = ?", params![id])?;
                Ok(affected > 0)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn list_records(&self, query: RecordQuery) -> Result<Vec<RecordRow>, AppError> {
        let rows = self
            .conn
            .call(move |conn| {
                let (where_clause, params) = build_filter(&query);
                let order_clause = build_order(query.sort.as_deref(), query.order.as_deref());
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE {where_clause} ORDER BY {order_clause}"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params), parse_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn stats(
        &self,
        visible_to: Option<i64>,
        owned_by: Option<i64>,
    ) -> Result<StatsSummary, AppError> {
        let summary = self
            .conn
            .call(move |conn| {
                let query = RecordQuery {
                    visible_to,
                    owned_by,
                    ..RecordQuery::default()
                };
                let (where_clause, params) = build_filter(&query);

                let (total_count, total_spent, avg_price, avg_calories) = conn.query_row(
                    &format!(
                        "SELECT COUNT(*), COALESCE(SUM(price), 0), COALESCE(AVG(price), 0),
                                AVG(calories)
                         FROM records WHERE {where_clause}"
                    ),
                    params_from_iter(params.clone()),
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, f64>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, Option<f64>>(3)?,
                        ))
                    },
                )?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT brand, COUNT(*) AS count FROM records WHERE {where_clause}
                     GROUP BY brand ORDER BY count DESC"
                ))?;
                let brands = stmt
                    .query_map(params_from_iter(params.clone()), |row| {
                        Ok(BrandCount {
                            brand: row.get(0)?,
                            count: row.get::<_, i64>(1)?.unsigned_abs(),
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT flavor, COUNT(*) AS count FROM records WHERE {where_clause}
                     GROUP BY flavor ORDER BY count DESC"
                ))?;
                let flavors = stmt
                    .query_map(params_from_iter(params), |row| {
                        Ok(FlavorCount {
                            flavor: row.get(0)?,
                            count: row.get::<_, i64>(1)?.unsigned_abs(),
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(StatsSummary {
                    total_count: total_count.unsigned_abs(),
                    total_spent,
                    avg_price,
                    avg_calories,
                    brands,
                    flavors,
                })
            })
            .await?;
        Ok(summary)
    }
}

fn parse_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        email: row.get(3)?,
    })
}

fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    let date: String = row.get(4)?;
    let purchase_date = date.parse::<NaiveDate>().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(error))
    })?;

    Ok(RecordRow {
        id: row.get(0)?,
        brand: row.get(1)?,
        flavor: row.get(2)?,
        price: row.get(3)?,
        purchase_date,
        calories: row.get(5)?,
        sugar: row.get(6)?,
        caffeine: row.get(7)?,
        fat: row.get(8)?,
        notes: row.get(9)?,
        owner_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// WHERE clause plus positional parameters for a record query.
fn build_filter(query: &RecordQuery) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    match query.visible_to {
        Some(owner) => {
            clauses.push("(owner_id IS NULL OR owner_id = ?)".to_string());
            params.push(Value::Integer(owner));
        }
        None => clauses.push("owner_id IS NULL".to_string()),
    }
    if let Some(owner) = query.owned_by {
        clauses.push("owner_id = ?".to_string());
        params.push(Value::Integer(owner));
    }
    if let Some(brand) = &query.brand {
        clauses.push("brand LIKE ?".to_string());
        params.push(Value::Text(format!("%{brand}%")));
    }
    if let Some(flavor) = &query.flavor {
        clauses.push("flavor LIKE ?".to_string());
        params.push(Value::Text(format!("%{flavor}%")));
    }
    if let Some(start) = query.start_date {
        clauses.push("purchase_date >= ?".to_string());
        params.push(Value::Text(start.to_string()));
    }
    if let Some(end) = query.end_date {
        clauses.push("purchase_date <= ?".to_string());
        params.push(Value::Text(end.to_string()));
    }

    (clauses.join(" AND "), params)
}

/// Whitelisted sort keys; anything else falls back to the default of
/// purchase date descending.
fn build_order(sort: Option<&str>, order: Option<&str>) -> String {
    let column = match sort {
        Some("brand") => "brand",
        Some("flavor") => "flavor",
        Some("price") => "price",
        Some("purchaseDate") => "purchase_date",
        Some("calories") => "calories",
        _ => return "purchase_date DESC".to_string(),
    };
    let direction = if order == Some("desc") { "DESC" } else { "ASC" };
    format!("{column} {direction}")
}

fn map_user_conflict(error: tokio_rusqlite::Error) -> AppError {
    if let tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, Some(message))) =
        &error
    {
        if failure.code == ErrorCode::ConstraintViolation {
            if message.contains("users.username") {
                return AppError::Conflict("username is already taken".to_string());
            }
            if message.contains("users.email") {
                return AppError::Conflict("email is already in use".to_string());
            }
        }
    }
    error.into()
}

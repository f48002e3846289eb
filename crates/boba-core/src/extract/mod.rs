//! Free-text field extraction.
//!
//! Parses a block of text (human input or a model's markdown answer)
//! into a candidate purchase record, and a model's nutrition answer
//! into optional enrichment fields. Pure functions of their input; the
//! current date is injected by the caller so defaulting is testable.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // calories fit in u32

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::models::{NutritionFacts, RecordDraft};

/// Label alternatives per field, highest priority first. For every
/// label the markdown-bold form (`**label**: value`) is tried before
/// the plain form (`label: value`); the first match wins and fields
/// are matched independently of each other.
const BRAND_LABELS: &[&str] = &["奶茶品牌", "品牌", "brand"];
const FLAVOR_LABELS: &[&str] = &["奶茶口味", "口味", "flavor", "flavour"];
const PRICE_LABELS: &[&str] = &["奶茶价格", "价格", "price"];
const DATE_LABELS: &[&str] = &[
    "奶茶日期",
    "购买日期",
    "日期",
    "时间",
    "购买时间",
    "消费日期",
    "交易日期",
    "purchase date",
    "date",
];

/// Extract a candidate record from free text.
///
/// Brand, flavor, and price are all required; if any is missing the
/// whole parse fails and the caller must surface a "could not parse"
/// notification. A missing or unparseable date falls back to `today`
/// rather than blocking record creation.
#[must_use]
pub fn extract_record(text: &str, today: NaiveDate) -> Option<RecordDraft> {
    let brand = labeled_field(text, BRAND_LABELS)?;
    let flavor = labeled_field(text, FLAVOR_LABELS)?;
    let price = parse_price(&labeled_field(text, PRICE_LABELS)?)?;

    let purchase_date = labeled_field(text, DATE_LABELS)
        .map_or(today, |raw| normalize_purchase_date(&raw, today));

    Some(RecordDraft {
        brand,
        flavor,
        price,
        purchase_date,
        notes: None,
    })
}

/// Normalize a heterogeneous date string to a calendar date.
///
/// Candidate formats are tried in a fixed priority order and the first
/// valid calendar date wins: yearless partial dates (`M月D日`, `M-D`,
/// `M/D`, current year assumed), then absolute dates (`YYYY年MM月DD日`,
/// `YYYY-MM-DD`, `YYYY/MM/DD`). Anything else yields `today` — record
/// creation is never blocked on an unparseable date.
#[must_use]
pub fn normalize_purchase_date(raw: &str, today: NaiveDate) -> NaiveDate {
    let raw = raw.trim();

    let partial = Regex::new(r"^(\d{1,2})[月/\-](\d{1,2})日?$").expect("Invalid regex");
    if let Some(caps) = partial.captures(raw) {
        let month: u32 = caps[1].parse().unwrap_or(0);
        let day: u32 = caps[2].parse().unwrap_or(0);
        if let Some(date) = NaiveDate::from_ymd_opt(today.year(), month, day) {
            return date;
        }
        tracing::debug!(raw, "partial date out of range, falling back to today");
        return today;
    }

    const FORMATS: &[&str] = &["%Y年%m月%d日", "%Y-%m-%d", "%Y/%m/%d"];
    for format in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date;
        }
    }

    tracing::debug!(raw, "unrecognized date, falling back to today");
    today
}

/// Extract nutrition enrichment fields from a model answer.
///
/// Each field is matched independently; any subset may be present. An
/// entirely empty result means the caller must not issue an update.
#[must_use]
pub fn extract_nutrition(text: &str) -> NutritionFacts {
    NutritionFacts {
        calories: numeric_field(text, &["热量", "calories"]).map(|value| value as u32),
        sugar: numeric_field(text, &["含糖量", "糖分", "sugar"]),
        caffeine: numeric_field(text, &["咖啡因", "caffeine"]),
        fat: numeric_field(text, &["脂肪", "fat"]),
    }
}

/// First matching labeled value in `text`, per the rule order above.
fn labeled_field(text: &str, labels: &[&str]) -> Option<String> {
    for label in labels {
        for pattern in [
            format!(r"\*\*{label}\*\*\s*[：:]\s*([^\n]+)"),
            format!(r"{label}\s*[：:]\s*([^\n]+)"),
        ] {
            let re = Regex::new(&pattern).expect("Invalid regex");
            if let Some(caps) = re.captures(text) {
                let value = caps[1].trim().to_string();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Parse a price string, tolerating currency markers (`15.5元`, `¥15`).
fn parse_price(raw: &str) -> Option<f64> {
    let re = Regex::new(r"(\d+(?:\.\d+)?)").expect("Invalid regex");
    let caps = re.captures(raw)?;
    caps[1].parse::<f64>().ok().filter(|price| price.is_finite())
}

/// First labeled numeric value in `text`.
fn numeric_field(text: &str, labels: &[&str]) -> Option<f64> {
    for label in labels {
        let pattern = format!(r"{label}[：:]\s*(?:约\s*)?(\d+(?:\.\d+)?)");
        let re = Regex::new(&pattern).expect("Invalid regex");
        if let Some(caps) = re.captures(text) {
            if let Ok(value) = caps[1].parse::<f64>() {
                return Some(value);
            }
        }
    }
    None
}

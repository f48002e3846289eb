//! Record export helpers shared by the CLI output paths.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::models::PurchaseRecord;

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

/// Render records as pretty-printed JSON in the wire shape.
pub fn render_json_export(records: &[PurchaseRecord]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(records)
}

/// Render records as a Markdown table, one row per purchase.
#[must_use]
pub fn render_markdown_export(records: &[PurchaseRecord]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "| 日期 | 品牌 | 口味 | 价格 | 备注 |");
    let _ = writeln!(output, "| --- | --- | --- | --- | --- |");
    for record in records {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {:.2} | {} |",
            record.purchase_date,
            record.brand,
            record.flavor,
            record.price,
            record.notes.as_deref().unwrap_or(""),
        );
    }

    output
}

/// Render records based on the selected export format.
pub fn render_records_export(
    records: &[PurchaseRecord],
    format: ExportFormat,
) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => render_json_export(records),
        ExportFormat::Markdown => Ok(render_markdown_export(records)),
    }
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(format: ExportFormat, timestamp_ms: i64) -> String {
    format!("boba-export-{timestamp_ms}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::{RecordDraft, RecordId, SyncState};

    fn record() -> PurchaseRecord {
        let draft = RecordDraft {
            brand: "一点点".to_string(),
            flavor: "波霸奶茶".to_string(),
            price: 15.5,
            purchase_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            notes: Some("少冰".to_string()),
        };
        PurchaseRecord {
            id: RecordId::Server(7),
            brand: draft.brand,
            flavor: draft.flavor,
            price: draft.price,
            purchase_date: draft.purchase_date,
            calories: None,
            sugar: None,
            caffeine: None,
            fat: None,
            notes: draft.notes,
            owner_id: None,
            sync_state: SyncState::Synced,
            created_at: 123,
            updated_at: 456,
        }
    }

    #[test]
    fn render_markdown_export_emits_one_row_per_record() {
        let rendered = render_markdown_export(&[record()]);
        assert!(rendered.starts_with("| 日期 | 品牌 | 口味 | 价格 | 备注 |"));
        assert!(rendered.contains("| 2024-03-15 | 一点点 | 波霸奶茶 | 15.50 | 少冰 |"));
    }

    #[test]
    fn render_json_export_uses_wire_field_names() {
        let rendered = render_json_export(&[record()]).unwrap();
        assert!(rendered.contains("\"purchaseDate\": \"2024-03-15\""));
        assert!(rendered.contains("\"syncState\": \"synced\""));
    }

    #[test]
    fn suggested_export_file_name_uses_format_extension() {
        assert_eq!(
            suggested_export_file_name(ExportFormat::Json, 123),
            "boba-export-123.json"
        );
        assert_eq!(
            suggested_export_file_name(ExportFormat::Markdown, 456),
            "boba-export-456.md"
        );
    }
}

use chrono::{DateTime, Utc};
use csv::{QuoteStyle, WriterBuilder};

use super::entry::AuditLogEntry;
use super::AuditError;

/// CSV column headers, in output order.
pub const CSV_HEADERS: [&str; 8] = [
    "Timestamp", "Type", "Action", "User", "Role", "Entity", "Details", "Changes",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unsupported export format '{}'", other)),
        }
    }
}

/// A rendered export, ready to be written to disk.
#[derive(Debug, Clone)]
pub struct AuditExport {
    pub file_name: String,
    pub format: ExportFormat,
    pub record_count: usize,
    pub content: String,
}

pub fn file_name(format: ExportFormat, at: DateTime<Utc>) -> String {
    format!("audit-logs-{}.{}", at.format("%Y-%m-%d"), format.extension())
}

pub fn render(entries: &[AuditLogEntry], format: ExportFormat) -> Result<String, AuditError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(entries)?),
        ExportFormat::Csv => render_csv(entries),
    }
}

fn render_csv(entries: &[AuditLogEntry]) -> Result<String, AuditError> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADERS)?;
    for entry in entries {
        let entity = entry
            .entity_name
            .clone()
            .or_else(|| entry.entity_id.clone())
            .unwrap_or_default();
        writer.write_record([
            entry.timestamp.to_rfc3339(),
            entry.entry_type.to_string(),
            entry.action.to_string(),
            entry.user_name.clone(),
            entry.user_role.clone(),
            entity,
            serde_json::to_string(&entry.details)?,
            serde_json::to_string(&entry.changes)?,
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AuditError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AuditError::Export(e.to_string()))
}

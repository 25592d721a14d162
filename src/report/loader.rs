//! Re-loading a written report for selective re-deletion
//!
//! Status and Action cells are historical metadata. They are kept as text and
//! never gate whether a row may be selected again.

use std::path::Path;
use std::sync::Arc;

use crate::criteria::TargetType;
use crate::error::{SweepError, SweepResult};

/// One data row of a loaded report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    columns: Arc<Vec<String>>,
    values: Vec<String>,
}

impl ReportRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index).map(String::as_str)
    }

    /// Set a cell, ignoring unknown columns
    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        if let Some(index) = self.columns.iter().position(|c| c == column) {
            if self.values.len() <= index {
                self.values.resize(index + 1, String::new());
            }
            self.values[index] = value.into();
        }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn mailbox(&self) -> &str {
        self.get("UserPrincipalName").unwrap_or_default().trim()
    }

    /// Backend item id: the ItemId column, else MessageId from older reports
    pub fn item_id(&self) -> Option<&str> {
        self.get("ItemId")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| self.get("MessageId").map(str::trim).filter(|v| !v.is_empty()))
    }

    /// Mailbox and item id, when both are present
    pub fn identity(&self) -> Option<(&str, &str)> {
        let mailbox = self.mailbox();
        if mailbox.is_empty() {
            return None;
        }
        Some((mailbox, self.item_id()?))
    }
}

/// A report file read back into memory
#[derive(Debug, Clone)]
pub struct LoadedReport {
    pub columns: Vec<String>,
    pub rows: Vec<ReportRecord>,
}

impl LoadedReport {
    /// Meeting reports carry a `MeetingGOID` column
    pub fn target(&self) -> TargetType {
        if self.columns.iter().any(|c| c == "MeetingGOID") {
            TargetType::Meeting
        } else {
            TargetType::Email
        }
    }

    /// Indexes of rows matching a selection
    pub fn select(&self, selection: &RowSelection) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| selection.matches(row))
            .map(|(index, _)| index)
            .collect()
    }
}

/// Read a report written by [`CsvReportSink`](super::CsvReportSink)
pub fn load_report(path: impl AsRef<Path>) -> SweepResult<LoadedReport> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let bytes = bytes.strip_prefix(&b"\xEF\xBB\xBF"[..]).unwrap_or(&bytes[..]);

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    if !columns.iter().any(|c| c.contains("UserPrincipalName")) {
        return Err(SweepError::parse(format!(
            "{} is not a mailsweep report (no UserPrincipalName column)",
            path.display()
        )));
    }

    let shared = Arc::new(columns.clone());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(ReportRecord {
            columns: shared.clone(),
            values: record.iter().map(str::to_string).collect(),
        });
    }

    Ok(LoadedReport { columns, rows })
}

/// Row filter for the replay workflow. Every present field must match.
#[derive(Debug, Clone, Default)]
pub struct RowSelection {
    pub mailbox: Option<String>,
    pub status: Option<String>,
    pub subject: Option<String>,
    pub item_type: Option<String>,
}

impl RowSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, record: &ReportRecord) -> bool {
        if record.identity().is_none() {
            return false;
        }
        if let Some(mailbox) = self.mailbox.as_deref() {
            if !record.mailbox().eq_ignore_ascii_case(mailbox.trim()) {
                return false;
            }
        }
        if let Some(status) = self.status.as_deref() {
            if !record.get("Status").unwrap_or_default().eq_ignore_ascii_case(status.trim()) {
                return false;
            }
        }
        if let Some(subject) = self.subject.as_deref() {
            let cell = record.get("Subject").unwrap_or_default().to_lowercase();
            if !cell.contains(&subject.to_lowercase()) {
                return false;
            }
        }
        if let Some(item_type) = self.item_type.as_deref() {
            let cell = record.get("Type").unwrap_or_default().to_lowercase();
            if !cell.starts_with(&item_type.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const REPORT: &str = "\u{feff}UserPrincipalName,ItemId,MessageId,Subject,Sender,ReceivedTime,Action,Status,Details\n\
a@x.com,AAMk1,<m1@x.com>,Invoice 42,billing@v.com,2024-05-06T09:30:00Z,ReportOnly,Skipped,\n\
a@x.com,,,,,,ReportOnly,Error,Mailbox not found\n\
b@x.com,AAMk2,<m2@x.com>,Lunch,bob@x.com,2024-05-07T12:00:00Z,ReportOnly,Skipped,\n";

    #[test]
    fn test_load_and_select() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.csv");
        fs::write(&path, REPORT).unwrap();

        let report = load_report(&path).unwrap();
        assert_eq!(report.columns[0], "UserPrincipalName");
        assert_eq!(report.target(), TargetType::Email);
        assert_eq!(report.rows.len(), 3);

        // Error rows have no identity and are never selected
        assert_eq!(report.select(&RowSelection::all()), vec![0, 2]);

        let skipped_invoices = RowSelection {
            status: Some("skipped".into()),
            subject: Some("invoice".into()),
            ..Default::default()
        };
        assert_eq!(report.select(&skipped_invoices), vec![0]);
    }

    #[test]
    fn test_message_id_fallback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.csv");
        fs::write(&path, "UserPrincipalName,MessageId,Subject\na@x.com,AAMk9,Hi\n").unwrap();

        let report = load_report(&path).unwrap();
        assert_eq!(report.rows[0].identity(), Some(("a@x.com", "AAMk9")));
    }

    #[test]
    fn test_rejects_foreign_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.csv");
        fs::write(&path, "Name,Mail\nx,y\n").unwrap();
        assert!(load_report(&path).is_err());
    }
}

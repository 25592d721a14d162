//! Report output: streaming CSV sink, in-memory sink and whole-table writes

use chrono::{DateTime, Local};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

use super::{columns_for, ResultRow};
use crate::criteria::TargetType;
use crate::error::{SweepError, SweepResult};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Destination for settled rows. Implementations serialize writes.
pub trait RowSink: Send + Sync {
    fn write_row(&self, row: &ResultRow) -> SweepResult<()>;

    fn rows_written(&self) -> usize;
}

/// `<Backend>_<Target>_Report_<timestamp>.csv`
pub fn report_file_name(backend: &str, target: TargetType, now: DateTime<Local>) -> String {
    format!("{}_{}_Report_{}.csv", backend, target, now.format("%Y%m%d_%H%M%S"))
}

/// Streaming CSV report, flushed after every row
pub struct CsvReportSink {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
    written: AtomicUsize,
}

impl CsvReportSink {
    /// Create the file and write the BOM and header for `target`
    pub fn create(path: impl AsRef<Path>, target: TargetType) -> SweepResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let writer = open_with_header(&path, columns_for(target).iter().copied())?;
        debug!("Report opened at {}", path.display());

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            written: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowSink for CsvReportSink {
    fn write_row(&self, row: &ResultRow) -> SweepResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SweepError::protocol("report writer lock poisoned"))?;
        writer.write_record(row.to_record())?;
        writer.flush()?;
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rows_written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }
}

/// Keeps rows in memory
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<Vec<ResultRow>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<ResultRow> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }
}

impl RowSink for MemorySink {
    fn write_row(&self, row: &ResultRow) -> SweepResult<()> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| SweepError::protocol("memory sink lock poisoned"))?;
        rows.push(row.clone());
        Ok(())
    }

    fn rows_written(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or_default()
    }
}

/// Write a complete table (header plus rows) in one go
pub fn write_records<'a, I>(path: impl AsRef<Path>, columns: &[String], rows: I) -> SweepResult<usize>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut writer = open_with_header(path.as_ref(), columns.iter().map(String::as_str))?;
    let mut count = 0;
    for row in rows {
        writer.write_record(row)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

fn open_with_header<'a>(path: &Path, columns: impl IntoIterator<Item = &'a str>) -> SweepResult<csv::Writer<File>> {
    let mut file = File::create(path)?;
    file.write_all(UTF8_BOM)?;
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
    writer.write_record(columns)?;
    writer.flush()?;
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_file_name() {
        let now = Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(
            report_file_name("Graph", TargetType::Meeting, now),
            "Graph_Meeting_Report_20240506_070809.csv"
        );
    }

    #[test]
    fn test_header_and_bom_written_up_front() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("r.csv");
        let sink = CsvReportSink::create(&path, TargetType::Email).unwrap();
        assert_eq!(sink.rows_written(), 0);

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        assert!(text.starts_with("UserPrincipalName,ItemId,MessageId,Subject"));
    }
}

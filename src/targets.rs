//! Mailbox list ingestion
//!
//! Accepts a CSV with a `UserPrincipalName` column, a plain text file with one
//! address per line, or a single override address that replaces the list.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{SweepError, SweepResult};

const UPN_COLUMN: &str = "UserPrincipalName";

/// Where the mailbox list comes from
#[derive(Debug, Clone, Default)]
pub struct TargetSource<'a> {
    pub list_file: Option<&'a Path>,
    pub single_mailbox: Option<&'a str>,
}

/// Resolve the mailboxes of a run. A single mailbox wins over the list file.
pub fn resolve_targets(source: &TargetSource<'_>) -> SweepResult<Vec<String>> {
    if let Some(single) = source.single_mailbox.map(str::trim).filter(|s| !s.is_empty()) {
        if !single.contains('@') {
            return Err(SweepError::config(format!("'{}' is not an email address", single)));
        }
        info!("Single mailbox override: {}", single);
        return Ok(vec![single.to_string()]);
    }

    let path = source
        .list_file
        .ok_or_else(|| SweepError::config("either a mailbox list file or a single mailbox is required"))?;

    let targets = load_mailbox_list(path)?;
    if targets.is_empty() {
        return Err(SweepError::config(format!("no mailboxes found in {}", path.display())));
    }

    info!("Loaded {} mailboxes from {}", targets.len(), path.display());
    Ok(targets)
}

/// Read a mailbox list; `.csv` files need a `UserPrincipalName` column
pub fn load_mailbox_list(path: &Path) -> SweepResult<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| SweepError::config(format!("cannot read {}: {}", path.display(), e)))?;
    let content = content.trim_start_matches('\u{feff}');

    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    let addresses = if is_csv {
        parse_csv_list(content)?
    } else {
        parse_text_list(content)
    };

    Ok(dedupe(addresses))
}

/// Addresses from a CSV, column chosen by substring match on the header
pub fn parse_csv_list(content: &str) -> SweepResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let column = headers
        .iter()
        .position(|h| h.contains(UPN_COLUMN))
        .ok_or_else(|| SweepError::config(format!("CSV has no {} column", UPN_COLUMN)))?;

    let mut addresses = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(value) = record.get(column).map(str::trim).filter(|v| !v.is_empty()) {
            addresses.push(value.to_string());
        }
    }
    Ok(addresses)
}

/// Addresses from a text file; lines without `@` are ignored
pub fn parse_text_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| {
            let keep = line.contains('@');
            if !keep && !line.is_empty() {
                debug!("Ignoring mailbox list line without '@': {}", line);
            }
            keep
        })
        .map(str::to_string)
        .collect()
}

fn dedupe(addresses: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .filter(|a| seen.insert(a.to_lowercase()))
        .collect()
}

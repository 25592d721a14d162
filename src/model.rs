//! Backend-neutral item snapshots
//!
//! Each adapter maps its protocol objects into these structures once, at the
//! adapter boundary. Everything downstream (classification, reconciliation,
//! reporting) only sees these types.

use chrono::{DateTime, NaiveDateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::recurrence::{ItemFields, RecurrenceDefinition};

/// What to do with matched items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum ActionMode {
    /// Report matches, change nothing
    #[value(name = "report")]
    ReportOnly,
    /// Ordinary delete, recoverable under the server's retention
    Delete,
    /// Move to the deleted items folder
    SoftDelete,
    /// Bypass recoverable items where the backend allows it
    PermanentDelete,
}

impl ActionMode {
    pub fn is_destructive(&self) -> bool {
        !matches!(self, ActionMode::ReportOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionMode::ReportOnly => "ReportOnly",
            ActionMode::Delete => "Delete",
            ActionMode::SoftDelete => "SoftDelete",
            ActionMode::PermanentDelete => "PermanentDelete",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "reportonly" | "report" => Some(ActionMode::ReportOnly),
            "delete" => Some(ActionMode::Delete),
            "softdelete" => Some(ActionMode::SoftDelete),
            "permanentdelete" => Some(ActionMode::PermanentDelete),
            _ => None,
        }
    }
}

impl fmt::Display for ActionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enough identity to address one item against the live backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub item_id: String,
    pub change_key: Option<String>,
}

impl ItemRef {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            change_key: None,
        }
    }
}

/// Result of a delete attempt for a single item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub item_id: String,
    pub success: bool,
    pub details: String,
}

impl DeleteOutcome {
    pub fn success(item_id: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            success: true,
            details: details.into(),
        }
    }

    pub fn failed(item_id: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            success: false,
            details: details.into(),
        }
    }
}

/// Normalized mail message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSnapshot {
    pub item_id: String,
    pub change_key: Option<String>,
    pub internet_message_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub received: String,
    pub body: Option<String>,
}

impl MessageSnapshot {
    pub fn item_ref(&self) -> ItemRef {
        ItemRef {
            item_id: self.item_id.clone(),
            change_key: self.change_key.clone(),
        }
    }
}

/// One attendee of a meeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendee {
    pub address: String,
    pub response: Option<String>,
}

/// Normalized calendar item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalendarSnapshot {
    pub item_id: String,
    pub change_key: Option<String>,
    pub subject: String,
    pub location: String,
    pub organizer: String,
    pub attendees: Vec<Attendee>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub original_start: Option<String>,
    pub is_cancelled: bool,
    pub my_response: Option<String>,
    pub uid: Option<String>,
    /// Internet message id of the invitation, when the server exposes it
    pub internet_message_id: Option<String>,
    pub recurrence: Option<RecurrenceDefinition>,
    pub fields: ItemFields,
    pub body: Option<String>,
}

impl CalendarSnapshot {
    pub fn item_ref(&self) -> ItemRef {
        ItemRef {
            item_id: self.item_id.clone(),
            change_key: self.change_key.clone(),
        }
    }

    /// Attendee addresses as an unordered, case-folded set
    pub fn attendee_set(&self) -> BTreeSet<String> {
        self.attendees
            .iter()
            .map(|a| a.address.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect()
    }

    /// Whether the instance was moved away from its slot in the series
    pub fn start_moved(&self) -> bool {
        match (
            self.start.as_deref().and_then(parse_instant),
            self.original_start.as_deref().and_then(parse_instant),
        ) {
            (Some(start), Some(original)) => start != original,
            _ => false,
        }
    }
}

/// Parse the timestamp shapes both backends produce.
///
/// Graph returns naive `dateTime` values with seven fractional digits next to
/// a separate time zone (UTC unless a preference header is sent); EWS returns
/// RFC 3339 with a `Z` suffix.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

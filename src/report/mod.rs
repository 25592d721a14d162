//! Unified report rows for both backends
//!
//! Adapters produce [`ResultRow`]s with `Status = Pending`; the sweep driver
//! settles each row exactly once and streams it into a [`RowSink`].

pub mod loader;
pub mod replay;
pub mod writer;

pub use loader::{load_report, LoadedReport, ReportRecord, RowSelection};
pub use replay::{apply_deletions, ReplaySummary};
pub use writer::{report_file_name, write_records, CsvReportSink, MemorySink, RowSink};

use std::fmt;

use crate::criteria::TargetType;
use crate::model::{ActionMode, ItemRef};

pub const EMAIL_COLUMNS: &[&str] = &[
    "UserPrincipalName",
    "ItemId",
    "MessageId",
    "Subject",
    "Sender",
    "ReceivedTime",
    "Action",
    "Status",
    "Details",
];

pub const MEETING_COLUMNS: &[&str] = &[
    "UserPrincipalName",
    "ItemId",
    "Subject",
    "Type",
    "MeetingGOID",
    "CleanGOID",
    "Organizer",
    "Attendees",
    "Start",
    "End",
    "UserRole",
    "IsCancelled",
    "ResponseStatus",
    "RecurrencePattern",
    "PatternDetails",
    "RecurrenceDuration",
    "IsEndless",
    "Action",
    "Status",
    "Details",
];

/// Header for a target type
pub fn columns_for(target: TargetType) -> &'static [&'static str] {
    match target {
        TargetType::Email => EMAIL_COLUMNS,
        TargetType::Meeting => MEETING_COLUMNS,
    }
}

/// Processing state of one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Pending,
    Skipped,
    Success,
    Failed,
    Error,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Pending => "Pending",
            RowStatus::Skipped => "Skipped",
            RowStatus::Success => "Success",
            RowStatus::Failed => "Failed",
            RowStatus::Error => "Error",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(RowStatus::Pending),
            "skipped" => Some(RowStatus::Skipped),
            "success" => Some(RowStatus::Success),
            "failed" => Some(RowStatus::Failed),
            "error" => Some(RowStatus::Error),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, RowStatus::Pending)
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailRow {
    pub mailbox: String,
    pub item_id: String,
    pub change_key: Option<String>,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub received: String,
    pub action: ActionMode,
    pub status: RowStatus,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeetingRow {
    pub mailbox: String,
    pub item_id: String,
    pub change_key: Option<String>,
    pub subject: String,
    /// Recurrence label, with " (Cancelled)" appended for cancelled items
    pub item_type: String,
    pub goid: String,
    pub clean_goid: String,
    pub organizer: String,
    pub attendees: String,
    pub start: String,
    pub end: String,
    pub user_role: String,
    pub is_cancelled: bool,
    pub response_status: String,
    pub recurrence_pattern: String,
    pub pattern_details: String,
    pub recurrence_duration: String,
    pub is_endless: String,
    pub action: ActionMode,
    pub status: RowStatus,
    pub details: String,
}

/// One report line
#[derive(Debug, Clone, PartialEq)]
pub enum ResultRow {
    Email(EmailRow),
    Meeting(MeetingRow),
}

impl ResultRow {
    /// Row standing in for a mailbox that could not be processed
    pub fn mailbox_error(target: TargetType, mailbox: &str, action: ActionMode, details: impl Into<String>) -> Self {
        let details = details.into();
        match target {
            TargetType::Email => ResultRow::Email(EmailRow {
                mailbox: mailbox.to_string(),
                item_id: String::new(),
                change_key: None,
                message_id: String::new(),
                subject: String::new(),
                sender: String::new(),
                received: String::new(),
                action,
                status: RowStatus::Error,
                details,
            }),
            TargetType::Meeting => ResultRow::Meeting(MeetingRow {
                mailbox: mailbox.to_string(),
                item_id: String::new(),
                change_key: None,
                subject: String::new(),
                item_type: String::new(),
                goid: String::new(),
                clean_goid: String::new(),
                organizer: String::new(),
                attendees: String::new(),
                start: String::new(),
                end: String::new(),
                user_role: String::new(),
                is_cancelled: false,
                response_status: String::new(),
                recurrence_pattern: String::new(),
                pattern_details: String::new(),
                recurrence_duration: String::new(),
                is_endless: String::new(),
                action,
                status: RowStatus::Error,
                details,
            }),
        }
    }

    pub fn target(&self) -> TargetType {
        match self {
            ResultRow::Email(_) => TargetType::Email,
            ResultRow::Meeting(_) => TargetType::Meeting,
        }
    }

    pub fn mailbox(&self) -> &str {
        match self {
            ResultRow::Email(row) => &row.mailbox,
            ResultRow::Meeting(row) => &row.mailbox,
        }
    }

    pub fn item_id(&self) -> &str {
        match self {
            ResultRow::Email(row) => &row.item_id,
            ResultRow::Meeting(row) => &row.item_id,
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            ResultRow::Email(row) => &row.subject,
            ResultRow::Meeting(row) => &row.subject,
        }
    }

    pub fn status(&self) -> RowStatus {
        match self {
            ResultRow::Email(row) => row.status,
            ResultRow::Meeting(row) => row.status,
        }
    }

    pub fn details(&self) -> &str {
        match self {
            ResultRow::Email(row) => &row.details,
            ResultRow::Meeting(row) => &row.details,
        }
    }

    /// Address of the item for deletion, if the row refers to one
    pub fn item_ref(&self) -> Option<ItemRef> {
        let (id, change_key) = match self {
            ResultRow::Email(row) => (&row.item_id, &row.change_key),
            ResultRow::Meeting(row) => (&row.item_id, &row.change_key),
        };
        if id.is_empty() {
            return None;
        }
        Some(ItemRef {
            item_id: id.clone(),
            change_key: change_key.clone(),
        })
    }

    pub fn set_action(&mut self, action: ActionMode) {
        match self {
            ResultRow::Email(row) => row.action = action,
            ResultRow::Meeting(row) => row.action = action,
        }
    }

    /// Move a pending row to its final status. Returns false, leaving the
    /// row untouched, when it was already settled or `status` is `Pending`.
    pub fn settle(&mut self, status: RowStatus, details: impl Into<String>) -> bool {
        if self.status().is_final() || !status.is_final() {
            return false;
        }
        let details = details.into();
        match self {
            ResultRow::Email(row) => {
                row.status = status;
                row.details = details;
            }
            ResultRow::Meeting(row) => {
                row.status = status;
                row.details = details;
            }
        }
        true
    }

    /// Cell values in header order
    pub fn to_record(&self) -> Vec<String> {
        match self {
            ResultRow::Email(row) => vec![
                row.mailbox.clone(),
                row.item_id.clone(),
                row.message_id.clone(),
                row.subject.clone(),
                row.sender.clone(),
                row.received.clone(),
                row.action.to_string(),
                row.status.to_string(),
                row.details.clone(),
            ],
            ResultRow::Meeting(row) => vec![
                row.mailbox.clone(),
                row.item_id.clone(),
                row.subject.clone(),
                row.item_type.clone(),
                row.goid.clone(),
                row.clean_goid.clone(),
                row.organizer.clone(),
                row.attendees.clone(),
                row.start.clone(),
                row.end.clone(),
                row.user_role.clone(),
                if row.is_cancelled { "True" } else { "False" }.to_string(),
                row.response_status.clone(),
                row.recurrence_pattern.clone(),
                row.pattern_details.clone(),
                row.recurrence_duration.clone(),
                row.is_endless.clone(),
                row.action.to_string(),
                row.status.to_string(),
                row.details.clone(),
            ],
        }
    }
}

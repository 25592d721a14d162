//! Recurrence classification for calendar items
//!
//! Both backends reduce their calendar objects to an [`ItemFields`] bag before
//! anything here runs, so the rules below never see protocol types.

pub mod describe;
pub mod resolver;

pub use describe::{
    describe_master, endless_flag, DurationKind, MasterDescription, PatternKind, RecurrenceDefinition,
    RecurrencePattern, RecurrenceRange, ReportLocale,
};
pub use resolver::{MasterResolver, MasterSource, ResolvedMaster};

use std::fmt;

use crate::model::CalendarSnapshot;

/// Outlook global object id class prefix (hex)
const GOID_CLASS_PREFIX: &str = "040000008200E00074C5B7101A82E008";
/// Hex range holding the instance date (YH YL M D) inside a global object id
const GOID_INSTANCE_DATE: std::ops::Range<usize> = 32..40;

/// Recurrence-related fields as reported by a backend. Every field is optional
/// because presence depends on the backend and on how deeply the item was fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFields {
    pub calendar_item_type_hint: Option<String>,
    pub has_recurrence_definition: bool,
    pub recurrence_id_present: bool,
    pub original_start_present: bool,
    pub recurring_master_id: Option<String>,
    pub is_recurring_flag: bool,
    pub uid: Option<String>,
}

/// Role of a calendar item within its series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecurrenceLabel {
    Single,
    RecurringMaster,
    Occurrence,
    Exception,
    InstanceUnknown,
}

impl RecurrenceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceLabel::Single => "Single",
            RecurrenceLabel::RecurringMaster => "RecurringMaster",
            RecurrenceLabel::Occurrence => "Occurrence",
            RecurrenceLabel::Exception => "Exception",
            RecurrenceLabel::InstanceUnknown => "Instance-Unknown",
        }
    }

    /// Occurrences and exceptions, i.e. items that belong to a master
    pub fn is_instance(&self) -> bool {
        matches!(
            self,
            RecurrenceLabel::Occurrence | RecurrenceLabel::Exception | RecurrenceLabel::InstanceUnknown
        )
    }

    /// Anything that is part of a recurring series
    pub fn is_series_member(&self) -> bool {
        !matches!(self, RecurrenceLabel::Single)
    }
}

impl fmt::Display for RecurrenceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Determine the recurrence role of an item. First matching rule wins.
pub fn classify(fields: &ItemFields) -> RecurrenceLabel {
    if let Some(hint) = fields.calendar_item_type_hint.as_deref() {
        let hint = hint.to_lowercase();
        for (token, label) in [
            ("recurringmaster", RecurrenceLabel::RecurringMaster),
            ("occurrence", RecurrenceLabel::Occurrence),
            ("exception", RecurrenceLabel::Exception),
            ("single", RecurrenceLabel::Single),
        ] {
            if hint.contains(token) {
                return label;
            }
        }
    }

    if fields.has_recurrence_definition {
        return RecurrenceLabel::RecurringMaster;
    }

    if fields.recurrence_id_present || fields.original_start_present {
        return RecurrenceLabel::Occurrence;
    }

    if fields
        .recurring_master_id
        .as_deref()
        .is_some_and(|id| !id.is_empty())
    {
        return RecurrenceLabel::Occurrence;
    }

    // Ambiguous recurring items are kept as masters rather than dropped
    if fields.is_recurring_flag {
        return RecurrenceLabel::RecurringMaster;
    }

    RecurrenceLabel::Single
}

/// Settle the label of an instance once its master lookup has finished.
///
/// Non-instances pass through untouched. Without a master the instance is
/// `InstanceUnknown`. A moved start, or any difference in subject, location or
/// attendee set, makes it an `Exception`.
pub fn refine_instance(
    label: RecurrenceLabel,
    instance: &CalendarSnapshot,
    master: Option<&CalendarSnapshot>,
) -> RecurrenceLabel {
    if !label.is_instance() {
        return label;
    }

    let master = match master {
        Some(master) => master,
        None => return RecurrenceLabel::InstanceUnknown,
    };

    if label == RecurrenceLabel::Exception || instance.start_moved() {
        return RecurrenceLabel::Exception;
    }

    let same_subject = instance.subject.trim() == master.subject.trim();
    let same_location = instance.location.trim() == master.location.trim();
    let same_attendees = instance.attendee_set() == master.attendee_set();

    if same_subject && same_location && same_attendees {
        RecurrenceLabel::Occurrence
    } else {
        RecurrenceLabel::Exception
    }
}

/// Normalize a meeting uid to a key shared by every instance of the series.
///
/// Outlook global object ids embed the instance date; those bytes are zeroed.
/// Other uids are returned upper-cased and trimmed.
pub fn clean_goid(uid: &str) -> String {
    let uid = uid.trim();
    let upper = uid.to_ascii_uppercase();
    if upper.starts_with(GOID_CLASS_PREFIX)
        && upper.len() >= GOID_INSTANCE_DATE.end
        && upper.bytes().all(|b| b.is_ascii_hexdigit())
    {
        let mut cleaned = String::with_capacity(upper.len());
        cleaned.push_str(&upper[..GOID_INSTANCE_DATE.start]);
        cleaned.push_str("00000000");
        cleaned.push_str(&upper[GOID_INSTANCE_DATE.end..]);
        return cleaned;
    }
    upper
}

/// Series identity of an item: cleaned uid, falling back to the item id.
///
/// Cross-backend equality of this key is best effort only.
pub fn series_key(snapshot: &CalendarSnapshot) -> String {
    match snapshot.uid.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(uid) => clean_goid(uid),
        None => snapshot.item_id.clone(),
    }
}

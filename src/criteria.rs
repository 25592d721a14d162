//! Filter criteria shared by every backend
//!
//! A `Criteria` is built once per run and never changes afterwards. Backends
//! translate it into server-side filters where the protocol allows and fall
//! back to the `matches_*` helpers for everything else.

use chrono::{Months, NaiveDate, NaiveDateTime, NaiveTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SweepError, SweepResult};

/// Longest date window accepted for meeting queries
const MAX_MEETING_SPAN_MONTHS: u32 = 24;

/// Kind of item a run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum TargetType {
    Email,
    Meeting,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Email => write!(f, "Email"),
            TargetType::Meeting => write!(f, "Meeting"),
        }
    }
}

/// Which calendar items a meeting scan keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum MeetingScope {
    /// Every calendar item
    All,
    /// Non-recurring meetings only
    #[value(name = "single")]
    SingleInstance,
    /// Recurring series: masters, or their instances inside a calendar view
    #[value(name = "series")]
    SeriesMaster,
}

impl Default for MeetingScope {
    fn default() -> Self {
        MeetingScope::All
    }
}

/// Date-bounded window used for recurrence expansion, end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Immutable filter set for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criteria {
    pub target: TargetType,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub body: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub meeting_scope: MeetingScope,
    pub cancelled_only: bool,
}

impl Criteria {
    /// Create empty criteria for a target type
    pub fn new(target: TargetType) -> Self {
        Self {
            target,
            message_id: None,
            subject: None,
            sender: None,
            body: None,
            start_date: None,
            end_date: None,
            meeting_scope: MeetingScope::All,
            cancelled_only: false,
        }
    }

    pub fn with_message_id(mut self, value: impl Into<String>) -> Self {
        self.message_id = non_empty(value);
        self
    }

    pub fn with_subject(mut self, value: impl Into<String>) -> Self {
        self.subject = non_empty(value);
        self
    }

    pub fn with_sender(mut self, value: impl Into<String>) -> Self {
        self.sender = non_empty(value);
        self
    }

    pub fn with_body(mut self, value: impl Into<String>) -> Self {
        self.body = non_empty(value);
        self
    }

    pub fn with_dates(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_meeting_scope(mut self, scope: MeetingScope) -> Self {
        self.meeting_scope = scope;
        self
    }

    pub fn with_cancelled_only(mut self, cancelled_only: bool) -> Self {
        self.cancelled_only = cancelled_only;
        self
    }

    /// Check the criteria before any network activity
    pub fn validate(&self) -> SweepResult<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(SweepError::config(format!(
                    "start date {} is after end date {}",
                    start, end
                )));
            }

            if self.target == TargetType::Meeting {
                let limit = start
                    .checked_add_months(Months::new(MAX_MEETING_SPAN_MONTHS))
                    .ok_or_else(|| SweepError::config("start date out of range"))?;
                if end > limit {
                    return Err(SweepError::config(format!(
                        "meeting date range {} .. {} exceeds the 2-year limit",
                        start, end
                    )));
                }
            }
        }

        if self.target == TargetType::Email && self.cancelled_only {
            return Err(SweepError::config(
                "cancelled-only applies to meeting scans only",
            ));
        }

        Ok(())
    }

    /// Whether the meeting query expands recurring series into instances
    pub fn expands_recurrences(&self) -> bool {
        self.calendar_window().is_some()
    }

    /// Date window for an expanding calendar view; needs both dates
    pub fn calendar_window(&self) -> Option<CalendarWindow> {
        if self.target != TargetType::Meeting {
            return None;
        }
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => Some(CalendarWindow {
                start: start_of_day(start),
                end: start_of_day(end.succ_opt()?),
            }),
            _ => None,
        }
    }

    /// Inclusive lower bound of the day range
    pub fn lower_bound(&self) -> Option<NaiveDateTime> {
        self.start_date.map(start_of_day)
    }

    /// Exclusive upper bound of the day range (midnight after the end date)
    pub fn upper_bound_exclusive(&self) -> Option<NaiveDateTime> {
        self.end_date
            .and_then(|d| d.succ_opt())
            .map(start_of_day)
    }

    /// Whether a received timestamp falls inside the day range.
    ///
    /// Unparseable timestamps never match once a bound is set.
    pub fn matches_received(&self, received: &str) -> bool {
        let (lower, upper) = (self.lower_bound(), self.upper_bound_exclusive());
        if lower.is_none() && upper.is_none() {
            return true;
        }
        let Some(instant) = crate::model::parse_instant(received).map(|t| t.naive_utc()) else {
            return false;
        };
        lower.map_or(true, |lower| instant >= lower) && upper.map_or(true, |upper| instant < upper)
    }

    pub fn matches_subject(&self, subject: &str) -> bool {
        contains_ignore_case(subject, self.subject.as_deref())
    }

    pub fn matches_sender(&self, sender: &str) -> bool {
        contains_ignore_case(sender, self.sender.as_deref())
    }

    pub fn matches_body(&self, body: &str) -> bool {
        contains_ignore_case(body, self.body.as_deref())
    }

    pub fn matches_message_id(&self, message_id: &str) -> bool {
        match self.message_id.as_deref() {
            Some(wanted) => wanted.trim() == message_id.trim(),
            None => true,
        }
    }
}

/// Normalize user date input to a calendar date.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD` and `YYYYMMDD`; blank input means
/// "no bound".
pub fn normalize_date_input(input: &str) -> SweepResult<Option<NaiveDate>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return Ok(Some(date));
        }
    }

    Err(SweepError::config(format!(
        "unrecognised date '{}', expected YYYY-MM-DD, YYYY/MM/DD or YYYYMMDD",
        input
    )))
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    if value.trim().is_empty() {
        None
    } else {
        Some(value.trim().to_string())
    }
}

fn contains_ignore_case(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
        None => true,
    }
}

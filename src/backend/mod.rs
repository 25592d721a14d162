//! Mailbox backends and the reconciliation they share
//!
//! Each adapter turns its protocol objects into [`CalendarSnapshot`]s and
//! [`MessageSnapshot`]s and hands meetings to [`reconcile_meetings`], so both
//! backends produce identical report rows for identical data.

pub mod ews;
pub mod graph;

pub use ews::{EwsAuth, EwsBackend};
pub use graph::GraphBackend;

use async_trait::async_trait;
use clap::ValueEnum;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::criteria::{Criteria, MeetingScope, TargetType};
use crate::error::{SweepError, SweepResult};
use crate::http::HttpTransport;
use crate::model::{ActionMode, CalendarSnapshot, DeleteOutcome, ItemRef, MessageSnapshot};
use crate::recurrence::{
    classify, describe_master, endless_flag, refine_instance, series_key, MasterResolver, MasterSource,
    RecurrenceLabel, ReportLocale,
};
use crate::report::{EmailRow, MeetingRow, ResultRow, RowStatus};

/// One of the two mailbox protocols
#[async_trait]
pub trait MailboxBackend: Send + Sync {
    /// Short name used in report file names and logs
    fn name(&self) -> &'static str;

    /// Query one mailbox and return a pending row per matching item.
    ///
    /// Failures that end the whole mailbox (authentication, missing mailbox,
    /// autodiscover) are returned as errors. Failures of a single page or
    /// folder are embedded as `Error` rows and the scan carries on.
    async fn scan_mailbox(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        criteria: &Criteria,
    ) -> SweepResult<Vec<ResultRow>>;

    /// Delete items from one mailbox, returning one outcome per item
    async fn delete_items(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        items: &[ItemRef],
        target: TargetType,
        mode: ActionMode,
    ) -> SweepResult<Vec<DeleteOutcome>>;
}

/// Folders every backend knows by a fixed name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum WellKnownFolder {
    Inbox,
    #[value(name = "sent")]
    SentItems,
    Outbox,
    #[value(name = "deleted")]
    DeletedItems,
    #[value(name = "junk")]
    JunkEmail,
    Drafts,
    Archive,
    #[value(name = "recoverable-deletions")]
    RecoverableItemsDeletions,
    #[value(name = "recoverable-purges")]
    RecoverableItemsPurges,
}

impl WellKnownFolder {
    /// Graph well-known folder name; purges are not exposed by Graph
    pub fn graph_name(&self) -> Option<&'static str> {
        match self {
            WellKnownFolder::Inbox => Some("inbox"),
            WellKnownFolder::SentItems => Some("sentitems"),
            WellKnownFolder::Outbox => Some("outbox"),
            WellKnownFolder::DeletedItems => Some("deleteditems"),
            WellKnownFolder::JunkEmail => Some("junkemail"),
            WellKnownFolder::Drafts => Some("drafts"),
            WellKnownFolder::Archive => Some("archive"),
            WellKnownFolder::RecoverableItemsDeletions => Some("recoverableitemsdeletions"),
            WellKnownFolder::RecoverableItemsPurges => None,
        }
    }

    /// EWS distinguished folder id
    pub fn ews_name(&self) -> &'static str {
        match self {
            WellKnownFolder::Inbox => "inbox",
            WellKnownFolder::SentItems => "sentitems",
            WellKnownFolder::Outbox => "outbox",
            WellKnownFolder::DeletedItems => "deleteditems",
            WellKnownFolder::JunkEmail => "junkemail",
            WellKnownFolder::Drafts => "drafts",
            WellKnownFolder::Archive => "archivemsgfolderroot",
            WellKnownFolder::RecoverableItemsDeletions => "recoverableitemsdeletions",
            WellKnownFolder::RecoverableItemsPurges => "recoverableitemspurges",
        }
    }

    /// Folders covered by [`FolderScope::Common`]
    pub fn common() -> &'static [WellKnownFolder] {
        &[
            WellKnownFolder::Inbox,
            WellKnownFolder::SentItems,
            WellKnownFolder::Drafts,
            WellKnownFolder::DeletedItems,
            WellKnownFolder::JunkEmail,
        ]
    }
}

/// Which folders an email scan covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FolderScope {
    /// The whole mailbox
    #[default]
    Mailbox,
    Folder(WellKnownFolder),
    /// The fixed common folder set
    Common,
    /// Inbox and every mail folder beneath it
    InboxSubtree,
}

impl FromStr for FolderScope {
    type Err = SweepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "" | "auto" | "mailbox" | "all" => Ok(FolderScope::Mailbox),
            "common" => Ok(FolderScope::Common),
            "subtree" | "inbox-subtree" => Ok(FolderScope::InboxSubtree),
            other => WellKnownFolder::from_str(other, true)
                .map(FolderScope::Folder)
                .map_err(|_| SweepError::config(format!("unknown folder scope '{}'", value))),
        }
    }
}

impl fmt::Display for FolderScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FolderScope::Mailbox => write!(f, "mailbox"),
            FolderScope::Common => write!(f, "common"),
            FolderScope::InboxSubtree => write!(f, "subtree"),
            FolderScope::Folder(folder) => write!(f, "{}", folder.ews_name()),
        }
    }
}

/// Pending email row for a message that passed every filter
pub fn email_row(mailbox: &str, message: &MessageSnapshot) -> ResultRow {
    ResultRow::Email(EmailRow {
        mailbox: mailbox.to_string(),
        item_id: message.item_id.clone(),
        change_key: message.change_key.clone(),
        message_id: message.internet_message_id.clone().unwrap_or_default(),
        subject: message.subject.clone(),
        sender: message.sender.clone(),
        received: message.received.clone(),
        action: ActionMode::ReportOnly,
        status: RowStatus::Pending,
        details: String::new(),
    })
}

/// Client-side checks every backend applies to messages
pub fn message_matches(criteria: &Criteria, message: &MessageSnapshot) -> bool {
    criteria.matches_subject(&message.subject)
        && criteria.matches_sender(&message.sender)
        && criteria.matches_received(&message.received)
        && message
            .internet_message_id
            .as_deref()
            .map_or(criteria.message_id.is_none(), |id| criteria.matches_message_id(id))
        && match criteria.body.as_deref() {
            Some(_) => message.body.as_deref().is_some_and(|b| criteria.matches_body(b)),
            None => true,
        }
}

/// Client-side checks every backend applies to calendar items
pub fn meeting_matches(criteria: &Criteria, item: &CalendarSnapshot) -> bool {
    criteria.matches_subject(&item.subject)
        && criteria.matches_sender(&item.organizer)
        && (!criteria.cancelled_only || item.is_cancelled)
        && item
            .internet_message_id
            .as_deref()
            .map_or(criteria.message_id.is_none(), |id| criteria.matches_message_id(id))
        && match criteria.body.as_deref() {
            Some(_) => item.body.as_deref().is_some_and(|b| criteria.matches_body(b)),
            None => true,
        }
}

/// Whether a label survives the meeting scope
pub fn scope_allows(scope: MeetingScope, label: RecurrenceLabel) -> bool {
    match scope {
        MeetingScope::All => true,
        MeetingScope::SingleInstance => label == RecurrenceLabel::Single,
        MeetingScope::SeriesMaster => label.is_series_member(),
    }
}

/// Classify, resolve and render the calendar items of one mailbox
pub async fn reconcile_meetings(
    mailbox: &str,
    items: Vec<CalendarSnapshot>,
    criteria: &Criteria,
    resolver: &MasterResolver,
    source: &dyn MasterSource,
    locale: ReportLocale,
) -> Vec<ResultRow> {
    let mut rows = Vec::with_capacity(items.len());

    for item in items {
        let label = classify(&item.fields);
        if !scope_allows(criteria.meeting_scope, label) {
            debug!("Skipping {} ({}) outside meeting scope", item.subject, label);
            continue;
        }

        let master = if label.is_instance() {
            resolver
                .resolve(
                    mailbox,
                    &series_key(&item),
                    item.fields.recurring_master_id.as_deref(),
                    source,
                )
                .await
        } else {
            None
        };

        let label = refine_instance(label, &item, master.as_deref());
        rows.push(ResultRow::Meeting(meeting_row(mailbox, &item, label, master.as_deref(), locale)));
    }

    rows
}

/// Render one calendar item as a pending meeting row
pub fn meeting_row(
    mailbox: &str,
    item: &CalendarSnapshot,
    label: RecurrenceLabel,
    master: Option<&CalendarSnapshot>,
    locale: ReportLocale,
) -> MeetingRow {
    let is_organizer = !item.organizer.is_empty() && item.organizer.trim().eq_ignore_ascii_case(mailbox.trim());

    let response_status = if is_organizer {
        item.attendees
            .iter()
            .map(|a| format!("{}:{}", a.address, a.response.as_deref().unwrap_or("Unknown")))
            .collect::<Vec<_>>()
            .join("; ")
    } else {
        item.my_response.clone().unwrap_or_default()
    };

    let definition = match label {
        RecurrenceLabel::RecurringMaster => item.recurrence.as_ref(),
        RecurrenceLabel::Occurrence | RecurrenceLabel::Exception => master.and_then(|m| m.recurrence.as_ref()),
        _ => None,
    };
    let description = definition.map(|d| describe_master(d, locale));

    let mut item_type = label.to_string();
    if item.is_cancelled {
        item_type.push_str(" (Cancelled)");
    }

    MeetingRow {
        mailbox: mailbox.to_string(),
        item_id: item.item_id.clone(),
        change_key: item.change_key.clone(),
        subject: item.subject.clone(),
        item_type,
        goid: item.uid.clone().unwrap_or_default(),
        clean_goid: series_key(item),
        organizer: item.organizer.clone(),
        attendees: item
            .attendees
            .iter()
            .map(|a| a.address.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        start: item.start.clone().unwrap_or_default(),
        end: item.end.clone().unwrap_or_default(),
        user_role: if is_organizer { "Organizer" } else { "Attendee" }.to_string(),
        is_cancelled: item.is_cancelled,
        response_status,
        recurrence_pattern: description.as_ref().map(|d| d.pattern_name.clone()).unwrap_or_default(),
        pattern_details: description.as_ref().map(|d| d.pattern_details.clone()).unwrap_or_default(),
        recurrence_duration: description.as_ref().map(|d| d.duration_text.clone()).unwrap_or_default(),
        is_endless: endless_flag(label, description.as_ref().map(|d| &d.duration)).to_string(),
        action: ActionMode::ReportOnly,
        status: RowStatus::Pending,
        details: String::new(),
    }
}

/// Reject actions a target cannot take before any network call
pub fn validate_action(target: TargetType, mode: ActionMode) -> SweepResult<()> {
    if target == TargetType::Meeting && matches!(mode, ActionMode::SoftDelete | ActionMode::PermanentDelete) {
        return Err(SweepError::config(format!(
            "{} is only available for email targets",
            mode
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attendee;
    use crate::recurrence::{
        ItemFields, PatternKind, RecurrenceDefinition, RecurrencePattern, RecurrenceRange,
    };
    use chrono::NaiveDate;

    struct FixedMaster(Option<CalendarSnapshot>);

    #[async_trait]
    impl MasterSource for FixedMaster {
        async fn fetch_master(&self, _id: &str) -> SweepResult<Option<CalendarSnapshot>> {
            Ok(self.0.clone())
        }

        async fn scan_for_series(&self, _key: &str) -> SweepResult<Option<CalendarSnapshot>> {
            Ok(None)
        }
    }

    fn weekly_master() -> CalendarSnapshot {
        let mut pattern = RecurrencePattern::new(PatternKind::Weekly);
        pattern.interval = Some(1);
        pattern.days_of_week = vec!["monday".into(), "wednesday".into()];
        CalendarSnapshot {
            item_id: "master".into(),
            subject: "Standup".into(),
            location: "Room 1".into(),
            organizer: "boss@x.com".into(),
            attendees: vec![Attendee { address: "a@x.com".into(), response: Some("accepted".into()) }],
            uid: Some("UID-1".into()),
            recurrence: Some(RecurrenceDefinition {
                pattern: Some(pattern),
                range: RecurrenceRange { no_end: true, ..Default::default() },
            }),
            fields: ItemFields {
                calendar_item_type_hint: Some("RecurringMaster".into()),
                has_recurrence_definition: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn occurrence(id: &str, subject: &str) -> CalendarSnapshot {
        CalendarSnapshot {
            item_id: id.into(),
            subject: subject.into(),
            location: "Room 1".into(),
            organizer: "boss@x.com".into(),
            attendees: vec![Attendee { address: "a@x.com".into(), response: None }],
            uid: Some("UID-1".into()),
            my_response: Some("accepted".into()),
            fields: ItemFields {
                calendar_item_type_hint: Some("Occurrence".into()),
                recurring_master_id: Some("master".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_master_row_is_endless() {
        let criteria = Criteria::new(TargetType::Meeting);
        let rows = reconcile_meetings(
            "a@x.com",
            vec![weekly_master()],
            &criteria,
            &MasterResolver::new(),
            &FixedMaster(None),
            ReportLocale::English,
        )
        .await;

        let ResultRow::Meeting(row) = &rows[0] else { panic!("expected meeting row") };
        assert_eq!(row.item_type, "RecurringMaster");
        assert_eq!(row.recurrence_pattern, "Weekly");
        assert_eq!(row.is_endless, "True");
        assert_eq!(row.user_role, "Attendee");
        assert_eq!(row.response_status, "");
    }

    #[tokio::test]
    async fn test_instances_split_into_occurrence_and_exception() {
        let criteria = Criteria::new(TargetType::Meeting).with_dates(
            NaiveDate::from_ymd_opt(2024, 5, 6),
            NaiveDate::from_ymd_opt(2024, 5, 8),
        );
        let rows = reconcile_meetings(
            "a@x.com",
            vec![occurrence("o1", "Standup"), occurrence("o2", "Standup - moved")],
            &criteria,
            &MasterResolver::new(),
            &FixedMaster(Some(weekly_master())),
            ReportLocale::English,
        )
        .await;

        let types: Vec<String> = rows
            .iter()
            .map(|r| match r {
                ResultRow::Meeting(m) => m.item_type.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(types, vec!["Occurrence", "Exception"]);

        let ResultRow::Meeting(first) = &rows[0] else { panic!("expected meeting row") };
        assert_eq!(first.recurrence_pattern, "Weekly");
        assert_eq!(first.is_endless, "N/A");
        assert_eq!(first.response_status, "accepted");
    }

    #[tokio::test]
    async fn test_unresolvable_instance() {
        let criteria = Criteria::new(TargetType::Meeting);
        let mut item = occurrence("o1", "Standup");
        item.is_cancelled = true;
        let rows = reconcile_meetings(
            "a@x.com",
            vec![item],
            &criteria,
            &MasterResolver::new(),
            &FixedMaster(None),
            ReportLocale::English,
        )
        .await;

        let ResultRow::Meeting(row) = &rows[0] else { panic!("expected meeting row") };
        assert_eq!(row.item_type, "Instance-Unknown (Cancelled)");
        assert_eq!(row.recurrence_pattern, "");
        assert_eq!(row.is_endless, "N/A");
    }

    #[test]
    fn test_organizer_sees_attendee_responses() {
        let master = weekly_master();
        let row = meeting_row("Boss@X.com", &master, RecurrenceLabel::RecurringMaster, None, ReportLocale::English);
        assert_eq!(row.user_role, "Organizer");
        assert_eq!(row.response_status, "a@x.com:accepted");
        assert_eq!(row.clean_goid, "UID-1");
    }

    #[test]
    fn test_meeting_message_id_fails_closed() {
        let criteria = Criteria::new(TargetType::Meeting).with_message_id("<invite-1@x.com>");
        let mut item = occurrence("o1", "Standup");
        assert!(!meeting_matches(&criteria, &item));

        item.internet_message_id = Some("<other@x.com>".into());
        assert!(!meeting_matches(&criteria, &item));

        item.internet_message_id = Some(" <invite-1@x.com> ".into());
        assert!(meeting_matches(&criteria, &item));

        item.internet_message_id = None;
        assert!(meeting_matches(&Criteria::new(TargetType::Meeting), &item));
    }

    #[test]
    fn test_message_outside_day_range_rejected() {
        let criteria = Criteria::new(TargetType::Email)
            .with_body("pay")
            .with_dates(NaiveDate::from_ymd_opt(2024, 1, 1), NaiveDate::from_ymd_opt(2024, 1, 31));
        let mut message = MessageSnapshot {
            item_id: "m1".into(),
            received: "2019-03-04T10:00:00Z".into(),
            body: Some("please pay".into()),
            ..Default::default()
        };
        assert!(!message_matches(&criteria, &message));

        message.received = "2024-01-15T10:00:00Z".into();
        assert!(message_matches(&criteria, &message));
    }

    #[test]
    fn test_scope_filter() {
        assert!(scope_allows(MeetingScope::All, RecurrenceLabel::Occurrence));
        assert!(scope_allows(MeetingScope::SingleInstance, RecurrenceLabel::Single));
        assert!(!scope_allows(MeetingScope::SingleInstance, RecurrenceLabel::RecurringMaster));
        assert!(scope_allows(MeetingScope::SeriesMaster, RecurrenceLabel::Exception));
        assert!(!scope_allows(MeetingScope::SeriesMaster, RecurrenceLabel::Single));
    }

    #[test]
    fn test_folder_scope_parsing() {
        assert_eq!("auto".parse::<FolderScope>().unwrap(), FolderScope::Mailbox);
        assert_eq!("subtree".parse::<FolderScope>().unwrap(), FolderScope::InboxSubtree);
        assert_eq!(
            "junk".parse::<FolderScope>().unwrap(),
            FolderScope::Folder(WellKnownFolder::JunkEmail)
        );
        assert!("nowhere".parse::<FolderScope>().is_err());
    }

    #[test]
    fn test_meeting_actions_limited() {
        assert!(validate_action(TargetType::Meeting, ActionMode::PermanentDelete).is_err());
        assert!(validate_action(TargetType::Meeting, ActionMode::Delete).is_ok());
        assert!(validate_action(TargetType::Email, ActionMode::SoftDelete).is_ok());
    }
}

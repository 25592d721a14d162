//! Graph JSON payloads and their mapping onto snapshots

use serde::Deserialize;
use std::collections::HashMap;

use crate::model::{Attendee, CalendarSnapshot, MessageSnapshot};
use crate::recurrence::{
    describe::parse_month, ItemFields, PatternKind, RecurrenceDefinition, RecurrencePattern, RecurrenceRange,
};

/// One page of a collection
#[derive(Debug, Deserialize)]
pub struct GraphPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GraphFolder {
    pub id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(rename = "childFolderCount", default)]
    pub child_folder_count: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmailAddress {
    pub address: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Recipient {
    #[serde(rename = "emailAddress", default)]
    pub email_address: EmailAddress,
}

impl Recipient {
    fn address(&self) -> String {
        self.email_address.address.clone().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
pub struct ItemBody {
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    pub content: Option<String>,
}

impl ItemBody {
    /// Plain text rendering; HTML bodies are converted first
    pub fn text(&self) -> String {
        let content = self.content.clone().unwrap_or_default();
        if self
            .content_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("html"))
        {
            html2text::from_read(content.as_bytes(), 200)
        } else {
            content
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GraphMessage {
    pub id: String,
    pub subject: Option<String>,
    pub from: Option<Recipient>,
    #[serde(rename = "receivedDateTime")]
    pub received_date_time: Option<String>,
    #[serde(rename = "internetMessageId")]
    pub internet_message_id: Option<String>,
    pub body: Option<ItemBody>,
}

impl From<GraphMessage> for MessageSnapshot {
    fn from(message: GraphMessage) -> Self {
        MessageSnapshot {
            item_id: message.id,
            change_key: None,
            internet_message_id: message.internet_message_id,
            subject: message.subject.unwrap_or_default(),
            sender: message.from.map(|f| f.address()).unwrap_or_default(),
            received: message.received_date_time.unwrap_or_default(),
            body: message.body.map(|b| b.text()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DateTimeTimeZone {
    #[serde(rename = "dateTime")]
    pub date_time: Option<String>,
    #[serde(rename = "timeZone")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseStatus {
    pub response: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GraphAttendee {
    #[serde(rename = "emailAddress", default)]
    pub email_address: EmailAddress,
    pub status: Option<ResponseStatus>,
}

#[derive(Debug, Deserialize)]
pub struct Location {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GraphRecurrencePattern {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub interval: Option<u32>,
    #[serde(rename = "daysOfWeek", default)]
    pub days_of_week: Vec<String>,
    #[serde(rename = "dayOfMonth")]
    pub day_of_month: Option<u32>,
    #[serde(rename = "firstDayOfWeek")]
    pub first_day_of_week: Option<String>,
    pub month: Option<u32>,
    pub index: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GraphRecurrenceRange {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    #[serde(rename = "numberOfOccurrences")]
    pub number_of_occurrences: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PatternedRecurrence {
    pub pattern: Option<GraphRecurrencePattern>,
    pub range: Option<GraphRecurrenceRange>,
}

impl From<PatternedRecurrence> for RecurrenceDefinition {
    fn from(recurrence: PatternedRecurrence) -> Self {
        let pattern = recurrence.pattern.and_then(|p| {
            let kind = PatternKind::parse(p.kind.as_deref()?)?;
            let mut pattern = RecurrencePattern::new(kind);
            pattern.interval = p.interval.filter(|i| *i > 0);
            pattern.days_of_week = p.days_of_week;
            pattern.day_of_month = p.day_of_month.filter(|d| *d > 0);
            // Graph always sends firstDayOfWeek; it only means something for weekly series
            if kind == PatternKind::Weekly {
                pattern.first_day_of_week = p.first_day_of_week;
            }
            pattern.month = p.month.filter(|m| *m > 0).and_then(|m| parse_month(&m.to_string()));
            pattern.index = p.index.filter(|_| matches!(kind, PatternKind::RelativeMonthly | PatternKind::RelativeYearly));
            Some(pattern)
        });

        // endDate is "0001-01-01" on noEnd ranges, so the range type decides
        let range = match recurrence.range {
            Some(range) => match range.kind.as_deref() {
                Some("endDate") => RecurrenceRange {
                    end_date: range.end_date,
                    ..Default::default()
                },
                Some("numbered") => RecurrenceRange {
                    occurrences: range.number_of_occurrences,
                    ..Default::default()
                },
                Some("noEnd") => RecurrenceRange {
                    no_end: true,
                    ..Default::default()
                },
                _ => RecurrenceRange::default(),
            },
            None => RecurrenceRange::default(),
        };

        RecurrenceDefinition { pattern, range }
    }
}

#[derive(Debug, Deserialize)]
pub struct GraphEvent {
    pub id: String,
    pub subject: Option<String>,
    #[serde(rename = "iCalUId")]
    pub ical_uid: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    #[serde(rename = "seriesMasterId")]
    pub series_master_id: Option<String>,
    #[serde(rename = "originalStart")]
    pub original_start: Option<String>,
    pub start: Option<DateTimeTimeZone>,
    pub end: Option<DateTimeTimeZone>,
    #[serde(rename = "isCancelled", default)]
    pub is_cancelled: bool,
    pub organizer: Option<Recipient>,
    #[serde(default)]
    pub attendees: Vec<GraphAttendee>,
    pub location: Option<Location>,
    #[serde(rename = "responseStatus")]
    pub response_status: Option<ResponseStatus>,
    pub recurrence: Option<PatternedRecurrence>,
    pub body: Option<ItemBody>,
    #[serde(rename = "singleValueExtendedProperties", default)]
    pub extended_properties: Vec<ExtendedProperty>,
}

/// MAPI property carrying the internet message id (PidTagInternetMessageId).
/// Events do not expose it as a regular property.
pub const INTERNET_MESSAGE_ID_PROPERTY: &str = "String 0x1035";

#[derive(Debug, Deserialize)]
pub struct ExtendedProperty {
    pub id: String,
    pub value: Option<String>,
}

impl GraphEvent {
    fn internet_message_id(&self) -> Option<String> {
        self.extended_properties
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(INTERNET_MESSAGE_ID_PROPERTY))
            .and_then(|p| p.value.clone())
    }
}

/// Graph `type` values mapped onto the classifier's vocabulary
fn type_hint(event_type: &str) -> String {
    match event_type {
        "seriesMaster" => "RecurringMaster".to_string(),
        "occurrence" => "Occurrence".to_string(),
        "exception" => "Exception".to_string(),
        "singleInstance" => "Single".to_string(),
        other => other.to_string(),
    }
}

impl From<GraphEvent> for CalendarSnapshot {
    fn from(event: GraphEvent) -> Self {
        let fields = ItemFields {
            calendar_item_type_hint: event.event_type.as_deref().map(type_hint),
            has_recurrence_definition: event.recurrence.is_some(),
            recurrence_id_present: false,
            original_start_present: event.original_start.is_some(),
            recurring_master_id: event.series_master_id.clone(),
            is_recurring_flag: event.series_master_id.is_some(),
            uid: event.ical_uid.clone(),
        };
        let internet_message_id = event.internet_message_id();

        CalendarSnapshot {
            item_id: event.id,
            change_key: None,
            subject: event.subject.unwrap_or_default(),
            location: event
                .location
                .and_then(|l| l.display_name)
                .unwrap_or_default(),
            organizer: event.organizer.map(|o| o.address()).unwrap_or_default(),
            attendees: event
                .attendees
                .into_iter()
                .map(|a| Attendee {
                    address: a.email_address.address.unwrap_or_default(),
                    response: a.status.and_then(|s| s.response),
                })
                .collect(),
            start: event.start.and_then(|s| s.date_time),
            end: event.end.and_then(|e| e.date_time),
            original_start: event.original_start,
            is_cancelled: event.is_cancelled,
            my_response: event.response_status.and_then(|r| r.response),
            uid: event.ical_uid,
            internet_message_id,
            recurrence: event.recurrence.map(RecurrenceDefinition::from),
            fields,
            body: event.body.map(|b| b.text()),
        }
    }
}

/// Response to a `$batch` call
#[derive(Debug, Deserialize)]
pub struct BatchResponse {
    pub responses: Vec<BatchItemResponse>,
}

#[derive(Debug, Deserialize)]
pub struct BatchItemResponse {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::{classify, DurationKind, RecurrenceLabel};
    use serde_json::json;

    #[test]
    fn test_series_master_mapping() {
        let event: GraphEvent = serde_json::from_value(json!({
            "id": "AAMkMaster",
            "subject": "Standup",
            "iCalUId": "040000008200E00074C5B7101A82E00800000000",
            "type": "seriesMaster",
            "isCancelled": false,
            "organizer": {"emailAddress": {"address": "boss@x.com", "name": "Boss"}},
            "attendees": [
                {"emailAddress": {"address": "a@x.com"}, "status": {"response": "accepted"}}
            ],
            "location": {"displayName": "Room 1"},
            "start": {"dateTime": "2024-05-06T09:00:00.0000000", "timeZone": "UTC"},
            "end": {"dateTime": "2024-05-06T09:15:00.0000000", "timeZone": "UTC"},
            "recurrence": {
                "pattern": {"type": "weekly", "interval": 1, "month": 0, "dayOfMonth": 0,
                            "daysOfWeek": ["monday", "wednesday"], "firstDayOfWeek": "sunday", "index": "first"},
                "range": {"type": "noEnd", "startDate": "2024-05-06", "endDate": "0001-01-01",
                          "numberOfOccurrences": 0}
            }
        }))
        .unwrap();

        let snapshot = CalendarSnapshot::from(event);
        assert_eq!(classify(&snapshot.fields), RecurrenceLabel::RecurringMaster);
        assert_eq!(snapshot.organizer, "boss@x.com");
        assert_eq!(snapshot.attendees[0].response.as_deref(), Some("accepted"));

        let recurrence = snapshot.recurrence.unwrap();
        assert_eq!(recurrence.range.duration(), DurationKind::NoEnd);
        let pattern = recurrence.pattern.unwrap();
        assert_eq!(pattern.kind, PatternKind::Weekly);
        assert_eq!(pattern.month, None);
        assert_eq!(pattern.day_of_month, None);
        assert_eq!(pattern.index, None);
    }

    #[test]
    fn test_occurrence_mapping() {
        let event: GraphEvent = serde_json::from_value(json!({
            "id": "AAMkOcc",
            "type": "occurrence",
            "seriesMasterId": "AAMkMaster",
            "originalStart": "2024-05-08T09:00:00Z",
            "start": {"dateTime": "2024-05-08T09:00:00.0000000", "timeZone": "UTC"}
        }))
        .unwrap();

        let snapshot = CalendarSnapshot::from(event);
        assert_eq!(classify(&snapshot.fields), RecurrenceLabel::Occurrence);
        assert_eq!(snapshot.fields.recurring_master_id.as_deref(), Some("AAMkMaster"));
        assert!(!snapshot.start_moved());
    }

    #[test]
    fn test_internet_message_id_from_extended_property() {
        let event: GraphEvent = serde_json::from_value(json!({
            "id": "AAMkInvite",
            "type": "singleInstance",
            "singleValueExtendedProperties": [
                {"id": "String 0x1035", "value": "<invite-1@x.com>"}
            ]
        }))
        .unwrap();
        let snapshot = CalendarSnapshot::from(event);
        assert_eq!(snapshot.internet_message_id.as_deref(), Some("<invite-1@x.com>"));

        let bare: GraphEvent = serde_json::from_value(json!({"id": "AAMkBare"})).unwrap();
        assert_eq!(CalendarSnapshot::from(bare).internet_message_id, None);
    }

    #[test]
    fn test_html_body_rendered_to_text() {
        let body = ItemBody {
            content_type: Some("html".into()),
            content: Some("<html><body><p>Payment <b>overdue</b></p></body></html>".into()),
        };
        assert!(body.text().contains("overdue"));
        assert!(!body.text().contains("<b>"));
    }
}

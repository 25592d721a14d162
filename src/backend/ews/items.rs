//! EWS `Message` and `CalendarItem` elements mapped to snapshots

use super::xml::XmlNode;
use crate::model::{Attendee, CalendarSnapshot, MessageSnapshot};
use crate::recurrence::describe::parse_month;
use crate::recurrence::{ItemFields, PatternKind, RecurrenceDefinition, RecurrencePattern, RecurrenceRange};

fn item_id(node: &XmlNode) -> (String, Option<String>) {
    match node.child("ItemId") {
        Some(id) => (
            id.attr("Id").unwrap_or_default().to_string(),
            id.attr("ChangeKey").map(str::to_string),
        ),
        None => (String::new(), None),
    }
}

/// Address of a `Mailbox` wrapper such as `From`, `Organizer` or `Attendee`
fn mailbox_address(wrapper: &XmlNode) -> Option<String> {
    let mailbox = wrapper.child("Mailbox")?;
    mailbox
        .child_text("EmailAddress")
        .or_else(|| mailbox.child_text("Name"))
}

fn flag(node: &XmlNode, name: &str) -> bool {
    node.child_text(name)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

pub fn parse_message(node: &XmlNode) -> MessageSnapshot {
    let (item_id, change_key) = item_id(node);
    let sender = node
        .child("From")
        .and_then(mailbox_address)
        .or_else(|| node.child("Sender").and_then(mailbox_address))
        .unwrap_or_default();

    MessageSnapshot {
        item_id,
        change_key,
        internet_message_id: node.child_text("InternetMessageId"),
        subject: node.child_text("Subject").unwrap_or_default(),
        sender,
        received: node.child_text("DateTimeReceived").unwrap_or_default(),
        body: node.child("Body").map(|b| b.text.clone()),
    }
}

fn attendees(node: &XmlNode) -> Vec<Attendee> {
    ["RequiredAttendees", "OptionalAttendees"]
        .iter()
        .filter_map(|list| node.child(list))
        .flat_map(|list| list.children_named("Attendee"))
        .filter_map(|attendee| {
            mailbox_address(attendee).map(|address| Attendee {
                address,
                response: attendee.child_text("ResponseType"),
            })
        })
        .collect()
}

pub fn parse_calendar_item(node: &XmlNode) -> CalendarSnapshot {
    let (item_id, change_key) = item_id(node);
    let hint = node.child_text("CalendarItemType");
    let recurrence = node.child("Recurrence").and_then(parse_recurrence);
    let original_start = node.child_text("OriginalStart");
    let uid = node.child_text("UID");

    // EWS instances carry no master id; the instance id itself addresses the
    // master through RecurringMasterItemId.
    let is_instance = hint
        .as_deref()
        .is_some_and(|h| h.eq_ignore_ascii_case("Occurrence") || h.eq_ignore_ascii_case("Exception"));

    let fields = ItemFields {
        calendar_item_type_hint: hint.clone(),
        has_recurrence_definition: recurrence.is_some(),
        recurrence_id_present: node.child_text("RecurrenceId").is_some(),
        original_start_present: original_start.is_some(),
        recurring_master_id: is_instance.then(|| item_id.clone()),
        is_recurring_flag: flag(node, "IsRecurring"),
        uid: uid.clone(),
    };

    CalendarSnapshot {
        item_id,
        change_key,
        subject: node.child_text("Subject").unwrap_or_default(),
        location: node.child_text("Location").unwrap_or_default(),
        organizer: node.child("Organizer").and_then(mailbox_address).unwrap_or_default(),
        attendees: attendees(node),
        start: node.child_text("Start"),
        end: node.child_text("End"),
        original_start,
        is_cancelled: flag(node, "IsCancelled"),
        my_response: node.child_text("MyResponseType"),
        uid,
        internet_message_id: node.child_text("InternetMessageId"),
        recurrence,
        fields,
        body: node.child("Body").map(|b| b.text.clone()),
    }
}

/// Dates come back as `2024-06-30Z` or `2024-06-30+08:00`
fn date_only(value: &str) -> String {
    value.trim().chars().take(10).collect()
}

fn number(node: &XmlNode, name: &str) -> Option<u32> {
    node.child_text(name)
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|n| *n > 0)
}

/// Pattern and range of a `Recurrence` element
pub fn parse_recurrence(node: &XmlNode) -> Option<RecurrenceDefinition> {
    if node.children.is_empty() {
        return None;
    }

    let mut definition = RecurrenceDefinition {
        pattern: None,
        range: RecurrenceRange::default(),
    };

    for child in &node.children {
        match child.name.as_str() {
            "NoEndRecurrence" => definition.range.no_end = true,
            "EndDateRecurrence" => definition.range.end_date = child.child_text("EndDate").map(|d| date_only(&d)),
            "NumberedRecurrence" => definition.range.occurrences = number(child, "NumberOfOccurrences"),
            name => {
                if let Some(kind) = PatternKind::parse(name) {
                    definition.pattern = Some(parse_pattern(kind, child));
                }
            }
        }
    }

    Some(definition)
}

fn parse_pattern(kind: PatternKind, node: &XmlNode) -> RecurrencePattern {
    let mut pattern = RecurrencePattern::new(kind);
    pattern.interval = number(node, "Interval");
    pattern.days_of_week = node
        .child_text("DaysOfWeek")
        .map(|days| days.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    pattern.day_of_month = number(node, "DayOfMonth");
    pattern.first_day_of_week = node.child_text("FirstDayOfWeek");
    pattern.month = node.child_text("Month").as_deref().and_then(parse_month);
    pattern.index = node.child_text("DayOfWeekIndex");
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::{classify, describe_master, DurationKind, RecurrenceLabel, ReportLocale};

    fn parse(doc: &str) -> XmlNode {
        XmlNode::parse(doc).unwrap()
    }

    #[test]
    fn test_message_fields() {
        let node = parse(
            r#"<t:Message xmlns:t="t">
                <t:ItemId Id="AAMk1" ChangeKey="CQ1"/>
                <t:Subject>Invoice 42</t:Subject>
                <t:DateTimeReceived>2024-01-05T10:00:00Z</t:DateTimeReceived>
                <t:From><t:Mailbox><t:Name>Billing</t:Name><t:EmailAddress>billing@vendor.com</t:EmailAddress></t:Mailbox></t:From>
                <t:InternetMessageId>&lt;abc@vendor.com&gt;</t:InternetMessageId>
            </t:Message>"#,
        );
        let message = parse_message(&node);
        assert_eq!(message.item_id, "AAMk1");
        assert_eq!(message.change_key.as_deref(), Some("CQ1"));
        assert_eq!(message.sender, "billing@vendor.com");
        assert_eq!(message.internet_message_id.as_deref(), Some("<abc@vendor.com>"));
        assert!(message.body.is_none());
    }

    #[test]
    fn test_weekly_master() {
        let node = parse(
            r#"<CalendarItem>
                <ItemId Id="M1" ChangeKey="DwAA"/>
                <Subject>Standup</Subject>
                <UID>040000008200E00074C5B7101A82E00800000000</UID>
                <CalendarItemType>RecurringMaster</CalendarItemType>
                <IsRecurring>true</IsRecurring>
                <Organizer><Mailbox><EmailAddress>boss@x.com</EmailAddress></Mailbox></Organizer>
                <RequiredAttendees>
                  <Attendee><Mailbox><EmailAddress>a@x.com</EmailAddress></Mailbox><ResponseType>Accept</ResponseType></Attendee>
                </RequiredAttendees>
                <Recurrence>
                  <WeeklyRecurrence><Interval>1</Interval><DaysOfWeek>Monday Wednesday</DaysOfWeek><FirstDayOfWeek>Sunday</FirstDayOfWeek></WeeklyRecurrence>
                  <NoEndRecurrence><StartDate>2024-01-01Z</StartDate></NoEndRecurrence>
                </Recurrence>
            </CalendarItem>"#,
        );
        let item = parse_calendar_item(&node);
        assert_eq!(classify(&item.fields), RecurrenceLabel::RecurringMaster);
        assert!(item.fields.recurring_master_id.is_none());
        assert_eq!(item.attendees[0].response.as_deref(), Some("Accept"));

        let description = describe_master(item.recurrence.as_ref().unwrap(), ReportLocale::English);
        assert_eq!(description.pattern_name, "Weekly");
        assert!(description.pattern_details.contains("Monday, Wednesday"));
        assert_eq!(description.duration, DurationKind::NoEnd);
    }

    #[test]
    fn test_occurrence_points_at_its_master() {
        let node = parse(
            r#"<CalendarItem>
                <ItemId Id="O1"/>
                <CalendarItemType>Occurrence</CalendarItemType>
                <OriginalStart>2024-05-06T09:00:00Z</OriginalStart>
                <Recurrence/>
            </CalendarItem>"#,
        );
        let item = parse_calendar_item(&node);
        assert_eq!(item.fields.recurring_master_id.as_deref(), Some("O1"));
        assert!(item.recurrence.is_none());
        assert!(item.fields.original_start_present);
    }

    #[test]
    fn test_ranges() {
        let numbered = parse(
            r#"<Recurrence><AbsoluteYearlyRecurrence><DayOfMonth>14</DayOfMonth><Month>February</Month></AbsoluteYearlyRecurrence>
               <NumberedRecurrence><StartDate>2024-02-14Z</StartDate><NumberOfOccurrences>5</NumberOfOccurrences></NumberedRecurrence></Recurrence>"#,
        );
        let definition = parse_recurrence(&numbered).unwrap();
        let pattern = definition.pattern.as_ref().unwrap();
        assert_eq!(pattern.kind, PatternKind::AbsoluteYearly);
        assert_eq!(pattern.month, Some(2));
        assert_eq!(definition.range.duration(), DurationKind::Occurrences(5));

        let dated = parse(
            r#"<Recurrence><DailyRegeneration><Interval>3</Interval></DailyRegeneration>
               <EndDateRecurrence><StartDate>2024-01-01Z</StartDate><EndDate>2024-06-30+08:00</EndDate></EndDateRecurrence></Recurrence>"#,
        );
        let definition = parse_recurrence(&dated).unwrap();
        assert_eq!(definition.pattern.unwrap().kind, PatternKind::Regenerating);
        assert_eq!(definition.range.duration(), DurationKind::EndsOn("2024-06-30".into()));
    }
}

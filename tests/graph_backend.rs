use mailsweep::backend::{GraphBackend, MailboxBackend};
use mailsweep::criteria::{Criteria, TargetType};
use mailsweep::http::mock::MockTransport;
use mailsweep::http::{HttpRequest, HttpResponse, RetryPolicy};
use mailsweep::model::{ActionMode, ItemRef};
use mailsweep::report::{ResultRow, RowStatus};
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::{json, Value};

const BASE: &str = "https://graph.test";

fn backend() -> GraphBackend {
    GraphBackend::new(BASE, "token").with_policy(RetryPolicy::immediate(3))
}

/// Answers every sub-request of a batch with `status`, except ids listed in
/// `overrides`
fn batch_handler(status: u16, overrides: Vec<(&'static str, u16)>) -> impl Fn(&HttpRequest) -> HttpResponse {
    move |request: &HttpRequest| {
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap_or("{}")).unwrap();
        let responses: Vec<Value> = body["requests"]
            .as_array()
            .unwrap()
            .iter()
            .map(|sub| {
                let id = sub["id"].as_str().unwrap().to_string();
                let url = sub["url"].as_str().unwrap();
                let status = overrides
                    .iter()
                    .find(|(item, _)| url.contains(item))
                    .map(|(_, s)| *s)
                    .unwrap_or(status);
                json!({ "id": id, "status": status, "body": {} })
            })
            .collect();
        HttpResponse::json(200, &json!({ "responses": responses }))
    }
}

fn items(count: usize) -> Vec<ItemRef> {
    (1..=count).map(|i| ItemRef::new(format!("AAMk{}", i))).collect()
}

#[tokio::test]
async fn test_permanent_delete_uses_two_batches_for_25_items() {
    let mock = MockTransport::new();
    mock.on(Method::POST, "/v1.0/$batch", batch_handler(204, vec![]));

    let outcomes = backend()
        .delete_items(&mock, "a@x.com", &items(25), TargetType::Email, ActionMode::PermanentDelete)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 25);
    assert!(outcomes.iter().all(|o| o.success));
    assert_eq!(mock.count(&Method::POST, "$batch"), 2);
    assert_eq!(mock.requests().len(), 2);

    let first: Value = serde_json::from_str(mock.requests()[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(first["requests"].as_array().unwrap().len(), 20);
    assert!(first["requests"][0]["url"].as_str().unwrap().ends_with("/permanentDelete"));
}

#[tokio::test]
async fn test_unsupported_permanent_delete_downgrades() {
    let mock = MockTransport::new();
    mock.on(Method::POST, "/v1.0/$batch", batch_handler(204, vec![("AAMk2/", 404)]));
    mock.on(Method::DELETE, "/messages/AAMk2", |_| HttpResponse::new(204, ""));

    let outcomes = backend()
        .delete_items(&mock, "a@x.com", &items(3), TargetType::Email, ActionMode::PermanentDelete)
        .await
        .unwrap();

    assert!(outcomes.iter().all(|o| o.success));
    assert!(outcomes[1].details.contains("downgraded"));
    assert_eq!(outcomes[0].details, "Permanently deleted");
    assert_eq!(mock.count(&Method::DELETE, "/messages/AAMk2"), 1);
}

#[tokio::test]
async fn test_throttled_batch_falls_back_to_direct_calls() {
    let mock = MockTransport::new();
    mock.on(Method::POST, "/v1.0/$batch", batch_handler(204, vec![("AAMk1", 429)]));
    mock.on(Method::DELETE, "/messages/AAMk1", |_| HttpResponse::new(204, ""));

    let outcomes = backend()
        .delete_items(&mock, "a@x.com", &items(2), TargetType::Email, ActionMode::Delete)
        .await
        .unwrap();

    assert!(outcomes.iter().all(|o| o.success));
    assert_eq!(mock.count(&Method::DELETE, "/messages/AAMk1"), 1);
}

fn message(id: &str, subject: &str) -> Value {
    json!({
        "id": id,
        "subject": subject,
        "from": {"emailAddress": {"address": "billing@vendor.com"}},
        "receivedDateTime": "2024-05-06T09:30:00Z",
        "internetMessageId": format!("<{}@vendor.com>", id)
    })
}

#[tokio::test]
async fn test_every_page_is_collected_once() {
    let mock = MockTransport::new();
    mock.on_json(
        Method::GET,
        "/users/a@x.com/messages",
        200,
        json!({
            "value": [message("m1", "Invoice 1"), message("m2", "Lunch")],
            "@odata.nextLink": format!("{}/v1.0/users/a@x.com/messages?$skiptoken=p2", BASE)
        }),
    );
    mock.on_json(
        Method::GET,
        "/users/a@x.com/messages?$skiptoken=p2",
        200,
        json!({
            "value": [message("m3", "Invoice 3")],
            "@odata.nextLink": format!("{}/v1.0/users/a@x.com/messages?$skiptoken=p3", BASE)
        }),
    );
    mock.on_json(
        Method::GET,
        "/users/a@x.com/messages?$skiptoken=p3",
        200,
        json!({ "value": [message("m4", "Invoice 4"), message("m5", "Party")] }),
    );

    let criteria = Criteria::new(TargetType::Email).with_subject("invoice");
    let rows = backend().scan_mailbox(&mock, "a@x.com", &criteria).await.unwrap();

    let ids: Vec<&str> = rows.iter().map(ResultRow::item_id).collect();
    assert_eq!(ids, vec!["m1", "m3", "m4"]);
    assert!(rows.iter().all(|r| r.status() == RowStatus::Pending));
    assert_eq!(mock.requests().len(), 3);
}

#[tokio::test]
async fn test_unauthorized_mailbox_is_fatal() {
    let mock = MockTransport::new();
    mock.on(Method::GET, "/users/a@x.com/messages", |_| {
        HttpResponse::new(401, r#"{"error":{"code":"InvalidAuthenticationToken"}}"#)
    });

    let error = backend()
        .scan_mailbox(&mock, "a@x.com", &Criteria::new(TargetType::Email))
        .await
        .unwrap_err();
    assert!(error.is_mailbox_fatal());
}

fn query_param(request: &HttpRequest, name: &str) -> Option<String> {
    url::Url::parse(&request.url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn test_calendar_view_only_with_both_dates() {
    let mock = MockTransport::new();
    mock.on_json(Method::GET, "/users/a@x.com/", 200, json!({ "value": [] }));

    let start_only = Criteria::new(TargetType::Meeting).with_dates(NaiveDate::from_ymd_opt(2024, 3, 1), None);
    backend().scan_mailbox(&mock, "a@x.com", &start_only).await.unwrap();

    let both = Criteria::new(TargetType::Meeting)
        .with_dates(NaiveDate::from_ymd_opt(2024, 3, 1), NaiveDate::from_ymd_opt(2024, 3, 31));
    backend().scan_mailbox(&mock, "a@x.com", &both).await.unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].url.contains("/events"));
    assert!(!requests[0].url.contains("/calendarView"));
    assert!(query_param(&requests[0], "startDateTime").is_none());

    assert!(requests[1].url.contains("/calendarView"));
    assert_eq!(query_param(&requests[1], "startDateTime").as_deref(), Some("2024-03-01T00:00:00"));
    assert_eq!(query_param(&requests[1], "endDateTime").as_deref(), Some("2024-04-01T00:00:00"));
}

const UID: &str = "040000008200E00074C5B7101A82E00800000000D0E1A2B3C4D5E6F7";

fn instance(id: &str, subject: &str, day: u32) -> Value {
    json!({
        "id": id,
        "subject": subject,
        "type": "occurrence",
        "seriesMasterId": "AAMkMaster",
        "iCalUId": UID,
        "organizer": {"emailAddress": {"address": "boss@x.com"}},
        "location": {"displayName": "Room 1"},
        "originalStart": format!("2024-03-{:02}T09:00:00Z", day),
        "start": {"dateTime": format!("2024-03-{:02}T09:00:00.0000000", day), "timeZone": "UTC"},
        "end": {"dateTime": format!("2024-03-{:02}T09:15:00.0000000", day), "timeZone": "UTC"}
    })
}

#[tokio::test]
async fn test_series_instances_split_into_occurrence_and_exception() {
    let mock = MockTransport::new();
    mock.on_json(
        Method::GET,
        "/users/a@x.com/calendarView",
        200,
        json!({ "value": [instance("occ-4", "Standup", 4), instance("occ-6", "Standup (moved topic)", 6)] }),
    );
    mock.on_json(
        Method::GET,
        "/users/a@x.com/events/AAMkMaster",
        200,
        json!({
            "id": "AAMkMaster",
            "subject": "Standup",
            "type": "seriesMaster",
            "iCalUId": UID,
            "organizer": {"emailAddress": {"address": "boss@x.com"}},
            "location": {"displayName": "Room 1"},
            "recurrence": {
                "pattern": {"type": "weekly", "interval": 1, "daysOfWeek": ["monday", "wednesday"]},
                "range": {"type": "noEnd", "startDate": "2024-01-01"}
            }
        }),
    );

    let criteria = Criteria::new(TargetType::Meeting)
        .with_dates(NaiveDate::from_ymd_opt(2024, 3, 1), NaiveDate::from_ymd_opt(2024, 3, 31));
    let rows = backend().scan_mailbox(&mock, "a@x.com", &criteria).await.unwrap();
    assert_eq!(rows.len(), 2);

    let meetings: Vec<_> = rows
        .iter()
        .map(|row| match row {
            ResultRow::Meeting(row) => row.clone(),
            ResultRow::Email(_) => panic!("expected meeting rows"),
        })
        .collect();
    assert_eq!(meetings[0].item_type, "Occurrence");
    assert_eq!(meetings[1].item_type, "Exception");
    assert_eq!(meetings[0].recurrence_pattern, "Weekly");
    assert_eq!(meetings[0].is_endless, "N/A");
    assert_eq!(meetings[0].clean_goid, meetings[1].clean_goid);

    // Second instance is served from the per-run master cache
    assert_eq!(mock.count(&Method::GET, "/events/AAMkMaster"), 1);
}

fn paid_message(id: &str, received: &str) -> Value {
    json!({
        "id": id,
        "subject": "Reminder",
        "from": {"emailAddress": {"address": "billing@vendor.com"}},
        "receivedDateTime": received,
        "internetMessageId": format!("<{}@vendor.com>", id),
        "body": {"contentType": "text", "content": "Please pay by Friday"}
    })
}

#[tokio::test]
async fn test_body_search_keeps_date_range() {
    let mock = MockTransport::new();
    mock.on_json(
        Method::GET,
        "/users/a@x.com/messages",
        200,
        json!({
            "value": [
                paid_message("old", "2019-06-03T08:00:00Z"),
                paid_message("jan", "2024-01-15T08:00:00Z"),
                paid_message("feb", "2024-02-01T00:00:00Z")
            ]
        }),
    );

    let criteria = Criteria::new(TargetType::Email)
        .with_body("pay")
        .with_dates(NaiveDate::from_ymd_opt(2024, 1, 1), NaiveDate::from_ymd_opt(2024, 1, 31));
    let rows = backend().scan_mailbox(&mock, "a@x.com", &criteria).await.unwrap();

    let ids: Vec<&str> = rows.iter().map(ResultRow::item_id).collect();
    assert_eq!(ids, vec!["jan"]);
    assert_eq!(query_param(&mock.requests()[0], "$search").as_deref(), Some("\"body:pay\""));
}

fn invite(id: &str, message_id: Option<&str>) -> Value {
    let properties: Vec<Value> = message_id
        .map(|value| json!({"id": "String 0x1035", "value": value}))
        .into_iter()
        .collect();
    json!({
        "id": id,
        "subject": "Review",
        "type": "singleInstance",
        "organizer": {"emailAddress": {"address": "boss@x.com"}},
        "start": {"dateTime": "2024-03-04T09:00:00.0000000", "timeZone": "UTC"},
        "end": {"dateTime": "2024-03-04T10:00:00.0000000", "timeZone": "UTC"},
        "singleValueExtendedProperties": properties
    })
}

#[tokio::test]
async fn test_meeting_message_id_filters_events() {
    let mock = MockTransport::new();
    mock.on_json(
        Method::GET,
        "/users/a@x.com/events",
        200,
        json!({
            "value": [
                invite("ev-1", Some("<invite-1@x.com>")),
                invite("ev-2", Some("<invite-2@x.com>")),
                invite("ev-3", None)
            ]
        }),
    );

    let criteria = Criteria::new(TargetType::Meeting).with_message_id("<invite-1@x.com>");
    let rows = backend().scan_mailbox(&mock, "a@x.com", &criteria).await.unwrap();

    let ids: Vec<&str> = rows.iter().map(ResultRow::item_id).collect();
    assert_eq!(ids, vec!["ev-1"]);

    let request = &mock.requests()[0];
    let filter = query_param(request, "$filter").unwrap();
    assert!(filter.contains("ep/id eq 'String 0x1035' and ep/value eq '<invite-1@x.com>'"));
    assert!(query_param(request, "$expand").unwrap().starts_with("singleValueExtendedProperties"));
}

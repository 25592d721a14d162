use std::sync::Arc;

use mailsweep::backend::GraphBackend;
use mailsweep::criteria::{Criteria, TargetType};
use mailsweep::http::mock::MockTransport;
use mailsweep::http::{ClientPool, HttpTransport, HttpResponse, RetryPolicy};
use mailsweep::model::ActionMode;
use mailsweep::report::{load_report, CsvReportSink, MemorySink, RowStatus};
use mailsweep::sweep::{SweepPlan, SweepRunner};
use reqwest::Method;
use serde_json::{json, Value};
use tempfile::tempdir;

fn message(id: &str, subject: &str) -> Value {
    json!({
        "id": id,
        "subject": subject,
        "from": {"emailAddress": {"address": "billing@vendor.com"}},
        "receivedDateTime": "2024-05-06T09:30:00Z",
        "internetMessageId": format!("<{}@vendor.com>", id)
    })
}

fn graph() -> Arc<GraphBackend> {
    Arc::new(GraphBackend::new("https://graph.test", "token").with_policy(RetryPolicy::immediate(2)))
}

fn mailbox_with_three_messages(mock: &MockTransport, mailbox: &str) {
    mock.on_json(
        Method::GET,
        &format!("/users/{}/messages", mailbox),
        200,
        json!({ "value": [
            message(&format!("{}-1", mailbox), "Invoice 2024-05"),
            message(&format!("{}-2", mailbox), "Lunch on Friday"),
            message(&format!("{}-3", mailbox), "Team offsite")
        ]}),
    );
}

#[tokio::test]
async fn test_report_only_scan_writes_one_skipped_row() {
    let mock = Arc::new(MockTransport::new());
    mailbox_with_three_messages(&mock, "a@x.com");

    let dir = tempdir().unwrap();
    let path = dir.path().join("Graph_Email_Report.csv");
    let sink = Arc::new(CsvReportSink::create(&path, TargetType::Email).unwrap());

    let transport: Arc<dyn HttpTransport> = mock.clone();
    let runner = SweepRunner::new(graph(), ClientPool::shared(transport, 4), sink);
    let plan = SweepPlan::new(
        Criteria::new(TargetType::Email).with_subject("Invoice"),
        ActionMode::ReportOnly,
        vec!["a@x.com".into()],
    );

    let summary = runner.run(&plan).await.unwrap();
    assert_eq!(summary.mailboxes, 1);
    assert_eq!(summary.rows, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(mock.count(&Method::DELETE, ""), 0);
    assert_eq!(mock.count(&Method::POST, ""), 0);

    let report = load_report(&path).unwrap();
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].get("Subject"), Some("Invoice 2024-05"));
    assert_eq!(report.rows[0].get("Status"), Some("Skipped"));
    assert_eq!(report.rows[0].get("Action"), Some("ReportOnly"));
}

#[tokio::test]
async fn test_delete_run_isolates_failing_mailbox() {
    let mock = Arc::new(MockTransport::new());
    mailbox_with_three_messages(&mock, "a@x.com");
    mailbox_with_three_messages(&mock, "b@x.com");
    mock.on(Method::GET, "/users/gone@x.com/", |_| {
        HttpResponse::new(404, r#"{"error":{"code":"ErrorInvalidUser"}}"#)
    });
    mock.on(Method::POST, "/v1.0/$batch", |request| {
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        let responses: Vec<Value> = body["requests"]
            .as_array()
            .unwrap()
            .iter()
            .map(|sub| json!({ "id": sub["id"], "status": 204 }))
            .collect();
        HttpResponse::json(200, &json!({ "responses": responses }))
    });

    let sink = Arc::new(MemorySink::new());
    let transport: Arc<dyn HttpTransport> = mock.clone();
    let runner = SweepRunner::new(graph(), ClientPool::shared(transport, 2), sink.clone());
    let plan = SweepPlan::new(
        Criteria::new(TargetType::Email).with_subject("invoice"),
        ActionMode::Delete,
        vec!["a@x.com".into(), "gone@x.com".into(), "b@x.com".into()],
    );

    let summary = runner.run(&plan).await.unwrap();
    assert_eq!(summary.mailboxes, 3);
    assert_eq!(summary.successes, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(mock.count(&Method::POST, "$batch"), 2);

    let rows = sink.rows();
    let failed = rows.iter().find(|r| r.mailbox() == "gone@x.com").unwrap();
    assert_eq!(failed.status(), RowStatus::Error);
    assert!(failed.details().contains("gone@x.com"));
    assert!(rows
        .iter()
        .filter(|r| r.mailbox() != "gone@x.com")
        .all(|r| r.status() == RowStatus::Success && r.details() == "Deleted"));
}

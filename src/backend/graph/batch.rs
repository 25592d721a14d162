//! Graph deletion through `$batch`
//!
//! Up to 20 sub-requests go into one batch call. Sub-requests the batch did
//! not settle (missing from the response, throttled, or the whole batch
//! unusable) are replayed as direct calls under the retry policy.

use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::query::segment;
use super::types::BatchResponse;
use super::GraphBackend;
use crate::criteria::TargetType;
use crate::error::{summarize_body, SweepResult};
use crate::http::{HttpRequest, HttpTransport};
use crate::model::{ActionMode, DeleteOutcome, ItemRef};

/// How one sub-response settles an item
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Done(DeleteOutcome),
    /// Stronger mode unsupported; fall back to a plain DELETE
    Downgrade(String),
    /// Not settled by the batch, send directly
    Direct,
}

fn is_success(status: u16) -> bool {
    matches!(status, 200 | 201 | 202 | 204)
}

fn collection(target: TargetType) -> &'static str {
    match target {
        TargetType::Email => "messages",
        TargetType::Meeting => "events",
    }
}

/// Item path relative to the API version root
fn item_path(mailbox: &str, target: TargetType, item_id: &str) -> String {
    format!("/users/{}/{}/{}", segment(mailbox), collection(target), segment(item_id))
}

/// Method, relative URL and body for a mode
fn sub_request(mode: ActionMode, path: &str) -> (Method, String, Option<Value>) {
    match mode {
        ActionMode::SoftDelete => (
            Method::POST,
            format!("{}/move", path),
            Some(json!({ "destinationId": "deleteditems" })),
        ),
        ActionMode::PermanentDelete => (Method::POST, format!("{}/permanentDelete", path), None),
        ActionMode::Delete | ActionMode::ReportOnly => (Method::DELETE, path.to_string(), None),
    }
}

fn success_note(mode: ActionMode) -> &'static str {
    match mode {
        ActionMode::SoftDelete => "Moved to Deleted Items",
        ActionMode::PermanentDelete => "Permanently deleted",
        _ => "Deleted",
    }
}

fn interpret(item_id: &str, mode: ActionMode, status: u16, body: &str) -> Verdict {
    if is_success(status) {
        return Verdict::Done(DeleteOutcome::success(item_id, success_note(mode)));
    }

    let stronger = matches!(mode, ActionMode::SoftDelete | ActionMode::PermanentDelete);
    if stronger && matches!(status, 404 | 405) {
        let operation = if mode == ActionMode::SoftDelete { "move" } else { "permanentDelete" };
        return Verdict::Downgrade(format!(
            "{} unsupported (HTTP {}); downgraded to Delete",
            operation, status
        ));
    }

    if mode == ActionMode::SoftDelete && status == 400 && body.to_lowercase().contains("already") {
        return Verdict::Done(DeleteOutcome::success(item_id, "Already in Deleted Items"));
    }

    if matches!(status, 429 | 502 | 503 | 504) {
        return Verdict::Direct;
    }

    Verdict::Done(DeleteOutcome::failed(
        item_id,
        format!("HTTP {}: {}", status, summarize_body(body)),
    ))
}

impl GraphBackend {
    pub(super) async fn delete_batched(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        items: &[ItemRef],
        target: TargetType,
        mode: ActionMode,
    ) -> SweepResult<Vec<DeleteOutcome>> {
        let mut outcomes = Vec::with_capacity(items.len());

        for (index, chunk) in items.chunks(self.batch_size.max(1)).enumerate() {
            debug!(
                "Graph batch {} for {}: {} items ({})",
                index + 1,
                mailbox,
                chunk.len(),
                mode
            );
            let verdicts = self.send_batch(http, mailbox, chunk, target, mode).await;

            for (item, verdict) in chunk.iter().zip(verdicts) {
                let outcome = match verdict {
                    Verdict::Done(outcome) => outcome,
                    Verdict::Downgrade(note) => self.plain_delete(http, mailbox, item, target, &note).await,
                    Verdict::Direct => self.delete_direct(http, mailbox, item, target, mode).await,
                };
                outcomes.push(outcome);
            }
        }

        Ok(outcomes)
    }

    /// One `$batch` call; every item gets a verdict
    async fn send_batch(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        chunk: &[ItemRef],
        target: TargetType,
        mode: ActionMode,
    ) -> Vec<Verdict> {
        let requests: Vec<Value> = chunk
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let (method, url, body) = sub_request(mode, &item_path(mailbox, target, &item.item_id));
                let mut request = json!({
                    "id": (i + 1).to_string(),
                    "method": method.as_str(),
                    "url": url,
                });
                if let Some(body) = body {
                    request["body"] = body;
                    request["headers"] = json!({ "Content-Type": "application/json" });
                }
                request
            })
            .collect();

        let request = HttpRequest::post(format!("{}/v1.0/$batch", self.base_url))
            .auth(Some(self.auth()))
            .json(&json!({ "requests": requests }));

        let parsed = match self.policy.send(http, request).await {
            Ok(response) if response.is_success() => response.parse_json::<BatchResponse>().ok(),
            Ok(response) => {
                warn!(
                    "Graph batch for {} failed with HTTP {}: {}",
                    mailbox,
                    response.status,
                    summarize_body(&response.body)
                );
                None
            }
            Err(e) => {
                warn!("Graph batch for {} failed: {}", mailbox, e);
                None
            }
        };

        let parsed = match parsed {
            Some(parsed) => parsed,
            None => {
                debug!("Falling back to direct calls for {} items", chunk.len());
                return vec![Verdict::Direct; chunk.len()];
            }
        };

        chunk
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let id = (i + 1).to_string();
                match parsed.responses.iter().find(|r| r.id == id) {
                    Some(sub) => {
                        let body = sub.body.as_ref().map(Value::to_string).unwrap_or_default();
                        interpret(&item.item_id, mode, sub.status, &body)
                    }
                    None => Verdict::Direct,
                }
            })
            .collect()
    }

    /// Direct, non-batched call for one item
    async fn delete_direct(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        item: &ItemRef,
        target: TargetType,
        mode: ActionMode,
    ) -> DeleteOutcome {
        let (method, path, body) = sub_request(mode, &item_path(mailbox, target, &item.item_id));
        let mut request = HttpRequest::new(method, format!("{}/v1.0{}", self.base_url, path)).auth(Some(self.auth()));
        if let Some(body) = body {
            request = request.json(&body);
        }

        match self.policy.send(http, request).await {
            Ok(response) => match interpret(&item.item_id, mode, response.status, &response.body) {
                Verdict::Done(outcome) => outcome,
                Verdict::Downgrade(note) => self.plain_delete(http, mailbox, item, target, &note).await,
                Verdict::Direct => DeleteOutcome::failed(
                    &item.item_id,
                    format!("HTTP {} after retries: {}", response.status, summarize_body(&response.body)),
                ),
            },
            Err(e) => DeleteOutcome::failed(&item.item_id, e.to_string()),
        }
    }

    /// Plain DELETE after a stronger mode was refused
    async fn plain_delete(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        item: &ItemRef,
        target: TargetType,
        note: &str,
    ) -> DeleteOutcome {
        debug!("{} for {} in {}", note, item.item_id, mailbox);
        let url = format!("{}/v1.0{}", self.base_url, item_path(mailbox, target, &item.item_id));
        let request = HttpRequest::delete(url).auth(Some(self.auth()));

        match self.policy.send(http, request).await {
            Ok(response) if is_success(response.status) => DeleteOutcome::success(&item.item_id, note),
            Ok(response) => DeleteOutcome::failed(
                &item.item_id,
                format!("{}; fallback Delete failed with HTTP {}: {}", note, response.status, summarize_body(&response.body)),
            ),
            Err(e) => DeleteOutcome::failed(&item.item_id, format!("{}; fallback Delete failed: {}", note, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_requests_per_mode() {
        let path = item_path("a@x.com", TargetType::Email, "AAMk1");
        assert_eq!(path, "/users/a@x.com/messages/AAMk1");

        let (method, url, body) = sub_request(ActionMode::SoftDelete, &path);
        assert_eq!(method, Method::POST);
        assert!(url.ends_with("/move"));
        assert_eq!(body.unwrap()["destinationId"], "deleteditems");

        let (method, url, _) = sub_request(ActionMode::PermanentDelete, &path);
        assert_eq!(method, Method::POST);
        assert!(url.ends_with("/permanentDelete"));

        let (method, url, body) = sub_request(ActionMode::Delete, &path);
        assert_eq!(method, Method::DELETE);
        assert_eq!(url, path);
        assert!(body.is_none());
    }

    #[test]
    fn test_interpret_statuses() {
        assert!(matches!(interpret("1", ActionMode::Delete, 204, ""), Verdict::Done(o) if o.success));
        assert!(matches!(interpret("1", ActionMode::PermanentDelete, 404, ""), Verdict::Downgrade(_)));
        assert!(matches!(interpret("1", ActionMode::SoftDelete, 405, ""), Verdict::Downgrade(_)));
        assert!(matches!(interpret("1", ActionMode::Delete, 404, ""), Verdict::Done(o) if !o.success));
        assert!(matches!(interpret("1", ActionMode::Delete, 429, ""), Verdict::Direct));
        assert!(matches!(
            interpret("1", ActionMode::SoftDelete, 400, r#"{"error":{"message":"Item is already in folder"}}"#),
            Verdict::Done(o) if o.success
        ));
    }
}

//! Second-pass deletion of rows selected from a loaded report

use std::collections::HashMap;
use tracing::{info, warn};

use super::loader::LoadedReport;
use super::RowStatus;
use crate::backend::{validate_action, MailboxBackend};
use crate::error::{SweepError, SweepResult};
use crate::http::HttpTransport;
use crate::model::{ActionMode, ItemRef};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub success: usize,
    pub failed: usize,
}

/// Delete the items behind `selected` rows and record the outcome in the
/// rows' Action, Status and Details cells.
///
/// Rows are grouped per mailbox so each mailbox gets one batched delete
/// call. A mailbox whose delete call fails outright marks all of its rows
/// `Failed`; other mailboxes are unaffected.
pub async fn apply_deletions(
    report: &mut LoadedReport,
    selected: &[usize],
    backend: &dyn MailboxBackend,
    http: &dyn HttpTransport,
    mode: ActionMode,
) -> SweepResult<ReplaySummary> {
    if !mode.is_destructive() {
        return Err(SweepError::config("replay needs a delete action, not report-only"));
    }
    let target = report.target();
    validate_action(target, mode)?;

    let mut summary = ReplaySummary::default();
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<(usize, String)>> = HashMap::new();

    for &index in selected {
        let Some(row) = report.rows.get_mut(index) else {
            continue;
        };
        row.set("Action", mode.as_str());
        match row.identity() {
            Some((mailbox, item_id)) => {
                let key = mailbox.to_lowercase();
                let item_id = item_id.to_string();
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                }
                groups.entry(key).or_default().push((index, item_id));
            }
            None => {
                row.set("Status", RowStatus::Failed.as_str());
                row.set("Details", "row has no mailbox or item id");
                summary.failed += 1;
            }
        }
    }

    for key in order {
        let Some(entries) = groups.remove(&key) else {
            continue;
        };
        let mailbox = report.rows[entries[0].0].mailbox().to_string();
        let items: Vec<ItemRef> = entries.iter().map(|(_, id)| ItemRef::new(id.clone())).collect();

        info!("Replaying {} deletions for {}", items.len(), mailbox);
        match backend.delete_items(http, &mailbox, &items, target, mode).await {
            Ok(outcomes) => {
                let by_id: HashMap<&str, _> = outcomes.iter().map(|o| (o.item_id.as_str(), o)).collect();
                for (index, item_id) in &entries {
                    let row = &mut report.rows[*index];
                    match by_id.get(item_id.as_str()) {
                        Some(outcome) if outcome.success => {
                            row.set("Status", RowStatus::Success.as_str());
                            row.set("Details", outcome.details.as_str());
                            summary.success += 1;
                        }
                        Some(outcome) => {
                            row.set("Status", RowStatus::Failed.as_str());
                            row.set("Details", outcome.details.as_str());
                            summary.failed += 1;
                        }
                        None => {
                            row.set("Status", RowStatus::Failed.as_str());
                            row.set("Details", "no result returned for item");
                            summary.failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Replay for {} failed: {}", mailbox, e);
                for (index, _) in &entries {
                    let row = &mut report.rows[*index];
                    row.set("Status", RowStatus::Failed.as_str());
                    row.set("Details", format!("{}: {}", mailbox, e));
                    summary.failed += 1;
                }
            }
        }
    }

    Ok(summary)
}

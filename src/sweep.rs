//! Sweep driver: a bounded worker pool over the mailbox list
//!
//! Each mailbox is one task. Workers pull the next address from a shared
//! queue, scan it, apply the action and stream the settled rows into the
//! sink. Cancellation only stops workers from taking new mailboxes; a
//! mailbox that has started runs to completion.

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::backend::{validate_action, MailboxBackend};
use crate::criteria::Criteria;
use crate::error::{SweepError, SweepResult};
use crate::http::{ClientPool, HttpTransport};
use crate::model::ActionMode;
use crate::report::{ResultRow, RowSink, RowStatus};

/// What to run: criteria, action and the mailboxes to visit
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub criteria: Criteria,
    pub action: ActionMode,
    pub mailboxes: Vec<String>,
}

impl SweepPlan {
    pub fn new(criteria: Criteria, action: ActionMode, mailboxes: Vec<String>) -> Self {
        Self {
            criteria,
            action,
            mailboxes,
        }
    }

    /// Configuration checks; nothing touches the network before these pass
    pub fn validate(&self) -> SweepResult<()> {
        self.criteria.validate()?;
        validate_action(self.criteria.target, self.action)?;
        if self.mailboxes.is_empty() {
            return Err(SweepError::config("no target mailboxes"));
        }
        Ok(())
    }
}

/// Totals of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Mailboxes that were processed (started and finished)
    pub mailboxes: usize,
    pub rows: usize,
    pub skipped: usize,
    pub successes: usize,
    pub failures: usize,
    pub errors: usize,
    /// Set when cancellation left mailboxes unprocessed
    pub cancelled: bool,
}

impl RunSummary {
    fn count(&mut self, row: &ResultRow) {
        self.rows += 1;
        match row.status() {
            RowStatus::Skipped => self.skipped += 1,
            RowStatus::Success => self.successes += 1,
            RowStatus::Failed => self.failures += 1,
            RowStatus::Error => self.errors += 1,
            RowStatus::Pending => {}
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.mailboxes += other.mailboxes;
        self.rows += other.rows;
        self.skipped += other.skipped;
        self.successes += other.successes;
        self.failures += other.failures;
        self.errors += other.errors;
    }
}

/// Runs a [`SweepPlan`] with a fixed number of workers
pub struct SweepRunner {
    backend: Arc<dyn MailboxBackend>,
    pool: ClientPool,
    sink: Arc<dyn RowSink>,
    concurrency: usize,
    cancel: Arc<AtomicBool>,
    progress: Arc<AtomicUsize>,
    show_progress: bool,
}

impl SweepRunner {
    pub fn new(backend: Arc<dyn MailboxBackend>, pool: ClientPool, sink: Arc<dyn RowSink>) -> Self {
        let concurrency = pool.len();
        Self {
            backend,
            pool,
            sink,
            concurrency,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(AtomicUsize::new(0)),
            show_progress: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Share a cancellation flag owned by the caller (Ctrl-C handler)
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops workers from starting new mailboxes
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Mailboxes finished so far; readable while the run is in progress
    pub fn progress(&self) -> Arc<AtomicUsize> {
        self.progress.clone()
    }

    fn create_progress_bar(&self, total: usize) -> ProgressBar {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message("mailboxes");
        pb
    }

    pub async fn run(&self, plan: &SweepPlan) -> SweepResult<RunSummary> {
        plan.validate()?;

        let total = plan.mailboxes.len();
        let queue = Arc::new(Mutex::new(plan.mailboxes.iter().cloned().collect::<VecDeque<_>>()));
        let criteria = Arc::new(plan.criteria.clone());
        let bar = self.show_progress.then(|| self.create_progress_bar(total));
        let workers = self.concurrency.min(total).max(1);

        info!(
            "Sweeping {} mailboxes with {} workers via {} ({})",
            total,
            workers,
            self.backend.name(),
            plan.action
        );

        let mut handles = Vec::with_capacity(workers);
        for slot in 0..workers {
            let worker = Worker {
                slot,
                backend: self.backend.clone(),
                http: self.pool.checkout(slot),
                sink: self.sink.clone(),
                criteria: criteria.clone(),
                action: plan.action,
                queue: queue.clone(),
                cancel: self.cancel.clone(),
                progress: self.progress.clone(),
                bar: bar.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        let mut summary = RunSummary::default();
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(partial)) => summary.merge(partial),
                Ok(Err(e)) => {
                    self.cancel.store(true, Ordering::SeqCst);
                    return Err(e);
                }
                Err(e) => error!("Sweep worker panicked: {}", e),
            }
        }

        let remaining = queue.lock().map(|q| q.len()).unwrap_or_default();
        summary.cancelled = remaining > 0 && self.cancel.load(Ordering::SeqCst);
        if let Some(pb) = bar {
            pb.finish_with_message(if summary.cancelled { "cancelled" } else { "done" });
        }
        if summary.cancelled {
            warn!("Run cancelled with {} mailboxes not started", remaining);
        }

        info!(
            "Sweep finished: {} mailboxes, {} rows ({} skipped, {} deleted, {} failed, {} errors)",
            summary.mailboxes, summary.rows, summary.skipped, summary.successes, summary.failures, summary.errors
        );
        Ok(summary)
    }
}

struct Worker {
    slot: usize,
    backend: Arc<dyn MailboxBackend>,
    http: Arc<dyn HttpTransport>,
    sink: Arc<dyn RowSink>,
    criteria: Arc<Criteria>,
    action: ActionMode,
    queue: Arc<Mutex<VecDeque<String>>>,
    cancel: Arc<AtomicBool>,
    progress: Arc<AtomicUsize>,
    bar: Option<ProgressBar>,
}

impl Worker {
    fn next_mailbox(&self) -> Option<String> {
        if self.cancel.load(Ordering::SeqCst) {
            return None;
        }
        self.queue.lock().ok()?.pop_front()
    }

    async fn run(self) -> SweepResult<RunSummary> {
        let mut summary = RunSummary::default();
        while let Some(mailbox) = self.next_mailbox() {
            debug!("Worker {} takes {}", self.slot, mailbox);
            let rows = process_mailbox(
                self.backend.as_ref(),
                self.http.as_ref(),
                &mailbox,
                &self.criteria,
                self.action,
            )
            .await;

            for row in &rows {
                if let Err(e) = self.sink.write_row(row) {
                    // A report that cannot be written stops the whole run
                    self.cancel.store(true, Ordering::SeqCst);
                    error!("Worker {} could not write the row for {}: {}", self.slot, mailbox, e);
                    return Err(e);
                }
                summary.count(row);
            }
            summary.mailboxes += 1;

            self.progress.fetch_add(1, Ordering::SeqCst);
            if let Some(pb) = &self.bar {
                pb.inc(1);
            }
        }
        Ok(summary)
    }
}

/// Scan one mailbox and settle every row. Never fails: a mailbox-level
/// error becomes a single `Error` row.
pub async fn process_mailbox(
    backend: &dyn MailboxBackend,
    http: &dyn HttpTransport,
    mailbox: &str,
    criteria: &Criteria,
    action: ActionMode,
) -> Vec<ResultRow> {
    let mut rows = match backend.scan_mailbox(http, mailbox, criteria).await {
        Ok(rows) => rows,
        Err(e) => {
            error!("Mailbox {} failed: {}", mailbox, e);
            return vec![ResultRow::mailbox_error(criteria.target, mailbox, action, e.to_string())];
        }
    };

    for row in rows.iter_mut() {
        row.set_action(action);
    }

    if action.is_destructive() {
        apply_action(backend, http, mailbox, criteria, action, &mut rows).await;
    } else {
        for row in rows.iter_mut() {
            row.settle(RowStatus::Skipped, "");
        }
    }

    rows
}

async fn apply_action(
    backend: &dyn MailboxBackend,
    http: &dyn HttpTransport,
    mailbox: &str,
    criteria: &Criteria,
    action: ActionMode,
    rows: &mut [ResultRow],
) {
    let items: Vec<_> = rows
        .iter()
        .filter(|row| row.status() == RowStatus::Pending)
        .filter_map(ResultRow::item_ref)
        .collect();

    if !items.is_empty() {
        match backend.delete_items(http, mailbox, &items, criteria.target, action).await {
            Ok(outcomes) => {
                let by_id: HashMap<&str, _> = outcomes.iter().map(|o| (o.item_id.as_str(), o)).collect();
                for row in rows.iter_mut() {
                    let Some(outcome) = by_id.get(row.item_id()).copied() else {
                        continue;
                    };
                    let status = if outcome.success {
                        RowStatus::Success
                    } else {
                        RowStatus::Failed
                    };
                    row.settle(status, outcome.details.clone());
                }
            }
            Err(e) => {
                error!("Deleting {} items in {} failed: {}", items.len(), mailbox, e);
                for row in rows.iter_mut() {
                    row.settle(RowStatus::Failed, format!("{}: {}", mailbox, e));
                }
            }
        }
    }

    for row in rows.iter_mut() {
        if row.item_id().is_empty() {
            row.settle(RowStatus::Error, "row has no item id");
        } else {
            row.settle(RowStatus::Failed, "no delete result returned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::TargetType;
    use crate::http::mock::MockTransport;
    use crate::model::{DeleteOutcome, ItemRef, MessageSnapshot};
    use crate::backend::email_row;
    use crate::report::MemorySink;
    use async_trait::async_trait;

    struct StaticBackend {
        fail_mailbox: &'static str,
    }

    fn message(id: &str, subject: &str) -> MessageSnapshot {
        MessageSnapshot {
            item_id: id.into(),
            change_key: None,
            internet_message_id: Some(format!("<{}@x.com>", id)),
            subject: subject.into(),
            sender: "vendor@v.com".into(),
            received: "2024-05-06T09:30:00Z".into(),
            body: None,
        }
    }

    #[async_trait]
    impl MailboxBackend for StaticBackend {
        fn name(&self) -> &'static str {
            "Static"
        }

        async fn scan_mailbox(
            &self,
            _http: &dyn HttpTransport,
            mailbox: &str,
            criteria: &Criteria,
        ) -> SweepResult<Vec<ResultRow>> {
            if mailbox == self.fail_mailbox {
                return Err(SweepError::mailbox_not_found(mailbox));
            }
            Ok([message("m1", "Invoice 1"), message("m2", "Lunch")]
                .iter()
                .filter(|m| criteria.matches_subject(&m.subject))
                .map(|m| email_row(mailbox, m))
                .collect())
        }

        async fn delete_items(
            &self,
            _http: &dyn HttpTransport,
            _mailbox: &str,
            items: &[ItemRef],
            _target: TargetType,
            _mode: ActionMode,
        ) -> SweepResult<Vec<DeleteOutcome>> {
            Ok(items.iter().map(|i| DeleteOutcome::success(&i.item_id, "Deleted")).collect())
        }
    }

    fn runner(sink: Arc<MemorySink>) -> SweepRunner {
        let backend = Arc::new(StaticBackend { fail_mailbox: "gone@x.com" });
        let pool = ClientPool::shared(Arc::new(MockTransport::new()), 3);
        SweepRunner::new(backend, pool, sink)
    }

    #[test]
    fn test_plan_validation() {
        let plan = SweepPlan::new(Criteria::new(TargetType::Email), ActionMode::ReportOnly, vec![]);
        assert!(plan.validate().unwrap_err().is_config_error());

        let plan = SweepPlan::new(
            Criteria::new(TargetType::Meeting),
            ActionMode::PermanentDelete,
            vec!["a@x.com".into()],
        );
        assert!(plan.validate().is_err());
    }

    #[tokio::test]
    async fn test_mailbox_failure_is_isolated() {
        let sink = Arc::new(MemorySink::new());
        let runner = runner(sink.clone());
        let plan = SweepPlan::new(
            Criteria::new(TargetType::Email).with_subject("invoice"),
            ActionMode::Delete,
            vec!["a@x.com".into(), "gone@x.com".into(), "b@x.com".into()],
        );

        let summary = runner.run(&plan).await.unwrap();
        assert_eq!(summary.mailboxes, 3);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(runner.progress().load(Ordering::SeqCst), 3);

        let rows = sink.rows();
        let error = rows.iter().find(|r| r.mailbox() == "gone@x.com").unwrap();
        assert_eq!(error.status(), RowStatus::Error);
        assert!(error.item_id().is_empty());
    }

    struct BrokenSink {
        attempts: AtomicUsize,
    }

    impl RowSink for BrokenSink {
        fn write_row(&self, _row: &ResultRow) -> SweepResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SweepError::Io(std::io::Error::other("disk full")))
        }

        fn rows_written(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_sink_failure_stops_the_run() {
        let sink = Arc::new(BrokenSink { attempts: AtomicUsize::new(0) });
        let backend = Arc::new(StaticBackend { fail_mailbox: "gone@x.com" });
        let pool = ClientPool::shared(Arc::new(MockTransport::new()), 1);
        let runner = SweepRunner::new(backend, pool, sink.clone()).with_concurrency(1);

        let plan = SweepPlan::new(
            Criteria::new(TargetType::Email),
            ActionMode::ReportOnly,
            vec!["a@x.com".into(), "b@x.com".into(), "c@x.com".into()],
        );
        let error = runner.run(&plan).await.unwrap_err();

        assert!(error.to_string().contains("disk full"));
        assert!(runner.cancel_flag().load(Ordering::SeqCst));
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(runner.progress().load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let sink = Arc::new(MemorySink::new());
        let runner = runner(sink.clone());
        runner.cancel_flag().store(true, Ordering::SeqCst);

        let plan = SweepPlan::new(
            Criteria::new(TargetType::Email),
            ActionMode::ReportOnly,
            vec!["a@x.com".into()],
        );
        let summary = runner.run(&plan).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.mailboxes, 0);
        assert!(sink.rows().is_empty());
    }
}

//! Microsoft Graph backend

mod batch;
pub mod query;
pub mod types;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use self::query::{event_query, message_query, segment, CollectionQuery, EVENT_SELECT};
use self::types::{GraphEvent, GraphFolder, GraphMessage, GraphPage};
use super::{email_row, meeting_matches, message_matches, reconcile_meetings, FolderScope, MailboxBackend, WellKnownFolder};
use crate::criteria::{Criteria, TargetType};
use crate::error::{summarize_body, SweepError, SweepResult};
use crate::http::{HttpRequest, HttpTransport, RequestAuth, RetryPolicy};
use crate::model::{ActionMode, CalendarSnapshot, DeleteOutcome, ItemRef, MessageSnapshot};
use crate::recurrence::{clean_goid, MasterResolver, MasterSource, ReportLocale};
use crate::report::{ResultRow, RowStatus};

/// Graph adapter; one instance per run
pub struct GraphBackend {
    base_url: String,
    token: String,
    policy: RetryPolicy,
    page_size: usize,
    batch_size: usize,
    folder_scope: FolderScope,
    locale: ReportLocale,
    resolver: MasterResolver,
}

impl GraphBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            policy: RetryPolicy::default(),
            page_size: 100,
            batch_size: 20,
            folder_scope: FolderScope::Mailbox,
            locale: ReportLocale::English,
            resolver: MasterResolver::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Graph accepts at most 20 requests per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, 20);
        self
    }

    pub fn with_folder_scope(mut self, scope: FolderScope) -> Self {
        self.folder_scope = scope;
        self
    }

    pub fn with_locale(mut self, locale: ReportLocale) -> Self {
        self.locale = locale;
        self
    }

    fn auth(&self) -> RequestAuth {
        RequestAuth::Bearer(self.token.clone())
    }

    fn get(&self, url: impl Into<String>) -> HttpRequest {
        HttpRequest::get(url).auth(Some(self.auth()))
    }

    /// Fetch every page of a collection. The next link already carries the
    /// query, so only the first request uses the built URL.
    async fn collect_pages<T: DeserializeOwned>(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        query: &CollectionQuery,
    ) -> SweepResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(query.url.to_string());
        let mut page = 0;

        while let Some(url) = next.take() {
            page += 1;
            let mut request = self.get(url);
            if query.eventual_consistency {
                request = request.header("ConsistencyLevel", "eventual");
            }

            let response = self.policy.send(http, request).await?;
            if !response.is_success() {
                return Err(SweepError::from_status(response.status, mailbox, &response.body));
            }

            let body: GraphPage<T> = response.parse_json()?;
            debug!("Graph page {} for {}: {} items", page, mailbox, body.value.len());
            items.extend(body.value);
            next = body.next_link;
        }

        Ok(items)
    }

    /// Folder ids for the configured scope; `None` is the whole mailbox
    async fn resolve_folders(&self, http: &dyn HttpTransport, mailbox: &str) -> SweepResult<Vec<Option<String>>> {
        match self.folder_scope {
            FolderScope::Mailbox => Ok(vec![None]),
            FolderScope::Folder(folder) => Ok(vec![Some(graph_folder(folder)?.to_string())]),
            FolderScope::Common => WellKnownFolder::common()
                .iter()
                .map(|f| graph_folder(*f).map(|name| Some(name.to_string())))
                .collect(),
            FolderScope::InboxSubtree => {
                let mut folders = vec![Some("inbox".to_string())];
                let mut queue = VecDeque::from(["inbox".to_string()]);

                while let Some(parent) = queue.pop_front() {
                    let url = format!(
                        "{}/v1.0/users/{}/mailFolders/{}/childFolders?$top={}&$select=id,displayName,childFolderCount",
                        self.base_url,
                        segment(mailbox),
                        segment(&parent),
                        self.page_size
                    );
                    let query = CollectionQuery {
                        url: url::Url::parse(&url)?,
                        eventual_consistency: false,
                    };
                    let children: Vec<GraphFolder> = self.collect_pages(http, mailbox, &query).await?;
                    for child in children {
                        debug!("Found folder {} under {}", child.display_name, parent);
                        if child.child_folder_count > 0 {
                            queue.push_back(child.id.clone());
                        }
                        folders.push(Some(child.id));
                    }
                }

                Ok(folders)
            }
        }
    }

    async fn scan_messages(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        criteria: &Criteria,
    ) -> SweepResult<Vec<ResultRow>> {
        let folders = self.resolve_folders(http, mailbox).await?;
        let mut rows = Vec::new();

        for folder in folders {
            let query = message_query(&self.base_url, mailbox, folder.as_deref(), criteria, self.page_size)?;
            let messages: Vec<GraphMessage> = match self.collect_pages(http, mailbox, &query).await {
                Ok(messages) => messages,
                Err(e) if e.is_mailbox_fatal() => return Err(e),
                Err(e) => {
                    warn!("Query of {} folder {:?} failed: {}", mailbox, folder, e);
                    rows.push(ResultRow::mailbox_error(
                        TargetType::Email,
                        mailbox,
                        ActionMode::ReportOnly,
                        format!("folder {}: {}", folder.as_deref().unwrap_or("mailbox"), e),
                    ));
                    continue;
                }
            };

            for message in messages.into_iter().map(MessageSnapshot::from) {
                if message_matches(criteria, &message) {
                    rows.push(email_row(mailbox, &message));
                }
            }
        }

        Ok(rows)
    }

    async fn scan_events(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        criteria: &Criteria,
    ) -> SweepResult<Vec<ResultRow>> {
        let query = event_query(&self.base_url, mailbox, criteria, self.page_size)?;
        if criteria.expands_recurrences() {
            debug!("Using calendarView for {}", mailbox);
        }

        let events: Vec<GraphEvent> = self.collect_pages(http, mailbox, &query).await?;
        let items: Vec<CalendarSnapshot> = events
            .into_iter()
            .map(CalendarSnapshot::from)
            .filter(|item| meeting_matches(criteria, item))
            .collect();

        let source = GraphMasterSource {
            backend: self,
            http,
            mailbox,
        };
        Ok(reconcile_meetings(mailbox, items, criteria, &self.resolver, &source, self.locale).await)
    }
}

fn graph_folder(folder: WellKnownFolder) -> SweepResult<&'static str> {
    folder
        .graph_name()
        .ok_or_else(|| SweepError::unsupported(format!("{:?} is not reachable through Graph", folder)))
}

#[async_trait]
impl MailboxBackend for GraphBackend {
    fn name(&self) -> &'static str {
        "Graph"
    }

    async fn scan_mailbox(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        criteria: &Criteria,
    ) -> SweepResult<Vec<ResultRow>> {
        let rows = match criteria.target {
            TargetType::Email => self.scan_messages(http, mailbox, criteria).await?,
            TargetType::Meeting => self.scan_events(http, mailbox, criteria).await?,
        };

        let matched = rows.iter().filter(|r| r.status() == RowStatus::Pending).count();
        info!("{}: found {} matching items", mailbox, matched);
        Ok(rows)
    }

    async fn delete_items(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        items: &[ItemRef],
        target: TargetType,
        mode: ActionMode,
    ) -> SweepResult<Vec<DeleteOutcome>> {
        if !mode.is_destructive() || items.is_empty() {
            return Ok(Vec::new());
        }
        self.delete_batched(http, mailbox, items, target, mode).await
    }
}

/// Master lookups against one mailbox's calendar
struct GraphMasterSource<'a> {
    backend: &'a GraphBackend,
    http: &'a dyn HttpTransport,
    mailbox: &'a str,
}

#[async_trait]
impl MasterSource for GraphMasterSource<'_> {
    async fn fetch_master(&self, master_id: &str) -> SweepResult<Option<CalendarSnapshot>> {
        let url = format!(
            "{}/v1.0/users/{}/events/{}?$select={}",
            self.backend.base_url,
            segment(self.mailbox),
            segment(master_id),
            EVENT_SELECT
        );
        let response = self.backend.policy.send(self.http, self.backend.get(url)).await?;

        match response.status {
            404 => Ok(None),
            _ if response.is_success() => {
                let event: GraphEvent = response.parse_json()?;
                Ok(Some(CalendarSnapshot::from(event)))
            }
            status => Err(SweepError::http(status, summarize_body(&response.body))),
        }
    }

    async fn scan_for_series(&self, series_key: &str) -> SweepResult<Option<CalendarSnapshot>> {
        let mut url = url::Url::parse(&format!(
            "{}/v1.0/users/{}/events",
            self.backend.base_url,
            segment(self.mailbox)
        ))?;
        url.query_pairs_mut()
            .append_pair("$top", &self.backend.page_size.to_string())
            .append_pair("$select", EVENT_SELECT)
            .append_pair("$filter", "type eq 'seriesMaster'");
        let query = CollectionQuery {
            url,
            eventual_consistency: false,
        };

        let masters: Vec<GraphEvent> = self.backend.collect_pages(self.http, self.mailbox, &query).await?;
        Ok(masters
            .into_iter()
            .filter(|m| m.recurrence.is_some())
            .find(|m| m.ical_uid.as_deref().is_some_and(|uid| clean_goid(uid) == series_key))
            .map(CalendarSnapshot::from))
    }
}

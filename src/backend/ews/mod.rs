//! Exchange Web Services backend
//!
//! Requests are hand-built SOAP envelopes (see [`requests`]) and responses are
//! read through a local-name XML tree, so the adapter works against every
//! Exchange version from 2010 SP2 on without generated bindings.

pub mod autodiscover;
pub mod items;
pub mod requests;
pub mod soap;
pub mod xml;

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use self::autodiscover::Autodiscover;
use self::items::{parse_calendar_item, parse_message};
use self::requests::{
    delete_items, find_items, find_mail_folders, get_items, get_recurring_master, FolderRef, ItemView,
    Restriction, CALENDAR_FULL_FIELDS, CALENDAR_VIEW_FIELDS, MESSAGE_FIELDS,
};
use self::soap::{busy_verdict, code_error, response_messages, soap_fault, Envelope, ResponseMessage};
use self::xml::XmlNode;
use super::{email_row, meeting_matches, message_matches, reconcile_meetings, FolderScope, MailboxBackend, WellKnownFolder};
use crate::config::AccessType;
use crate::criteria::{CalendarWindow, Criteria, MeetingScope, TargetType};
use crate::error::{SweepError, SweepResult};
use crate::http::{HttpRequest, HttpTransport, RequestAuth, RetryPolicy};
use crate::model::{parse_instant, ActionMode, CalendarSnapshot, DeleteOutcome, ItemRef, MessageSnapshot};
use crate::recurrence::{clean_goid, MasterResolver, MasterSource, ReportLocale};
use crate::report::{ResultRow, RowStatus};

/// Fields used when scanning the calendar for a series master
const MASTER_SCAN_FIELDS: &[&str] = &[
    "item:Subject",
    "calendar:CalendarItemType",
    "calendar:IsRecurring",
    "calendar:UID",
];

/// Credentials for EWS: a service account or an OAuth bearer token
#[derive(Clone, PartialEq, Eq)]
pub enum EwsAuth {
    Basic { username: String, password: String },
    Bearer(String),
}

impl EwsAuth {
    fn request_auth(&self) -> RequestAuth {
        match self {
            EwsAuth::Basic { username, password } => RequestAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            EwsAuth::Bearer(token) => RequestAuth::Bearer(token.clone()),
        }
    }
}

impl std::fmt::Debug for EwsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.request_auth())
    }
}

/// How the service URL is found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EwsEndpoint {
    Fixed(String),
    /// Per mailbox domain, through POX autodiscover
    Autodiscover,
}

/// EWS adapter; one instance per run
pub struct EwsBackend {
    endpoint: EwsEndpoint,
    auth: EwsAuth,
    discovery: Autodiscover,
    access_type: AccessType,
    server_version: String,
    policy: RetryPolicy,
    page_size: usize,
    batch_size: usize,
    folder_scope: FolderScope,
    locale: ReportLocale,
    resolver: MasterResolver,
}

impl EwsBackend {
    pub fn new(endpoint: EwsEndpoint, auth: EwsAuth) -> Self {
        Self {
            endpoint,
            auth,
            discovery: Autodiscover::new(),
            access_type: AccessType::Impersonation,
            server_version: "Exchange2013_SP1".to_string(),
            policy: RetryPolicy::default(),
            page_size: 100,
            batch_size: 200,
            folder_scope: FolderScope::Mailbox,
            locale: ReportLocale::English,
            resolver: MasterResolver::new(),
        }
    }

    pub fn with_access_type(mut self, access_type: AccessType) -> Self {
        self.access_type = access_type;
        self
    }

    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
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

    /// Bind the adapter to one mailbox, resolving its endpoint
    async fn session<'a>(&'a self, http: &'a dyn HttpTransport, mailbox: &'a str) -> SweepResult<Session<'a>> {
        let url = match &self.endpoint {
            EwsEndpoint::Fixed(url) => url.clone(),
            EwsEndpoint::Autodiscover => {
                self.discovery
                    .endpoint(http, &self.policy, &self.auth.request_auth(), mailbox)
                    .await?
            }
        };
        Ok(Session {
            backend: self,
            http,
            mailbox,
            url,
        })
    }

    async fn scan_messages(&self, session: &Session<'_>, criteria: &Criteria) -> SweepResult<Vec<ResultRow>> {
        let folders = session.resolve_folders(self.folder_scope).await?;
        let restriction = message_restriction(criteria);
        let header_criteria = Criteria {
            body: None,
            ..criteria.clone()
        };
        let mut rows = Vec::new();

        for folder in folders {
            let folder_xml = folder.to_xml(session.owner());
            let found = session
                .find_all(&folder_xml, MESSAGE_FIELDS, &restriction, parse_message)
                .await;
            let messages = match found {
                Ok(messages) => messages,
                Err(e) if e.is_mailbox_fatal() => return Err(e),
                Err(e) => {
                    warn!("Query of {} folder {:?} failed: {}", session.mailbox, folder, e);
                    rows.push(ResultRow::mailbox_error(
                        TargetType::Email,
                        session.mailbox,
                        ActionMode::ReportOnly,
                        format!("folder {}: {}", folder_label(&folder), e),
                    ));
                    continue;
                }
            };

            let candidates: Vec<MessageSnapshot> = messages
                .into_iter()
                .filter(|m| message_matches(&header_criteria, m))
                .collect();
            let candidates = if criteria.body.is_some() {
                session
                    .enrich(candidates, MessageSnapshot::item_ref, MESSAGE_FIELDS, true, parse_message)
                    .await
            } else {
                candidates
            };

            for message in candidates {
                if message_matches(criteria, &message) {
                    rows.push(email_row(session.mailbox, &message));
                }
            }
        }

        Ok(rows)
    }

    async fn scan_meetings(&self, session: &Session<'_>, criteria: &Criteria) -> SweepResult<Vec<ResultRow>> {
        let folder = FolderRef::Distinguished("calendar").to_xml(session.owner());

        // Calendar views take no restriction; everything is matched client-side
        let (shallow, truncated) = match criteria.calendar_window() {
            Some(window) => {
                debug!("Using CalendarView for {}", session.mailbox);
                let view = session.calendar_view(&folder, window).await?;
                (view.items, view.truncated_at)
            }
            None => {
                let items = session
                    .find_all(&folder, CALENDAR_VIEW_FIELDS, &meeting_restriction(criteria), parse_calendar_item)
                    .await?;
                (items, None)
            }
        };

        let header_criteria = Criteria {
            body: None,
            ..criteria.clone()
        };
        let shallow: Vec<CalendarSnapshot> = shallow
            .into_iter()
            .filter(|item| meeting_matches(&header_criteria, item))
            .collect();

        let items: Vec<CalendarSnapshot> = session
            .enrich(
                shallow,
                CalendarSnapshot::item_ref,
                CALENDAR_FULL_FIELDS,
                criteria.body.is_some(),
                parse_calendar_item,
            )
            .await
            .into_iter()
            .filter(|item| meeting_matches(criteria, item))
            .collect();

        let mut rows = reconcile_meetings(session.mailbox, items, criteria, &self.resolver, session, self.locale).await;
        if let Some(at) = truncated {
            rows.push(ResultRow::mailbox_error(
                TargetType::Meeting,
                session.mailbox,
                ActionMode::ReportOnly,
                format!("calendar view truncated by the server at {}; later items were not scanned", at),
            ));
        }
        Ok(rows)
    }
}

fn folder_label(folder: &FolderRef) -> String {
    match folder {
        FolderRef::Distinguished(name) => name.to_string(),
        FolderRef::Id(id) => id.clone(),
    }
}

fn message_restriction(criteria: &Criteria) -> Restriction {
    let mut restriction = Restriction::new();
    if let Some(start) = criteria.lower_bound() {
        restriction.at_or_after("item:DateTimeReceived", start);
    }
    if let Some(end) = criteria.upper_bound_exclusive() {
        restriction.before("item:DateTimeReceived", end);
    }
    if let Some(message_id) = criteria.message_id.as_deref() {
        restriction.equals("message:InternetMessageId", message_id);
    }
    if let Some(subject) = criteria.subject.as_deref() {
        restriction.contains("item:Subject", subject);
    }
    restriction
}

/// Restriction for the flat calendar query (no calendar view)
fn meeting_restriction(criteria: &Criteria) -> Restriction {
    let mut restriction = Restriction::new();
    if let Some(start) = criteria.lower_bound() {
        restriction.at_or_after("calendar:Start", start);
    }
    if let Some(end) = criteria.upper_bound_exclusive() {
        restriction.before("calendar:End", end);
    }
    if let Some(subject) = criteria.subject.as_deref() {
        restriction.contains("item:Subject", subject);
    }
    if let Some(message_id) = criteria.message_id.as_deref() {
        restriction.equals("message:InternetMessageId", message_id);
    }
    if criteria.cancelled_only {
        restriction.equals("calendar:IsCancelled", "true");
    }
    match criteria.meeting_scope {
        MeetingScope::All => {}
        MeetingScope::SingleInstance => {
            restriction.equals("calendar:CalendarItemType", "Single");
        }
        MeetingScope::SeriesMaster => {
            restriction.equals("calendar:CalendarItemType", "RecurringMaster");
        }
    }
    restriction
}

fn success_note(mode: ActionMode) -> &'static str {
    match mode {
        ActionMode::SoftDelete => "Moved to Deleted Items",
        ActionMode::PermanentDelete => "Permanently deleted",
        _ => "Deleted",
    }
}

#[async_trait]
impl MailboxBackend for EwsBackend {
    fn name(&self) -> &'static str {
        "EWS"
    }

    async fn scan_mailbox(
        &self,
        http: &dyn HttpTransport,
        mailbox: &str,
        criteria: &Criteria,
    ) -> SweepResult<Vec<ResultRow>> {
        let session = self.session(http, mailbox).await?;
        debug!("EWS endpoint for {}: {}", mailbox, session.url);

        let rows = match criteria.target {
            TargetType::Email => self.scan_messages(&session, criteria).await?,
            TargetType::Meeting => self.scan_meetings(&session, criteria).await?,
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

        let session = self.session(http, mailbox).await?;
        let calendar = target == TargetType::Meeting;
        let mut outcomes = Vec::with_capacity(items.len());

        for chunk in items.chunks(self.batch_size) {
            debug!("EWS DeleteItem for {}: {} items ({})", mailbox, chunk.len(), mode);
            match session.bulk_delete(chunk, mode, calendar).await {
                Ok(settled) => outcomes.extend(settled),
                Err(e) if e.is_mailbox_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "Bulk delete of {} items in {} failed: {}; deleting one by one",
                        chunk.len(),
                        mailbox,
                        e
                    );
                    for item in chunk {
                        outcomes.push(session.delete_one(item, mode, calendar).await);
                    }
                }
            }
        }

        Ok(outcomes)
    }
}

/// Result of an expanded calendar view
struct CalendarView {
    items: Vec<CalendarSnapshot>,
    /// Set when the server kept truncating and the window could not advance
    truncated_at: Option<String>,
}

/// The adapter bound to one mailbox and endpoint
struct Session<'a> {
    backend: &'a EwsBackend,
    http: &'a dyn HttpTransport,
    mailbox: &'a str,
    url: String,
}

impl Session<'_> {
    fn impersonating(&self) -> bool {
        self.backend.access_type == AccessType::Impersonation
    }

    /// Mailbox named inside folder ids; impersonation already sets it
    fn owner(&self) -> Option<&str> {
        if self.impersonating() {
            None
        } else {
            Some(self.mailbox)
        }
    }

    /// Send one operation and return the parsed envelope. SOAP faults and
    /// failed HTTP statuses become errors; response messages are left to
    /// the caller.
    async fn call(&self, body: String) -> SweepResult<XmlNode> {
        let envelope = Envelope {
            server_version: &self.backend.server_version,
            impersonate: self.impersonating().then_some(self.mailbox),
            body,
        };

        let mut request = HttpRequest::post(self.url.as_str())
            .auth(Some(self.backend.auth.request_auth()))
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(envelope.to_xml());
        if self.impersonating() {
            request = request.header("X-AnchorMailbox", self.mailbox);
        }

        let response = self.backend.policy.send_with(self.http, request, &busy_verdict).await?;
        if matches!(response.status, 401 | 403) {
            return Err(SweepError::from_status(response.status, self.mailbox, &response.body));
        }

        let root = match XmlNode::parse(&response.body) {
            Ok(root) => root,
            Err(_) if !response.is_success() => {
                return Err(SweepError::from_status(response.status, self.mailbox, &response.body))
            }
            Err(e) => return Err(e),
        };

        if let Some(fault) = soap_fault(&root) {
            return Err(match fault.response_code.as_deref() {
                Some(code) => code_error(code, &fault.fault_string, self.mailbox),
                None => SweepError::protocol(format!("{}: {}", self.mailbox, fault.fault_string)),
            });
        }
        if !response.is_success() {
            return Err(SweepError::from_status(response.status, self.mailbox, &response.body));
        }

        Ok(root)
    }

    /// First response message, as an error when the server refused it
    fn first_message<'r>(&self, root: &'r XmlNode) -> SweepResult<ResponseMessage<'r>> {
        let message = response_messages(root)?
            .into_iter()
            .next()
            .ok_or_else(|| SweepError::protocol("EWS response without messages"))?;
        if !message.is_success() {
            return Err(code_error(&message.code, &message.text, self.mailbox));
        }
        Ok(message)
    }

    /// Every item of a folder, following `IndexedPagingOffset` until the
    /// server reports the last item in range
    async fn find_all<T>(
        &self,
        folder: &str,
        fields: &[&str],
        restriction: &Restriction,
        parse: fn(&XmlNode) -> T,
    ) -> SweepResult<Vec<T>> {
        let mut items = Vec::new();
        let mut offset = 0;

        loop {
            let view = ItemView::Indexed {
                offset,
                max_entries: self.backend.page_size,
            };
            let root = self.call(find_items(folder, fields, view, restriction)).await?;
            let message = self.first_message(&root)?;
            let root_folder = message
                .node
                .child("RootFolder")
                .ok_or_else(|| SweepError::protocol("FindItem response without RootFolder"))?;

            let page: Vec<T> = root_folder
                .child("Items")
                .map(|list| list.children.iter().map(parse).collect())
                .unwrap_or_default();
            let count = page.len();
            debug!("EWS page at offset {} for {}: {} items", offset, self.mailbox, count);
            items.extend(page);

            match next_offset(root_folder, offset, count) {
                Some(next) => offset = next,
                None => break,
            }
        }

        Ok(items)
    }

    /// Expanded calendar view over `window`.
    ///
    /// The server caps a view and flags the cut with
    /// `IncludesLastItemInRange="false"`; the view is then re-queried from the
    /// latest start seen. When the latest start does not move the cut is
    /// reported through `truncated_at` instead.
    async fn calendar_view(&self, folder: &str, window: CalendarWindow) -> SweepResult<CalendarView> {
        let mut start = window.start;
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        loop {
            let view = ItemView::Calendar { start, end: window.end };
            let root = self
                .call(find_items(folder, CALENDAR_VIEW_FIELDS, view, &Restriction::new()))
                .await?;
            let message = self.first_message(&root)?;
            let root_folder = message
                .node
                .child("RootFolder")
                .ok_or_else(|| SweepError::protocol("CalendarView response without RootFolder"))?;

            let page: Vec<CalendarSnapshot> = root_folder
                .child("Items")
                .map(|list| list.children.iter().map(parse_calendar_item).collect())
                .unwrap_or_default();
            let latest = page
                .iter()
                .filter_map(|item| item.start.as_deref().and_then(parse_instant))
                .map(|t| t.naive_utc())
                .max();
            let complete = root_folder.attr("IncludesLastItemInRange") != Some("false");
            debug!("Calendar view of {} from {}: {} items", self.mailbox, start, page.len());

            items.extend(page.into_iter().filter(|item| seen.insert(item.item_id.clone())));

            if complete {
                return Ok(CalendarView { items, truncated_at: None });
            }
            match latest {
                Some(next) if next > start => {
                    debug!("Calendar view of {} truncated, continuing from {}", self.mailbox, next);
                    start = next;
                }
                _ => {
                    warn!("Calendar view of {} was truncated by the server at {}", self.mailbox, start);
                    return Ok(CalendarView {
                        items,
                        truncated_at: Some(start.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                    });
                }
            }
        }
    }

    async fn resolve_folders(&self, scope: FolderScope) -> SweepResult<Vec<FolderRef>> {
        match scope {
            FolderScope::Folder(folder) => Ok(vec![FolderRef::Distinguished(folder.ews_name())]),
            FolderScope::Common => Ok(WellKnownFolder::common()
                .iter()
                .map(|f| FolderRef::Distinguished(f.ews_name()))
                .collect()),
            FolderScope::InboxSubtree => {
                let inbox = FolderRef::Distinguished(WellKnownFolder::Inbox.ews_name());
                let mut folders = self.mail_folders_below(&inbox).await?;
                folders.insert(0, inbox);
                Ok(folders)
            }
            FolderScope::Mailbox => self.mail_folders_below(&FolderRef::Distinguished("msgfolderroot")).await,
        }
    }

    /// Deep listing of mail-class folders below a parent
    async fn mail_folders_below(&self, parent: &FolderRef) -> SweepResult<Vec<FolderRef>> {
        let parent_xml = parent.to_xml(self.owner());
        let mut folders = Vec::new();
        let mut offset = 0;

        loop {
            let root = self
                .call(find_mail_folders(&parent_xml, offset, self.backend.page_size))
                .await?;
            let message = self.first_message(&root)?;
            let root_folder = message
                .node
                .child("RootFolder")
                .ok_or_else(|| SweepError::protocol("FindFolder response without RootFolder"))?;

            let page: Vec<FolderRef> = root_folder
                .child("Folders")
                .map(|list| {
                    list.children
                        .iter()
                        .filter_map(|f| f.child("FolderId").and_then(|id| id.attr("Id")))
                        .map(|id| FolderRef::Id(id.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            let count = page.len();
            folders.extend(page);

            match next_offset(root_folder, offset, count) {
                Some(next) => offset = next,
                None => break,
            }
        }

        debug!("{} mail folders below {:?} in {}", folders.len(), parent, self.mailbox);
        Ok(folders)
    }

    /// Re-fetch items with GetItem. Items the server will not return keep
    /// their shallow copy.
    async fn enrich<T>(
        &self,
        shallow: Vec<T>,
        key: fn(&T) -> ItemRef,
        fields: &[&str],
        with_body: bool,
        parse: fn(&XmlNode) -> T,
    ) -> Vec<T> {
        let mut enriched = Vec::with_capacity(shallow.len());
        let mut pending = shallow.into_iter().peekable();

        while pending.peek().is_some() {
            let chunk: Vec<T> = pending.by_ref().take(self.backend.page_size).collect();
            let refs: Vec<ItemRef> = chunk.iter().map(key).collect();

            let fetched = match self.call(get_items(&refs, fields, with_body)).await {
                Ok(root) => full_items(&root, parse),
                Err(e) => Err(e),
            };

            match fetched {
                Ok(full) if full.len() == chunk.len() => {
                    for (shallow, full) in chunk.into_iter().zip(full) {
                        enriched.push(full.unwrap_or(shallow));
                    }
                }
                Ok(full) => {
                    debug!(
                        "GetItem for {} returned {} of {} items; keeping shallow copies",
                        self.mailbox,
                        full.len(),
                        chunk.len()
                    );
                    enriched.extend(chunk);
                }
                Err(e) => {
                    debug!("GetItem for {} failed, keeping shallow copies: {}", self.mailbox, e);
                    enriched.extend(chunk);
                }
            }
        }

        enriched
    }

    async fn bulk_delete(&self, chunk: &[ItemRef], mode: ActionMode, calendar: bool) -> SweepResult<Vec<DeleteOutcome>> {
        let root = self.call(delete_items(chunk, mode, calendar)).await?;
        let messages = response_messages(&root)?;
        if messages.len() != chunk.len() {
            return Err(SweepError::protocol(format!(
                "DeleteItem answered {} of {} items",
                messages.len(),
                chunk.len()
            )));
        }

        Ok(chunk
            .iter()
            .zip(messages)
            .map(|(item, message)| {
                if message.is_success() {
                    DeleteOutcome::success(&item.item_id, success_note(mode))
                } else {
                    DeleteOutcome::failed(&item.item_id, message.describe())
                }
            })
            .collect())
    }

    async fn delete_one(&self, item: &ItemRef, mode: ActionMode, calendar: bool) -> DeleteOutcome {
        match self.bulk_delete(std::slice::from_ref(item), mode, calendar).await {
            Ok(mut outcomes) if !outcomes.is_empty() => outcomes.remove(0),
            Ok(_) => DeleteOutcome::failed(&item.item_id, "DeleteItem returned no result"),
            Err(e) => DeleteOutcome::failed(&item.item_id, e.to_string()),
        }
    }
}

/// Next `Offset` for an indexed view, `None` once the range is exhausted
fn next_offset(root_folder: &XmlNode, offset: usize, count: usize) -> Option<usize> {
    if count == 0 || root_folder.attr("IncludesLastItemInRange") != Some("false") {
        return None;
    }
    let next = root_folder
        .attr("IndexedPagingOffset")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(offset + count);
    (next > offset).then_some(next)
}

/// One entry per requested item; `None` where the server refused it
fn full_items<T>(root: &XmlNode, parse: fn(&XmlNode) -> T) -> SweepResult<Vec<Option<T>>> {
    Ok(response_messages(root)?
        .into_iter()
        .map(|message| {
            if !message.is_success() {
                debug!("GetItem refused an item: {}", message.describe());
                return None;
            }
            message
                .node
                .child("Items")
                .and_then(|list| list.children.first())
                .map(parse)
        })
        .collect())
}

#[async_trait]
impl MasterSource for Session<'_> {
    async fn fetch_master(&self, occurrence_id: &str) -> SweepResult<Option<CalendarSnapshot>> {
        let root = self
            .call(get_recurring_master(occurrence_id, CALENDAR_FULL_FIELDS))
            .await?;
        let message = match response_messages(&root)?.into_iter().next() {
            Some(message) => message,
            None => return Ok(None),
        };

        if !message.is_success() {
            return match message.code.as_str() {
                "ErrorItemNotFound" | "ErrorCalendarOccurrenceIsDeletedFromRecurrence" => Ok(None),
                code => Err(code_error(code, &message.text, self.mailbox)),
            };
        }

        Ok(message
            .node
            .child("Items")
            .and_then(|list| list.children.first())
            .map(parse_calendar_item))
    }

    async fn scan_for_series(&self, series_key: &str) -> SweepResult<Option<CalendarSnapshot>> {
        let folder = FolderRef::Distinguished("calendar").to_xml(self.owner());
        let mut restriction = Restriction::new();
        restriction.equals("calendar:CalendarItemType", "RecurringMaster");

        let masters = self
            .find_all(&folder, MASTER_SCAN_FIELDS, &restriction, parse_calendar_item)
            .await?;
        let candidate = masters
            .into_iter()
            .find(|m| m.uid.as_deref().is_some_and(|uid| clean_goid(uid) == series_key));

        let candidate = match candidate {
            Some(candidate) => candidate,
            None => return Ok(None),
        };

        let root = self
            .call(get_items(&[candidate.item_ref()], CALENDAR_FULL_FIELDS, false))
            .await?;
        Ok(full_items(&root, parse_calendar_item)?
            .into_iter()
            .flatten()
            .find(|master| master.recurrence.is_some()))
    }
}

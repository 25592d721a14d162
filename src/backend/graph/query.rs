//! OData query construction for Graph collections

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::criteria::{Criteria, MeetingScope, TargetType};
use crate::error::SweepResult;

use super::types::INTERNET_MESSAGE_ID_PROPERTY;

/// Characters left as-is in a path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'@');

pub const MESSAGE_SELECT: &str = "id,subject,from,receivedDateTime,internetMessageId";
pub const EVENT_SELECT: &str = "id,subject,iCalUId,type,seriesMasterId,originalStart,start,end,isCancelled,organizer,attendees,location,responseStatus,recurrence";

/// Encode one path segment (mailbox addresses, item ids)
pub fn segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

/// `and`-joined `$filter` clauses with quoted literals escaped
#[derive(Debug, Clone, Default)]
pub struct ODataFilter {
    clauses: Vec<String>,
}

impl ODataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quote a string literal, doubling embedded single quotes
    pub fn literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    pub fn contains(&mut self, property: &str, value: &str) -> &mut Self {
        self.clauses.push(format!("contains({},{})", property, Self::literal(value)));
        self
    }

    pub fn eq_str(&mut self, property: &str, value: &str) -> &mut Self {
        self.clauses.push(format!("{} eq {}", property, Self::literal(value)));
        self
    }

    /// Comparison with an unquoted operand (timestamps, booleans)
    pub fn raw(&mut self, property: &str, op: &str, operand: &str) -> &mut Self {
        self.clauses.push(format!("{} {} {}", property, op, operand));
        self
    }

    /// Pre-built clause, wrapped in parentheses
    pub fn group(&mut self, clause: &str) -> &mut Self {
        self.clauses.push(format!("({})", clause));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn build(&self) -> Option<String> {
        if self.clauses.is_empty() {
            None
        } else {
            Some(self.clauses.join(" and "))
        }
    }
}

/// A Graph collection query, before paging
#[derive(Debug, Clone)]
pub struct CollectionQuery {
    pub url: Url,
    /// `$search` needs `ConsistencyLevel: eventual`
    pub eventual_consistency: bool,
}

/// Whether a sender value can be pushed to the server as an exact address
fn exact_address(value: &str) -> bool {
    value.contains('@') && !value.contains(' ')
}

/// Message query for one folder (`None` = whole mailbox)
pub fn message_query(
    base_url: &str,
    mailbox: &str,
    folder: Option<&str>,
    criteria: &Criteria,
    page_size: usize,
) -> SweepResult<CollectionQuery> {
    let path = match folder {
        Some(folder) => format!(
            "{}/v1.0/users/{}/mailFolders/{}/messages",
            base_url,
            segment(mailbox),
            segment(folder)
        ),
        None => format!("{}/v1.0/users/{}/messages", base_url, segment(mailbox)),
    };
    let mut url = Url::parse(&path)?;

    let mut select = MESSAGE_SELECT.to_string();
    if criteria.body.is_some() {
        select.push_str(",body");
    }

    let mut filter = ODataFilter::new();
    let search = criteria.body.as_deref();

    // $search cannot be combined with $filter on messages; the remaining
    // criteria are matched client-side in that case.
    if search.is_none() {
        if let Some(subject) = criteria.subject.as_deref() {
            filter.contains("subject", subject);
        }
        if let Some(message_id) = criteria.message_id.as_deref() {
            filter.eq_str("internetMessageId", message_id);
        }
        if let Some(sender) = criteria.sender.as_deref().filter(|s| exact_address(s)) {
            filter.eq_str("from/emailAddress/address", sender);
        }
        if let Some(start) = criteria.start_date {
            filter.raw("receivedDateTime", "ge", &format!("{}T00:00:00Z", start));
        }
        if let Some(end) = criteria.end_date {
            filter.raw("receivedDateTime", "le", &format!("{}T23:59:59Z", end));
        }
    }

    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("$top", &page_size.to_string());
        pairs.append_pair("$select", &select);
        if let Some(filter) = filter.build() {
            pairs.append_pair("$filter", &filter);
        }
        if let Some(keyword) = search {
            pairs.append_pair("$search", &format!("\"body:{}\"", keyword.replace('"', "")));
        }
    }

    Ok(CollectionQuery {
        url,
        eventual_consistency: search.is_some(),
    })
}

/// Event query: `calendarView` when both dates are set, flat `events` otherwise
pub fn event_query(
    base_url: &str,
    mailbox: &str,
    criteria: &Criteria,
    page_size: usize,
) -> SweepResult<CollectionQuery> {
    debug_assert_eq!(criteria.target, TargetType::Meeting);
    let window = criteria.calendar_window();

    let path = if window.is_some() {
        format!("{}/v1.0/users/{}/calendarView", base_url, segment(mailbox))
    } else {
        format!("{}/v1.0/users/{}/events", base_url, segment(mailbox))
    };
    let mut url = Url::parse(&path)?;

    let mut select = EVENT_SELECT.to_string();
    if criteria.body.is_some() {
        select.push_str(",body");
    }

    let mut filter = ODataFilter::new();
    if let Some(subject) = criteria.subject.as_deref() {
        filter.contains("subject", subject);
    }
    if let Some(organizer) = criteria.sender.as_deref().filter(|s| exact_address(s)) {
        filter.eq_str("organizer/emailAddress/address", organizer);
    }
    if window.is_none() {
        if let Some(start) = criteria.start_date {
            filter.raw("start/dateTime", "ge", &ODataFilter::literal(&format!("{}T00:00:00", start)));
        }
        if let Some(end) = criteria.end_date {
            filter.raw("end/dateTime", "le", &ODataFilter::literal(&format!("{}T23:59:59", end)));
        }
        if let Some(message_id) = criteria.message_id.as_deref() {
            filter.group(&format!(
                "singleValueExtendedProperties/Any(ep: ep/id eq {} and ep/value eq {})",
                ODataFilter::literal(INTERNET_MESSAGE_ID_PROPERTY),
                ODataFilter::literal(message_id)
            ));
        }
    }
    if criteria.cancelled_only {
        filter.raw("isCancelled", "eq", "true");
    }
    match (criteria.meeting_scope, window.is_some()) {
        (MeetingScope::All, _) => {}
        (MeetingScope::SingleInstance, _) => {
            filter.eq_str("type", "singleInstance");
        }
        (MeetingScope::SeriesMaster, true) => {
            filter.group("type eq 'occurrence' or type eq 'exception'");
        }
        (MeetingScope::SeriesMaster, false) => {
            filter.eq_str("type", "seriesMaster");
        }
    }

    {
        let mut pairs = url.query_pairs_mut();
        if let Some(window) = window {
            pairs.append_pair("startDateTime", &window.start.format("%Y-%m-%dT%H:%M:%S").to_string());
            pairs.append_pair("endDateTime", &window.end.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
        pairs.append_pair("$top", &page_size.to_string());
        pairs.append_pair("$select", &select);
        if let Some(filter) = filter.build() {
            pairs.append_pair("$filter", &filter);
        }
        // Events have no internetMessageId property; the MAPI one is expanded
        // and compared client-side.
        if criteria.message_id.is_some() {
            pairs.append_pair(
                "$expand",
                &format!("singleValueExtendedProperties($filter=id eq {})", ODataFilter::literal(INTERNET_MESSAGE_ID_PROPERTY)),
            );
        }
    }

    Ok(CollectionQuery {
        url,
        eventual_consistency: false,
    })
}

//! Operation bodies: FindItem, FindFolder, GetItem, DeleteItem

use chrono::NaiveDateTime;

use super::soap::escape;
use crate::model::{ActionMode, ItemRef};

pub const MESSAGE_FIELDS: &[&str] = &[
    "item:Subject",
    "item:DateTimeReceived",
    "message:From",
    "message:Sender",
    "message:InternetMessageId",
];

/// Calendar fields that are safe inside a calendar view
pub const CALENDAR_VIEW_FIELDS: &[&str] = &[
    "item:Subject",
    "calendar:Start",
    "calendar:End",
    "calendar:Organizer",
    "calendar:IsCancelled",
    "calendar:IsRecurring",
    "calendar:CalendarItemType",
    "message:InternetMessageId",
];

/// Fields loaded when a calendar item is enriched with GetItem
pub const CALENDAR_FULL_FIELDS: &[&str] = &[
    "item:Subject",
    "calendar:Start",
    "calendar:End",
    "calendar:OriginalStart",
    "calendar:Organizer",
    "calendar:Location",
    "calendar:IsCancelled",
    "calendar:IsRecurring",
    "calendar:CalendarItemType",
    "calendar:MyResponseType",
    "calendar:UID",
    "calendar:RequiredAttendees",
    "calendar:OptionalAttendees",
    "calendar:Recurrence",
    "message:InternetMessageId",
];

/// Where a query runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderRef {
    Distinguished(&'static str),
    Id(String),
}

impl FolderRef {
    /// Folder id element; `owner` names the mailbox for delegate access
    pub fn to_xml(&self, owner: Option<&str>) -> String {
        match (self, owner) {
            (FolderRef::Distinguished(name), Some(owner)) => format!(
                r#"<t:DistinguishedFolderId Id="{}"><t:Mailbox><t:EmailAddress>{}</t:EmailAddress></t:Mailbox></t:DistinguishedFolderId>"#,
                name,
                escape(owner)
            ),
            (FolderRef::Distinguished(name), None) => format!(r#"<t:DistinguishedFolderId Id="{}"/>"#, name),
            (FolderRef::Id(id), _) => format!(r#"<t:FolderId Id="{}"/>"#, escape(id)),
        }
    }
}

/// Paging or windowing of a FindItem call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemView {
    Indexed { offset: usize, max_entries: usize },
    /// Expands recurring series into their instances; end exclusive
    Calendar { start: NaiveDateTime, end: NaiveDateTime },
}

fn timestamp(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn field_uris(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| format!(r#"<t:FieldURI FieldURI="{}"/>"#, f))
        .collect()
}

fn item_shape(fields: &[&str], with_body: bool) -> String {
    let mut fields = fields.to_vec();
    let body_type = if with_body {
        fields.push("item:Body");
        "<t:BodyType>Text</t:BodyType>"
    } else {
        ""
    };
    format!(
        "<m:ItemShape><t:BaseShape>IdOnly</t:BaseShape>{}<t:AdditionalProperties>{}</t:AdditionalProperties></m:ItemShape>",
        body_type,
        field_uris(&fields)
    )
}

/// `Restriction` clauses joined with `And`
#[derive(Debug, Clone, Default)]
pub struct Restriction {
    clauses: Vec<String>,
}

impl Restriction {
    pub fn new() -> Self {
        Self::default()
    }

    fn compare(&mut self, op: &str, field: &str, value: &str) -> &mut Self {
        self.clauses.push(format!(
            r#"<t:{op}><t:FieldURI FieldURI="{field}"/><t:FieldURIOrConstant><t:Constant Value="{value}"/></t:FieldURIOrConstant></t:{op}>"#,
            op = op,
            field = field,
            value = escape(value)
        ));
        self
    }

    /// Case-insensitive substring match
    pub fn contains(&mut self, field: &str, value: &str) -> &mut Self {
        self.clauses.push(format!(
            r#"<t:Contains ContainmentMode="Substring" ContainmentComparison="IgnoreCase"><t:FieldURI FieldURI="{}"/><t:Constant Value="{}"/></t:Contains>"#,
            field,
            escape(value)
        ));
        self
    }

    pub fn equals(&mut self, field: &str, value: &str) -> &mut Self {
        self.compare("IsEqualTo", field, value)
    }

    pub fn at_or_after(&mut self, field: &str, value: NaiveDateTime) -> &mut Self {
        self.compare("IsGreaterThanOrEqualTo", field, &timestamp(value))
    }

    pub fn before(&mut self, field: &str, value: NaiveDateTime) -> &mut Self {
        self.compare("IsLessThan", field, &timestamp(value))
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn to_xml(&self) -> Option<String> {
        match self.clauses.len() {
            0 => None,
            1 => Some(format!("<m:Restriction>{}</m:Restriction>", self.clauses[0])),
            _ => Some(format!(
                "<m:Restriction><t:And>{}</t:And></m:Restriction>",
                self.clauses.concat()
            )),
        }
    }
}

pub fn find_items(folder: &str, fields: &[&str], view: ItemView, restriction: &Restriction) -> String {
    let view = match view {
        ItemView::Indexed { offset, max_entries } => format!(
            r#"<m:IndexedPageItemView MaxEntriesReturned="{}" Offset="{}" BasePoint="Beginning"/>"#,
            max_entries, offset
        ),
        ItemView::Calendar { start, end } => format!(
            r#"<m:CalendarView StartDate="{}" EndDate="{}"/>"#,
            timestamp(start),
            timestamp(end)
        ),
    };

    format!(
        r#"<m:FindItem Traversal="Shallow">{}{}{}<m:ParentFolderIds>{}</m:ParentFolderIds></m:FindItem>"#,
        item_shape(fields, false),
        view,
        restriction.to_xml().unwrap_or_default(),
        folder
    )
}

/// Deep folder listing below `parent`, mail folders only
pub fn find_mail_folders(parent: &str, offset: usize, max_entries: usize) -> String {
    format!(
        r#"<m:FindFolder Traversal="Deep"><m:FolderShape><t:BaseShape>IdOnly</t:BaseShape><t:AdditionalProperties><t:FieldURI FieldURI="folder:DisplayName"/><t:FieldURI FieldURI="folder:FolderClass"/></t:AdditionalProperties></m:FolderShape><m:IndexedPageFolderView MaxEntriesReturned="{}" Offset="{}" BasePoint="Beginning"/><m:Restriction><t:IsEqualTo><t:FieldURI FieldURI="folder:FolderClass"/><t:FieldURIOrConstant><t:Constant Value="IPF.Note"/></t:FieldURIOrConstant></t:IsEqualTo></m:Restriction><m:ParentFolderIds>{}</m:ParentFolderIds></m:FindFolder>"#,
        max_entries, offset, parent
    )
}

fn item_id_xml(item: &ItemRef) -> String {
    match item.change_key.as_deref().filter(|ck| !ck.is_empty()) {
        Some(change_key) => format!(
            r#"<t:ItemId Id="{}" ChangeKey="{}"/>"#,
            escape(&item.item_id),
            escape(change_key)
        ),
        None => format!(r#"<t:ItemId Id="{}"/>"#, escape(&item.item_id)),
    }
}

pub fn get_items(items: &[ItemRef], fields: &[&str], with_body: bool) -> String {
    let ids: String = items.iter().map(item_id_xml).collect();
    format!(
        "<m:GetItem>{}<m:ItemIds>{}</m:ItemIds></m:GetItem>",
        item_shape(fields, with_body),
        ids
    )
}

/// Master of the series an occurrence belongs to
pub fn get_recurring_master(occurrence_id: &str, fields: &[&str]) -> String {
    format!(
        r#"<m:GetItem>{}<m:ItemIds><t:RecurringMasterItemId OccurrenceId="{}"/></m:ItemIds></m:GetItem>"#,
        item_shape(fields, false),
        escape(occurrence_id)
    )
}

/// EWS `DeleteType` for an action
pub fn delete_type(mode: ActionMode) -> &'static str {
    match mode {
        ActionMode::SoftDelete => "MoveToDeletedItems",
        ActionMode::PermanentDelete => "HardDelete",
        ActionMode::Delete | ActionMode::ReportOnly => "SoftDelete",
    }
}

/// Change keys are left out; a stale key would fail the delete
pub fn delete_items(items: &[ItemRef], mode: ActionMode, calendar: bool) -> String {
    let ids: String = items
        .iter()
        .map(|item| format!(r#"<t:ItemId Id="{}"/>"#, escape(&item.item_id)))
        .collect();
    let cancellations = if calendar {
        r#" SendMeetingCancellations="SendToNone""#
    } else {
        ""
    };
    format!(
        r#"<m:DeleteItem DeleteType="{}"{}><m:ItemIds>{}</m:ItemIds></m:DeleteItem>"#,
        delete_type(mode),
        cancellations,
        ids
    )
}

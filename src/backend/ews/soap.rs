//! SOAP envelopes and response-message handling for EWS

use quick_xml::escape::escape as xml_escape;
use std::time::Duration;

use super::xml::XmlNode;
use crate::error::{SweepError, SweepResult};
use crate::http::retry::throttle_verdict;
use crate::http::{HttpResponse, RetryVerdict};

pub const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const TYPES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/types";
pub const MESSAGES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/messages";

/// Escape text or attribute content
pub fn escape(value: &str) -> String {
    xml_escape(value).into_owned()
}

/// Request envelope around one operation body
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    pub server_version: &'a str,
    /// Act as this mailbox through `ExchangeImpersonation`
    pub impersonate: Option<&'a str>,
    pub body: String,
}

impl Envelope<'_> {
    pub fn to_xml(&self) -> String {
        let impersonation = match self.impersonate {
            Some(mailbox) => format!(
                "<t:ExchangeImpersonation><t:ConnectingSID><t:SmtpAddress>{}</t:SmtpAddress></t:ConnectingSID></t:ExchangeImpersonation>",
                escape(mailbox)
            ),
            None => String::new(),
        };

        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="{}" xmlns:t="{}" xmlns:m="{}">
  <soap:Header>
    <t:RequestServerVersion Version="{}"/>{}
  </soap:Header>
  <soap:Body>
    {}
  </soap:Body>
</soap:Envelope>"#,
            SOAP_NS,
            TYPES_NS,
            MESSAGES_NS,
            escape(self.server_version),
            impersonation,
            self.body
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    Warning,
    Error,
}

/// One `*ResponseMessage` element of an operation response
#[derive(Debug, Clone)]
pub struct ResponseMessage<'a> {
    pub class: ResponseClass,
    pub code: String,
    pub text: String,
    pub node: &'a XmlNode,
}

impl ResponseMessage<'_> {
    pub fn is_success(&self) -> bool {
        self.class != ResponseClass::Error
    }

    /// `code: text` for report details
    pub fn describe(&self) -> String {
        if self.text.is_empty() {
            self.code.clone()
        } else {
            format!("{}: {}", self.code, self.text)
        }
    }
}

/// Response messages of an operation, in request order
pub fn response_messages(root: &XmlNode) -> SweepResult<Vec<ResponseMessage<'_>>> {
    let container = root
        .find("ResponseMessages")
        .ok_or_else(|| SweepError::protocol("EWS response without ResponseMessages"))?;

    Ok(container
        .children
        .iter()
        .map(|node| ResponseMessage {
            class: match node.attr("ResponseClass") {
                Some("Success") => ResponseClass::Success,
                Some("Warning") => ResponseClass::Warning,
                _ => ResponseClass::Error,
            },
            code: node.child_text("ResponseCode").unwrap_or_default(),
            text: node.child_text("MessageText").unwrap_or_default(),
            node,
        })
        .collect())
}

/// A SOAP fault returned instead of an operation response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    pub fault_string: String,
    /// EWS response code from the fault detail, when present
    pub response_code: Option<String>,
}

pub fn soap_fault(root: &XmlNode) -> Option<SoapFault> {
    let fault = root.find("Fault")?;
    Some(SoapFault {
        fault_string: fault.child_text("faultstring").unwrap_or_default(),
        response_code: fault.find("ResponseCode").map(|c| c.text.trim().to_string()),
    })
}

/// Map an EWS response code onto the error taxonomy
pub fn code_error(code: &str, text: &str, mailbox: &str) -> SweepError {
    let message = if text.is_empty() {
        format!("{}: {}", mailbox, code)
    } else {
        format!("{}: {} ({})", mailbox, code, text)
    };
    match code {
        "ErrorNonExistentMailbox" | "ErrorMailboxMoveInProgress" | "ErrorMailboxStoreUnavailable" => {
            SweepError::MailboxNotFound(message)
        }
        "ErrorImpersonateUserDenied" | "ErrorImpersonationDenied" | "ErrorAccessDenied"
        | "ErrorInvalidCredentials" | "ErrorNotAllowedExternalSharingByPolicy" => {
            SweepError::Authentication(message)
        }
        "ErrorServerBusy" => SweepError::http(503, message),
        _ => SweepError::Protocol(message),
    }
}

/// `BackOffMilliseconds` hint of an `ErrorServerBusy` answer
fn back_off(root: &XmlNode) -> Option<Duration> {
    root.find_all("Value")
        .into_iter()
        .find(|v| v.attr("Name") == Some("BackOffMilliseconds"))
        .and_then(|v| v.text.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Retry classification for EWS: HTTP throttling plus `ErrorServerBusy`,
/// which arrives either as a fault or as the first response message.
pub fn busy_verdict(response: &HttpResponse) -> RetryVerdict {
    if let RetryVerdict::Retry(delay) = throttle_verdict(response) {
        return RetryVerdict::Retry(delay);
    }
    if !response.body.contains("ErrorServerBusy") {
        return RetryVerdict::Done;
    }

    match XmlNode::parse(&response.body) {
        Ok(root) => {
            let busy = root
                .find("ResponseCode")
                .is_some_and(|code| code.text.trim() == "ErrorServerBusy");
            if busy {
                RetryVerdict::Retry(back_off(&root))
            } else {
                RetryVerdict::Done
            }
        }
        Err(_) => RetryVerdict::Done,
    }
}

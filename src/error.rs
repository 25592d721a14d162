use std::io;
use thiserror::Error;

pub type SweepResult<T> = Result<T, SweepError>;

/// Errors raised while scanning or cleaning mailboxes
#[derive(Error, Debug)]
pub enum SweepError {
    /// Invalid or incomplete configuration, raised before any network call
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials rejected by the backend
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The target mailbox does not exist or is not accessible
    #[error("Mailbox not found: {0}")]
    MailboxNotFound(String),

    /// EWS endpoint discovery failed
    #[error("Autodiscover failed: {0}")]
    Autodiscover(String),

    /// Non-success HTTP status that the caller cannot recover from
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection, TLS or timeout failure below HTTP
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with something we did not expect
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed input (dates, report files, payloads)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Backend capability that this tenant or server does not offer
    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl SweepError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SweepError::Config(msg.into())
    }

    /// Create a new authentication error
    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        SweepError::Authentication(msg.into())
    }

    /// Create a new mailbox not found error
    pub fn mailbox_not_found<S: Into<String>>(mailbox: S) -> Self {
        SweepError::MailboxNotFound(mailbox.into())
    }

    /// Create a new autodiscover error
    pub fn autodiscover<S: Into<String>>(msg: S) -> Self {
        SweepError::Autodiscover(msg.into())
    }

    /// Create a new HTTP status error
    pub fn http<S: Into<String>>(status: u16, message: S) -> Self {
        SweepError::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        SweepError::Transport(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        SweepError::Protocol(msg.into())
    }

    /// Create a new parse error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        SweepError::Parse(msg.into())
    }

    /// Create a new not supported error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        SweepError::Unsupported(msg.into())
    }

    /// Map a failed HTTP status onto the error taxonomy
    pub fn from_status(status: u16, mailbox: &str, body: &str) -> Self {
        let message = summarize_body(body);
        match status {
            401 | 403 => SweepError::Authentication(format!("{}: {}", mailbox, message)),
            404 => SweepError::MailboxNotFound(format!("{}: {}", mailbox, message)),
            _ => SweepError::Http { status, message },
        }
    }

    /// Errors that stop the run before it starts
    pub fn is_config_error(&self) -> bool {
        matches!(self, SweepError::Config(_))
    }

    /// Errors worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            SweepError::Transport(_) => true,
            SweepError::Http { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Errors that end the scan of one mailbox without touching its siblings
    pub fn is_mailbox_fatal(&self) -> bool {
        matches!(
            self,
            SweepError::Authentication(_)
                | SweepError::MailboxNotFound(_)
                | SweepError::Autodiscover(_)
        )
    }
}

impl From<reqwest::Error> for SweepError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            SweepError::Http {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else {
            SweepError::Transport(error.to_string())
        }
    }
}

/// Trim a response body down to something that fits in a report cell
pub fn summarize_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            let code = value
                .get("error")
                .and_then(|e| e.get("code"))
                .and_then(|c| c.as_str())
                .unwrap_or("");
            return if code.is_empty() {
                message.to_string()
            } else {
                format!("{}: {}", code, message)
            };
        }
    }

    let trimmed = body.trim();
    if trimmed.chars().count() > 300 {
        let cut: String = trimmed.chars().take(300).collect();
        format!("{}...", cut)
    } else {
        trimmed.to_string()
    }
}

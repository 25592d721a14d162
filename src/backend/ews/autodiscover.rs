//! POX autodiscover: mailbox address to EWS endpoint

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::soap::escape;
use super::xml::XmlNode;
use crate::error::{SweepError, SweepResult};
use crate::http::{HttpRequest, HttpTransport, RequestAuth, RetryPolicy};

const REQUEST_SCHEMA: &str = "http://schemas.microsoft.com/exchange/autodiscover/outlook/requestschema/2006";
const RESPONSE_SCHEMA: &str = "http://schemas.microsoft.com/exchange/autodiscover/outlook/responseschema/2006a";

/// Address redirects followed before giving up
const MAX_REDIRECTS: usize = 3;

/// What one autodiscover answer asks for
#[derive(Debug, Clone, PartialEq, Eq)]
enum Answer {
    EwsUrl(String),
    RedirectAddr(String),
    RedirectUrl(String),
}

/// Endpoint lookup cached per email domain for one run
#[derive(Debug, Clone, Default)]
pub struct Autodiscover {
    cache: Arc<RwLock<HashMap<String, Result<String, String>>>>,
}

pub fn domain_of(mailbox: &str) -> Option<&str> {
    mailbox
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim())
        .filter(|d| !d.is_empty())
}

fn candidate_urls(domain: &str) -> Vec<String> {
    vec![
        format!("https://{}/autodiscover/autodiscover.xml", domain),
        format!("https://autodiscover.{}/autodiscover/autodiscover.xml", domain),
    ]
}

fn request_body(mailbox: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<Autodiscover xmlns="{}">
  <Request>
    <EMailAddress>{}</EMailAddress>
    <AcceptableResponseSchema>{}</AcceptableResponseSchema>
  </Request>
</Autodiscover>"#,
        REQUEST_SCHEMA,
        escape(mailbox),
        RESPONSE_SCHEMA
    )
}

fn parse_answer(body: &str) -> SweepResult<Answer> {
    let root = XmlNode::parse(body)?;

    if let Some(error) = root.find("Error") {
        let message = error.child_text("Message").unwrap_or_else(|| "unknown error".into());
        return Err(SweepError::autodiscover(message));
    }

    let account = root
        .find("Account")
        .ok_or_else(|| SweepError::autodiscover("response without Account"))?;

    match account.child_text("Action").as_deref() {
        Some("redirectAddr") => {
            if let Some(address) = account.child_text("RedirectAddr") {
                return Ok(Answer::RedirectAddr(address));
            }
        }
        Some("redirectUrl") => {
            if let Some(url) = account.child_text("RedirectUrl") {
                return Ok(Answer::RedirectUrl(url));
            }
        }
        _ => {}
    }

    let protocols = account.children_named("Protocol").collect::<Vec<_>>();
    let preferred = ["EXCH", "EXPR", "WEB"];
    preferred
        .iter()
        .find_map(|kind| {
            protocols
                .iter()
                .filter(|p| p.child_text("Type").as_deref() == Some(*kind))
                .find_map(|p| p.child_text("EwsUrl"))
        })
        .or_else(|| protocols.iter().find_map(|p| p.child_text("EwsUrl")))
        .map(Answer::EwsUrl)
        .ok_or_else(|| SweepError::autodiscover("no EwsUrl in response"))
}

impl Autodiscover {
    pub fn new() -> Self {
        Self::default()
    }

    /// EWS URL for a mailbox. Failures are cached as well, so one broken
    /// domain costs a single round of lookups per run.
    pub async fn endpoint(
        &self,
        http: &dyn HttpTransport,
        policy: &RetryPolicy,
        auth: &RequestAuth,
        mailbox: &str,
    ) -> SweepResult<String> {
        let domain = domain_of(mailbox)
            .ok_or_else(|| SweepError::autodiscover(format!("{} has no domain", mailbox)))?
            .to_lowercase();

        if let Some(cached) = self.cache.read().await.get(&domain) {
            return cached.clone().map_err(SweepError::Autodiscover);
        }

        let result = discover(http, policy, auth, mailbox).await.map_err(|e| match e {
            SweepError::Autodiscover(message) => message,
            other => other.to_string(),
        });
        if let Ok(url) = &result {
            info!("Autodiscover for {}: {}", domain, url);
        }

        let mut cache = self.cache.write().await;
        cache
            .entry(domain)
            .or_insert(result)
            .clone()
            .map_err(SweepError::Autodiscover)
    }
}

async fn discover(
    http: &dyn HttpTransport,
    policy: &RetryPolicy,
    auth: &RequestAuth,
    mailbox: &str,
) -> SweepResult<String> {
    let mut address = mailbox.to_string();
    let mut pending_urls: Option<Vec<String>> = None;

    for _ in 0..=MAX_REDIRECTS {
        let urls = match pending_urls.take() {
            Some(urls) => urls,
            None => {
                let domain = domain_of(&address)
                    .ok_or_else(|| SweepError::autodiscover(format!("{} has no domain", address)))?;
                candidate_urls(domain)
            }
        };

        let mut last_error = None;
        let mut redirected = false;

        for url in &urls {
            debug!("Autodiscover POST {} for {}", url, address);
            let request = HttpRequest::post(url.as_str())
                .auth(Some(auth.clone()))
                .header("Content-Type", "text/xml; charset=utf-8")
                .body(request_body(&address));

            let response = match policy.send(http, request).await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            if response.status == 401 || response.status == 403 {
                return Err(SweepError::authentication(format!(
                    "autodiscover for {} rejected the credentials (HTTP {})",
                    address, response.status
                )));
            }
            if !response.is_success() {
                last_error = Some(format!("{} returned HTTP {}", url, response.status));
                continue;
            }

            match parse_answer(&response.body) {
                Ok(Answer::EwsUrl(ews_url)) => return Ok(ews_url),
                Ok(Answer::RedirectAddr(next)) => {
                    debug!("Autodiscover redirects {} to {}", address, next);
                    address = next;
                    redirected = true;
                    break;
                }
                Ok(Answer::RedirectUrl(next)) => {
                    debug!("Autodiscover redirects to {}", next);
                    pending_urls = Some(vec![next]);
                    redirected = true;
                    break;
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        if !redirected {
            return Err(SweepError::autodiscover(format!(
                "no endpoint found for {}: {}",
                address,
                last_error.unwrap_or_else(|| "no candidates".into())
            )));
        }
    }

    Err(SweepError::autodiscover(format!("too many redirects for {}", mailbox)))
}

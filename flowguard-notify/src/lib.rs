//! # flowguard-notify
//!
//! POSTs `{"result": "<label>"}` to a configured endpoint when a threat is
//! alerted. One attempt per alert; failures go back to the caller, which logs
//! them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const JSON_UTF8: &str = "application/json; charset=UTF-8";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid notification url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("notification transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("notification rejected with {status}: {body}")]
    Http { status: StatusCode, body: String },
}

/// Anything that can deliver a threat label.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, verdict: &str) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct NotificationBody<'a> {
    result: &'a str,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    url: Url,
}

impl Notifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let parsed = Url::parse(url).map_err(|e| NotifyError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NotifyError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self {
            client,
            url: parsed,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl AlertNotifier for Notifier {
    async fn notify(&self, verdict: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, JSON_UTF8)
            .json(&NotificationBody { result: verdict })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(%status, url = %self.url, "notification delivered");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Http { status, body })
    }
}

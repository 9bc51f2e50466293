use async_trait::async_trait;
use serde::Serialize;

use crate::error::{SyncError, SyncResult};

/// Outbound-message capability shared by the decrease alert and the job
/// driver's failure reporter. The transport behind it is external.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, target: &str, body: &str) -> SyncResult<()>;
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    message: &'a str,
}

/// Posts messages to a chat webhook as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_text(&self, target: &str, body: &str) -> SyncResult<()> {
        let payload = WebhookPayload {
            to: target,
            message: body,
        };

        let mut last_error = String::new();
        for i in 0..3u64 {
            if i > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(500 * i)).await;
            }

            let resp = match self.client.post(&self.url).json(&payload).send().await {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("[NOTIFY] Attempt {} failed: {}", i + 1, e);
                    last_error = e.to_string();
                    continue;
                }
            };

            if !resp.status().is_success() {
                let status = resp.status();
                log::warn!("[NOTIFY] Attempt {} failed with HTTP {}", i + 1, status);
                last_error = format!("HTTP error: {status}");
                continue;
            }

            return Ok(());
        }

        Err(SyncError::Notify(format!(
            "failed after 3 attempts: {last_error}"
        )))
    }
}

/// Log-only notifier used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_text(&self, target: &str, body: &str) -> SyncResult<()> {
        log::info!("[NOTIFY] (log-only) to={} body:\n{}", target, body);
        Ok(())
    }
}

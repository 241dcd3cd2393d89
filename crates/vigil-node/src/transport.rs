//! HTTP transport for webhook channels.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use vigil_alerts::{AlertError, WebhookTransport};

/// Posts webhook payloads with `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with its own connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WebhookTransport for ReqwestTransport {
    fn post<'a>(
        &'a self,
        url: &'a str,
        headers: &'a HashMap<String, String>,
        body: String,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = vigil_alerts::Result<u16>> + Send + 'a>> {
        Box::pin(async move {
            let mut request = self
                .client
                .post(url)
                .timeout(timeout)
                .header(CONTENT_TYPE, "application/json")
                .body(body);
            for (key, value) in headers {
                request = request.header(key.as_str(), value.as_str());
            }

            let response = request.send().await.map_err(|e| AlertError::NotificationFailed {
                reason: format!("webhook request to {url} failed: {e}"),
            })?;
            Ok(response.status().as_u16())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_is_notification_failure() {
        let transport = ReqwestTransport::new();
        let err = transport
            .post(
                "http://127.0.0.1:1/hook",
                &HashMap::new(),
                "{}".to_string(),
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::NotificationFailed { .. }));
    }
}

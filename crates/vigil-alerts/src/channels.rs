//! Notification channels for alert delivery.
//!
//! This module provides the [`NotificationChannel`] trait, a
//! [`ChannelRegistry`] keyed by [`ChannelId`], and the built-in log, webhook,
//! email and in-app channels.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AlertError, Result};
use crate::types::{Alert, AlertId, AlertStatus, AlertType, ChannelId, Priority, TenantId};

/// A rendered alert as handed to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// The owning tenant.
    pub tenant_id: TenantId,
    /// The alert being delivered.
    pub alert_id: AlertId,
    /// Alert type.
    pub alert_type: AlertType,
    /// Alert title.
    pub title: String,
    /// The formatted message.
    pub message: String,
    /// Alert priority.
    pub priority: Priority,
    /// Alert status at send time.
    pub status: AlertStatus,
    /// When the alert was triggered.
    pub triggered_at: DateTime<Utc>,
}

impl Notification {
    /// Creates a notification for `alert` carrying `message`.
    #[must_use]
    pub fn new(tenant_id: TenantId, alert: &Alert, message: impl Into<String>) -> Self {
        Self {
            tenant_id,
            alert_id: alert.id,
            alert_type: alert.alert_type,
            title: alert.title.clone(),
            message: message.into(),
            priority: alert.priority,
            status: alert.status,
            triggered_at: alert.triggered_at,
        }
    }
}

/// Result of sending a notification.
#[derive(Debug, Clone)]
pub struct NotificationResult {
    /// Whether the notification was sent successfully.
    pub success: bool,
    /// The channel that processed this notification.
    pub channel: String,
    /// Optional message or error description.
    pub message: Option<String>,
    /// Response status code (if applicable).
    pub status_code: Option<u16>,
}

impl NotificationResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(channel: impl Into<String>) -> Self {
        Self {
            success: true,
            channel: channel.into(),
            message: None,
            status_code: None,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            channel: channel.into(),
            message: Some(message.into()),
            status_code: None,
        }
    }

    /// Sets the status code.
    #[must_use]
    pub const fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

/// Trait for notification channels.
///
/// Implement this trait to deliver alerts through a new medium. The dispatcher
/// also bounds every call with `timeout`; a channel doing its own I/O should
/// pass the deadline on to its client.
pub trait NotificationChannel: Send + Sync + fmt::Debug {
    /// Returns the channel id this channel is registered under.
    fn name(&self) -> &str;

    /// Sends one alert message.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotificationFailed` if the notification cannot be sent.
    fn send<'a>(
        &'a self,
        notification: &'a Notification,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<NotificationResult>> + Send + 'a>>;

    /// Returns true if this channel is enabled.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Channels keyed by id.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelId, Arc<dyn NotificationChannel>>>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel under its name, replacing any previous one.
    pub fn register(&self, channel: Arc<dyn NotificationChannel>) {
        let id = ChannelId::new(channel.name());
        debug!(channel = %id, "registering notification channel");
        self.channels.write().insert(id, channel);
    }

    /// Returns the channel registered under `id`.
    #[must_use]
    pub fn get(&self, id: &ChannelId) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.read().get(id).cloned()
    }

    /// Returns true if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &ChannelId) -> bool {
        self.channels.read().contains_key(id)
    }

    /// Returns every registered id, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.channels.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fails on the first id in `ids` that is not registered.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ChannelNotRegistered`.
    pub fn ensure_registered<'a>(&self, ids: impl IntoIterator<Item = &'a ChannelId>) -> Result<()> {
        let channels = self.channels.read();
        for id in ids {
            if !channels.contains_key(id) {
                return Err(AlertError::ChannelNotRegistered {
                    channel: id.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Performs the HTTP POST for a [`WebhookChannel`].
pub trait WebhookTransport: Send + Sync + fmt::Debug {
    /// Posts `body` as JSON and returns the response status code.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotificationFailed` if the request cannot be made.
    fn post<'a>(
        &'a self,
        url: &'a str,
        headers: &'a HashMap<String, String>,
        body: String,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + 'a>>;
}

/// A transport that only logs the request and reports `200`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTransport;

impl WebhookTransport for LoggingTransport {
    fn post<'a>(
        &'a self,
        url: &'a str,
        _headers: &'a HashMap<String, String>,
        body: String,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + 'a>> {
        Box::pin(async move {
            info!(url, "would send webhook notification");
            debug!(payload = %body, "webhook payload");
            Ok(200)
        })
    }
}

/// Configuration for a webhook channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The channel id this webhook is registered under.
    pub name: String,
    /// The URL to send notifications to.
    pub url: String,
    /// HTTP headers to include with requests.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Whether this channel is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl WebhookConfig {
    /// Creates a new webhook configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if the URL is empty or not http(s).
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(AlertError::invalid_rule("webhook URL cannot be empty"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AlertError::invalid_rule(format!(
                "webhook URL must start with http:// or https://, got '{url}'"
            )));
        }

        Ok(Self {
            name: name.into(),
            url,
            headers: HashMap::new(),
            enabled: true,
        })
    }

    /// Adds a header to the configuration.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A webhook notification channel.
///
/// Sends each alert as a JSON POST to a configured URL. Any 2xx response
/// counts as delivered.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    config: WebhookConfig,
    transport: Arc<dyn WebhookTransport>,
}

impl WebhookChannel {
    /// Creates a webhook channel that only logs what it would send.
    #[must_use]
    pub fn new(config: WebhookConfig) -> Self {
        Self::with_transport(config, Arc::new(LoggingTransport))
    }

    /// Creates a webhook channel posting through `transport`.
    #[must_use]
    pub fn with_transport(config: WebhookConfig, transport: Arc<dyn WebhookTransport>) -> Self {
        Self { config, transport }
    }

    /// Returns the webhook URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Formats the notification as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SerializationError` if serialization fails.
    pub fn format_payload(&self, notification: &Notification) -> Result<String> {
        let payload = WebhookPayload::from_notification(notification);
        serde_json::to_string(&payload).map_err(AlertError::from)
    }
}

impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn send<'a>(
        &'a self,
        notification: &'a Notification,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<NotificationResult>> + Send + 'a>> {
        Box::pin(async move {
            if !self.is_enabled() {
                debug!(channel = %self.name(), "channel is disabled, skipping");
                return Ok(NotificationResult::failure(self.name(), "channel disabled"));
            }

            let payload = self.format_payload(notification)?;
            let status = self
                .transport
                .post(&self.config.url, &self.config.headers, payload, timeout)
                .await?;

            if (200..300).contains(&status) {
                Ok(NotificationResult::success(self.name()).with_status_code(status))
            } else {
                warn!(channel = %self.name(), url = %self.config.url, status, "webhook rejected notification");
                Ok(NotificationResult::failure(self.name(), format!("webhook returned {status}"))
                    .with_status_code(status))
            }
        })
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// The JSON body posted by a [`WebhookChannel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Payload format version.
    pub version: String,
    /// The sender.
    pub receiver: String,
    /// The owning tenant.
    pub tenant_id: String,
    /// The alert id.
    pub alert_id: String,
    /// Alert type.
    pub alert_type: String,
    /// Alert title.
    pub title: String,
    /// The formatted message.
    pub message: String,
    /// Alert priority.
    pub priority: String,
    /// Alert status.
    pub status: String,
    /// RFC 3339 trigger time.
    pub triggered_at: String,
}

impl WebhookPayload {
    /// Creates a payload from a notification.
    #[must_use]
    pub fn from_notification(notification: &Notification) -> Self {
        Self {
            version: "1".to_string(),
            receiver: "vigil-alerts".to_string(),
            tenant_id: notification.tenant_id.to_string(),
            alert_id: notification.alert_id.to_string(),
            alert_type: notification.alert_type.to_string(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            priority: notification.priority.to_string(),
            status: notification.status.to_string(),
            triggered_at: notification.triggered_at.to_rfc3339(),
        }
    }
}

/// Placeholder email notification channel.
///
/// Logs the email it would send. A real implementation would hand the
/// message to an SMTP relay.
#[derive(Debug, Clone)]
pub struct EmailChannel {
    name: String,
    to: Vec<String>,
    from: String,
    enabled: bool,
}

impl EmailChannel {
    /// Creates a new email channel.
    #[must_use]
    pub fn new(name: impl Into<String>, to: Vec<String>, from: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            to,
            from: from.into(),
            enabled: true,
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the recipient addresses.
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    /// Returns the sender address.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.from
    }

    /// Returns the subject line for a notification.
    #[must_use]
    pub fn subject(notification: &Notification) -> String {
        format!("[{}] {}", notification.priority.as_str().to_uppercase(), notification.title)
    }
}

impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(
        &'a self,
        notification: &'a Notification,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<NotificationResult>> + Send + 'a>> {
        Box::pin(async move {
            if !self.is_enabled() {
                debug!(channel = %self.name(), "channel is disabled, skipping");
                return Ok(NotificationResult::failure(self.name(), "channel disabled"));
            }
            if self.to.is_empty() {
                return Err(AlertError::NotificationFailed {
                    reason: format!("email channel {} has no recipients", self.name),
                });
            }

            info!(
                channel = %self.name(),
                to = ?self.to,
                from = %self.from,
                subject = %Self::subject(notification),
                alert_id = %notification.alert_id,
                "would send email notification"
            );

            Ok(NotificationResult::success(self.name()).with_message("email notification placeholder"))
        })
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// A channel that logs notifications for debugging.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
    enabled: bool,
}

impl LogChannel {
    /// Creates a new log channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new("log")
    }
}

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(
        &'a self,
        notification: &'a Notification,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<NotificationResult>> + Send + 'a>> {
        Box::pin(async move {
            if !self.is_enabled() {
                return Ok(NotificationResult::failure(self.name(), "channel disabled"));
            }

            match notification.priority {
                Priority::High | Priority::Critical => warn!(
                    tenant_id = %notification.tenant_id,
                    alert_id = %notification.alert_id,
                    priority = %notification.priority,
                    title = %notification.title,
                    message = %notification.message,
                    "ALERT"
                ),
                Priority::Low | Priority::Medium => info!(
                    tenant_id = %notification.tenant_id,
                    alert_id = %notification.alert_id,
                    priority = %notification.priority,
                    title = %notification.title,
                    message = %notification.message,
                    "ALERT"
                ),
            }

            Ok(NotificationResult::success(self.name()).with_message("logged to tracing"))
        })
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// An in-app feed: notifications are kept in memory per tenant.
#[derive(Debug)]
pub struct InAppChannel {
    name: String,
    feeds: RwLock<HashMap<TenantId, Vec<Notification>>>,
    capacity: usize,
}

impl InAppChannel {
    /// Default number of notifications kept per tenant.
    pub const DEFAULT_CAPACITY: usize = 500;

    /// Creates an in-app channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            feeds: RwLock::new(HashMap::new()),
            capacity: Self::DEFAULT_CAPACITY,
        }
    }

    /// Sets how many notifications are kept per tenant. Oldest are dropped first.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Returns a tenant's feed, oldest first.
    #[must_use]
    pub fn feed(&self, tenant_id: &TenantId) -> Vec<Notification> {
        self.feeds.read().get(tenant_id).cloned().unwrap_or_default()
    }
}

impl NotificationChannel for InAppChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(
        &'a self,
        notification: &'a Notification,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<NotificationResult>> + Send + 'a>> {
        Box::pin(async move {
            let mut feeds = self.feeds.write();
            let feed = feeds.entry(notification.tenant_id).or_default();
            feed.push(notification.clone());
            if feed.len() > self.capacity {
                let excess = feed.len() - self.capacity;
                feed.drain(..excess);
            }
            Ok(NotificationResult::success(self.name()))
        })
    }
}

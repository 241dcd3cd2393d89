//! Alert dispatch.
//!
//! The [`Dispatcher`] turns a [`TriggerDecision`] or a [`ManualAlert`] into a
//! stored [`Alert`], fans the notification out to every channel concurrently
//! and records one outcome per channel. A channel that errors, rejects the
//! message, times out or is not registered counts as a failed delivery; the
//! other channels are unaffected.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::channels::{ChannelRegistry, Notification};
use crate::clock::Clock;
use crate::engine::TriggerDecision;
use crate::error::{AlertError, Result};
use crate::formatter::{MessageFormatter, MessageMeta};
use crate::lifecycle::LifecycleManager;
use crate::store::{AlertStore, RuleRepository};
use crate::types::{
    Alert, AlertHistory, AlertId, AlertRule, AlertStatus, AlertType, ChannelId, Context,
    DeliveryOutcome, HistoryEvent, Priority, TenantId,
};

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Deadline for a single channel delivery, in milliseconds.
    pub channel_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            channel_timeout_ms: 10_000,
        }
    }
}

impl DispatchConfig {
    /// Returns the per-channel deadline.
    #[must_use]
    pub const fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }
}

/// An operator-raised alert that bypasses rule evaluation.
///
/// The message is delivered verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualAlert {
    /// Alert type, `custom` unless given.
    #[serde(default, rename = "type")]
    pub alert_type: AlertType,
    /// Title.
    pub title: String,
    /// Message, sent as is.
    pub message: String,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// Channels to notify.
    pub channels: Vec<ChannelId>,
    /// Context snapshot stored with the alert.
    #[serde(default)]
    pub context: Context,
    /// Who raised it.
    pub triggered_by: String,
    /// Optional expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ManualAlert {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(AlertError::invalid_rule("manual alert title must not be empty"));
        }
        if self.message.trim().is_empty() {
            return Err(AlertError::invalid_rule("manual alert message must not be empty"));
        }
        if self.channels.is_empty() {
            return Err(AlertError::invalid_rule("manual alert needs at least one channel"));
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel) {
                return Err(AlertError::invalid_rule(format!(
                    "channel '{channel}' is listed more than once"
                )));
            }
        }
        if self.triggered_by.trim().is_empty() {
            return Err(AlertError::invalid_rule("manual alert needs an actor"));
        }
        Ok(())
    }
}

/// Creates alerts and delivers them.
pub struct Dispatcher {
    alerts: Arc<dyn AlertStore>,
    rules: Arc<dyn RuleRepository>,
    channels: Arc<ChannelRegistry>,
    lifecycle: Arc<LifecycleManager>,
    formatter: MessageFormatter,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.channels)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        rules: Arc<dyn RuleRepository>,
        channels: Arc<ChannelRegistry>,
        lifecycle: Arc<LifecycleManager>,
        formatter: MessageFormatter,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            alerts,
            rules,
            channels,
            lifecycle,
            formatter,
            clock,
            config,
        }
    }

    /// Returns the formatter used for rule messages.
    #[must_use]
    pub const fn formatter(&self) -> &MessageFormatter {
        &self.formatter
    }

    /// Renders a rule's template against `context` as a dispatch would.
    #[must_use]
    pub fn render(
        &self,
        rule: &AlertRule,
        context: &Context,
        value: Option<Value>,
        at: DateTime<Utc>,
    ) -> String {
        let meta = MessageMeta {
            alert_type: rule.alert_type,
            priority: rule.priority,
            value,
            at,
        };
        self.formatter
            .format(&rule.message_template, &rule.tenant_id, &meta, context)
    }

    /// Creates and delivers the alert for one engine decision.
    ///
    /// The rule's trigger statistics are advanced to the decision time. If
    /// every delivery fails and the rule is not retriable the alert moves to
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the alert cannot be persisted. Delivery
    /// failures are recorded on the alert, not returned.
    pub async fn dispatch_decision(&self, decision: TriggerDecision) -> Result<Alert> {
        let TriggerDecision {
            rule,
            context,
            trigger_value,
            decided_at,
        } = decision;
        let message = self.render(&rule, &context, trigger_value.clone(), decided_at);
        let alert = Alert {
            id: AlertId::new(),
            tenant_id: rule.tenant_id,
            rule_id: Some(rule.id),
            alert_type: rule.alert_type,
            title: rule.name.clone(),
            message,
            priority: rule.priority,
            status: AlertStatus::Triggered,
            is_manual: false,
            triggered_at: decided_at,
            triggered_by: Alert::SYSTEM_ACTOR.to_string(),
            trigger_value,
            trigger_context: context,
            acknowledged_at: None,
            acknowledged_by: None,
            acknowledgment_note: None,
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
            auto_resolved: false,
            expires_at: rule
                .expires_after_minutes
                .map(|m| decided_at + chrono::Duration::minutes(i64::from(m))),
            channels_notified: BTreeMap::new(),
        };

        let alert = self.create_and_deliver(alert, &rule.channels).await?;

        if let Err(e) = self
            .rules
            .increment_trigger_stats(&rule.tenant_id, &rule.id, decided_at)
        {
            warn!(rule_id = %rule.id, error = %e, "failed to record trigger statistics");
        }

        if alert.all_deliveries_failed() && !rule.retriable {
            return self.lifecycle.mark_failed(
                &alert.tenant_id,
                &alert.id,
                "every channel failed and the rule is not retriable",
            );
        }
        Ok(alert)
    }

    /// Dispatches every decision of a scan concurrently.
    pub async fn dispatch_all(&self, decisions: Vec<TriggerDecision>) -> Vec<Result<Alert>> {
        join_all(decisions.into_iter().map(|d| self.dispatch_decision(d))).await
    }

    /// Creates and delivers a manual alert. No rule or cooldown is involved.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRule` if the request is incomplete, or a store error.
    pub async fn trigger_manual(&self, tenant_id: &TenantId, manual: ManualAlert) -> Result<Alert> {
        manual.validate()?;
        let now = self.clock.now();
        let alert = Alert {
            id: AlertId::new(),
            tenant_id: *tenant_id,
            rule_id: None,
            alert_type: manual.alert_type,
            title: manual.title,
            message: manual.message,
            priority: manual.priority,
            status: AlertStatus::Triggered,
            is_manual: true,
            triggered_at: now,
            triggered_by: manual.triggered_by,
            trigger_value: None,
            trigger_context: manual.context,
            acknowledged_at: None,
            acknowledged_by: None,
            acknowledgment_note: None,
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
            auto_resolved: false,
            expires_at: manual.expires_at,
            channels_notified: BTreeMap::new(),
        };
        self.create_and_deliver(alert, &manual.channels).await
    }

    /// Re-sends an open alert to the channels whose last delivery failed.
    ///
    /// Returns the alert unchanged if it is closed or nothing failed.
    ///
    /// # Errors
    ///
    /// Returns `AlertNotFound` if the tenant has no such alert.
    pub async fn redeliver(&self, tenant_id: &TenantId, alert_id: &AlertId) -> Result<Alert> {
        let alert = self.lifecycle.get(tenant_id, alert_id)?;
        let failed = alert.failed_channels();
        if !alert.is_open() || failed.is_empty() {
            debug!(%tenant_id, %alert_id, "nothing to redeliver");
            return Ok(alert);
        }

        let outcomes = self.fan_out(&alert, &failed).await;
        let updated = self.alerts.record_deliveries(tenant_id, alert_id, &outcomes)?;
        self.alerts.append_history(
            AlertHistory::record(
                &updated,
                HistoryEvent::Redelivered,
                Some(alert.status),
                Some(Alert::SYSTEM_ACTOR.to_string()),
                self.clock.now(),
            )
            .with_data(deliveries_json(&outcomes)),
        )?;
        let (ok, failed) = updated.delivery_counts();
        info!(%tenant_id, %alert_id, ok, failed, "alert redelivered");
        Ok(updated)
    }

    async fn create_and_deliver(&self, alert: Alert, channels: &[ChannelId]) -> Result<Alert> {
        self.alerts.insert_alert(alert.clone())?;

        let outcomes = self.fan_out(&alert, channels).await;
        let stored = self
            .alerts
            .record_deliveries(&alert.tenant_id, &alert.id, &outcomes)?;
        self.alerts.append_history(
            AlertHistory::record(
                &stored,
                HistoryEvent::Created,
                None,
                Some(stored.triggered_by.clone()),
                stored.triggered_at,
            )
            .with_data(deliveries_json(&outcomes)),
        )?;

        let (ok, failed) = stored.delivery_counts();
        info!(
            tenant_id = %stored.tenant_id,
            alert_id = %stored.id,
            alert_type = %stored.alert_type,
            priority = %stored.priority,
            manual = stored.is_manual,
            ok,
            failed,
            "alert triggered"
        );
        Ok(stored)
    }

    async fn fan_out(
        &self,
        alert: &Alert,
        channels: &[ChannelId],
    ) -> Vec<(ChannelId, DeliveryOutcome)> {
        let notification = Notification::new(alert.tenant_id, alert, alert.message.clone());
        let notification = &notification;
        let timeout = self.config.channel_timeout();

        let sends = channels.iter().map(|id| async move {
            let outcome = match self.channels.get(id) {
                None => DeliveryOutcome::Failure {
                    reason: format!("channel {id} is not registered"),
                },
                Some(channel) => {
                    match tokio::time::timeout(timeout, channel.send(notification, timeout)).await {
                        Ok(Ok(result)) if result.success => DeliveryOutcome::Success,
                        Ok(Ok(result)) => DeliveryOutcome::Failure {
                            reason: result
                                .message
                                .unwrap_or_else(|| "delivery rejected".to_string()),
                        },
                        Ok(Err(e)) => DeliveryOutcome::Failure {
                            reason: e.to_string(),
                        },
                        Err(_) => DeliveryOutcome::Failure {
                            reason: format!("timed out after {}ms", timeout.as_millis()),
                        },
                    }
                }
            };
            if let DeliveryOutcome::Failure { reason } = &outcome {
                warn!(alert_id = %notification.alert_id, channel = %id, %reason, "delivery failed");
            }
            (id.clone(), outcome)
        });

        join_all(sends).await
    }
}

fn deliveries_json(outcomes: &[(ChannelId, DeliveryOutcome)]) -> Value {
    let map: serde_json::Map<String, Value> = outcomes
        .iter()
        .map(|(id, outcome)| {
            (
                id.to_string(),
                serde_json::to_value(outcome).unwrap_or_else(|_| json!({ "status": "unknown" })),
            )
        })
        .collect();
    json!({ "channels": map })
}

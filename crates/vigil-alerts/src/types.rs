//! Core types for the alerting engine.
//!
//! This module provides the fundamental types used throughout the vigil-alerts crate:
//! - [`TenantId`], [`RuleId`], [`AlertId`], [`HistoryId`] and [`ChannelId`]: identifiers
//! - [`AlertType`]: which data context feeds a rule
//! - [`Priority`]: how urgent the resulting alert is
//! - [`AlertRule`]: a tenant-owned specification of when to alert
//! - [`Alert`]: a triggered or manually created alert instance
//! - [`AlertHistory`]: an immutable audit row for one lifecycle transition

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::condition::Condition;
use crate::error::{AlertError, Result};

/// The evaluation context: metric name to current value.
pub type Context = HashMap<String, Value>;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Create a new random `", stringify!($name), "`.")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a UUID.")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            #[doc = concat!("Parse a `", stringify!($name), "` from a string.")]
            ///
            /// # Errors
            ///
            /// Returns an error if the string is not a valid UUID.
            pub fn parse(s: &str) -> Result<Self> {
                Uuid::parse_str(s).map(Self).map_err(|e| AlertError::SerializationError(
                    format!("invalid {} id '{s}': {e}", $what),
                ))
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = AlertError;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }
    };
}

uuid_id!(
    /// Identifies a tenant. Every rule, alert and context is scoped to one.
    TenantId,
    "tenant"
);
uuid_id!(
    /// Identifies an alert rule. Unique across tenants.
    RuleId,
    "rule"
);
uuid_id!(
    /// Identifies an alert.
    AlertId,
    "alert"
);
uuid_id!(
    /// Identifies an alert history row.
    HistoryId,
    "history"
);

/// Identifies a notification channel, e.g. `"email"` or `"slack"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Creates a channel id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Selects which data context provider feeds a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Weather readings (temperature, precipitation, humidity, wind).
    Weather,
    /// Sales aggregates and deviation from the rolling average.
    Sales,
    /// Forecast impact.
    #[serde(alias = "prediction_impact", alias = "prediction-impact")]
    Prediction,
    /// Operational metrics.
    Operational,
    /// Anything else, including manual alerts.
    #[default]
    Custom,
}

impl AlertType {
    /// Every alert type.
    pub const ALL: [Self; 5] = [
        Self::Weather,
        Self::Sales,
        Self::Prediction,
        Self::Operational,
        Self::Custom,
    ];

    /// Returns the type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::Sales => "sales",
            Self::Prediction => "prediction",
            Self::Operational => "operational",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prediction_impact" | "prediction-impact" => Ok(Self::Prediction),
            other => Self::ALL
                .into_iter()
                .find(|t| t.as_str() == other)
                .ok_or_else(|| AlertError::invalid_rule(format!("unknown alert type '{other}'"))),
        }
    }
}

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Informational.
    Low,
    /// Should be looked at.
    #[default]
    Medium,
    /// Needs attention soon.
    High,
    /// Needs immediate attention.
    Critical,
}

impl Priority {
    /// Returns the priority as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Returns the rank of this priority (higher = more urgent).
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a rule's conditions combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionLogic {
    /// Every condition must hold.
    #[default]
    And,
    /// At least one condition must hold.
    Or,
}

impl fmt::Display for ConditionLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
        }
    }
}

/// The lifecycle status of an alert.
///
/// ```text
/// triggered -> acknowledged -> resolved
/// triggered -> resolved
/// triggered | acknowledged -> expired
/// triggered -> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Created and delivered (possibly partially).
    Triggered,
    /// Seen by someone.
    Acknowledged,
    /// Closed by an actor or automatically.
    Resolved,
    /// Closed because `expires_at` passed.
    Expired,
    /// Every channel failed and the alert will not be retried.
    Failed,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }

    /// Returns true while the alert still needs attention.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Triggered | Self::Acknowledged)
    }

    /// Returns true if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Triggered, Self::Acknowledged | Self::Resolved | Self::Expired | Self::Failed)
                | (Self::Acknowledged, Self::Resolved | Self::Expired)
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// A tenant-owned specification of when and how to alert.
///
/// `conditions`, `channels` and `message_template` are persisted in the same
/// shape they were created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier for the rule.
    pub id: RuleId,
    /// The owning tenant.
    pub tenant_id: TenantId,
    /// Human-readable name for the rule.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Which data context provider feeds this rule.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Ordered conditions.
    pub conditions: Vec<Condition>,
    /// How conditions combine.
    #[serde(default)]
    pub logic: ConditionLogic,
    /// Priority of the alerts this rule creates.
    pub priority: Priority,
    /// Channels to deliver to. No duplicates.
    pub channels: Vec<ChannelId>,
    /// Template with `{name}` placeholders.
    pub message_template: String,
    /// Minimum minutes between two triggers.
    pub cooldown_minutes: u32,
    /// Inactive rules are never evaluated.
    pub is_active: bool,
    /// Minutes after which an alert from this rule expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_after_minutes: Option<u32>,
    /// Whether an alert whose every delivery failed stays open for redelivery.
    #[serde(default = "default_true")]
    pub retriable: bool,
    /// How many times the rule has triggered.
    #[serde(default)]
    pub trigger_count: u64,
    /// When the rule last triggered.
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    /// When the rule was created.
    pub created_at: DateTime<Utc>,
    /// When the rule was last changed.
    pub updated_at: DateTime<Utc>,
    /// When the rule was deactivated by a delete request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AlertRule {
    /// Minimum allowed length for rule names.
    pub const MIN_NAME_LENGTH: usize = 3;
    /// Maximum allowed length for rule names.
    pub const MAX_NAME_LENGTH: usize = 255;

    /// Creates a new alert rule builder.
    pub fn builder(
        tenant_id: TenantId,
        name: impl Into<String>,
        alert_type: AlertType,
    ) -> AlertRuleBuilder {
        AlertRuleBuilder::new(tenant_id, name, alert_type)
    }

    /// Returns the cooldown window.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::minutes(i64::from(self.cooldown_minutes))
    }

    /// Returns when the durable cooldown ends, if the rule has ever triggered.
    #[must_use]
    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.last_triggered.map(|at| at + self.cooldown())
    }

    /// Checks every invariant a stored rule must satisfy.
    ///
    /// Conditions are already validated by construction, so this covers the
    /// rule-level checks.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let name_len = self.name.trim().chars().count();
        if name_len < Self::MIN_NAME_LENGTH || name_len > Self::MAX_NAME_LENGTH {
            return Err(AlertError::invalid_rule(format!(
                "rule name must be between {} and {} characters",
                Self::MIN_NAME_LENGTH,
                Self::MAX_NAME_LENGTH
            )));
        }
        if self.conditions.is_empty() {
            return Err(AlertError::invalid_rule("rule needs at least one condition"));
        }
        if self.channels.is_empty() {
            return Err(AlertError::invalid_rule("rule needs at least one channel"));
        }
        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel) {
                return Err(AlertError::invalid_rule(format!(
                    "channel '{channel}' is listed more than once"
                )));
            }
        }
        if self.message_template.trim().is_empty() {
            return Err(AlertError::invalid_rule("message template cannot be empty"));
        }
        Ok(())
    }
}

/// Builder for creating [`AlertRule`] instances.
#[derive(Debug)]
pub struct AlertRuleBuilder {
    tenant_id: TenantId,
    name: String,
    description: Option<String>,
    alert_type: AlertType,
    conditions: Vec<Condition>,
    logic: ConditionLogic,
    priority: Priority,
    channels: Vec<ChannelId>,
    message_template: Option<String>,
    cooldown_minutes: u32,
    is_active: bool,
    expires_after_minutes: Option<u32>,
    retriable: bool,
    created_at: Option<DateTime<Utc>>,
}

impl AlertRuleBuilder {
    /// Default cooldown for new rules.
    pub const DEFAULT_COOLDOWN_MINUTES: u32 = 60;

    fn new(tenant_id: TenantId, name: impl Into<String>, alert_type: AlertType) -> Self {
        Self {
            tenant_id,
            name: name.into(),
            description: None,
            alert_type,
            conditions: Vec::new(),
            logic: ConditionLogic::And,
            priority: Priority::Medium,
            channels: Vec::new(),
            message_template: None,
            cooldown_minutes: Self::DEFAULT_COOLDOWN_MINUTES,
            is_active: true,
            expires_after_minutes: None,
            retriable: true,
            created_at: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a condition.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Appends several conditions.
    #[must_use]
    pub fn conditions(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    /// Sets how conditions combine.
    #[must_use]
    pub const fn logic(mut self, logic: ConditionLogic) -> Self {
        self.logic = logic;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Appends a channel.
    #[must_use]
    pub fn channel(mut self, channel: impl Into<ChannelId>) -> Self {
        self.channels.push(channel.into());
        self
    }

    /// Sets the message template. Without one, the alert type's default is used.
    #[must_use]
    pub fn message_template(mut self, template: impl Into<String>) -> Self {
        self.message_template = Some(template.into());
        self
    }

    /// Sets the cooldown in minutes.
    #[must_use]
    pub const fn cooldown_minutes(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    /// Sets whether the rule is active.
    #[must_use]
    pub const fn active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Sets how long alerts from this rule stay open before expiring.
    #[must_use]
    pub const fn expires_after_minutes(mut self, minutes: u32) -> Self {
        self.expires_after_minutes = Some(minutes);
        self
    }

    /// Sets whether fully failed deliveries stay open for redelivery.
    #[must_use]
    pub const fn retriable(mut self, retriable: bool) -> Self {
        self.retriable = retriable;
        self
    }

    /// Sets the creation timestamp. Defaults to now.
    #[must_use]
    pub const fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Builds the [`AlertRule`].
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if:
    /// - The name is shorter than 3 or longer than 255 characters
    /// - There are no conditions
    /// - There are no channels, or a channel is listed twice
    pub fn build(self) -> Result<AlertRule> {
        let now = self.created_at.unwrap_or_else(Utc::now);
        let message_template = self
            .message_template
            .unwrap_or_else(|| crate::formatter::default_template(self.alert_type).to_string());

        let rule = AlertRule {
            id: RuleId::new(),
            tenant_id: self.tenant_id,
            name: self.name.trim().to_string(),
            description: self.description,
            alert_type: self.alert_type,
            conditions: self.conditions,
            logic: self.logic,
            priority: self.priority,
            channels: self.channels,
            message_template,
            cooldown_minutes: self.cooldown_minutes,
            is_active: self.is_active,
            expires_after_minutes: self.expires_after_minutes,
            retriable: self.retriable,
            trigger_count: 0,
            last_triggered: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        rule.validate()?;
        Ok(rule)
    }
}

/// The result of delivering an alert through one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeliveryOutcome {
    /// The channel accepted the message.
    Success,
    /// The channel rejected the message or timed out.
    Failure {
        /// What went wrong.
        reason: String,
    },
}

impl DeliveryOutcome {
    /// Returns true for [`DeliveryOutcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A triggered or manually created alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier for this alert.
    pub id: AlertId,
    /// The owning tenant.
    pub tenant_id: TenantId,
    /// The rule that produced the alert. `None` for manual alerts.
    pub rule_id: Option<RuleId>,
    /// The alert type.
    pub alert_type: AlertType,
    /// Short title.
    pub title: String,
    /// The formatted message as delivered.
    pub message: String,
    /// Priority.
    pub priority: Priority,
    /// Current status.
    pub status: AlertStatus,
    /// True when created through the manual trigger path.
    pub is_manual: bool,
    /// When the alert was created.
    pub triggered_at: DateTime<Utc>,
    /// Who created it: `"system"` for rule alerts, the actor otherwise.
    pub triggered_by: String,
    /// Value of the first condition's field at evaluation time.
    pub trigger_value: Option<Value>,
    /// Snapshot of the context the rule was evaluated against.
    pub trigger_context: Context,
    /// When the alert was acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Who acknowledged it.
    pub acknowledged_by: Option<String>,
    /// Note left on acknowledgement.
    pub acknowledgment_note: Option<String>,
    /// When the alert was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it.
    pub resolved_by: Option<String>,
    /// Note left on resolution.
    pub resolution_note: Option<String>,
    /// True if resolved by the system rather than a person.
    pub auto_resolved: bool,
    /// When the alert expires if still open.
    pub expires_at: Option<DateTime<Utc>>,
    /// Per-channel delivery outcome.
    pub channels_notified: BTreeMap<ChannelId, DeliveryOutcome>,
}

impl Alert {
    /// Actor recorded for rule-driven alerts and automatic transitions.
    pub const SYSTEM_ACTOR: &'static str = "system";

    /// Returns true while the alert still needs attention.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Returns true if the alert is open and its expiry has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.expires_at.is_some_and(|at| now > at)
    }

    /// Returns the number of successful and failed deliveries.
    #[must_use]
    pub fn delivery_counts(&self) -> (usize, usize) {
        let ok = self
            .channels_notified
            .values()
            .filter(|o| o.is_success())
            .count();
        (ok, self.channels_notified.len() - ok)
    }

    /// Returns true if there was at least one delivery and all of them failed.
    #[must_use]
    pub fn all_deliveries_failed(&self) -> bool {
        !self.channels_notified.is_empty()
            && self.channels_notified.values().all(|o| !o.is_success())
    }

    /// Returns the channels whose last delivery failed.
    #[must_use]
    pub fn failed_channels(&self) -> Vec<ChannelId> {
        self.channels_notified
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(c, _)| c.clone())
            .collect()
    }

    /// Moves a triggered alert to acknowledged. Returns false if not legal.
    pub fn acknowledge(
        &mut self,
        actor: impl Into<String>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.status.can_transition_to(AlertStatus::Acknowledged) {
            return false;
        }
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_at = Some(now);
        self.acknowledged_by = Some(actor.into());
        self.acknowledgment_note = note;
        true
    }

    /// Moves an open alert to resolved. Returns false if not legal.
    pub fn resolve(
        &mut self,
        actor: Option<String>,
        note: Option<String>,
        auto: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.status.can_transition_to(AlertStatus::Resolved) {
            return false;
        }
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
        self.resolved_by = actor;
        self.resolution_note = note;
        self.auto_resolved = auto;
        true
    }

    /// Moves an open alert past its expiry to expired. Returns false otherwise.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_expired_at(now) {
            return false;
        }
        self.status = AlertStatus::Expired;
        true
    }

    /// Moves a triggered alert to failed. Returns false if not legal.
    pub fn fail(&mut self) -> bool {
        if !self.status.can_transition_to(AlertStatus::Failed) {
            return false;
        }
        self.status = AlertStatus::Failed;
        true
    }
}

/// What happened to an alert in one history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryEvent {
    /// The alert was created.
    Created,
    /// The alert was acknowledged.
    Acknowledged,
    /// The alert was resolved.
    Resolved,
    /// The alert expired.
    Expired,
    /// Every delivery failed and the alert will not be retried.
    Failed,
    /// Failed channels were sent to again.
    Redelivered,
}

impl HistoryEvent {
    /// Returns the event as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Expired => "expired",
            Self::Failed => "failed",
            Self::Redelivered => "redelivered",
        }
    }
}

impl fmt::Display for HistoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable audit row for an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistory {
    /// Unique identifier for this row.
    pub id: HistoryId,
    /// The owning tenant.
    pub tenant_id: TenantId,
    /// The alert this row belongs to.
    pub alert_id: AlertId,
    /// What happened.
    pub event: HistoryEvent,
    /// Status before the event. `None` for creation.
    pub old_status: Option<AlertStatus>,
    /// Status after the event.
    pub new_status: AlertStatus,
    /// Who caused the event.
    pub actor: Option<String>,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Structured details, e.g. the delivery map.
    pub event_data: Option<Value>,
}

impl AlertHistory {
    /// Creates a history row for `alert` at its current status.
    #[must_use]
    pub fn record(
        alert: &Alert,
        event: HistoryEvent,
        old_status: Option<AlertStatus>,
        actor: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HistoryId::new(),
            tenant_id: alert.tenant_id,
            alert_id: alert.id,
            event,
            old_status,
            new_status: alert.status,
            actor,
            timestamp,
            notes: None,
            event_data: None,
        }
    }

    /// Attaches notes.
    #[must_use]
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    /// Attaches structured event data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.event_data = Some(data);
        self
    }
}

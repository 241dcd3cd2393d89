//! Administrative surface.
//!
//! [`AlertService`] is what the rest of an application calls: rule CRUD,
//! manual and test triggers, scans, alert queries, lifecycle actions and
//! housekeeping. Every call is scoped by tenant.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::channels::ChannelRegistry;
use crate::clock::Clock;
use crate::condition::Condition;
use crate::cooldown::CooldownTracker;
use crate::dispatcher::{DispatchConfig, Dispatcher, ManualAlert};
use crate::engine::{EngineConfig, RuleEngine, SkipReason};
use crate::error::Result;
use crate::formatter::{default_template, MessageFormatter, TenantDirectory};
use crate::lifecycle::LifecycleManager;
use crate::provider::ProviderRegistry;
use crate::store::{
    AlertQuery, AlertStore, HistoryQuery, InMemoryAlertStore, InMemoryRuleRepository, Page,
    RuleFilter, RuleRepository,
};
use crate::types::{
    Alert, AlertHistory, AlertId, AlertRule, ChannelId, ConditionLogic, Context, Priority, RuleId,
    TenantId,
};

/// A partial rule update. Absent fields are left unchanged.
///
/// `description` and `expires_after_minutes` can also be cleared: in JSON an
/// explicit `null` clears them, in Rust `Some(None)` does.
#[allow(clippy::option_option)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description, or `Some(None)` to clear it.
    #[serde(deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    /// Replacement conditions.
    pub conditions: Option<Vec<Condition>>,
    /// New combination logic.
    pub logic: Option<ConditionLogic>,
    /// Replacement channels.
    pub channels: Option<Vec<ChannelId>>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New message template.
    pub message_template: Option<String>,
    /// New cooldown.
    pub cooldown_minutes: Option<u32>,
    /// Activate or deactivate. Activating a deleted rule restores it.
    pub is_active: Option<bool>,
    /// New alert expiry, or `Some(None)` for alerts that never expire.
    #[serde(deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub expires_after_minutes: Option<Option<u32>>,
    /// Whether failed deliveries keep the alert open.
    pub retriable: Option<bool>,
}

impl RuleUpdate {
    fn apply(self, rule: &mut AlertRule) {
        if let Some(name) = self.name {
            rule.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            rule.description = description;
        }
        if let Some(conditions) = self.conditions {
            rule.conditions = conditions;
        }
        if let Some(logic) = self.logic {
            rule.logic = logic;
        }
        if let Some(channels) = self.channels {
            rule.channels = channels;
        }
        if let Some(priority) = self.priority {
            rule.priority = priority;
        }
        if let Some(template) = self.message_template {
            rule.message_template = template;
        }
        if let Some(minutes) = self.cooldown_minutes {
            rule.cooldown_minutes = minutes;
        }
        if let Some(active) = self.is_active {
            rule.is_active = active;
            if active {
                rule.deleted_at = None;
            }
        }
        if let Some(minutes) = self.expires_after_minutes {
            rule.expires_after_minutes = minutes;
        }
        if let Some(retriable) = self.retriable {
            rule.retriable = retriable;
        }
    }
}

/// A present field deserializes to `Some`, so `null` becomes `Some(None)`.
#[allow(clippy::option_option)]
fn clearable<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// What a rule would do right now, without side effects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleTestOutcome {
    /// The tested rule.
    pub rule_id: RuleId,
    /// True if a scan would trigger the rule now.
    pub would_trigger: bool,
    /// Whether the conditions held.
    pub conditions_met: bool,
    /// What would stop a scan from triggering.
    pub blocked_by: Option<SkipReason>,
    /// The message that would be sent.
    pub message: String,
    /// The context evaluated.
    pub context: Context,
    /// Value of the first condition's field.
    pub trigger_value: Option<Value>,
}

/// Result of a scan followed by dispatch.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Active rules considered.
    pub rules_considered: usize,
    /// Alerts created.
    pub alerts: Vec<Alert>,
    /// Rules skipped and why.
    pub skipped: Vec<(RuleId, SkipReason)>,
    /// Decisions whose alert could not be stored.
    pub dispatch_errors: usize,
}

/// The administrative facade over the alerting engine.
pub struct AlertService {
    rules: Arc<dyn RuleRepository>,
    channels: Arc<ChannelRegistry>,
    engine: Arc<RuleEngine>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Arc<LifecycleManager>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AlertService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertService")
            .field("channels", &self.channels)
            .field("engine", &self.engine)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl AlertService {
    /// Creates a service from its parts.
    #[must_use]
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        channels: Arc<ChannelRegistry>,
        engine: Arc<RuleEngine>,
        dispatcher: Arc<Dispatcher>,
        lifecycle: Arc<LifecycleManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            channels,
            engine,
            dispatcher,
            lifecycle,
            clock,
        }
    }

    /// Wires a service over in-memory rule and alert stores.
    #[must_use]
    pub fn in_memory(
        providers: Arc<ProviderRegistry>,
        channels: Arc<ChannelRegistry>,
        tenants: Arc<dyn TenantDirectory>,
        clock: Arc<dyn Clock>,
        engine_config: EngineConfig,
        dispatch_config: DispatchConfig,
    ) -> Self {
        let rules: Arc<dyn RuleRepository> = Arc::new(InMemoryRuleRepository::new());
        let alerts: Arc<dyn AlertStore> = Arc::new(InMemoryAlertStore::new());
        let lifecycle = Arc::new(LifecycleManager::new(alerts.clone(), clock.clone()));
        let engine = Arc::new(RuleEngine::new(
            rules.clone(),
            providers,
            Arc::new(CooldownTracker::new()),
            clock.clone(),
            engine_config,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            alerts,
            rules.clone(),
            channels.clone(),
            lifecycle.clone(),
            MessageFormatter::new(tenants),
            clock.clone(),
            dispatch_config,
        ));
        Self::new(rules, channels, engine, dispatcher, lifecycle, clock)
    }

    /// Returns the rule engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    /// Returns the dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Returns the lifecycle manager.
    #[must_use]
    pub const fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    fn check_rule(&self, rule: &AlertRule) -> Result<()> {
        rule.validate()?;
        self.channels.ensure_registered(&rule.channels)?;
        if rule.message_template != default_template(rule.alert_type) {
            let fields: Vec<&str> = rule.conditions.iter().map(Condition::field).collect();
            self.dispatcher
                .formatter()
                .check_template(&rule.message_template, &fields);
        }
        Ok(())
    }

    // --- rules ---

    /// Validates and stores a new rule.
    ///
    /// # Errors
    ///
    /// Returns a validation error, `ChannelNotRegistered`, or a store error.
    pub fn create_rule(&self, rule: AlertRule) -> Result<AlertRule> {
        self.check_rule(&rule)?;
        self.rules.insert_rule(rule.clone())?;
        info!(tenant_id = %rule.tenant_id, rule_id = %rule.id, rule = %rule.name, "rule created");
        Ok(rule)
    }

    /// Returns one rule.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` if the tenant has no such rule.
    pub fn get_rule(&self, tenant_id: &TenantId, rule_id: &RuleId) -> Result<AlertRule> {
        self.rules.get_rule(tenant_id, rule_id)
    }

    /// Lists a tenant's rules.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn list_rules(&self, tenant_id: &TenantId, filter: &RuleFilter) -> Result<Vec<AlertRule>> {
        self.rules.list_rules(tenant_id, filter)
    }

    /// Applies a partial update and revalidates the rule.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound`, a validation error or `ChannelNotRegistered`.
    /// The stored rule is unchanged on error.
    pub fn update_rule(
        &self,
        tenant_id: &TenantId,
        rule_id: &RuleId,
        update: RuleUpdate,
    ) -> Result<AlertRule> {
        let mut rule = self.rules.get_rule(tenant_id, rule_id)?;
        update.apply(&mut rule);
        rule.updated_at = self.clock.now();
        self.check_rule(&rule)?;
        let stored = self.rules.update_rule(rule)?;
        info!(%tenant_id, %rule_id, "rule updated");
        Ok(stored)
    }

    /// Soft-deletes a rule. Its alerts keep their reference.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` if the tenant has no such rule.
    pub fn deactivate_rule(&self, tenant_id: &TenantId, rule_id: &RuleId) -> Result<AlertRule> {
        let rule = self
            .rules
            .deactivate_rule(tenant_id, rule_id, self.clock.now())?;
        info!(%tenant_id, %rule_id, "rule deactivated");
        Ok(rule)
    }

    // --- triggering ---

    /// Raises a manual alert.
    ///
    /// # Errors
    ///
    /// Returns a validation error, `ChannelNotRegistered`, or a store error.
    pub async fn trigger_manual(&self, tenant_id: &TenantId, manual: ManualAlert) -> Result<Alert> {
        self.channels.ensure_registered(&manual.channels)?;
        self.dispatcher.trigger_manual(tenant_id, manual).await
    }

    /// Evaluates a rule and renders its message without creating an alert,
    /// claiming a cooldown or calling a channel.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` if the tenant has no such rule.
    pub async fn test_rule(
        &self,
        tenant_id: &TenantId,
        rule_id: &RuleId,
        context_override: Option<Context>,
    ) -> Result<RuleTestOutcome> {
        let rule = self.rules.get_rule(tenant_id, rule_id)?;
        let evaluation = self.engine.dry_run(&rule, context_override).await?;
        let message = self.dispatcher.render(
            &rule,
            &evaluation.context,
            evaluation.trigger_value.clone(),
            self.clock.now(),
        );
        Ok(RuleTestOutcome {
            rule_id: rule.id,
            would_trigger: evaluation.would_trigger(),
            conditions_met: evaluation.conditions_met,
            blocked_by: evaluation.blocked_by,
            message,
            context: evaluation.context,
            trigger_value: evaluation.trigger_value,
        })
    }

    /// Scans a tenant and dispatches every decision.
    ///
    /// # Errors
    ///
    /// Returns `ScanInProgress` if the tenant is already being scanned, or a
    /// store error if its rules cannot be loaded.
    pub async fn run_scan(&self, tenant_id: &TenantId) -> Result<ScanOutcome> {
        let report = self.engine.scan(tenant_id).await?;
        let mut outcome = ScanOutcome {
            rules_considered: report.rules_considered,
            skipped: report.skipped,
            ..ScanOutcome::default()
        };
        for result in self.dispatcher.dispatch_all(report.decisions).await {
            match result {
                Ok(alert) => outcome.alerts.push(alert),
                Err(e) => {
                    warn!(%tenant_id, error = %e, "alert could not be stored");
                    outcome.dispatch_errors += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Re-sends an alert to the channels that failed.
    ///
    /// # Errors
    ///
    /// Returns `AlertNotFound` if the tenant has no such alert.
    pub async fn redeliver(&self, tenant_id: &TenantId, alert_id: &AlertId) -> Result<Alert> {
        self.dispatcher.redeliver(tenant_id, alert_id).await
    }

    // --- alerts ---

    /// Returns one alert.
    ///
    /// # Errors
    ///
    /// Returns `AlertNotFound` if the tenant has no such alert.
    pub fn get_alert(&self, tenant_id: &TenantId, alert_id: &AlertId) -> Result<Alert> {
        self.lifecycle.get(tenant_id, alert_id)
    }

    /// Lists a tenant's alerts, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn list_alerts(&self, tenant_id: &TenantId, query: &AlertQuery) -> Result<Page<Alert>> {
        self.lifecycle.list(tenant_id, query)
    }

    /// Lists open alerts, highest priority then newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn list_active_alerts(&self, tenant_id: &TenantId) -> Result<Vec<Alert>> {
        self.lifecycle.list_active(tenant_id)
    }

    /// Acknowledges an alert.
    ///
    /// # Errors
    ///
    /// Returns `AlertNotFound` if the tenant has no such alert.
    pub fn acknowledge(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        actor: &str,
        note: Option<String>,
    ) -> Result<Alert> {
        self.lifecycle.acknowledge(tenant_id, alert_id, actor, note)
    }

    /// Resolves an alert by hand.
    ///
    /// # Errors
    ///
    /// Returns `AlertNotFound` if the tenant has no such alert.
    pub fn resolve(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        actor: &str,
        note: Option<String>,
    ) -> Result<Alert> {
        self.lifecycle
            .resolve(tenant_id, alert_id, Some(actor), note, false)
    }

    /// Queries a tenant's alert history.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn alert_history(
        &self,
        tenant_id: &TenantId,
        query: &HistoryQuery,
    ) -> Result<Page<AlertHistory>> {
        self.lifecycle.history(tenant_id, query)
    }

    // --- housekeeping ---

    /// Rebuilds the cooldown tracker from each rule's `last_triggered`.
    /// Returns how many rules are still cooling down.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn restore_cooldowns(&self, tenants: &[TenantId]) -> Result<usize> {
        let now = self.clock.now();
        let mut restored = 0;
        for tenant_id in tenants {
            let rules = self.rules.list_rules(tenant_id, &RuleFilter::default())?;
            restored += self.engine.cooldowns().restore(&rules, now);
        }
        info!(tenants = tenants.len(), restored, "cooldowns restored");
        Ok(restored)
    }

    /// Expires a tenant's stale alerts.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn sweep_expired(&self, tenant_id: &TenantId) -> Result<usize> {
        self.lifecycle.expire_stale(tenant_id)
    }
}

//! Rule repository and alert/history store.
//!
//! Every read and write takes the tenant id and only ever touches that
//! tenant's rows. The in-memory implementations keep one partition per tenant.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};
use crate::types::{
    Alert, AlertHistory, AlertId, AlertRule, AlertStatus, AlertType, ChannelId, DeliveryOutcome,
    HistoryEvent, RuleId, TenantId,
};

/// Filter for [`RuleRepository::list_rules`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilter {
    /// Only rules of this type.
    pub alert_type: Option<AlertType>,
    /// Only active (or only inactive) rules.
    pub is_active: Option<bool>,
}

impl RuleFilter {
    fn matches(&self, rule: &AlertRule) -> bool {
        self.alert_type.is_none_or(|t| rule.alert_type == t)
            && self.is_active.is_none_or(|a| rule.is_active == a)
    }
}

/// Stores rule definitions.
pub trait RuleRepository: Send + Sync {
    /// Stores a new rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` if a rule with the same id exists.
    fn insert_rule(&self, rule: AlertRule) -> Result<()>;

    /// Replaces an existing rule's definition and returns the stored rule.
    ///
    /// `trigger_count` and `last_triggered` keep their stored values; only
    /// [`RuleRepository::increment_trigger_stats`] changes them.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if the tenant has no such rule.
    fn update_rule(&self, rule: AlertRule) -> Result<AlertRule>;

    /// Returns one rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if the tenant has no such rule.
    fn get_rule(&self, tenant_id: &TenantId, rule_id: &RuleId) -> Result<AlertRule>;

    /// Lists a tenant's rules, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` on backend failure.
    fn list_rules(&self, tenant_id: &TenantId, filter: &RuleFilter) -> Result<Vec<AlertRule>>;

    /// Lists a tenant's active rules, optionally of one type.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` on backend failure.
    fn list_active_rules(
        &self,
        tenant_id: &TenantId,
        alert_type: Option<AlertType>,
    ) -> Result<Vec<AlertRule>> {
        self.list_rules(
            tenant_id,
            &RuleFilter {
                alert_type,
                is_active: Some(true),
            },
        )
    }

    /// Increments `trigger_count` and sets `last_triggered`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if the tenant has no such rule.
    fn increment_trigger_stats(
        &self,
        tenant_id: &TenantId,
        rule_id: &RuleId,
        when: DateTime<Utc>,
    ) -> Result<()>;

    /// Soft-deletes a rule: marks it inactive and stamps `deleted_at`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` if the tenant has no such rule.
    fn deactivate_rule(
        &self,
        tenant_id: &TenantId,
        rule_id: &RuleId,
        when: DateTime<Utc>,
    ) -> Result<AlertRule>;
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// The items on this page.
    pub items: Vec<T>,
    /// Total matching items across all pages.
    pub total: usize,
    /// Offset of the first item.
    pub offset: usize,
    /// Requested page size.
    pub limit: usize,
}

impl<T> Page<T> {
    /// Default page size.
    pub const DEFAULT_LIMIT: usize = 50;
    /// Largest page size accepted.
    pub const MAX_LIMIT: usize = 500;

    fn slice(all: Vec<T>, offset: usize, limit: Option<usize>) -> Self {
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT);
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            total,
            offset,
            limit,
        }
    }

    /// Returns true if more items follow this page.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total
    }
}

/// Filter for [`AlertStore::list_alerts`]. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertQuery {
    /// Only alerts in one of these statuses. Empty means any.
    #[serde(default)]
    pub statuses: Vec<AlertStatus>,
    /// Only alerts of this type.
    pub alert_type: Option<AlertType>,
    /// Only alerts from this rule.
    pub rule_id: Option<RuleId>,
    /// Triggered at or after.
    pub from: Option<DateTime<Utc>>,
    /// Triggered at or before.
    pub to: Option<DateTime<Utc>>,
    /// Items to skip.
    #[serde(default)]
    pub offset: usize,
    /// Page size.
    pub limit: Option<usize>,
}

impl AlertQuery {
    fn matches(&self, alert: &Alert) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&alert.status))
            && self.alert_type.is_none_or(|t| alert.alert_type == t)
            && self.rule_id.is_none_or(|r| alert.rule_id == Some(r))
            && self.from.is_none_or(|from| alert.triggered_at >= from)
            && self.to.is_none_or(|to| alert.triggered_at <= to)
    }
}

/// Filter for [`AlertStore::list_history`]. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Only rows for this alert.
    pub alert_id: Option<AlertId>,
    /// Only rows of this event.
    pub event: Option<HistoryEvent>,
    /// Only rows whose alert has this type.
    pub alert_type: Option<AlertType>,
    /// At or after.
    pub from: Option<DateTime<Utc>>,
    /// At or before.
    pub to: Option<DateTime<Utc>>,
    /// Items to skip.
    #[serde(default)]
    pub offset: usize,
    /// Page size.
    pub limit: Option<usize>,
}

/// Stores alerts and their append-only history.
pub trait AlertStore: Send + Sync {
    /// Stores a new alert.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` if an alert with the same id exists.
    fn insert_alert(&self, alert: Alert) -> Result<()>;

    /// Returns one alert, or `None` if the tenant has no such alert.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` on backend failure.
    fn get_alert(&self, tenant_id: &TenantId, alert_id: &AlertId) -> Result<Option<Alert>>;

    /// Replaces an alert if its stored status is still `expected`.
    ///
    /// Returns false, leaving the stored alert untouched, if the status moved.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the tenant has no such alert.
    fn replace_alert(&self, alert: &Alert, expected: AlertStatus) -> Result<bool>;

    /// Merges per-channel outcomes into an alert's delivery map.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the tenant has no such alert.
    fn record_deliveries(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        outcomes: &[(ChannelId, DeliveryOutcome)],
    ) -> Result<Alert>;

    /// Lists a tenant's alerts.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` on backend failure.
    fn list_alerts(&self, tenant_id: &TenantId, query: &AlertQuery) -> Result<Page<Alert>>;

    /// Appends a history row.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` on backend failure.
    fn append_history(&self, entry: AlertHistory) -> Result<()>;

    /// Lists a tenant's history rows.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` on backend failure.
    fn list_history(&self, tenant_id: &TenantId, query: &HistoryQuery) -> Result<Page<AlertHistory>>;
}

/// In-memory [`RuleRepository`].
#[derive(Debug, Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<HashMap<TenantId, HashMap<RuleId, AlertRule>>>,
}

impl InMemoryRuleRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(rule_id: &RuleId) -> AlertError {
        AlertError::RuleNotFound {
            id: rule_id.to_string(),
        }
    }
}

impl RuleRepository for InMemoryRuleRepository {
    fn insert_rule(&self, rule: AlertRule) -> Result<()> {
        let mut rules = self.rules.write();
        let tenant = rules.entry(rule.tenant_id).or_default();
        if tenant.contains_key(&rule.id) {
            return Err(AlertError::Store {
                reason: format!("rule {} already exists", rule.id),
            });
        }
        tenant.insert(rule.id, rule);
        Ok(())
    }

    fn update_rule(&self, mut rule: AlertRule) -> Result<AlertRule> {
        let mut rules = self.rules.write();
        let slot = rules
            .get_mut(&rule.tenant_id)
            .and_then(|t| t.get_mut(&rule.id))
            .ok_or_else(|| Self::not_found(&rule.id))?;
        rule.trigger_count = slot.trigger_count;
        rule.last_triggered = slot.last_triggered;
        *slot = rule;
        Ok(slot.clone())
    }

    fn get_rule(&self, tenant_id: &TenantId, rule_id: &RuleId) -> Result<AlertRule> {
        self.rules
            .read()
            .get(tenant_id)
            .and_then(|t| t.get(rule_id))
            .cloned()
            .ok_or_else(|| Self::not_found(rule_id))
    }

    fn list_rules(&self, tenant_id: &TenantId, filter: &RuleFilter) -> Result<Vec<AlertRule>> {
        let rules = self.rules.read();
        let mut matching: Vec<AlertRule> = rules
            .get(tenant_id)
            .map(|t| t.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(matching)
    }

    fn increment_trigger_stats(
        &self,
        tenant_id: &TenantId,
        rule_id: &RuleId,
        when: DateTime<Utc>,
    ) -> Result<()> {
        let mut rules = self.rules.write();
        let rule = rules
            .get_mut(tenant_id)
            .and_then(|t| t.get_mut(rule_id))
            .ok_or_else(|| Self::not_found(rule_id))?;
        rule.trigger_count += 1;
        rule.last_triggered = Some(rule.last_triggered.map_or(when, |prev| prev.max(when)));
        Ok(())
    }

    fn deactivate_rule(
        &self,
        tenant_id: &TenantId,
        rule_id: &RuleId,
        when: DateTime<Utc>,
    ) -> Result<AlertRule> {
        let mut rules = self.rules.write();
        let rule = rules
            .get_mut(tenant_id)
            .and_then(|t| t.get_mut(rule_id))
            .ok_or_else(|| Self::not_found(rule_id))?;
        if rule.is_active || rule.deleted_at.is_none() {
            rule.is_active = false;
            rule.deleted_at = Some(when);
            rule.updated_at = when;
        }
        Ok(rule.clone())
    }
}

#[derive(Debug, Default)]
struct TenantAlerts {
    alerts: HashMap<AlertId, Alert>,
    history: Vec<AlertHistory>,
}

/// In-memory [`AlertStore`].
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    tenants: RwLock<HashMap<TenantId, TenantAlerts>>,
}

impl InMemoryAlertStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(alert_id: &AlertId) -> AlertError {
        AlertError::AlertNotFound {
            id: alert_id.to_string(),
        }
    }
}

impl AlertStore for InMemoryAlertStore {
    fn insert_alert(&self, alert: Alert) -> Result<()> {
        let mut tenants = self.tenants.write();
        let tenant = tenants.entry(alert.tenant_id).or_default();
        if tenant.alerts.contains_key(&alert.id) {
            return Err(AlertError::Store {
                reason: format!("alert {} already exists", alert.id),
            });
        }
        tenant.alerts.insert(alert.id, alert);
        Ok(())
    }

    fn get_alert(&self, tenant_id: &TenantId, alert_id: &AlertId) -> Result<Option<Alert>> {
        Ok(self
            .tenants
            .read()
            .get(tenant_id)
            .and_then(|t| t.alerts.get(alert_id))
            .cloned())
    }

    fn replace_alert(&self, alert: &Alert, expected: AlertStatus) -> Result<bool> {
        let mut tenants = self.tenants.write();
        let stored = tenants
            .get_mut(&alert.tenant_id)
            .and_then(|t| t.alerts.get_mut(&alert.id))
            .ok_or_else(|| Self::not_found(&alert.id))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = alert.clone();
        Ok(true)
    }

    fn record_deliveries(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        outcomes: &[(ChannelId, DeliveryOutcome)],
    ) -> Result<Alert> {
        let mut tenants = self.tenants.write();
        let stored = tenants
            .get_mut(tenant_id)
            .and_then(|t| t.alerts.get_mut(alert_id))
            .ok_or_else(|| Self::not_found(alert_id))?;
        for (channel, outcome) in outcomes {
            stored.channels_notified.insert(channel.clone(), outcome.clone());
        }
        Ok(stored.clone())
    }

    fn list_alerts(&self, tenant_id: &TenantId, query: &AlertQuery) -> Result<Page<Alert>> {
        let tenants = self.tenants.read();
        let mut matching: Vec<Alert> = tenants
            .get(tenant_id)
            .map(|t| t.alerts.values().filter(|a| query.matches(a)).cloned().collect())
            .unwrap_or_default();
        matching.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        Ok(Page::slice(matching, query.offset, query.limit))
    }

    fn append_history(&self, entry: AlertHistory) -> Result<()> {
        self.tenants
            .write()
            .entry(entry.tenant_id)
            .or_default()
            .history
            .push(entry);
        Ok(())
    }

    fn list_history(&self, tenant_id: &TenantId, query: &HistoryQuery) -> Result<Page<AlertHistory>> {
        let tenants = self.tenants.read();
        let Some(tenant) = tenants.get(tenant_id) else {
            return Ok(Page::slice(Vec::new(), query.offset, query.limit));
        };

        // Rows are appended in time order; walking backwards gives newest first.
        let matching: Vec<AlertHistory> = tenant
            .history
            .iter()
            .rev()
            .filter(|h| query.alert_id.is_none_or(|id| h.alert_id == id))
            .filter(|h| query.event.is_none_or(|e| h.event == e))
            .filter(|h| query.from.is_none_or(|from| h.timestamp >= from))
            .filter(|h| query.to.is_none_or(|to| h.timestamp <= to))
            .filter(|h| {
                query.alert_type.is_none_or(|t| {
                    tenant.alerts.get(&h.alert_id).is_some_and(|a| a.alert_type == t)
                })
            })
            .cloned()
            .collect();
        Ok(Page::slice(matching, query.offset, query.limit))
    }
}

//! Alert lifecycle management.
//!
//! The [`LifecycleManager`] owns every status change after creation. Each
//! transition is a compare-and-swap on the stored status followed by one
//! history row, so a repeated or racing call is a no-op that returns the
//! current alert and writes nothing.
//!
//! Expiry is applied lazily whenever an alert is read; [`LifecycleManager::expire_stale`]
//! sweeps proactively.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{AlertError, Result};
use crate::store::{AlertQuery, AlertStore, HistoryQuery, Page};
use crate::types::{Alert, AlertHistory, AlertId, AlertStatus, HistoryEvent, TenantId};

const MAX_CAS_ATTEMPTS: usize = 3;

/// Applies lifecycle transitions and writes their history.
pub struct LifecycleManager {
    alerts: Arc<dyn AlertStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager").finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Creates a manager over `alerts`.
    #[must_use]
    pub fn new(alerts: Arc<dyn AlertStore>, clock: Arc<dyn Clock>) -> Self {
        Self { alerts, clock }
    }

    /// Returns an alert, expiring it first if it is past `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the tenant has no such alert.
    pub fn get(&self, tenant_id: &TenantId, alert_id: &AlertId) -> Result<Alert> {
        let alert = self.load_raw(tenant_id, alert_id)?;
        self.expire_if_due(alert, self.clock.now())
    }

    /// Acknowledges a triggered alert.
    ///
    /// Any other status is left unchanged and returned as is.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the tenant has no such alert.
    pub fn acknowledge(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        actor: &str,
        note: Option<String>,
    ) -> Result<Alert> {
        self.transition(
            tenant_id,
            alert_id,
            HistoryEvent::Acknowledged,
            Some(actor.to_string()),
            note.clone(),
            |alert, now| alert.acknowledge(actor, note.clone(), now),
        )
    }

    /// Resolves a triggered or acknowledged alert.
    ///
    /// Resolving a resolved, expired or failed alert returns it unchanged and
    /// writes no history.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the tenant has no such alert.
    pub fn resolve(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        actor: Option<&str>,
        note: Option<String>,
        auto: bool,
    ) -> Result<Alert> {
        let actor = actor
            .map(ToString::to_string)
            .or_else(|| auto.then(|| Alert::SYSTEM_ACTOR.to_string()));
        self.transition(
            tenant_id,
            alert_id,
            HistoryEvent::Resolved,
            actor.clone(),
            note.clone(),
            |alert, now| alert.resolve(actor.clone(), note.clone(), auto, now),
        )
    }

    /// Moves a triggered alert to failed.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the tenant has no such alert.
    pub fn mark_failed(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        reason: impl Into<String>,
    ) -> Result<Alert> {
        self.transition(
            tenant_id,
            alert_id,
            HistoryEvent::Failed,
            Some(Alert::SYSTEM_ACTOR.to_string()),
            Some(reason.into()),
            |alert, _| alert.fail(),
        )
    }

    /// Lists a tenant's alerts. Open alerts past their `expires_at` are
    /// expired before the query runs, so status filters and `total` see
    /// their current status.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` on backend failure.
    pub fn list(&self, tenant_id: &TenantId, query: &AlertQuery) -> Result<Page<Alert>> {
        self.expire_due(tenant_id, self.clock.now())?;
        self.alerts.list_alerts(tenant_id, query)
    }

    /// Returns every open (triggered or acknowledged) alert, highest priority
    /// first, then newest first.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` on backend failure.
    pub fn list_active(&self, tenant_id: &TenantId) -> Result<Vec<Alert>> {
        let now = self.clock.now();
        let mut active: Vec<Alert> = self
            .open_alerts(tenant_id)?
            .into_iter()
            .map(|a| self.expire_if_due(a, now))
            .filter(|a| a.as_ref().map_or(true, Alert::is_open))
            .collect::<Result<_>>()?;
        active.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(b.triggered_at.cmp(&a.triggered_at))
        });
        Ok(active)
    }

    /// Expires every open alert of the tenant whose `expires_at` has passed.
    /// Returns how many were expired.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` on backend failure.
    pub fn expire_stale(&self, tenant_id: &TenantId) -> Result<usize> {
        self.expire_due(tenant_id, self.clock.now())
    }

    /// Lists a tenant's history rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` on backend failure.
    pub fn history(&self, tenant_id: &TenantId, query: &HistoryQuery) -> Result<Page<AlertHistory>> {
        self.alerts.list_history(tenant_id, query)
    }

    fn expire_due(&self, tenant_id: &TenantId, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for alert in self.open_alerts(tenant_id)? {
            if alert.is_expired_at(now) && self.expire_if_due(alert, now)?.status == AlertStatus::Expired {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(%tenant_id, expired, "expired stale alerts");
        }
        Ok(expired)
    }

    fn open_alerts(&self, tenant_id: &TenantId) -> Result<Vec<Alert>> {
        let mut query = AlertQuery {
            statuses: vec![AlertStatus::Triggered, AlertStatus::Acknowledged],
            limit: Some(Page::<Alert>::MAX_LIMIT),
            ..AlertQuery::default()
        };
        let mut all = Vec::new();
        loop {
            let page = self.alerts.list_alerts(tenant_id, &query)?;
            let more = page.has_more() && !page.items.is_empty();
            query.offset += page.items.len();
            all.extend(page.items);
            if !more {
                return Ok(all);
            }
        }
    }

    fn load_raw(&self, tenant_id: &TenantId, alert_id: &AlertId) -> Result<Alert> {
        self.alerts
            .get_alert(tenant_id, alert_id)?
            .ok_or_else(|| AlertError::AlertNotFound {
                id: alert_id.to_string(),
            })
    }

    fn expire_if_due(&self, alert: Alert, now: DateTime<Utc>) -> Result<Alert> {
        if !alert.is_expired_at(now) {
            return Ok(alert);
        }
        let old_status = alert.status;
        let mut expired = alert;
        expired.expire(now);
        if self.alerts.replace_alert(&expired, old_status)? {
            self.alerts.append_history(AlertHistory::record(
                &expired,
                HistoryEvent::Expired,
                Some(old_status),
                Some(Alert::SYSTEM_ACTOR.to_string()),
                now,
            ))?;
            info!(tenant_id = %expired.tenant_id, alert_id = %expired.id, "alert expired");
            return Ok(expired);
        }
        self.load_raw(&expired.tenant_id, &expired.id)
    }

    fn transition<F>(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        event: HistoryEvent,
        actor: Option<String>,
        notes: Option<String>,
        apply: F,
    ) -> Result<Alert>
    where
        F: Fn(&mut Alert, DateTime<Utc>) -> bool,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.now();
            let current = self.expire_if_due(self.load_raw(tenant_id, alert_id)?, now)?;
            let mut next = current.clone();
            if !apply(&mut next, now) {
                debug!(%tenant_id, %alert_id, status = %current.status, %event, "transition not applicable, no-op");
                return Ok(current);
            }
            if self.alerts.replace_alert(&next, current.status)? {
                self.alerts.append_history(
                    AlertHistory::record(&next, event, Some(current.status), actor.clone(), now)
                        .with_notes(notes.clone()),
                )?;
                info!(
                    %tenant_id,
                    %alert_id,
                    from = %current.status,
                    to = %next.status,
                    actor = actor.as_deref().unwrap_or("-"),
                    "alert transition"
                );
                return Ok(next);
            }
        }
        self.load_raw(tenant_id, alert_id)
    }
}

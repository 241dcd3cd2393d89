//! Periodic per-tenant scanning.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::service::{AlertService, ScanOutcome};
use crate::types::TenantId;

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scans.
    pub interval_secs: u64,
    /// Whether each tick also expires stale alerts.
    pub sweep_expired: bool,
    /// Tenants to scan.
    pub tenants: Vec<TenantId>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            sweep_expired: true,
            tenants: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Returns the scan interval. Never zero.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Drives [`AlertService::run_scan`] for every tenant on a fixed cadence.
#[derive(Debug)]
pub struct Scheduler {
    service: Arc<AlertService>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(service: Arc<AlertService>, config: SchedulerConfig) -> Self {
        Self { service, config }
    }

    /// Scans one tenant, dispatches its decisions and optionally sweeps
    /// expired alerts.
    async fn scan_tenant(service: &AlertService, tenant_id: TenantId, sweep: bool) -> Result<ScanOutcome> {
        let outcome = service.run_scan(&tenant_id).await?;
        if sweep {
            if let Err(e) = service.sweep_expired(&tenant_id) {
                warn!(%tenant_id, error = %e, "expiry sweep failed");
            }
        }
        if !outcome.alerts.is_empty() {
            info!(%tenant_id, alerts = outcome.alerts.len(), "scan raised alerts");
        }
        Ok(outcome)
    }

    /// Runs one tick for every tenant concurrently and waits for all of them.
    pub async fn tick(&self) -> Vec<(TenantId, Result<ScanOutcome>)> {
        let scans = self.config.tenants.iter().map(|tenant_id| async move {
            let result = Self::scan_tenant(&self.service, *tenant_id, self.config.sweep_expired).await;
            (*tenant_id, result)
        });
        futures::future::join_all(scans).await
    }

    fn spawn_tick(&self, tasks: &mut JoinSet<()>) {
        for tenant_id in &self.config.tenants {
            if self.service.engine().is_scanning(tenant_id) {
                debug!(%tenant_id, "previous scan still running, tick skipped");
                continue;
            }
            let service = Arc::clone(&self.service);
            let tenant_id = *tenant_id;
            let sweep = self.config.sweep_expired;
            tasks.spawn(async move {
                if let Err(e) = Self::scan_tenant(&service, tenant_id, sweep).await {
                    if e.is_scan_in_progress() {
                        debug!(%tenant_id, "previous scan still running, tick skipped");
                    } else {
                        warn!(%tenant_id, error = %e, "scan failed");
                    }
                }
            });
        }
    }

    /// Runs until `shutdown` turns true or its sender is dropped.
    ///
    /// Cooldowns are rebuilt from the rules' `last_triggered` before the first
    /// tick. Scans still running at shutdown are aborted.
    ///
    /// # Errors
    ///
    /// Returns a store error if the cooldowns cannot be restored.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.service.restore_cooldowns(&self.config.tenants)?;

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks = JoinSet::new();

        info!(
            interval_secs = self.config.interval().as_secs(),
            tenants = self.config.tenants.len(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.spawn_tick(&mut tasks),

                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "scan task panicked");
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown signal received, stopping scheduler");
                        break;
                    }
                }
            }
        }

        let in_flight = tasks.len();
        tasks.shutdown().await;
        info!(aborted = in_flight, "scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelRegistry, InAppChannel};
    use crate::clock::ManualClock;
    use crate::condition::{ComparisonOperator, Condition};
    use crate::dispatcher::DispatchConfig;
    use crate::engine::EngineConfig;
    use crate::formatter::StaticTenantDirectory;
    use crate::provider::{ProviderRegistry, StaticContextProvider};
    use crate::store::AlertQuery;
    use crate::types::{AlertRule, AlertType};

    fn service(tenants: &[TenantId]) -> (Arc<AlertService>, Arc<StaticContextProvider>) {
        let providers = Arc::new(ProviderRegistry::new());
        let weather = Arc::new(StaticContextProvider::new());
        providers.register(AlertType::Weather, weather.clone());
        let channels = Arc::new(ChannelRegistry::new());
        channels.register(Arc::new(InAppChannel::new("in_app")));
        let service = Arc::new(AlertService::in_memory(
            providers,
            channels,
            Arc::new(StaticTenantDirectory::new()),
            Arc::new(ManualClock::default()),
            EngineConfig::default(),
            DispatchConfig::default(),
        ));
        for tenant in tenants {
            let rule = AlertRule::builder(*tenant, "Heat warning", AlertType::Weather)
                .condition(Condition::threshold("temperature", ComparisonOperator::GreaterThan, 35.0).unwrap())
                .channel("in_app")
                .build()
                .unwrap();
            service.create_rule(rule).unwrap();
        }
        (service, weather)
    }

    #[tokio::test]
    async fn tick_scans_every_tenant() {
        let tenants = [TenantId::new(), TenantId::new()];
        let (service, weather) = service(&tenants);
        weather.set_value(tenants[0], "temperature", 38);
        weather.set_value(tenants[1], "temperature", 20);

        let scheduler = Scheduler::new(
            Arc::clone(&service),
            SchedulerConfig {
                tenants: tenants.to_vec(),
                ..SchedulerConfig::default()
            },
        );
        let results = scheduler.tick().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1.as_ref().unwrap().alerts.len(), 1);
        assert!(results[1].1.as_ref().unwrap().alerts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let tenant = TenantId::new();
        let (service, weather) = service(&[tenant]);
        weather.set_value(tenant, "temperature", 38);

        let scheduler = Scheduler::new(
            Arc::clone(&service),
            SchedulerConfig {
                interval_secs: 60,
                tenants: vec![tenant],
                ..SchedulerConfig::default()
            },
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let alerts = service.list_alerts(&tenant, &AlertQuery::default()).unwrap();
        assert_eq!(alerts.total, 1);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = SchedulerConfig {
            interval_secs: 0,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.interval(), Duration::from_secs(1));
    }
}

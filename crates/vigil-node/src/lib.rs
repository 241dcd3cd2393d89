//! vigil-node - alerting node
//!
//! Wires the `vigil-alerts` engine to file-backed context providers and the
//! configured notification channels, then scans every tenant on a schedule.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod file_provider;
pub mod transport;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use vigil_alerts::{
    AlertService, AlertType, ChannelRegistry, Clock, EmailChannel, InAppChannel, LogChannel,
    NotificationChannel, ProviderRegistry, Scheduler, SchedulerConfig, StaticTenantDirectory,
    SystemClock, WebhookChannel, WebhookConfig, WebhookTransport,
};

use crate::config::{ChannelConfig, NodeConfig};
use crate::error::Result;
use crate::file_provider::FileContextProvider;
use crate::transport::ReqwestTransport;

/// Builds the channel described by `config`.
///
/// # Errors
///
/// Returns an error if a webhook URL is invalid.
pub fn build_channel(
    config: &ChannelConfig,
    transport: &Arc<dyn WebhookTransport>,
) -> Result<Arc<dyn NotificationChannel>> {
    let channel: Arc<dyn NotificationChannel> = match config {
        ChannelConfig::Log { name } => Arc::new(LogChannel::new(name.as_str())),
        ChannelConfig::Webhook { name, url, headers } => {
            let mut webhook = WebhookConfig::new(name.as_str(), url.as_str())?;
            webhook.headers.clone_from(headers);
            Arc::new(WebhookChannel::with_transport(webhook, Arc::clone(transport)))
        }
        ChannelConfig::Email { name, to, from } => {
            Arc::new(EmailChannel::new(name.as_str(), to.clone(), from.as_str()))
        }
        ChannelConfig::InApp { name, capacity } => {
            let mut channel = InAppChannel::new(name.as_str());
            if let Some(capacity) = capacity {
                channel = channel.with_capacity(*capacity);
            }
            Arc::new(channel)
        }
    };
    Ok(channel)
}

/// A fully wired alerting node.
#[derive(Debug)]
pub struct Node {
    service: Arc<AlertService>,
    scheduler: SchedulerConfig,
}

impl Node {
    /// Builds a node that posts webhooks over HTTP and uses wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel or seeded rule is invalid.
    pub fn build(config: &NodeConfig) -> Result<Self> {
        Self::build_with(config, Arc::new(ReqwestTransport::new()), Arc::new(SystemClock))
    }

    /// Builds a node with an explicit webhook transport and clock.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel or seeded rule is invalid.
    pub fn build_with(
        config: &NodeConfig,
        transport: Arc<dyn WebhookTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let providers = Arc::new(ProviderRegistry::new());
        for alert_type in AlertType::ALL {
            providers.register(
                alert_type,
                Arc::new(FileContextProvider::new(config.context_dir.clone(), alert_type)),
            );
        }

        let channels = Arc::new(ChannelRegistry::new());
        for channel in &config.channels {
            channels.register(build_channel(channel, &transport)?);
        }

        let tenants = StaticTenantDirectory::new();
        for tenant in &config.tenants {
            tenants.insert(tenant.id, tenant.name.as_str());
        }

        let service = Arc::new(AlertService::in_memory(
            providers,
            channels,
            Arc::new(tenants),
            clock,
            config.engine.clone(),
            config.dispatch.clone(),
        ));
        for seed in &config.rules {
            service.create_rule(seed.to_rule()?)?;
        }

        info!(
            tenants = config.tenants.len(),
            channels = config.channels.len(),
            rules = config.rules.len(),
            "node wired"
        );

        Ok(Self {
            service,
            scheduler: SchedulerConfig {
                interval_secs: config.schedule.interval_secs,
                sweep_expired: config.schedule.sweep_expired,
                tenants: config.tenants.iter().map(|t| t.id).collect(),
            },
        })
    }

    /// Returns the alert service.
    #[must_use]
    pub const fn service(&self) -> &Arc<AlertService> {
        &self.service
    }

    /// Returns a scheduler over this node's tenants.
    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(Arc::clone(&self.service), self.scheduler.clone())
    }

    /// Scans until `shutdown` turns true.
    ///
    /// # Errors
    ///
    /// Returns an error if cooldowns cannot be restored at start.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.scheduler().run(shutdown).await?;
        Ok(())
    }
}

//! Test helpers for E2E tests.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use vigil_alerts::{
    AlertError, AlertRule, AlertService, AlertType, ChannelRegistry, ComparisonOperator,
    Condition, Context, ContextProvider, DispatchConfig, EmailChannel, EngineConfig,
    InAppChannel, ManualClock, Notification, NotificationChannel, NotificationResult,
    ProviderRegistry, RuleId, StaticContextProvider, StaticTenantDirectory, TenantId,
};

/// Per-channel deadline used by every harness.
pub const CHANNEL_TIMEOUT_MS: u64 = 2_000;

/// How a scripted channel answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Accept,
    Reject,
    Error,
    Hang,
}

/// A channel whose answer is chosen by the test.
#[derive(Debug)]
pub struct ScriptedChannel {
    name: String,
    behaviour: Mutex<Behaviour>,
    sent: Mutex<Vec<Notification>>,
}

impl ScriptedChannel {
    pub fn new(name: &str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behaviour: Mutex::new(behaviour),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set(&self, behaviour: Behaviour) {
        *self.behaviour.lock() = behaviour;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

impl NotificationChannel for ScriptedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(
        &'a self,
        notification: &'a Notification,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = vigil_alerts::Result<NotificationResult>> + Send + 'a>> {
        Box::pin(async move {
            self.sent.lock().push(notification.clone());
            let behaviour = *self.behaviour.lock();
            match behaviour {
                Behaviour::Accept => Ok(NotificationResult::success(&self.name)),
                Behaviour::Reject => Ok(NotificationResult::failure(&self.name, "HTTP 503")),
                Behaviour::Error => Err(AlertError::NotificationFailed {
                    reason: "connection refused".to_string(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(NotificationResult::success(&self.name))
                }
            }
        })
    }
}

/// Serves another provider's contexts after a fixed delay.
pub struct DelayedProvider {
    inner: Arc<StaticContextProvider>,
    delay: Duration,
}

impl ContextProvider for DelayedProvider {
    fn fetch<'a>(
        &'a self,
        tenant_id: &'a TenantId,
    ) -> Pin<Box<dyn Future<Output = vigil_alerts::Result<Context>> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.fetch(tenant_id).await
        })
    }
}

/// A fully wired in-memory alerting stack with a frozen clock.
pub struct Harness {
    pub service: Arc<AlertService>,
    pub clock: ManualClock,
    pub weather: Arc<StaticContextProvider>,
    pub sales: Arc<StaticContextProvider>,
    pub channels: Arc<ChannelRegistry>,
    pub tenants: Arc<StaticTenantDirectory>,
    pub in_app: Arc<InAppChannel>,
}

impl Harness {
    /// Builds a stack with `email` and `in_app` channels registered.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Like [`Harness::new`], but weather contexts take `delay` to arrive.
    pub fn with_weather_delay(delay: Duration) -> Self {
        Self::build(Some(delay))
    }

    fn build(weather_delay: Option<Duration>) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap());

        let weather = Arc::new(StaticContextProvider::new());
        let sales = Arc::new(StaticContextProvider::new());
        let providers = Arc::new(ProviderRegistry::new());
        match weather_delay {
            Some(delay) => providers.register(
                AlertType::Weather,
                Arc::new(DelayedProvider {
                    inner: weather.clone(),
                    delay,
                }),
            ),
            None => providers.register(AlertType::Weather, weather.clone()),
        }
        providers.register(AlertType::Sales, sales.clone());

        let in_app = Arc::new(InAppChannel::new("in_app"));
        let channels = Arc::new(ChannelRegistry::new());
        channels.register(Arc::new(EmailChannel::new(
            "email",
            vec!["ops@acme.test".to_string()],
            "vigil@acme.test",
        )));
        channels.register(in_app.clone());

        let tenants = Arc::new(StaticTenantDirectory::new());

        let service = Arc::new(AlertService::in_memory(
            providers,
            channels.clone(),
            tenants.clone(),
            Arc::new(clock.clone()),
            EngineConfig::default(),
            DispatchConfig {
                channel_timeout_ms: CHANNEL_TIMEOUT_MS,
            },
        ));

        Self {
            service,
            clock,
            weather,
            sales,
            channels,
            tenants,
            in_app,
        }
    }

    /// Registers a tenant by display name.
    pub fn tenant(&self, name: &str) -> TenantId {
        let tenant = TenantId::new();
        self.tenants.insert(tenant, name);
        tenant
    }

    /// Registers a scripted channel.
    pub fn scripted(&self, name: &str, behaviour: Behaviour) -> Arc<ScriptedChannel> {
        let channel = ScriptedChannel::new(name, behaviour);
        self.channels.register(channel.clone());
        channel
    }

    /// Sets a tenant's temperature reading.
    pub fn set_temperature(&self, tenant: TenantId, celsius: i64) {
        self.weather.set_value(tenant, "temperature", celsius);
    }

    /// Moves the clock forward by whole minutes.
    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }

    /// Stores a heat rule (`temperature > 35`) for `tenant`.
    pub fn heat_rule(&self, tenant: TenantId, channels: &[&str]) -> AlertRule {
        let mut builder = AlertRule::builder(tenant, "Heat warning", AlertType::Weather)
            .condition(
                Condition::threshold("temperature", ComparisonOperator::GreaterThan, 35.0)
                    .unwrap(),
            )
            .message_template("Heat at {tenant_name}: {temperature}C")
            .cooldown_minutes(60);
        for channel in channels {
            builder = builder.channel(*channel);
        }
        self.service.create_rule(builder.build().unwrap()).unwrap()
    }

    /// Reloads a rule from the repository.
    pub fn rule(&self, tenant: &TenantId, id: &RuleId) -> AlertRule {
        self.service.get_rule(tenant, id).unwrap()
    }
}

//! Multi-tenant condition-based alerting.
//!
//! `vigil-alerts` watches per-tenant business metrics (weather readings, sales
//! aggregates), evaluates threshold rules against them, and notifies through
//! several channels while keeping each rule to one alert per cooldown window.
//!
//! # Components
//!
//! - **Conditions**: a closed operator set ([`ComparisonOperator`]) validated
//!   when a rule is built, evaluated by the pure [`evaluate`] function
//! - **Cooldowns**: [`CooldownTracker`], a sharded map with an atomic
//!   check-and-set per rule
//! - **Engine**: [`RuleEngine::scan`] runs one single-flight pass per tenant
//!   and emits [`TriggerDecision`]s
//! - **Dispatch**: [`Dispatcher`] formats the message, stores the [`Alert`]
//!   and fans out to every channel with its own timeout
//! - **Lifecycle**: [`LifecycleManager`] owns acknowledge, resolve, expiry
//!   and failure, writing one [`AlertHistory`] row per transition
//! - **Service**: [`AlertService`] is the administrative surface and
//!   [`Scheduler`] drives it on a fixed cadence
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use vigil_alerts::{
//!     evaluate, AlertRule, AlertType, ComparisonOperator, Condition, Context, TenantId,
//! };
//!
//! let tenant = TenantId::new();
//! let rule = AlertRule::builder(tenant, "Heat warning", AlertType::Weather)
//!     .condition(Condition::threshold("temperature", ComparisonOperator::GreaterThan, 35.0).unwrap())
//!     .channel("email")
//!     .cooldown_minutes(60)
//!     .build()
//!     .unwrap();
//!
//! let mut context = Context::new();
//! context.insert("temperature".to_string(), json!(38));
//! assert!(evaluate(&rule.conditions, rule.logic, &context));
//! ```
//!
//! # Wiring a service
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vigil_alerts::*;
//!
//! let providers = Arc::new(ProviderRegistry::new());
//! providers.register(AlertType::Weather, Arc::new(StaticContextProvider::new()));
//! let channels = Arc::new(ChannelRegistry::new());
//! channels.register(Arc::new(LogChannel::default()));
//!
//! let service = AlertService::in_memory(
//!     providers,
//!     channels,
//!     Arc::new(StaticTenantDirectory::new()),
//!     Arc::new(SystemClock),
//!     EngineConfig::default(),
//!     DispatchConfig::default(),
//! );
//! let outcome = service.run_scan(&tenant).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod clock;
pub mod condition;
pub mod cooldown;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod formatter;
pub mod lifecycle;
pub mod provider;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use channels::{
    ChannelRegistry, EmailChannel, InAppChannel, LogChannel, LoggingTransport, Notification,
    NotificationChannel, NotificationResult, WebhookChannel, WebhookConfig, WebhookPayload,
    WebhookTransport,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::{ComparisonOperator, Condition, ConditionSpec, Predicate};
pub use cooldown::CooldownTracker;
pub use dispatcher::{DispatchConfig, Dispatcher, ManualAlert};
pub use engine::{EngineConfig, RuleEngine, RuleEvaluation, ScanReport, SkipReason, TriggerDecision};
pub use error::{AlertError, Result};
pub use evaluator::{evaluate, evaluate_condition};
pub use formatter::{MessageFormatter, MessageMeta, StaticTenantDirectory, TenantDirectory};
pub use lifecycle::LifecycleManager;
pub use provider::{
    ContextProvider, ProviderRegistry, SalesSnapshot, StaticContextProvider, WeatherSnapshot,
};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use service::{AlertService, RuleTestOutcome, RuleUpdate, ScanOutcome};
pub use store::{
    AlertQuery, AlertStore, HistoryQuery, InMemoryAlertStore, InMemoryRuleRepository, Page,
    RuleFilter, RuleRepository,
};
pub use types::{
    Alert, AlertHistory, AlertId, AlertRule, AlertRuleBuilder, AlertStatus, AlertType, ChannelId,
    ConditionLogic, Context, DeliveryOutcome, HistoryEvent, HistoryId, Priority, RuleId,
    TenantId,
};

//! Data context providers.
//!
//! One [`ContextProvider`] per [`AlertType`] produces the map of current
//! metric values a rule is evaluated against. A metric that is unavailable is
//! omitted from the map rather than set to `null`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{AlertError, Result};
use crate::types::{AlertType, Context, TenantId};

/// Produces the evaluation context for one alert type.
pub trait ContextProvider: Send + Sync {
    /// Returns the current context for `tenant_id`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ProviderFailed` if the data cannot be read.
    fn fetch<'a>(
        &'a self,
        tenant_id: &'a TenantId,
    ) -> Pin<Box<dyn Future<Output = Result<Context>> + Send + 'a>>;
}

/// Providers keyed by the alert type they serve.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<AlertType, Arc<dyn ContextProvider>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<AlertType> = self.providers.read().keys().copied().collect();
        types.sort();
        f.debug_struct("ProviderRegistry").field("types", &types).finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` for `alert_type`, replacing any previous one.
    pub fn register(&self, alert_type: AlertType, provider: Arc<dyn ContextProvider>) {
        self.providers.write().insert(alert_type, provider);
    }

    /// Returns the provider for `alert_type`.
    #[must_use]
    pub fn get(&self, alert_type: AlertType) -> Option<Arc<dyn ContextProvider>> {
        self.providers.read().get(&alert_type).cloned()
    }

    /// Fetches a tenant's context for `alert_type`, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderNotRegistered`, `Timeout` or the provider's own error.
    pub async fn fetch(
        &self,
        tenant_id: &TenantId,
        alert_type: AlertType,
        timeout: Duration,
    ) -> Result<Context> {
        let provider = self.get(alert_type).ok_or_else(|| AlertError::ProviderNotRegistered {
            alert_type: alert_type.to_string(),
        })?;

        match tokio::time::timeout(timeout, provider.fetch(tenant_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%tenant_id, %alert_type, timeout_ms = timeout.as_millis(), "context provider timed out");
                Err(AlertError::Timeout {
                    operation: format!("context provider {alert_type}"),
                    millis: timeout.as_millis(),
                })
            }
        }
    }
}

/// A provider serving contexts held in memory, per tenant.
///
/// Tenants without a context get an empty map.
#[derive(Debug, Default)]
pub struct StaticContextProvider {
    contexts: RwLock<HashMap<TenantId, Context>>,
}

impl StaticContextProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a tenant's context.
    pub fn set(&self, tenant_id: TenantId, context: Context) {
        self.contexts.write().insert(tenant_id, context);
    }

    /// Sets one value in a tenant's context.
    pub fn set_value(&self, tenant_id: TenantId, field: impl Into<String>, value: impl Into<Value>) {
        self.contexts
            .write()
            .entry(tenant_id)
            .or_default()
            .insert(field.into(), value.into());
    }

    /// Removes a tenant's context.
    pub fn clear(&self, tenant_id: &TenantId) {
        self.contexts.write().remove(tenant_id);
    }
}

impl ContextProvider for StaticContextProvider {
    fn fetch<'a>(
        &'a self,
        tenant_id: &'a TenantId,
    ) -> Pin<Box<dyn Future<Output = Result<Context>> + Send + 'a>> {
        let context = self.contexts.read().get(tenant_id).cloned().unwrap_or_default();
        Box::pin(async move { Ok(context) })
    }
}

fn insert_some(context: &mut Context, key: &str, value: Option<f64>) {
    if let Some(v) = value.filter(|v| v.is_finite()) {
        context.insert(key.to_string(), json!(v));
    }
}

/// The latest weather reading for a tenant's location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    /// Degrees Celsius.
    pub temperature: Option<f64>,
    /// Millimetres.
    pub precipitation: Option<f64>,
    /// Percent.
    pub humidity: Option<f64>,
    /// Km/h.
    pub wind_speed: Option<f64>,
}

impl WeatherSnapshot {
    /// Converts the reading to a context, omitting missing values.
    #[must_use]
    pub fn to_context(&self) -> Context {
        let mut context = Context::new();
        insert_some(&mut context, "temperature", self.temperature);
        insert_some(&mut context, "precipitation", self.precipitation);
        insert_some(&mut context, "humidity", self.humidity);
        insert_some(&mut context, "wind_speed", self.wind_speed);
        context
    }
}

/// Latest sales against the rolling average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalesSnapshot {
    /// Revenue of the most recent day.
    pub current_sales: f64,
    /// Average daily revenue over the window.
    pub average_sales: f64,
}

impl SalesSnapshot {
    /// Days in the rolling window used by [`SalesSnapshot::from_window`].
    pub const WINDOW_DAYS: usize = 30;

    /// Builds a snapshot from the latest revenue and the daily revenues of the
    /// window. An empty window averages to 0.
    #[must_use]
    pub fn from_window(current_sales: f64, window: &[f64]) -> Self {
        let recent = &window[window.len().saturating_sub(Self::WINDOW_DAYS)..];
        #[allow(clippy::cast_precision_loss)]
        let average_sales = if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<f64>() / recent.len() as f64
        };
        Self {
            current_sales,
            average_sales,
        }
    }

    /// Percent distance from the average. The divisor is 1 when the average is 0.
    #[must_use]
    pub fn deviation(&self) -> f64 {
        let divisor = if self.average_sales == 0.0 { 1.0 } else { self.average_sales };
        (self.current_sales - self.average_sales).abs() / divisor * 100.0
    }

    /// Converts the snapshot to a context.
    #[must_use]
    pub fn to_context(&self) -> Context {
        let mut context = Context::new();
        insert_some(&mut context, "current_sales", Some(self.current_sales));
        insert_some(&mut context, "average_sales", Some(self.average_sales));
        insert_some(&mut context, "deviation", Some(self.deviation()));
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider;

    impl ContextProvider for SlowProvider {
        fn fetch<'a>(
            &'a self,
            _tenant_id: &'a TenantId,
        ) -> Pin<Box<dyn Future<Output = Result<Context>> + Send + 'a>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Context::new())
            })
        }
    }

    #[test]
    fn weather_snapshot_omits_missing_values() {
        let snapshot = WeatherSnapshot {
            temperature: Some(38.0),
            humidity: Some(20.0),
            ..WeatherSnapshot::default()
        };
        let context = snapshot.to_context();
        assert_eq!(context.len(), 2);
        assert_eq!(context["temperature"], json!(38.0));
        assert!(!context.contains_key("precipitation"));
    }

    #[test]
    fn sales_deviation() {
        let snapshot = SalesSnapshot::from_window(150.0, &[100.0, 100.0, 100.0]);
        assert!((snapshot.average_sales - 100.0).abs() < f64::EPSILON);
        assert!((snapshot.deviation() - 50.0).abs() < 1e-9);

        let context = snapshot.to_context();
        assert_eq!(context["deviation"], json!(50.0));
    }

    #[test]
    fn sales_deviation_with_zero_average() {
        let snapshot = SalesSnapshot::from_window(7.0, &[]);
        assert!((snapshot.deviation() - 700.0).abs() < 1e-9);
    }

    #[test]
    fn sales_window_uses_last_thirty_days() {
        let mut window = vec![1000.0; 10];
        window.extend(std::iter::repeat_n(10.0, 30));
        let snapshot = SalesSnapshot::from_window(10.0, &window);
        assert!((snapshot.average_sales - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn static_provider_is_tenant_scoped() {
        let provider = StaticContextProvider::new();
        let a = TenantId::new();
        let b = TenantId::new();
        provider.set_value(a, "temperature", 38);

        assert_eq!(provider.fetch(&a).await.unwrap()["temperature"], json!(38));
        assert!(provider.fetch(&b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn registry_reports_missing_provider() {
        let registry = ProviderRegistry::new();
        let err = registry
            .fetch(&TenantId::new(), AlertType::Sales, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::ProviderNotRegistered { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn registry_times_out_slow_provider() {
        let registry = ProviderRegistry::new();
        registry.register(AlertType::Weather, Arc::new(SlowProvider));
        let err = registry
            .fetch(&TenantId::new(), AlertType::Weather, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Timeout { millis: 50, .. }));
    }
}

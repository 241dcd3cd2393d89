//! Context providers backed by JSON files.
//!
//! Each provider serves one alert type and reads
//! `<root>/<tenant_id>/<type>.json` on every fetch. The file holds a JSON
//! object; `null` members are dropped so a missing reading stays missing.
//!
//! A sales file may carry `daily_sales` (oldest first) instead of precomputed
//! figures; `average_sales` and `deviation` are then derived from the last
//! thirty days.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde_json::Value;
use tracing::debug;
use vigil_alerts::{AlertError, AlertType, Context, ContextProvider, SalesSnapshot, TenantId};

/// Reads a tenant's context for one alert type from disk.
#[derive(Debug, Clone)]
pub struct FileContextProvider {
    root: PathBuf,
    alert_type: AlertType,
}

impl FileContextProvider {
    /// Creates a provider reading under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, alert_type: AlertType) -> Self {
        Self {
            root: root.into(),
            alert_type,
        }
    }

    /// Returns the file read for `tenant_id`.
    #[must_use]
    pub fn path_for(&self, tenant_id: &TenantId) -> PathBuf {
        self.root
            .join(tenant_id.to_string())
            .join(format!("{}.json", self.alert_type.as_str()))
    }

    fn failed(&self, reason: String) -> AlertError {
        AlertError::ProviderFailed {
            alert_type: self.alert_type.to_string(),
            reason,
        }
    }

    /// Parses file content into a context.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ProviderFailed` unless the content is a JSON object.
    pub fn parse(&self, content: &str) -> Result<Context, AlertError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| self.failed(format!("invalid JSON: {e}")))?;
        let Value::Object(object) = value else {
            return Err(self.failed("context file must hold a JSON object".to_string()));
        };

        let mut context: Context = object.into_iter().filter(|(_, v)| !v.is_null()).collect();
        if self.alert_type == AlertType::Sales {
            derive_sales(&mut context);
        }
        Ok(context)
    }

    async fn read(&self, path: &Path) -> Result<String, AlertError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| self.failed(format!("cannot read {}: {e}", path.display())))
    }
}

fn derive_sales(context: &mut Context) {
    let Some(Value::Array(days)) = context.remove("daily_sales") else {
        return;
    };
    let window: Vec<f64> = days.iter().filter_map(Value::as_f64).collect();
    let current = context
        .get("current_sales")
        .and_then(Value::as_f64)
        .or_else(|| window.last().copied());
    let Some(current) = current else {
        return;
    };
    for (key, value) in SalesSnapshot::from_window(current, &window).to_context() {
        context.entry(key).or_insert(value);
    }
}

impl ContextProvider for FileContextProvider {
    fn fetch<'a>(
        &'a self,
        tenant_id: &'a TenantId,
    ) -> Pin<Box<dyn Future<Output = vigil_alerts::Result<Context>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.path_for(tenant_id);
            let content = self.read(&path).await?;
            let context = self.parse(&content)?;
            debug!(%tenant_id, alert_type = %self.alert_type, fields = context.len(), "context loaded");
            Ok(context)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_layout() {
        let provider = FileContextProvider::new("/data", AlertType::Weather);
        let tenant = TenantId::new();
        assert_eq!(
            provider.path_for(&tenant),
            PathBuf::from(format!("/data/{tenant}/weather.json"))
        );
    }

    #[test]
    fn test_nulls_are_dropped() {
        let provider = FileContextProvider::new("/data", AlertType::Weather);
        let context = provider
            .parse(r#"{"temperature": 38.5, "humidity": null}"#)
            .unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context["temperature"], json!(38.5));
    }

    #[test]
    fn test_non_object_is_rejected() {
        let provider = FileContextProvider::new("/data", AlertType::Weather);
        let err = provider.parse("[1, 2]").unwrap_err();
        assert!(matches!(err, AlertError::ProviderFailed { .. }));
    }

    #[test]
    fn test_sales_window_is_derived() {
        let provider = FileContextProvider::new("/data", AlertType::Sales);
        let context = provider
            .parse(r#"{"current_sales": 150, "daily_sales": [100, 100, 100]}"#)
            .unwrap();
        assert_eq!(context["current_sales"], json!(150));
        assert_eq!(context["average_sales"], json!(100.0));
        assert_eq!(context["deviation"], json!(50.0));
        assert!(!context.contains_key("daily_sales"));
    }

    #[tokio::test]
    async fn test_fetch_reads_tenant_file() {
        let dir = tempfile::tempdir().unwrap();
        let tenant = TenantId::new();
        let provider = FileContextProvider::new(dir.path(), AlertType::Weather);
        let path = provider.path_for(&tenant);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"temperature": 38}"#).unwrap();

        let context = provider.fetch(&tenant).await.unwrap();
        assert_eq!(context["temperature"], json!(38));

        let other = provider.fetch(&TenantId::new()).await.unwrap_err();
        assert!(matches!(other, AlertError::ProviderFailed { .. }));
    }
}

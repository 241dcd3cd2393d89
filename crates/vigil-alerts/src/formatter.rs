//! Message template rendering.
//!
//! Templates use `{name}` placeholders. Before substitution the formatter
//! injects `timestamp` (UTC, `%Y-%m-%d %H:%M`) and `tenant_name`, plus
//! `priority`, `alert_type` and `value` when the context does not already
//! carry them. Placeholders left without a value are removed.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::warn;

use crate::evaluator::text;
use crate::types::{AlertType, Context, Priority, TenantId};

static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}").unwrap_or_else(|_| unreachable!()));

/// Format of the injected `timestamp` placeholder.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Name used when the tenant directory has no entry.
pub const FALLBACK_TENANT_NAME: &str = "Tenant";

/// Placeholders every template may use regardless of the rule's context.
pub const BUILTIN_PLACEHOLDERS: [&str; 5] =
    ["timestamp", "tenant_name", "priority", "alert_type", "value"];

/// Returns the message template used when a rule is created without one.
#[must_use]
pub const fn default_template(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::Weather => {
            "Weather alert for {tenant_name}: temperature {temperature}, \
             precipitation {precipitation} at {timestamp}"
        }
        AlertType::Sales => {
            "Sales anomaly for {tenant_name}: current {current_sales}, \
             average {average_sales}, deviation {deviation}%"
        }
        AlertType::Prediction => "Forecast impact for {tenant_name}: {value}% expected ({timestamp})",
        AlertType::Operational => "Operational alert ({priority}) for {tenant_name}: {value}",
        AlertType::Custom => "Alert ({alert_type}) for {tenant_name}: {value}",
    }
}

/// Returns every placeholder name in `template`, in order of appearance.
#[must_use]
pub fn placeholders(template: &str) -> Vec<&str> {
    PLACEHOLDER_REGEX
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Substitutes `{name}` placeholders from `vars`, removing unknown ones.
#[must_use]
pub fn render(template: &str, vars: &HashMap<&str, Cow<'_, str>>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures<'_>| {
            vars.get(&caps[1]).map_or_else(String::new, ToString::to_string)
        })
        .into_owned()
}

/// Resolves a tenant id to its display name.
pub trait TenantDirectory: Send + Sync {
    /// Returns the tenant's display name, if known.
    fn tenant_name(&self, tenant_id: &TenantId) -> Option<String>;
}

/// An in-memory [`TenantDirectory`].
#[derive(Debug, Default)]
pub struct StaticTenantDirectory {
    names: RwLock<HashMap<TenantId, String>>,
}

impl StaticTenantDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tenant's display name.
    pub fn insert(&self, tenant_id: TenantId, name: impl Into<String>) {
        self.names.write().insert(tenant_id, name.into());
    }
}

impl TenantDirectory for StaticTenantDirectory {
    fn tenant_name(&self, tenant_id: &TenantId) -> Option<String> {
        self.names.read().get(tenant_id).cloned()
    }
}

/// Values injected into every rendered message.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    /// The alert's type.
    pub alert_type: AlertType,
    /// The alert's priority.
    pub priority: Priority,
    /// The value that triggered the alert.
    pub value: Option<Value>,
    /// Render time.
    pub at: DateTime<Utc>,
}

/// Renders rule templates for a tenant.
#[derive(Clone)]
pub struct MessageFormatter {
    tenants: Arc<dyn TenantDirectory>,
}

impl std::fmt::Debug for MessageFormatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageFormatter").finish_non_exhaustive()
    }
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new(Arc::new(StaticTenantDirectory::new()))
    }
}

impl MessageFormatter {
    /// Creates a formatter resolving tenant names through `tenants`.
    #[must_use]
    pub fn new(tenants: Arc<dyn TenantDirectory>) -> Self {
        Self { tenants }
    }

    /// Returns the tenant's display name, or [`FALLBACK_TENANT_NAME`].
    #[must_use]
    pub fn tenant_name(&self, tenant_id: &TenantId) -> String {
        self.tenants
            .tenant_name(tenant_id)
            .unwrap_or_else(|| FALLBACK_TENANT_NAME.to_string())
    }

    /// Renders `template` against `context` for `tenant_id`.
    ///
    /// `timestamp` and `tenant_name` always come from the formatter. The other
    /// injected values only fill gaps in `context`.
    #[must_use]
    pub fn format(
        &self,
        template: &str,
        tenant_id: &TenantId,
        meta: &MessageMeta,
        context: &Context,
    ) -> String {
        let mut vars: HashMap<&str, Cow<'_, str>> = context
            .iter()
            .map(|(k, v)| (k.as_str(), Cow::Owned(text(v))))
            .collect();

        vars.entry("priority").or_insert(Cow::Borrowed(meta.priority.as_str()));
        vars.entry("alert_type").or_insert(Cow::Borrowed(meta.alert_type.as_str()));
        if let Some(value) = &meta.value {
            vars.entry("value").or_insert_with(|| Cow::Owned(text(value)));
        }
        vars.insert(
            "timestamp",
            Cow::Owned(meta.at.format(TIMESTAMP_FORMAT).to_string()),
        );
        vars.insert("tenant_name", Cow::Owned(self.tenant_name(tenant_id)));

        render(template, &vars)
    }

    /// Logs a warning for each placeholder that is neither built in nor in
    /// `known_fields`. Returns the unknown names.
    pub fn check_template<'t>(&self, template: &'t str, known_fields: &[&str]) -> Vec<&'t str> {
        let unknown: Vec<&str> = placeholders(template)
            .into_iter()
            .filter(|p| !BUILTIN_PLACEHOLDERS.contains(p) && !known_fields.contains(p))
            .collect();
        for placeholder in &unknown {
            warn!(placeholder, "template placeholder has no known source and will render empty");
        }
        unknown
    }
}

//! Rule evaluation engine.
//!
//! One [`RuleEngine::scan`] pass loads a tenant's active rules, skips those in
//! cooldown, fetches each needed context once, evaluates, and emits a
//! [`TriggerDecision`] for every rule that matched. The cooldown is claimed
//! atomically before the decision leaves the engine, so a rule produces at
//! most one decision per cooldown window whatever happens downstream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::cooldown::CooldownTracker;
use crate::error::{AlertError, Result};
use crate::evaluator::evaluate;
use crate::provider::ProviderRegistry;
use crate::store::RuleRepository;
use crate::types::{AlertRule, AlertType, Context, RuleId, TenantId};

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for one context provider call, in milliseconds.
    pub provider_timeout_ms: u64,
    /// Also treat a rule as cooling down while `last_triggered + cooldown`
    /// is in the future, even if the in-memory tracker has no entry.
    pub check_last_triggered: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 5_000,
            check_last_triggered: true,
        }
    }
}

impl EngineConfig {
    /// Returns the provider timeout.
    #[must_use]
    pub const fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

/// A rule whose conditions held and which claimed its cooldown.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDecision {
    /// The rule as loaded for this scan.
    pub rule: AlertRule,
    /// The context it was evaluated against.
    pub context: Context,
    /// Value of the first condition's field.
    pub trigger_value: Option<Value>,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// Why a rule did not produce a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The rule is inactive.
    Inactive,
    /// The rule triggered recently.
    CoolingDown {
        /// When the cooldown ends.
        until: DateTime<Utc>,
    },
    /// The context could not be fetched.
    ProviderFailed {
        /// What went wrong.
        error: String,
    },
    /// The conditions did not hold.
    ConditionsNotMet,
}

/// Outcome of one scan pass.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Active rules considered.
    pub rules_considered: usize,
    /// Rules that matched and claimed their cooldown.
    pub decisions: Vec<TriggerDecision>,
    /// Rules that did not, and why.
    pub skipped: Vec<(RuleId, SkipReason)>,
}

impl ScanReport {
    /// Returns how many rules were skipped for `pred`.
    #[must_use]
    pub fn skipped_count(&self, pred: impl Fn(&SkipReason) -> bool) -> usize {
        self.skipped.iter().filter(|(_, r)| pred(r)).count()
    }
}

/// Result of evaluating one rule without side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvaluation {
    /// Whether the conditions held.
    pub conditions_met: bool,
    /// What would have stopped a real scan from triggering.
    pub blocked_by: Option<SkipReason>,
    /// The context used.
    pub context: Context,
    /// Value of the first condition's field.
    pub trigger_value: Option<Value>,
}

impl RuleEvaluation {
    /// True if a scan would have triggered the rule.
    #[must_use]
    pub const fn would_trigger(&self) -> bool {
        self.conditions_met && self.blocked_by.is_none()
    }
}

/// Removes the tenant from the in-flight set when the scan ends or is dropped.
struct ScanGuard<'a> {
    in_flight: &'a Mutex<HashSet<TenantId>>,
    tenant_id: TenantId,
}

impl<'a> ScanGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<TenantId>>, tenant_id: TenantId) -> Result<Self> {
        if !in_flight.lock().insert(tenant_id) {
            return Err(AlertError::ScanInProgress {
                tenant: tenant_id.to_string(),
            });
        }
        Ok(Self {
            in_flight,
            tenant_id,
        })
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.tenant_id);
    }
}

/// Evaluates a tenant's rules against fresh context.
pub struct RuleEngine {
    rules: Arc<dyn RuleRepository>,
    providers: Arc<ProviderRegistry>,
    cooldowns: Arc<CooldownTracker>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    in_flight: Mutex<HashSet<TenantId>>,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

impl RuleEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        providers: Arc<ProviderRegistry>,
        cooldowns: Arc<CooldownTracker>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            rules,
            providers,
            cooldowns,
            clock,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the cooldown tracker.
    #[must_use]
    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    /// Returns true while a scan for `tenant_id` is running.
    #[must_use]
    pub fn is_scanning(&self, tenant_id: &TenantId) -> bool {
        self.in_flight.lock().contains(tenant_id)
    }

    /// Returns when the rule's cooldown ends, from the tracker or, if enabled,
    /// from the durable `last_triggered`.
    fn cooling_until(&self, rule: &AlertRule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.cooldowns.is_cooling_down(&rule.id, now) {
            return self.cooldowns.cooling_until(&rule.id, now);
        }
        if self.config.check_last_triggered {
            return rule.cooldown_until().filter(|until| now < *until);
        }
        None
    }

    /// Fetches one context per alert type concurrently.
    async fn fetch_contexts(
        &self,
        tenant_id: &TenantId,
        types: impl IntoIterator<Item = AlertType>,
    ) -> HashMap<AlertType, Result<Context>> {
        let timeout = self.config.provider_timeout();
        let fetches = types.into_iter().map(|alert_type| async move {
            let result = self.providers.fetch(tenant_id, alert_type, timeout).await;
            (alert_type, result)
        });
        join_all(fetches).await.into_iter().collect()
    }

    /// Runs one scan pass for `tenant_id`.
    ///
    /// Provider failures and cooldowns are reported per rule in the returned
    /// [`ScanReport`]; they never fail the scan. Dropping the future cancels
    /// the pass. Cooldowns already claimed stay claimed.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ScanInProgress` if a scan for the tenant is already
    /// running, or a store error if the rules cannot be loaded.
    pub async fn scan(&self, tenant_id: &TenantId) -> Result<ScanReport> {
        let _guard = ScanGuard::acquire(&self.in_flight, *tenant_id)?;
        let now = self.clock.now();
        let rules = self.rules.list_active_rules(tenant_id, None)?;

        let mut report = ScanReport {
            rules_considered: rules.len(),
            ..ScanReport::default()
        };

        let mut eligible = Vec::with_capacity(rules.len());
        for rule in rules {
            if !rule.is_active {
                report.skipped.push((rule.id, SkipReason::Inactive));
                continue;
            }
            if let Some(until) = self.cooling_until(&rule, now) {
                debug!(%tenant_id, rule_id = %rule.id, %until, "rule cooling down, skipped");
                report.skipped.push((rule.id, SkipReason::CoolingDown { until }));
                continue;
            }
            eligible.push(rule);
        }

        let types: HashSet<AlertType> = eligible.iter().map(|r| r.alert_type).collect();
        let contexts = self.fetch_contexts(tenant_id, types).await;

        for rule in eligible {
            let context = match contexts.get(&rule.alert_type) {
                Some(Ok(context)) => context,
                Some(Err(e)) => {
                    warn!(%tenant_id, rule_id = %rule.id, alert_type = %rule.alert_type, error = %e, "context unavailable, rule skipped");
                    report.skipped.push((rule.id, SkipReason::ProviderFailed { error: e.to_string() }));
                    continue;
                }
                None => continue,
            };

            if !evaluate(&rule.conditions, rule.logic, context) {
                report.skipped.push((rule.id, SkipReason::ConditionsNotMet));
                continue;
            }

            if !self.cooldowns.try_mark(rule.id, rule.cooldown_minutes, now) {
                let until = self.cooldowns.cooling_until(&rule.id, now).unwrap_or(now);
                debug!(%tenant_id, rule_id = %rule.id, "cooldown claimed concurrently, skipped");
                report.skipped.push((rule.id, SkipReason::CoolingDown { until }));
                continue;
            }

            info!(%tenant_id, rule_id = %rule.id, rule = %rule.name, "rule conditions met");
            report.decisions.push(TriggerDecision {
                trigger_value: first_condition_value(&rule, context),
                context: context.clone(),
                rule,
                decided_at: now,
            });
        }

        debug!(
            %tenant_id,
            considered = report.rules_considered,
            triggered = report.decisions.len(),
            "scan complete"
        );
        Ok(report)
    }

    /// Evaluates `rule` without claiming a cooldown or dispatching.
    ///
    /// With `context_override` the provider is not called.
    ///
    /// # Errors
    ///
    /// Never fails for provider errors; those are reported in `blocked_by`.
    pub async fn dry_run(
        &self,
        rule: &AlertRule,
        context_override: Option<Context>,
    ) -> Result<RuleEvaluation> {
        let now = self.clock.now();
        let mut blocked_by = if rule.is_active {
            self.cooling_until(rule, now)
                .map(|until| SkipReason::CoolingDown { until })
        } else {
            Some(SkipReason::Inactive)
        };

        let context = match context_override {
            Some(context) => context,
            None => match self
                .providers
                .fetch(&rule.tenant_id, rule.alert_type, self.config.provider_timeout())
                .await
            {
                Ok(context) => context,
                Err(e) => {
                    blocked_by.get_or_insert(SkipReason::ProviderFailed { error: e.to_string() });
                    Context::new()
                }
            },
        };

        let conditions_met = evaluate(&rule.conditions, rule.logic, &context);
        Ok(RuleEvaluation {
            conditions_met,
            blocked_by,
            trigger_value: first_condition_value(rule, &context),
            context,
        })
    }
}

fn first_condition_value(rule: &AlertRule, context: &Context) -> Option<Value> {
    rule.conditions
        .first()
        .and_then(|c| context.get(c.field()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::condition::{ComparisonOperator, Condition};
    use crate::provider::{ContextProvider, StaticContextProvider};
    use crate::store::InMemoryRuleRepository;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;

    struct FailingProvider;

    impl ContextProvider for FailingProvider {
        fn fetch<'a>(
            &'a self,
            _tenant_id: &'a TenantId,
        ) -> Pin<Box<dyn Future<Output = Result<Context>> + Send + 'a>> {
            Box::pin(async move {
                Err(AlertError::ProviderFailed {
                    alert_type: "sales".to_string(),
                    reason: "warehouse offline".to_string(),
                })
            })
        }
    }

    struct Fixture {
        engine: RuleEngine,
        repo: Arc<InMemoryRuleRepository>,
        weather: Arc<StaticContextProvider>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryRuleRepository::new());
        let providers = Arc::new(ProviderRegistry::new());
        let weather = Arc::new(StaticContextProvider::new());
        providers.register(AlertType::Weather, weather.clone());
        providers.register(AlertType::Sales, Arc::new(FailingProvider));
        let clock = ManualClock::default();
        let engine = RuleEngine::new(
            repo.clone(),
            providers,
            Arc::new(CooldownTracker::new()),
            Arc::new(clock.clone()),
            EngineConfig::default(),
        );
        Fixture {
            engine,
            repo,
            weather,
            clock,
        }
    }

    fn heat_rule(tenant: TenantId) -> AlertRule {
        AlertRule::builder(tenant, "Heat warning", AlertType::Weather)
            .condition(Condition::threshold("temperature", ComparisonOperator::GreaterThan, 35.0).unwrap())
            .channel("email")
            .cooldown_minutes(60)
            .build()
            .unwrap()
    }

    fn sales_rule(tenant: TenantId) -> AlertRule {
        AlertRule::builder(tenant, "Sales drop", AlertType::Sales)
            .condition(Condition::threshold("deviation", ComparisonOperator::GreaterThan, 20.0).unwrap())
            .channel("email")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn matching_rule_emits_decision_and_claims_cooldown() {
        let f = fixture();
        let tenant = TenantId::new();
        let rule = heat_rule(tenant);
        f.repo.insert_rule(rule.clone()).unwrap();
        f.weather.set_value(tenant, "temperature", 38);

        let report = f.engine.scan(&tenant).await.unwrap();
        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.decisions[0].trigger_value, Some(json!(38)));
        assert!(f.engine.cooldowns().is_cooling_down(&rule.id, f.clock.now()));

        f.clock.advance(ChronoDuration::minutes(5));
        let report = f.engine.scan(&tenant).await.unwrap();
        assert!(report.decisions.is_empty());
        assert_eq!(report.skipped_count(|r| matches!(r, SkipReason::CoolingDown { .. })), 1);

        f.clock.advance(ChronoDuration::minutes(56));
        let report = f.engine.scan(&tenant).await.unwrap();
        assert_eq!(report.decisions.len(), 1);
    }

    #[tokio::test]
    async fn non_matching_rule_does_not_claim_cooldown() {
        let f = fixture();
        let tenant = TenantId::new();
        let rule = heat_rule(tenant);
        f.repo.insert_rule(rule.clone()).unwrap();
        f.weather.set_value(tenant, "temperature", 20);

        let report = f.engine.scan(&tenant).await.unwrap();
        assert!(report.decisions.is_empty());
        assert_eq!(report.skipped, vec![(rule.id, SkipReason::ConditionsNotMet)]);
        assert!(!f.engine.cooldowns().is_cooling_down(&rule.id, f.clock.now()));
    }

    #[tokio::test]
    async fn provider_failure_is_isolated_to_its_rules() {
        let f = fixture();
        let tenant = TenantId::new();
        f.repo.insert_rule(heat_rule(tenant)).unwrap();
        let sales = sales_rule(tenant);
        f.repo.insert_rule(sales.clone()).unwrap();
        f.weather.set_value(tenant, "temperature", 40);

        let report = f.engine.scan(&tenant).await.unwrap();
        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.decisions[0].rule.alert_type, AlertType::Weather);
        assert!(report.skipped.iter().any(|(id, r)| *id == sales.id
            && matches!(r, SkipReason::ProviderFailed { .. })));
    }

    #[tokio::test]
    async fn inactive_rules_are_not_evaluated() {
        let f = fixture();
        let tenant = TenantId::new();
        let mut rule = heat_rule(tenant);
        rule.is_active = false;
        f.repo.insert_rule(rule).unwrap();
        f.weather.set_value(tenant, "temperature", 40);

        let report = f.engine.scan(&tenant).await.unwrap();
        assert_eq!(report.rules_considered, 0);
        assert!(report.decisions.is_empty());
    }

    #[tokio::test]
    async fn durable_last_triggered_blocks_after_restart() {
        let f = fixture();
        let tenant = TenantId::new();
        let mut rule = heat_rule(tenant);
        rule.last_triggered = Some(f.clock.now() - ChronoDuration::minutes(10));
        f.repo.insert_rule(rule).unwrap();
        f.weather.set_value(tenant, "temperature", 40);

        let report = f.engine.scan(&tenant).await.unwrap();
        assert!(report.decisions.is_empty());
        assert_eq!(report.skipped_count(|r| matches!(r, SkipReason::CoolingDown { .. })), 1);
    }

    #[tokio::test]
    async fn overlapping_scan_for_same_tenant_is_rejected() {
        let f = fixture();
        let tenant = TenantId::new();
        let _held = ScanGuard::acquire(&f.engine.in_flight, tenant).unwrap();
        assert!(f.engine.is_scanning(&tenant));

        let err = f.engine.scan(&tenant).await.unwrap_err();
        assert!(matches!(err, AlertError::ScanInProgress { .. }));
        assert!(f.engine.scan(&TenantId::new()).await.is_ok());
    }

    #[tokio::test]
    async fn guard_is_released_after_scan() {
        let f = fixture();
        let tenant = TenantId::new();
        f.engine.scan(&tenant).await.unwrap();
        assert!(!f.engine.is_scanning(&tenant));
        f.engine.scan(&tenant).await.unwrap();
    }

    #[tokio::test]
    async fn tenants_do_not_see_each_others_context() {
        let f = fixture();
        let a = TenantId::new();
        let b = TenantId::new();
        f.repo.insert_rule(heat_rule(a)).unwrap();
        f.repo.insert_rule(heat_rule(b)).unwrap();
        f.weather.set_value(a, "temperature", 40);
        f.weather.set_value(b, "temperature", 20);

        assert_eq!(f.engine.scan(&a).await.unwrap().decisions.len(), 1);
        assert!(f.engine.scan(&b).await.unwrap().decisions.is_empty());
    }

    #[tokio::test]
    async fn dry_run_has_no_side_effects() {
        let f = fixture();
        let tenant = TenantId::new();
        let rule = heat_rule(tenant);
        f.repo.insert_rule(rule.clone()).unwrap();

        let ctx = Context::from([("temperature".to_string(), json!(39))]);
        let eval = f.engine.dry_run(&rule, Some(ctx)).await.unwrap();
        assert!(eval.conditions_met);
        assert!(eval.would_trigger());
        assert_eq!(eval.trigger_value, Some(json!(39)));
        assert!(!f.engine.cooldowns().is_cooling_down(&rule.id, f.clock.now()));
    }

    #[tokio::test]
    async fn dry_run_reports_blockers() {
        let f = fixture();
        let tenant = TenantId::new();
        let rule = sales_rule(tenant);
        let eval = f.engine.dry_run(&rule, None).await.unwrap();
        assert!(!eval.conditions_met);
        assert!(matches!(eval.blocked_by, Some(SkipReason::ProviderFailed { .. })));

        let mut inactive = heat_rule(tenant);
        inactive.is_active = false;
        let ctx = Context::from([("temperature".to_string(), json!(39))]);
        let eval = f.engine.dry_run(&inactive, Some(ctx)).await.unwrap();
        assert!(eval.conditions_met);
        assert!(!eval.would_trigger());
        assert_eq!(eval.blocked_by, Some(SkipReason::Inactive));
    }
}

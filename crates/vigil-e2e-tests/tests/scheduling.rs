//! End-to-end tests for scan scheduling and the node binary's wiring.
//!
//! These tests verify:
//! 1. Overlapping scans of one tenant are refused
//! 2. Different tenants scan concurrently
//! 3. The scheduler ticks until shutdown
//! 4. A node built from a JSON config reads context files and delivers

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::Harness;
use tokio::sync::watch;
use vigil_alerts::{
    AlertError, AlertQuery, AlertStatus, LoggingTransport, ManualClock, Scheduler,
    SchedulerConfig,
};
use vigil_node::config::NodeConfig;
use vigil_node::Node;

const PROVIDER_DELAY: Duration = Duration::from_secs(1);

#[tokio::test(start_paused = true)]
async fn test_overlapping_scans_of_one_tenant_are_refused() {
    let h = Harness::with_weather_delay(PROVIDER_DELAY);
    let tenant = h.tenant("Acme Farms");
    h.heat_rule(tenant, &["in_app"]);
    h.set_temperature(tenant, 38);

    let (first, second) = tokio::join!(h.service.run_scan(&tenant), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.service.run_scan(&tenant).await
    });

    assert_eq!(first.unwrap().alerts.len(), 1);
    let err = second.unwrap_err();
    assert!(matches!(err, AlertError::ScanInProgress { .. }));
    assert!(err.is_scan_in_progress());

    // The tenant is free again once the first scan is done.
    assert!(!h.service.engine().is_scanning(&tenant));
    assert!(h.service.run_scan(&tenant).await.unwrap().alerts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_different_tenants_scan_concurrently() {
    let h = Harness::with_weather_delay(PROVIDER_DELAY);
    let acme = h.tenant("Acme Farms");
    let globex = h.tenant("Globex Orchards");
    for tenant in [acme, globex] {
        h.heat_rule(tenant, &["in_app"]);
        h.set_temperature(tenant, 38);
    }

    let started = tokio::time::Instant::now();
    let (a, b) = tokio::join!(h.service.run_scan(&acme), h.service.run_scan(&globex));
    assert_eq!(a.unwrap().alerts.len(), 1);
    assert_eq!(b.unwrap().alerts.len(), 1);
    assert!(started.elapsed() < PROVIDER_DELAY * 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_scans_until_shutdown() {
    let h = Harness::new();
    let acme = h.tenant("Acme Farms");
    let globex = h.tenant("Globex Orchards");
    for tenant in [acme, globex] {
        h.heat_rule(tenant, &["in_app"]);
        h.set_temperature(tenant, 38);
    }

    let scheduler = Scheduler::new(
        Arc::clone(&h.service),
        SchedulerConfig {
            interval_secs: 60,
            sweep_expired: true,
            tenants: vec![acme, globex],
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    // First tick fires immediately, later ticks are held back by cooldowns.
    tokio::time::sleep(Duration::from_secs(150)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    for tenant in [acme, globex] {
        let alerts = h
            .service
            .list_alerts(&tenant, &AlertQuery::default())
            .unwrap();
        assert_eq!(alerts.total, 1);
    }
}

#[tokio::test]
async fn test_node_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let context_dir = dir.path().join("context");

    let mut config = NodeConfig::sample();
    config.context_dir.clone_from(&context_dir);
    let config_path = dir.path().join("vigil.json");
    config.save(&config_path).unwrap();

    let loaded = NodeConfig::load(&config_path).unwrap();
    assert_eq!(loaded.tenants.len(), config.tenants.len());
    assert_eq!(loaded.rules.len(), config.rules.len());

    let seed = &loaded.rules[0];
    let tenant_dir = context_dir.join(seed.tenant_id.to_string());
    std::fs::create_dir_all(&tenant_dir).unwrap();
    std::fs::write(
        tenant_dir.join(format!("{}.json", seed.alert_type.as_str())),
        serde_json::to_string(&hot_context(seed)).unwrap(),
    )
    .unwrap();

    let node = Node::build_with(
        &loaded,
        Arc::new(LoggingTransport),
        Arc::new(ManualClock::default()),
    )
    .unwrap();
    let results = node.scheduler().tick().await;
    let (_, outcome) = results
        .iter()
        .find(|(tenant, _)| *tenant == seed.tenant_id)
        .unwrap();
    let outcome = outcome.as_ref().unwrap();
    assert_eq!(outcome.alerts.len(), 1);

    let alerts = node
        .service()
        .list_alerts(&seed.tenant_id, &AlertQuery::default())
        .unwrap();
    assert_eq!(alerts.total, 1);
    assert_eq!(alerts.items[0].status, AlertStatus::Triggered);
    assert_eq!(alerts.items[0].delivery_counts().1, 0);
}

/// A context in which every condition of `seed` holds.
fn hot_context(seed: &vigil_node::config::RuleSeed) -> serde_json::Value {
    let mut context = serde_json::Map::new();
    for condition in &seed.conditions {
        let spec = vigil_alerts::ConditionSpec::from(condition.clone());
        let value = match spec.operator.as_str() {
            ">" => spec.value.as_f64().map_or(serde_json::Value::Null, |v| (v + 10.0).into()),
            "<" => spec.value.as_f64().map_or(serde_json::Value::Null, |v| (v - 10.0).into()),
            _ => spec.value.clone(),
        };
        context.insert(spec.field, value);
    }
    serde_json::Value::Object(context)
}

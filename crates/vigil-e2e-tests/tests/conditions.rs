//! End-to-end tests for condition operators, AND/OR logic and rule
//! validation through the service.

mod helpers;

use helpers::Harness;
use serde_json::{json, Value};
use test_case::test_case;
use vigil_alerts::{
    evaluate_condition, AlertError, AlertRule, AlertType, ComparisonOperator, Condition,
    ConditionLogic, ConditionSpec, Context, RuleUpdate,
};

fn spec(operator: &str, value: Value, value2: Option<Value>) -> Condition {
    let mut spec = ConditionSpec::new("reading", operator, value);
    spec.value2 = value2;
    Condition::try_from(spec).unwrap()
}

fn context(value: Value) -> Context {
    Context::from([("reading".to_string(), value)])
}

// ============================================================================
// Operator table
// ============================================================================

#[test_case(">", json!(35), None, json!(38), true ; "gt above")]
#[test_case(">", json!(35), None, json!(35), false ; "gt equal")]
#[test_case(">=", json!(35), None, json!(35), true ; "ge equal")]
#[test_case("<", json!(0), None, json!(-2), true ; "lt below")]
#[test_case("<=", json!(0), None, json!(0.5), false ; "le above")]
#[test_case("==", json!("sunny"), None, json!("sunny"), true ; "eq string")]
#[test_case("==", json!(10), None, json!(10.0), true ; "eq int float")]
#[test_case("!=", json!("sunny"), None, json!("rain"), true ; "ne differs")]
#[test_case("between", json!(10), Some(json!(20)), json!(15), true ; "between inside")]
#[test_case("between", json!(10), Some(json!(20)), json!(10), true ; "between lower bound")]
#[test_case("between", json!(10), Some(json!(20)), json!(20), true ; "between upper bound")]
#[test_case("between", json!(10), Some(json!(20)), json!(9.9), false ; "between below")]
#[test_case("between", json!(10), Some(json!(20)), json!(20.1), false ; "between above")]
#[test_case("contains", json!("rain"), None, json!("heavy rain"), true ; "contains substring")]
#[test_case("contains", json!("snow"), None, json!("heavy rain"), false ; "contains missing")]
#[test_case("contains", json!(5), None, json!("level 5 storm"), true ; "contains coerces operand")]
#[test_case("in", json!(["north", "east"]), None, json!("east"), true ; "in member")]
#[test_case("in", json!(["north", "east"]), None, json!("west"), false ; "in not member")]
#[test_case("not_in", json!([1, 2]), None, json!(3), true ; "not in absent")]
#[test_case("not_in", json!([1, 2]), None, json!(2.0), false ; "not in present")]
#[test_case(">", json!(35), None, json!("hot"), false ; "numeric op on string")]
fn test_operator_table(
    operator: &str,
    value: Value,
    value2: Option<Value>,
    reading: Value,
    expected: bool,
) {
    let condition = spec(operator, value, value2);
    assert_eq!(evaluate_condition(&condition, &context(reading)), expected);
}

#[test]
fn test_missing_field_is_false() {
    let condition = spec(">", json!(35), None);
    assert!(!evaluate_condition(&condition, &Context::new()));
}

// ============================================================================
// Validation at save time
// ============================================================================

#[test_case(json!({"field": "t", "operator": "between", "value": 10}) ; "between without value2")]
#[test_case(json!({"field": "t", "operator": "~=", "value": 10}) ; "unknown operator")]
#[test_case(json!({"field": "t", "operator": ">", "value": "hot"}) ; "non numeric threshold")]
#[test_case(json!({"field": "t", "operator": "in", "value": "a"}) ; "in without array")]
#[test_case(json!({"field": "", "operator": ">", "value": 1}) ; "empty field")]
fn test_malformed_condition_is_rejected(raw: Value) {
    assert!(serde_json::from_value::<Condition>(raw).is_err());
}

#[test]
fn test_rule_round_trips_conditions_and_template() {
    let raw = json!({"field": "rain_mm", "operator": "between", "value": 5, "value2": 25.5});
    let condition: Condition = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(serde_json::to_value(&condition).unwrap(), raw);
}

#[tokio::test]
async fn test_unregistered_channel_is_rejected_on_create_and_update() {
    let h = Harness::new();
    let tenant = h.tenant("Acme Farms");

    let rule = AlertRule::builder(tenant, "Heat warning", AlertType::Weather)
        .condition(
            Condition::threshold("temperature", ComparisonOperator::GreaterThan, 35.0).unwrap(),
        )
        .channel("sms")
        .build()
        .unwrap();
    let err = h.service.create_rule(rule).unwrap_err();
    assert!(matches!(err, AlertError::ChannelNotRegistered { .. }));
    assert!(err.is_validation());

    let stored = h.heat_rule(tenant, &["in_app"]);
    let err = h
        .service
        .update_rule(
            &tenant,
            &stored.id,
            RuleUpdate {
                channels: Some(vec!["sms".into()]),
                ..RuleUpdate::default()
            },
        )
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(h.rule(&tenant, &stored.id).channels, stored.channels);
}

// ============================================================================
// AND / OR through a full scan
// ============================================================================

fn two_condition_rule(h: &Harness, logic: ConditionLogic) -> AlertRule {
    let tenant = h.tenant("Acme Farms");
    let rule = AlertRule::builder(tenant, "Storm watch", AlertType::Weather)
        .conditions([
            Condition::threshold("temperature", ComparisonOperator::GreaterThan, 35.0).unwrap(),
            Condition::threshold("wind_kph", ComparisonOperator::GreaterThan, 60.0).unwrap(),
        ])
        .logic(logic)
        .channel("in_app")
        .build()
        .unwrap();
    h.service.create_rule(rule).unwrap()
}

#[test_case(ConditionLogic::And, false ; "and needs both")]
#[test_case(ConditionLogic::Or, true ; "or needs one")]
#[tokio::test]
async fn test_one_true_one_false(logic: ConditionLogic, fires: bool) {
    let h = Harness::new();
    let rule = two_condition_rule(&h, logic);
    h.set_temperature(rule.tenant_id, 38);
    h.weather.set_value(rule.tenant_id, "wind_kph", 20);

    let outcome = h.service.run_scan(&rule.tenant_id).await.unwrap();
    assert_eq!(outcome.alerts.len(), usize::from(fires));
}

#[test_case(ConditionLogic::And, false ; "and with missing field")]
#[test_case(ConditionLogic::Or, true ; "or with missing field")]
#[tokio::test]
async fn test_missing_field(logic: ConditionLogic, fires: bool) {
    let h = Harness::new();
    let rule = two_condition_rule(&h, logic);
    // wind_kph is never reported.
    h.set_temperature(rule.tenant_id, 38);

    let outcome = h.service.run_scan(&rule.tenant_id).await.unwrap();
    assert_eq!(outcome.alerts.len(), usize::from(fires));
}

//! Pure condition evaluation.
//!
//! [`evaluate`] never fails: a missing field or a value of the wrong kind makes
//! that one condition false and is logged, so a malformed field cannot abort
//! a scan.

use serde_json::Value;
use tracing::{debug, warn};

use crate::condition::{as_f64, Condition, Predicate};
use crate::types::{ConditionLogic, Context};

/// Evaluates `conditions` against `context`, combined with `logic`.
///
/// AND stops at the first false condition and OR at the first true one. An
/// empty condition list is true under AND and false under OR.
#[must_use]
pub fn evaluate(conditions: &[Condition], logic: ConditionLogic, context: &Context) -> bool {
    match logic {
        ConditionLogic::And => conditions.iter().all(|c| evaluate_condition(c, context)),
        ConditionLogic::Or => conditions.iter().any(|c| evaluate_condition(c, context)),
    }
}

/// Evaluates one condition. A missing or `null` field is false.
#[must_use]
pub fn evaluate_condition(condition: &Condition, context: &Context) -> bool {
    let field = condition.field();
    let Some(actual) = context.get(field).filter(|v| !v.is_null()) else {
        debug!(field, "context field missing, condition is false");
        return false;
    };

    match condition.predicate() {
        Predicate::GreaterThan(n) => numeric(field, actual).is_some_and(|x| x > as_f64(n)),
        Predicate::GreaterThanOrEqual(n) => numeric(field, actual).is_some_and(|x| x >= as_f64(n)),
        Predicate::LessThan(n) => numeric(field, actual).is_some_and(|x| x < as_f64(n)),
        Predicate::LessThanOrEqual(n) => numeric(field, actual).is_some_and(|x| x <= as_f64(n)),
        Predicate::Between { low, high } => {
            numeric(field, actual).is_some_and(|x| as_f64(low) <= x && x <= as_f64(high))
        }
        Predicate::Equal(expected) => values_equal(actual, expected),
        Predicate::NotEqual(expected) => !values_equal(actual, expected),
        Predicate::Contains(needle) => text(actual).contains(text(needle).as_str()),
        Predicate::In(set) => set.iter().any(|v| values_equal(actual, v)),
        Predicate::NotIn(set) => !set.iter().any(|v| values_equal(actual, v)),
    }
}

fn numeric(field: &str, value: &Value) -> Option<f64> {
    let number = value.as_f64();
    if number.is_none() {
        warn!(field, value = %value, "non-numeric value for numeric operator, condition is false");
    }
    number
}

/// Equality where `35` and `35.0` are the same number.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Strings as-is, everything else as JSON text.
pub(crate) fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

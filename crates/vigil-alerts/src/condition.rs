//! Typed alert conditions.
//!
//! A rule stores its conditions as `{field, operator, value, value2?}`
//! records ([`ConditionSpec`]). They are validated once, at rule construction,
//! into [`Condition`] values whose [`Predicate`] is a closed set of variants.
//! Serializing a [`Condition`] yields the exact record it was built from, so
//! persisted rules round-trip without reformatting.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{AlertError, Result};

/// Comparison operators for alert conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Greater than (>).
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal (>=).
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Less than (<).
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal (<=).
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Equal (==).
    #[serde(rename = "==")]
    Equal,
    /// Not equal (!=).
    #[serde(rename = "!=")]
    NotEqual,
    /// Substring test on the stringified field value.
    #[serde(rename = "contains")]
    Contains,
    /// Inclusive numeric range, `value <= x <= value2`.
    #[serde(rename = "between")]
    Between,
    /// Membership in a set of values.
    #[serde(rename = "in")]
    In,
    /// Non-membership in a set of values.
    #[serde(rename = "not_in")]
    NotIn,
}

impl ComparisonOperator {
    /// Every operator, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::GreaterThan,
        Self::GreaterThanOrEqual,
        Self::LessThan,
        Self::LessThanOrEqual,
        Self::Equal,
        Self::NotEqual,
        Self::Contains,
        Self::Between,
        Self::In,
        Self::NotIn,
    ];

    /// Returns the operator as it appears in persisted rules.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Contains => "contains",
            Self::Between => "between",
            Self::In => "in",
            Self::NotIn => "not_in",
        }
    }

    /// Returns true if the operator needs a numeric field value.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan
                | Self::GreaterThanOrEqual
                | Self::LessThan
                | Self::LessThanOrEqual
                | Self::Between
        )
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_symbol())
    }
}

impl FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_symbol() == s)
            .ok_or_else(|| format!("unknown operator '{s}'"))
    }
}

/// The persisted shape of a condition.
///
/// This is the boundary record: the operator is kept as raw text so that an
/// unknown operator is reported as a validation error rather than a parse
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    /// The context key to read.
    pub field: String,
    /// The operator symbol, e.g. `">"` or `"between"`.
    pub operator: String,
    /// The operand.
    pub value: Value,
    /// The upper bound, only for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<Value>,
}

impl ConditionSpec {
    /// Creates a condition record.
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
            value2: None,
        }
    }

    /// Sets the second operand.
    #[must_use]
    pub fn with_value2(mut self, value2: impl Into<Value>) -> Self {
        self.value2 = Some(value2.into());
        self
    }
}

/// The validated comparison a [`Condition`] applies to its field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `x > n`
    GreaterThan(Number),
    /// `x >= n`
    GreaterThanOrEqual(Number),
    /// `x < n`
    LessThan(Number),
    /// `x <= n`
    LessThanOrEqual(Number),
    /// `x == v`
    Equal(Value),
    /// `x != v`
    NotEqual(Value),
    /// `str(v)` is a substring of `str(x)`.
    Contains(Value),
    /// `low <= x <= high`
    Between {
        /// Inclusive lower bound.
        low: Number,
        /// Inclusive upper bound.
        high: Number,
    },
    /// `x` equals one of the values.
    In(Vec<Value>),
    /// `x` equals none of the values.
    NotIn(Vec<Value>),
}

impl Predicate {
    /// Returns the operator this predicate was built from.
    #[must_use]
    pub const fn operator(&self) -> ComparisonOperator {
        match self {
            Self::GreaterThan(_) => ComparisonOperator::GreaterThan,
            Self::GreaterThanOrEqual(_) => ComparisonOperator::GreaterThanOrEqual,
            Self::LessThan(_) => ComparisonOperator::LessThan,
            Self::LessThanOrEqual(_) => ComparisonOperator::LessThanOrEqual,
            Self::Equal(_) => ComparisonOperator::Equal,
            Self::NotEqual(_) => ComparisonOperator::NotEqual,
            Self::Contains(_) => ComparisonOperator::Contains,
            Self::Between { .. } => ComparisonOperator::Between,
            Self::In(_) => ComparisonOperator::In,
            Self::NotIn(_) => ComparisonOperator::NotIn,
        }
    }
}

/// A single validated comparison against one context field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConditionSpec", into = "ConditionSpec")]
pub struct Condition {
    field: String,
    predicate: Predicate,
}

impl Condition {
    /// Builds a condition from a field and a predicate.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidCondition` if the field is empty or a
    /// `between` range is inverted.
    pub fn new(field: impl Into<String>, predicate: Predicate) -> Result<Self> {
        let field = field.into();
        if field.trim().is_empty() {
            return Err(AlertError::invalid_condition(field, "field cannot be empty"));
        }
        if let Predicate::Between { low, high } = &predicate {
            if as_f64(low) > as_f64(high) {
                return Err(AlertError::invalid_condition(
                    field,
                    format!("between range is inverted: {low} > {high}"),
                ));
            }
        }
        Ok(Self { field, predicate })
    }

    /// Shorthand for a numeric threshold comparison.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidCondition` if `operator` is not one of
    /// `>`, `>=`, `<`, `<=`, or the threshold is not finite.
    pub fn threshold(
        field: impl Into<String>,
        operator: ComparisonOperator,
        threshold: f64,
    ) -> Result<Self> {
        let field = field.into();
        let number = Number::from_f64(threshold).ok_or_else(|| {
            AlertError::invalid_condition(field.clone(), "threshold must be finite")
        })?;
        let predicate = match operator {
            ComparisonOperator::GreaterThan => Predicate::GreaterThan(number),
            ComparisonOperator::GreaterThanOrEqual => Predicate::GreaterThanOrEqual(number),
            ComparisonOperator::LessThan => Predicate::LessThan(number),
            ComparisonOperator::LessThanOrEqual => Predicate::LessThanOrEqual(number),
            other => {
                return Err(AlertError::invalid_condition(
                    field,
                    format!("'{other}' is not a threshold operator"),
                ));
            }
        };
        Self::new(field, predicate)
    }

    /// Returns the context key this condition reads.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the validated predicate.
    #[must_use]
    pub const fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Returns the operator.
    #[must_use]
    pub const fn operator(&self) -> ComparisonOperator {
        self.predicate.operator()
    }
}

impl TryFrom<ConditionSpec> for Condition {
    type Error = AlertError;

    fn try_from(spec: ConditionSpec) -> Result<Self> {
        let ConditionSpec {
            field,
            operator,
            value,
            value2,
        } = spec;

        let op = ComparisonOperator::from_str(&operator)
            .map_err(|reason| AlertError::invalid_condition(field.clone(), reason))?;

        if op != ComparisonOperator::Between && value2.is_some() {
            return Err(AlertError::invalid_condition(
                field,
                format!("value2 is only allowed with 'between', not '{op}'"),
            ));
        }

        let numeric = |v: Value, role: &str| -> Result<Number> {
            match v {
                Value::Number(n) if n.as_f64().is_some() => Ok(n),
                other => Err(AlertError::invalid_condition(
                    field.clone(),
                    format!("operator '{op}' requires a numeric {role}, got {other}"),
                )),
            }
        };
        let set = |v: Value| -> Result<Vec<Value>> {
            match v {
                Value::Array(items) => Ok(items),
                other => Err(AlertError::invalid_condition(
                    field.clone(),
                    format!("operator '{op}' requires an array value, got {other}"),
                )),
            }
        };

        let predicate = match op {
            ComparisonOperator::GreaterThan => Predicate::GreaterThan(numeric(value, "value")?),
            ComparisonOperator::GreaterThanOrEqual => {
                Predicate::GreaterThanOrEqual(numeric(value, "value")?)
            }
            ComparisonOperator::LessThan => Predicate::LessThan(numeric(value, "value")?),
            ComparisonOperator::LessThanOrEqual => {
                Predicate::LessThanOrEqual(numeric(value, "value")?)
            }
            ComparisonOperator::Equal => Predicate::Equal(value),
            ComparisonOperator::NotEqual => Predicate::NotEqual(value),
            ComparisonOperator::Contains => Predicate::Contains(value),
            ComparisonOperator::Between => {
                let Some(upper) = value2 else {
                    return Err(AlertError::invalid_condition(
                        field,
                        "operator 'between' requires value2",
                    ));
                };
                Predicate::Between {
                    low: numeric(value, "value")?,
                    high: numeric(upper, "value2")?,
                }
            }
            ComparisonOperator::In => Predicate::In(set(value)?),
            ComparisonOperator::NotIn => Predicate::NotIn(set(value)?),
        };

        Self::new(field, predicate)
    }
}

impl From<Condition> for ConditionSpec {
    fn from(condition: Condition) -> Self {
        let operator = condition.operator().as_symbol().to_string();
        let (value, value2) = match condition.predicate {
            Predicate::GreaterThan(n)
            | Predicate::GreaterThanOrEqual(n)
            | Predicate::LessThan(n)
            | Predicate::LessThanOrEqual(n) => (Value::Number(n), None),
            Predicate::Equal(v) | Predicate::NotEqual(v) | Predicate::Contains(v) => (v, None),
            Predicate::Between { low, high } => (Value::Number(low), Some(Value::Number(high))),
            Predicate::In(items) | Predicate::NotIn(items) => (Value::Array(items), None),
        };
        Self {
            field: condition.field,
            operator,
            value,
            value2,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.predicate {
            Predicate::GreaterThan(n)
            | Predicate::GreaterThanOrEqual(n)
            | Predicate::LessThan(n)
            | Predicate::LessThanOrEqual(n) => {
                write!(f, "{} {} {n}", self.field, self.operator())
            }
            Predicate::Equal(v) | Predicate::NotEqual(v) | Predicate::Contains(v) => {
                write!(f, "{} {} {v}", self.field, self.operator())
            }
            Predicate::Between { low, high } => {
                write!(f, "{} between {low} and {high}", self.field)
            }
            Predicate::In(items) | Predicate::NotIn(items) => {
                write!(f, "{} {} {}", self.field, self.operator(), Value::Array(items.clone()))
            }
        }
    }
}

/// Converts a validated operand to `f64`. Non-representable numbers become
/// NaN so every comparison against them is false.
pub(crate) fn as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

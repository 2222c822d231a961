//! Metric samples flowing from the poller to the sender.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Emission semantics for an allow-listed metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    #[serde(rename = "c", alias = "counter")]
    Counter,
    #[serde(rename = "g", alias = "gauge")]
    Gauge,
    #[serde(rename = "t", alias = "timer")]
    Timer,
    /// Emits the positive change since the previous observation.
    #[serde(rename = "d", alias = "delta")]
    Delta,
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" | "counter" => Ok(MetricKind::Counter),
            "g" | "gauge" => Ok(MetricKind::Gauge),
            "t" | "timer" => Ok(MetricKind::Timer),
            "d" | "delta" => Ok(MetricKind::Delta),
            other => Err(format!("unknown metric kind '{}'", other)),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Timer => "timer",
            MetricKind::Delta => "delta",
        };
        f.write_str(s)
    }
}

/// A single value as produced by a query or the status-text parser.
///
/// Raw tokens stay `Text` until emission; computed values (bigint
/// reconstruction, accumulated counts) are numeric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

/// Numeric form of a [`MetricValue`], ready for emission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn text(s: impl Into<String>) -> Self {
        MetricValue::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetricValue::Null)
    }

    /// Coerces the value to a number. Text is parsed as an integer first,
    /// then as a float; anything else (including `Null`) yields `None`.
    pub fn to_numeric(&self) -> Option<Numeric> {
        match self {
            MetricValue::Int(v) => Some(Numeric::Int(*v)),
            MetricValue::Float(v) if v.is_finite() => Some(Numeric::Float(*v)),
            MetricValue::Float(_) => None,
            MetricValue::Text(s) => {
                let s = s.trim();
                if let Ok(v) = s.parse::<i64>() {
                    Some(Numeric::Int(v))
                } else {
                    s.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .map(Numeric::Float)
                }
            }
            MetricValue::Null => None,
        }
    }

    /// Adds `increment` to this value, used by the parser's accumulating rules.
    pub(crate) fn add(&self, increment: &MetricValue) -> MetricValue {
        match (self.to_numeric(), increment.to_numeric()) {
            (Some(a), Some(b)) => a.add(b).into(),
            (None, Some(b)) => b.into(),
            (Some(a), None) => a.into(),
            (None, None) => MetricValue::Int(0),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<Numeric> for MetricValue {
    fn from(n: Numeric) -> Self {
        match n {
            Numeric::Int(v) => MetricValue::Int(v),
            Numeric::Float(v) => MetricValue::Float(v),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{}", v),
            MetricValue::Text(s) => f.write_str(s),
            MetricValue::Null => f.write_str("NULL"),
        }
    }
}

impl Numeric {
    pub fn add(self, other: Numeric) -> Numeric {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => match a.checked_add(b) {
                Some(v) => Numeric::Int(v),
                None => Numeric::Float(a as f64 + b as f64),
            },
            (a, b) => Numeric::Float(a.as_f64() + b.as_f64()),
        }
    }

    /// `self - previous`. Integer subtraction when both sides are integers.
    pub fn sub(self, previous: Numeric) -> Numeric {
        match (self, previous) {
            (Numeric::Int(a), Numeric::Int(b)) => match a.checked_sub(b) {
                Some(v) => Numeric::Int(v),
                None => Numeric::Float(a as f64 - b as f64),
            },
            (a, b) => Numeric::Float(a.as_f64() - b.as_f64()),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(v) => v as f64,
            Numeric::Float(v) => v,
        }
    }

    pub fn is_positive(self) -> bool {
        match self {
            Numeric::Int(v) => v > 0,
            Numeric::Float(v) => v > 0.0,
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Numeric::Int(v) => write!(f, "{}", v),
            Numeric::Float(v) => write!(f, "{}", v),
        }
    }
}

/// An allow-listed metric on its way to the backend. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub key: String,
    pub value: MetricValue,
    pub kind: MetricKind,
}

impl MetricSample {
    pub fn new(key: impl Into<String>, value: MetricValue, kind: MetricKind) -> Self {
        Self {
            key: key.into(),
            value,
            kind,
        }
    }
}

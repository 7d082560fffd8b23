use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::{IdentityError, Result};
use crate::identity::MetricIdentity;

/// Numeric value of a sample. JSON cannot carry NaN or infinities, so floats must be finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
}

impl MetricValue {
    pub fn validate(self) -> Result<Self> {
        match self {
            MetricValue::Float(v) if !v.is_finite() => Err(IdentityError::NonFiniteValue(v)),
            other => Ok(other),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Integer(v) => v as f64,
            MetricValue::Float(v) => v,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Integer(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => MetricValue::Integer(v),
            Err(_) => MetricValue::Float(v as f64),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

/// Unit of the timestamps the ingestion endpoint expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimestampUnit {
    #[default]
    #[serde(rename = "seconds")]
    Seconds,
    #[serde(rename = "millis")]
    Milliseconds,
}

impl TimestampUnit {
    /// Current wall-clock time in this unit.
    pub fn now(self) -> i64 {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        match self {
            TimestampUnit::Seconds => elapsed.as_secs() as i64,
            TimestampUnit::Milliseconds => elapsed.as_millis() as i64,
        }
    }
}

/// One (identity, timestamp, value) sample. Lives only until it is rendered into a batch.
#[derive(Debug, Clone)]
pub struct Datapoint {
    pub identity: Arc<MetricIdentity>,
    pub timestamp: i64,
    pub value: MetricValue,
}

impl Datapoint {
    pub fn new(
        identity: Arc<MetricIdentity>,
        timestamp: i64,
        value: impl Into<MetricValue>,
    ) -> Result<Self> {
        Ok(Self {
            identity,
            timestamp,
            value: value.into().validate()?,
        })
    }

    /// Append this datapoint's JSON object to `out`.
    pub fn render(&self, out: &mut Vec<u8>) {
        self.identity
            .render_datapoint(self.timestamp, self.value, out);
    }
}

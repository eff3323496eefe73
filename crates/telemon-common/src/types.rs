use serde::{Deserialize, Serialize};
use std::fmt;

/// Counter id the agent uses to report how many samples it has taken.
pub const POLL_COUNT: &str = "PollCount";

/// Errors raised while validating a metric at a system boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("metric id must not be empty")]
    EmptyId,

    /// The `type` field named something other than `gauge` or `counter`.
    #[error("unsupported metric kind '{0}'")]
    UnsupportedKind(String),

    /// The field matching the kind (`value` for gauges, `delta` for
    /// counters) was absent.
    #[error("metric '{id}' of kind {kind} carries no value")]
    MissingValue { id: String, kind: MetricKind },

    #[error("invalid {kind} value '{raw}'")]
    InvalidValue { kind: MetricKind, raw: String },
}

/// Metric kind, which decides the update semantics.
///
/// # Examples
///
/// ```
/// use telemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("string".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }

    /// Parses a raw textual value according to this kind: a float for
    /// gauges, a base-10 integer for counters.
    pub fn parse_value(&self, raw: &str) -> Result<MetricValue, MetricError> {
        let invalid = || MetricError::InvalidValue {
            kind: *self,
            raw: raw.to_string(),
        };
        match self {
            MetricKind::Gauge => {
                let v: f64 = raw.parse().map_err(|_| invalid())?;
                if !v.is_finite() {
                    return Err(invalid());
                }
                Ok(MetricValue::Gauge(v))
            }
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(MetricError::UnsupportedKind(s.to_string())),
        }
    }
}

/// Value carried by a metric. The variant is the kind, so a metric can
/// never hold both a gauge value and a counter delta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Fixed-precision form used in the path-encoded update URL: six
    /// fractional digits for gauges, plain integers for counters.
    pub fn to_path_segment(&self) -> String {
        match self {
            MetricValue::Gauge(v) => format!("{v:.6}"),
            MetricValue::Counter(d) => d.to_string(),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

/// Identity of a stored series. Gauges and counters live in separate
/// namespaces, so the kind is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    pub id: String,
    pub kind: MetricKind,
}

impl MetricKey {
    pub fn new(kind: MetricKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A single gauge reading or counter delta.
///
/// # Examples
///
/// ```
/// use telemon_common::types::{Metric, MetricKind};
///
/// let m = Metric::gauge("Alloc", 5.0);
/// assert_eq!(m.kind(), MetricKind::Gauge);
/// let json = serde_json::to_string(&m).unwrap();
/// assert_eq!(json, r#"{"id":"Alloc","type":"gauge","value":5.0}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMetric", into = "WireMetric")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn new(id: impl Into<String>, value: MetricValue) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self::new(id, MetricValue::Gauge(value))
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self::new(id, MetricValue::Counter(delta))
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.kind(), self.id.clone())
    }
}

/// JSON wire shape: `{"id":..,"type":"gauge"|"counter","value"?:..,"delta"?:..}`.
///
/// `type` is kept as a raw string so that an unknown kind decodes
/// successfully and is rejected during conversion, which lets the server
/// tell a malformed document apart from an unsupported kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMetric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl WireMetric {
    /// Validates only the identity part, for lookups that carry no value.
    pub fn key(&self) -> Result<MetricKey, MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        let kind: MetricKind = self.kind.parse()?;
        Ok(MetricKey::new(kind, self.id.clone()))
    }
}

impl TryFrom<WireMetric> for Metric {
    type Error = MetricError;

    fn try_from(wire: WireMetric) -> Result<Self, Self::Error> {
        let key = wire.key()?;
        let value = match key.kind {
            MetricKind::Gauge => wire.value.map(MetricValue::Gauge),
            MetricKind::Counter => wire.delta.map(MetricValue::Counter),
        };
        let value = value.ok_or(MetricError::MissingValue {
            id: key.id.clone(),
            kind: key.kind,
        })?;
        Ok(Metric { id: key.id, value })
    }
}

impl From<Metric> for WireMetric {
    fn from(m: Metric) -> Self {
        let kind = m.kind().as_str().to_string();
        match m.value {
            MetricValue::Gauge(v) => WireMetric {
                id: m.id,
                kind,
                value: Some(v),
                delta: None,
            },
            MetricValue::Counter(d) => WireMetric {
                id: m.id,
                kind,
                value: None,
                delta: Some(d),
            },
        }
    }
}

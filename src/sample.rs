//! Samples and the per-call sample log

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the timestamp key; reserved, never stored as a field
pub const TIMESTAMP_FIELD: &str = "ts_ms";

/// One timestamped snapshot of a process
///
/// The fields are opaque to the sampler loop; they serialize flat next to the
/// timestamp, e.g. `{"ts_ms": 1700000000000, "pid": 42, "cpu_percent": 3.5}`.
/// A field named `ts_ms` replaces the timestamp when it is an unsigned integer
/// and is dropped otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch
    pub ts_ms: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Sample {
    /// Create an empty sample stamped with the current time
    pub fn now() -> Self {
        Self::at(now_ms())
    }

    pub fn at(ts_ms: u64) -> Self {
        Self {
            ts_ms,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field; see the type docs for the `ts_ms` name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        if name == TIMESTAMP_FIELD {
            self.set_timestamp(&value);
        } else {
            self.fields.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The `pid` field, if the sampler recorded one
    pub fn pid(&self) -> Option<u64> {
        self.get("pid").and_then(Value::as_u64)
    }

    /// Move a `ts_ms` entry written straight into `fields` out of the map
    fn normalize(mut self) -> Self {
        if let Some(value) = self.fields.remove(TIMESTAMP_FIELD) {
            self.set_timestamp(&value);
        }
        self
    }

    fn set_timestamp(&mut self, value: &Value) {
        match value.as_u64() {
            Some(ts_ms) => self.ts_ms = ts_ms,
            None => debug!("Dropping non-integer {} field: {}", TIMESTAMP_FIELD, value),
        }
    }
}

/// Ordered, append-only log of the samples taken during one monitored call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleLog {
    samples: Vec<Sample>,
}

impl SampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample.normalize());
    }

    /// Append one batch returned by a sampling cycle, keeping its order
    pub fn extend<I: IntoIterator<Item = Sample>>(&mut self, batch: I) {
        self.samples.extend(batch.into_iter().map(Sample::normalize));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    pub fn into_inner(self) -> Vec<Sample> {
        self.samples
    }

    /// Milliseconds between the first and the last sample
    pub fn span_ms(&self) -> u64 {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => last.ts_ms.saturating_sub(first.ts_ms),
            _ => 0,
        }
    }
}

impl From<Vec<Sample>> for SampleLog {
    fn from(samples: Vec<Sample>) -> Self {
        Self {
            samples: samples.into_iter().map(Sample::normalize).collect(),
        }
    }
}

impl IntoIterator for SampleLog {
    type Item = Sample;
    type IntoIter = std::vec::IntoIter<Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

impl<'a> IntoIterator for &'a SampleLog {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

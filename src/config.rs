//! Sampling configuration
//!
//! A [`SamplingConfig`] is built once per monitored function and shared,
//! read-only, by every call to it.

use crate::core::constants::sampling;
use crate::error::{Result, WatchmeError};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// How often to sample a worker and which fields to keep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSamplingConfig", into = "RawSamplingConfig")]
pub struct SamplingConfig {
    interval: Duration,
    skip: BTreeSet<String>,
    include: BTreeSet<String>,
}

impl SamplingConfig {
    /// Start from the defaults: a 3 second interval and no field filters
    pub fn builder() -> SamplingConfigBuilder {
        SamplingConfigBuilder::default()
    }

    /// Load and validate a configuration from JSON
    ///
    /// ```json
    /// {"interval_ms": 500, "skip": ["cmdline", "cwd"], "include": "pid,cpu_percent"}
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Field names removed from every sample
    pub fn skip(&self) -> &BTreeSet<String> {
        &self.skip
    }

    /// Field names samples are restricted to (empty means all fields)
    pub fn include(&self) -> &BTreeSet<String> {
        &self.include
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(WatchmeError::InvalidConfiguration(
                "sampling interval must be positive".to_string(),
            ));
        }

        let overlap: Vec<&str> = self
            .skip
            .intersection(&self.include)
            .map(String::as_str)
            .collect();
        if !overlap.is_empty() {
            return Err(WatchmeError::InvalidConfiguration(format!(
                "fields both skipped and included: {}",
                overlap.join(", ")
            )));
        }

        Ok(())
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: sampling::DEFAULT,
            skip: BTreeSet::new(),
            include: BTreeSet::new(),
        }
    }
}

/// Builder for [`SamplingConfig`]
#[derive(Debug, Default)]
pub struct SamplingConfigBuilder {
    config: SamplingConfig,
}

impl SamplingConfigBuilder {
    /// Set the time between sampling cycles
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn interval_ms(self, ms: u64) -> Self {
        self.interval(Duration::from_millis(ms))
    }

    pub fn interval_secs(self, secs: u64) -> Self {
        self.interval(Duration::from_secs(secs))
    }

    /// Add fields to drop from every sample
    pub fn skip<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.skip.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Add fields to keep; when any are given, all others are dropped
    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.include.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<SamplingConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Split a comma separated field list, dropping blanks
pub fn parse_field_list(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}

/// A field list given either as an array or as a comma separated string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum FieldList {
    List(Vec<String>),
    Csv(String),
}

impl Default for FieldList {
    fn default() -> Self {
        FieldList::List(Vec::new())
    }
}

impl From<FieldList> for BTreeSet<String> {
    fn from(list: FieldList) -> Self {
        match list {
            FieldList::List(fields) => fields
                .into_iter()
                .map(|field| field.trim().to_string())
                .filter(|field| !field.is_empty())
                .collect(),
            FieldList::Csv(csv) => parse_field_list(&csv),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSamplingConfig {
    #[serde(default = "default_interval_ms")]
    interval_ms: u64,
    #[serde(default)]
    skip: FieldList,
    #[serde(default)]
    include: FieldList,
}

fn default_interval_ms() -> u64 {
    sampling::DEFAULT.as_millis() as u64
}

impl TryFrom<RawSamplingConfig> for SamplingConfig {
    type Error = WatchmeError;

    fn try_from(raw: RawSamplingConfig) -> Result<Self> {
        SamplingConfig::builder()
            .interval_ms(raw.interval_ms)
            .skip(BTreeSet::from(raw.skip))
            .include(BTreeSet::from(raw.include))
            .build()
    }
}

impl From<SamplingConfig> for RawSamplingConfig {
    fn from(config: SamplingConfig) -> Self {
        Self {
            interval_ms: config.interval.as_millis() as u64,
            skip: FieldList::List(config.skip.into_iter().collect()),
            include: FieldList::List(config.include.into_iter().collect()),
        }
    }
}

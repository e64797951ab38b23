//! Exporter parameters
//!
//! Exporters are configured from named string parameters. Keys are
//! case-insensitive (stored lower-cased) and each exporter declares the keys it
//! cannot work without.

use crate::error::{Result, WatchmeError};

use log::error;
use std::collections::BTreeMap;

/// Named, lower-cased parameters of one exporter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExporterParams {
    name: String,
    params: BTreeMap<String, String>,
}

impl ExporterParams {
    pub fn new<I, K, V>(name: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut exporter = Self {
            name: name.into(),
            params: BTreeMap::new(),
        };
        exporter.set_params(params);
        exporter
    }

    /// Parse `key@value` pairs, the form parameters take on a command line
    pub fn from_pairs<'a, I>(name: impl Into<String>, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut parsed = Vec::new();
        for pair in pairs {
            let (key, value) = pair.split_once('@').ok_or_else(|| {
                WatchmeError::InvalidConfiguration(format!(
                    "exporter parameter {pair:?} is not of the form key@value"
                ))
            })?;
            parsed.push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(Self::new(name, parsed))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set parameters, overwriting existing keys
    pub fn set_params<I, K, V>(&mut self, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in params {
            self.params.insert(key.as_ref().to_lowercase(), value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(&key.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check that every required key is set, logging each missing one
    pub fn validate(&self, required: &[&str]) -> Result<()> {
        let missing: Vec<String> = required
            .iter()
            .filter(|key| !self.contains(key))
            .map(|key| key.to_lowercase())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        for key in &missing {
            error!("Missing required parameter for {}: {}", self.name, key);
        }
        Err(WatchmeError::MissingParameters {
            exporter: self.name.clone(),
            missing,
        })
    }
}

/// Something that ships monitoring results elsewhere
pub trait Exporter {
    /// Short type name of the exporter, e.g. `jsonl`
    fn exporter_type(&self) -> &str;

    fn params(&self) -> &ExporterParams;

    fn required_params(&self) -> &[&str] {
        &[]
    }

    fn validate(&self) -> Result<()> {
        self.params().validate(self.required_params())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pushgateway {
        params: ExporterParams,
    }

    impl Exporter for Pushgateway {
        fn exporter_type(&self) -> &str {
            "pushgateway"
        }

        fn params(&self) -> &ExporterParams {
            &self.params
        }

        fn required_params(&self) -> &[&str] {
            &["url", "job"]
        }
    }

    #[test]
    fn test_keys_are_lowercased() {
        let params = ExporterParams::new("pg", [("URL", "http://localhost:9091"), ("Job", "x")]);
        assert_eq!(params.get("url"), Some("http://localhost:9091"));
        assert_eq!(params.get("JOB"), Some("x"));
        assert_eq!(params.iter().count(), 2);
    }

    #[test]
    fn test_set_params_overwrites() {
        let mut params = ExporterParams::new("pg", [("job", "a")]);
        params.set_params([("JOB", "b")]);
        assert_eq!(params.get("job"), Some("b"));
    }

    #[test]
    fn test_from_pairs() {
        let params =
            ExporterParams::from_pairs("pg", ["url@http://host:9091", "job@ nightly "]).unwrap();
        assert_eq!(params.get("url"), Some("http://host:9091"));
        assert_eq!(params.get("job"), Some("nightly"));

        assert!(ExporterParams::from_pairs("pg", ["no-separator"]).is_err());
    }

    #[test]
    fn test_validate_lists_missing_params() {
        let exporter = Pushgateway {
            params: ExporterParams::new("pg", [("url", "http://host")]),
        };
        assert_eq!(exporter.exporter_type(), "pushgateway");

        match exporter.validate() {
            Err(WatchmeError::MissingParameters { exporter, missing }) => {
                assert_eq!(exporter, "pg");
                assert_eq!(missing, vec!["job".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_no_required_params_is_valid() {
        let params = ExporterParams::new("empty", Vec::<(String, String)>::new());
        assert!(params.validate(&[]).is_ok());
    }
}

//! Results sinks
//!
//! A sink receives the finished runs of monitored calls, keyed by
//! `decorator-<name>`. [`MemorySink`] keeps them in process, [`JsonlSink`]
//! appends them to one JSON-lines file per key.

use crate::error::{Result, WatchmeError};
use crate::exporter::{Exporter, ExporterParams};
use crate::sample::SampleLog;

use log::debug;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Records the sample logs of finished calls
pub trait ResultsSink: Send + Sync {
    fn finish_runs(&self, results: BTreeMap<String, SampleLog>) -> Result<()>;
}

impl<S: ResultsSink + ?Sized> ResultsSink for Arc<S> {
    fn finish_runs(&self, results: BTreeMap<String, SampleLog>) -> Result<()> {
        (**self).finish_runs(results)
    }
}

impl<S: ResultsSink + ?Sized> ResultsSink for &S {
    fn finish_runs(&self, results: BTreeMap<String, SampleLog>) -> Result<()> {
        (**self).finish_runs(results)
    }
}

/// Keeps every delivered log in memory, in delivery order per key
#[derive(Debug, Default)]
pub struct MemorySink {
    runs: Mutex<BTreeMap<String, Vec<SampleLog>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<SampleLog>>> {
        // A poisoned map is still consistent: inserts are single pushes
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All logs delivered under `key`, oldest first
    pub fn runs(&self, key: &str) -> Vec<SampleLog> {
        self.lock().get(key).cloned().unwrap_or_default()
    }

    /// The most recent log delivered under `key`
    pub fn latest(&self, key: &str) -> Option<SampleLog> {
        self.lock().get(key).and_then(|runs| runs.last().cloned())
    }

    /// Keys that received at least one log
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return everything delivered so far
    pub fn take(&self) -> BTreeMap<String, Vec<SampleLog>> {
        std::mem::take(&mut *self.lock())
    }
}

impl ResultsSink for MemorySink {
    fn finish_runs(&self, results: BTreeMap<String, SampleLog>) -> Result<()> {
        let mut runs = self.lock();
        for (key, log) in results {
            runs.entry(key).or_default().push(log);
        }
        Ok(())
    }
}

/// Appends each delivered sample as one JSON line to `<directory>/<key>.jsonl`
#[derive(Debug)]
pub struct JsonlSink {
    params: ExporterParams,
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub const TYPE: &'static str = "jsonl";
    const REQUIRED: &'static [&'static str] = &["directory"];

    pub fn new(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_string_lossy().into_owned();
        Self::from_params(ExporterParams::new(Self::TYPE, [("directory", directory)]))
    }

    /// Build from exporter parameters; `directory` is required
    pub fn from_params(params: ExporterParams) -> Result<Self> {
        params.validate(Self::REQUIRED)?;
        let directory = params
            .get("directory")
            .map(PathBuf::from)
            .ok_or_else(|| WatchmeError::InvalidConfiguration("missing directory".to_string()))?;

        fs::create_dir_all(&directory)?;
        Ok(Self {
            params,
            directory,
            write_lock: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File a key's samples are appended to
    pub fn path_for(&self, key: &str) -> PathBuf {
        let stem: String = key
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                c => c,
            })
            .collect();
        self.directory.join(format!("{stem}.jsonl"))
    }

    fn append(&self, key: &str, log: &SampleLog) -> Result<()> {
        let path = self.path_for(key);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        for sample in log {
            serde_json::to_writer(&mut writer, sample)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        debug!("Appended {} sample(s) to {}", log.len(), path.display());
        Ok(())
    }
}

impl Exporter for JsonlSink {
    fn exporter_type(&self) -> &str {
        Self::TYPE
    }

    fn params(&self) -> &ExporterParams {
        &self.params
    }

    fn required_params(&self) -> &[&str] {
        Self::REQUIRED
    }
}

impl ResultsSink for JsonlSink {
    fn finish_runs(&self, results: BTreeMap<String, SampleLog>) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| WatchmeError::Sink("jsonl sink lock poisoned".to_string()))?;
        for (key, log) in &results {
            self.append(key, log)
                .map_err(|e| WatchmeError::Sink(format!("{key}: {e}")))?;
        }
        Ok(())
    }
}

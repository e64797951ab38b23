//! watchme: monitor the resources a function uses
//!
//! A monitored function runs in a forked worker process while the calling
//! thread samples the worker at a fixed interval. When the call completes the
//! samples are delivered to a results sink under `decorator-<name>` and the
//! function's return value is handed back to the caller.

#[cfg(not(unix))]
compile_error!("watchme runs functions in forked worker processes and needs a Unix platform");

pub mod config;
pub mod core;
pub mod error;
pub mod exporter;
pub mod process_sampler;
pub mod sample;
pub mod sink;

pub use crate::config::{parse_field_list, SamplingConfig, SamplingConfigBuilder};
pub use crate::core::{
    monitor_resources, Liveness, Monitored, SamplerLoop, SamplingStats, SleepTicker, Ticker,
    Worker, WorkerHandle,
};
pub use crate::error::{Result, WatchmeError};
pub use crate::exporter::{Exporter, ExporterParams};
pub use crate::process_sampler::{PidSampler, ProcessSampler, SampleRequest};
pub use crate::sample::{Sample, SampleLog};
pub use crate::sink::{JsonlSink, MemorySink, ResultsSink};

//! Core monitoring functionality
//!
//! The worker launcher, the sampler loop and the orchestration that ties them
//! together into monitored calls.

pub mod constants;
mod frame;
pub mod monitor;
pub mod sampler;
pub mod worker;

// Re-export main types
pub use monitor::{monitor_resources, Monitored};
pub use sampler::{SamplerLoop, SamplingStats, SleepTicker, Ticker};
pub use worker::{Liveness, Worker, WorkerHandle, WorkerOutcome};

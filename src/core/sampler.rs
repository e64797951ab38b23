//! Fixed-interval sampling loop
//!
//! The loop runs on the caller's thread: check liveness, sample, sleep, repeat.
//! The period of a cycle is the interval plus however long sampling took; the
//! drift is not compensated.

use crate::config::SamplingConfig;
use crate::core::worker::Liveness;
use crate::process_sampler::{ProcessSampler, SampleRequest};
use crate::sample::SampleLog;

use log::{debug, warn};
use std::time::Duration;

/// Suspends the sampling loop between cycles
pub trait Ticker {
    fn sleep(&mut self, interval: Duration);
}

impl<T: Ticker + ?Sized> Ticker for Box<T> {
    fn sleep(&mut self, interval: Duration) {
        (**self).sleep(interval)
    }
}

/// Sleeps the calling thread for real
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepTicker;

impl Ticker for SleepTicker {
    fn sleep(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// Counters for one run of the loop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SamplingStats {
    /// Cycles in which the worker was observed alive
    pub cycles: u64,
    /// Cycles whose sampling call failed
    pub failed_cycles: u64,
}

/// Samples a worker until it exits
pub struct SamplerLoop<P, T> {
    config: SamplingConfig,
    sampler: P,
    ticker: T,
    stats: SamplingStats,
}

impl<P: ProcessSampler> SamplerLoop<P, SleepTicker> {
    pub fn new(config: SamplingConfig, sampler: P) -> Self {
        Self::with_ticker(config, sampler, SleepTicker)
    }
}

impl<P: ProcessSampler, T: Ticker> SamplerLoop<P, T> {
    pub fn with_ticker(config: SamplingConfig, sampler: P, ticker: T) -> Self {
        Self {
            config,
            sampler,
            ticker,
            stats: SamplingStats::default(),
        }
    }

    /// Sample `worker` every interval for as long as it is alive
    ///
    /// Liveness is checked before each sample, so nothing is sampled once
    /// the worker has been seen dead. A failed sampling call skips the cycle.
    pub fn run(&mut self, worker: &impl Liveness) -> SampleLog {
        let request = SampleRequest::new(worker.pid(), &self.config);
        let interval = self.config.interval();
        let mut log = SampleLog::new();

        while worker.is_alive() {
            self.stats.cycles += 1;

            match self.sampler.sample(&request) {
                Ok(batch) => {
                    debug!(
                        "Cycle {} for pid {}: {} sample(s)",
                        self.stats.cycles,
                        request.pid,
                        batch.len()
                    );
                    log.extend(batch);
                }
                Err(e) => {
                    self.stats.failed_cycles += 1;
                    warn!(
                        "Skipping sampling cycle {} for pid {}: {}",
                        self.stats.cycles, request.pid, e
                    );
                }
            }

            self.ticker.sleep(interval);
        }

        debug!(
            "Sampling of pid {} done: {} cycle(s), {} failed, {} sample(s)",
            request.pid,
            self.stats.cycles,
            self.stats.failed_cycles,
            log.len()
        );
        log
    }

    pub fn stats(&self) -> SamplingStats {
        self.stats
    }
}

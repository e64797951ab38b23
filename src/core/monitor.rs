//! Monitored calls
//!
//! [`monitor_resources`] wraps a function so that every call runs in a worker
//! process while the calling thread samples it. When the call completes, the
//! sample log is delivered to a [`ResultsSink`] under `decorator-<name>` and
//! the function's return value is handed back unchanged.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use watchme::{monitor_resources, MemorySink, SamplingConfig};
//!
//! fn crunch(n: u64) -> u64 {
//!     (0..n).sum()
//! }
//!
//! # fn main() -> watchme::Result<()> {
//! let sink = Arc::new(MemorySink::new());
//! let config = SamplingConfig::builder().interval_ms(200).build()?;
//! let monitored = monitor_resources(sink.clone(), config, crunch);
//!
//! let total = monitored.call(50_000_000)?;
//! let log = sink.latest("decorator-crunch");
//! # Ok(())
//! # }
//! ```

use crate::config::SamplingConfig;
use crate::core::constants::DECORATOR_PREFIX;
use crate::core::sampler::{SamplerLoop, SleepTicker, Ticker};
use crate::core::worker::Worker;
use crate::error::Result;
use crate::process_sampler::{PidSampler, ProcessSampler};
use crate::sink::ResultsSink;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type SamplerFactory = Arc<dyn Fn() -> Box<dyn ProcessSampler> + Send + Sync>;
type TickerFactory = Arc<dyn Fn() -> Box<dyn Ticker> + Send + Sync>;

/// Wrap `func` so each call is run in a worker process and sampled
///
/// The log key is derived from the function's name; closures take the name of
/// the function they are defined in. Use [`Monitored::named`] to pick another.
pub fn monitor_resources<F, S>(sink: S, config: SamplingConfig, func: F) -> Monitored<F, S>
where
    S: ResultsSink,
{
    Monitored {
        name: function_name::<F>(),
        func,
        sink,
        config,
        new_sampler: Arc::new(|| Box::new(PidSampler::new()) as Box<dyn ProcessSampler>),
        new_ticker: Arc::new(|| Box::new(SleepTicker) as Box<dyn Ticker>),
    }
}

/// A function whose calls are monitored
pub struct Monitored<F, S> {
    name: String,
    func: F,
    sink: S,
    config: SamplingConfig,
    new_sampler: SamplerFactory,
    new_ticker: TickerFactory,
}

impl<F, S: ResultsSink> Monitored<F, S> {
    /// Override the name the log key is derived from
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the sampling operation; `factory` is called once per call
    pub fn with_sampler<P, G>(mut self, factory: G) -> Self
    where
        P: ProcessSampler + 'static,
        G: Fn() -> P + Send + Sync + 'static,
    {
        self.new_sampler = Arc::new(move || Box::new(factory()) as Box<dyn ProcessSampler>);
        self
    }

    /// Replace the timer between sampling cycles; `factory` is called once per call
    pub fn with_ticker<T, G>(mut self, factory: G) -> Self
    where
        T: Ticker + 'static,
        G: Fn() -> T + Send + Sync + 'static,
    {
        self.new_ticker = Arc::new(move || Box::new(factory()) as Box<dyn Ticker>);
        self
    }

    /// Name of the monitored function
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key the sample log of each call is delivered under
    pub fn key(&self) -> String {
        format!("{}{}", DECORATOR_PREFIX, self.name)
    }

    /// Sampling configuration used for every call
    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Sink receiving the log of each completed call
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run one monitored call
    ///
    /// Returns the function's value. If the worker cannot be started, panics,
    /// exits without a result or returns a value that cannot be encoded, the
    /// error is returned, the samples taken so far are dropped and the sink is
    /// not called.
    pub fn call<A, R>(&self, args: A) -> Result<R>
    where
        F: Fn(A) -> R,
        R: Serialize + DeserializeOwned,
    {
        let func = &self.func;
        let handle = Worker::start(move || func(args))?;
        let pid = handle.pid();
        debug!("Monitoring {} in worker {}", self.name, pid);

        let mut sampler_loop = SamplerLoop::with_ticker(
            self.config.clone(),
            (self.new_sampler)(),
            (self.new_ticker)(),
        );
        let log = sampler_loop.run(&handle);

        let value = match handle.join_and_collect() {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Discarding {} sample(s) of {}: {}",
                    log.len(),
                    self.name,
                    e
                );
                return Err(e);
            }
        };

        let stats = sampler_loop.stats();
        debug!(
            "{} finished: {} sample(s) over {} cycle(s)",
            self.name,
            log.len(),
            stats.cycles
        );

        let mut results = BTreeMap::new();
        results.insert(self.key(), log);
        self.sink.finish_runs(results)?;

        Ok(value)
    }
}

impl<F, S> fmt::Debug for Monitored<F, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitored")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Name of a function from its type, e.g. `crunch` for `my_crate::jobs::crunch`
///
/// Generic arguments are ignored and closures resolve to the function they
/// are defined in.
fn function_name<F>() -> String {
    let mut path = String::new();
    let mut depth = 0usize;
    for c in std::any::type_name::<F>().chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => path.push(c),
            _ => {}
        }
    }

    path.rsplit("::")
        .find(|segment| !segment.is_empty() && !segment.starts_with("{{"))
        .unwrap_or("anonymous")
        .to_string()
}

//! Per-process sampling
//!
//! [`ProcessSampler`] is the sampling operation the sampler loop calls once per
//! cycle. [`PidSampler`] is the default implementation: it reads a pid's
//! statistics through `sysinfo`, adds a few Linux-only counters from `/proc`,
//! and applies the skip/include filters of the request.

use crate::config::SamplingConfig;
use crate::error::{Result, WatchmeError};
use crate::sample::Sample;

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Parameters of one sampling call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRequest {
    pub pid: u32,
    pub skip: BTreeSet<String>,
    pub include: BTreeSet<String>,
}

impl SampleRequest {
    pub fn new(pid: u32, config: &SamplingConfig) -> Self {
        Self {
            pid,
            skip: config.skip().clone(),
            include: config.include().clone(),
        }
    }

    /// Whether a field survives the skip and include filters
    pub fn wants(&self, field: &str) -> bool {
        if self.skip.contains(field) {
            return false;
        }
        self.include.is_empty() || self.include.contains(field)
    }

    /// Drop every field the request filters out
    pub fn retain(&self, fields: &mut Map<String, Value>) {
        fields.retain(|name, _| self.wants(name));
    }
}

/// The operation a sampling cycle invokes
///
/// A call may return any number of samples, including none. Errors are
/// treated as a missed cycle by the sampler loop, never as fatal.
pub trait ProcessSampler {
    fn sample(&mut self, request: &SampleRequest) -> Result<Vec<Sample>>;
}

impl<P: ProcessSampler + ?Sized> ProcessSampler for Box<P> {
    fn sample(&mut self, request: &SampleRequest) -> Result<Vec<Sample>> {
        (**self).sample(request)
    }
}

/// Samples a process through `sysinfo`
///
/// The `System` is kept between calls so CPU usage is computed over the time
/// since the previous sample; the first sample of a pid reports 0%.
pub struct PidSampler {
    system: System,
}

impl PidSampler {
    /// Create a sampler with an empty process table
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn collect(&mut self, pid: u32) -> Option<Map<String, Value>> {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        let process = self.system.process(sys_pid)?;
        let mut fields = Map::new();

        fields.insert("pid".into(), pid.into());
        fields.insert(
            "ppid".into(),
            process
                .parent()
                .map(|p| Value::from(p.as_u32()))
                .unwrap_or(Value::Null),
        );
        fields.insert(
            "name".into(),
            process.name().to_string_lossy().into_owned().into(),
        );
        fields.insert(
            "exe".into(),
            process
                .exe()
                .map(|p| Value::from(p.to_string_lossy().into_owned()))
                .unwrap_or(Value::Null),
        );
        let cmdline: Vec<Value> = process
            .cmd()
            .iter()
            .map(|arg| Value::from(arg.to_string_lossy().into_owned()))
            .collect();
        fields.insert("cmdline".into(), Value::Array(cmdline));
        fields.insert(
            "cwd".into(),
            process
                .cwd()
                .map(|p| Value::from(p.to_string_lossy().into_owned()))
                .unwrap_or(Value::Null),
        );
        fields.insert("status".into(), process.status().to_string().into());
        fields.insert("cpu_percent".into(), f64::from(process.cpu_usage()).into());
        fields.insert("memory_rss_kb".into(), (process.memory() / 1024).into());
        fields.insert(
            "memory_vms_kb".into(),
            (process.virtual_memory() / 1024).into(),
        );

        let disk = process.disk_usage();
        fields.insert("io_read_bytes".into(), disk.total_read_bytes.into());
        fields.insert("io_write_bytes".into(), disk.total_written_bytes.into());
        fields.insert("start_time".into(), process.start_time().into());
        fields.insert("run_time_secs".into(), process.run_time().into());

        #[cfg(target_os = "linux")]
        linux::add_proc_fields(pid, &mut fields);

        #[cfg(not(target_os = "linux"))]
        fields.insert(
            "num_threads".into(),
            process
                .tasks()
                .map(|tasks| tasks.len().max(1))
                .unwrap_or(1)
                .into(),
        );

        Some(fields)
    }
}

impl Default for PidSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler for PidSampler {
    fn sample(&mut self, request: &SampleRequest) -> Result<Vec<Sample>> {
        let ts_ms = crate::sample::now_ms();
        let mut fields = self
            .collect(request.pid)
            .ok_or(WatchmeError::ProcessNotFound(request.pid))?;

        request.retain(&mut fields);
        Ok(vec![Sample { ts_ms, fields }])
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use serde_json::{Map, Value};

    /// Thread, descriptor and context-switch counters from `/proc/<pid>`
    ///
    /// Missing entries are skipped: the process may exit between reads.
    pub(super) fn add_proc_fields(pid: u32, fields: &mut Map<String, Value>) {
        let Ok(process) = procfs::process::Process::new(pid as i32) else {
            return;
        };

        if let Ok(stat) = process.stat() {
            fields.insert("num_threads".into(), stat.num_threads.into());
        }
        if let Ok(count) = process.fd_count() {
            fields.insert("num_fds".into(), count.into());
        }
        if let Ok(status) = process.status() {
            if let Some(voluntary) = status.voluntary_ctxt_switches {
                fields.insert("ctx_switches_voluntary".into(), voluntary.into());
            }
            if let Some(involuntary) = status.nonvoluntary_ctxt_switches {
                fields.insert("ctx_switches_involuntary".into(), involuntary.into());
            }
        }
    }
}

//! Integration tests for monitored calls
//!
//! These run real worker processes sampled by the default `PidSampler`.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use watchme::core::constants::sampling;
use watchme::{
    monitor_resources, MemorySink, ProcessSampler, Sample, SampleRequest, SamplingConfig,
    WatchmeError,
};

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

fn init() {
    Lazy::force(&LOGGER);
}

fn sleep_then_answer(secs: u64) -> u32 {
    thread::sleep(Duration::from_secs(secs));
    42
}

fn sleep_ms(ms: u64) -> u64 {
    thread::sleep(Duration::from_millis(ms));
    ms
}

fn allocate(mb: usize) -> usize {
    let buffer = vec![1u8; mb * 1024 * 1024];
    thread::sleep(Duration::from_millis(600));
    buffer.iter().map(|b| *b as usize).sum()
}

fn fails(_: ()) -> u32 {
    panic!("failure inside the wrapped function")
}

fn big_result(len: usize) -> Vec<u8> {
    thread::sleep(Duration::from_millis(200));
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn float_of(bits: u64) -> f64 {
    f64::from_bits(bits)
}

fn config_ms(ms: u64) -> SamplingConfig {
    SamplingConfig::builder().interval_ms(ms).build().unwrap()
}

fn fast_config() -> SamplingConfig {
    SamplingConfig::builder()
        .interval(sampling::FAST)
        .build()
        .unwrap()
}

/// Sleeps three seconds with a one second interval
#[test]
fn test_three_second_call_one_second_interval() {
    init();
    let sink = Arc::new(MemorySink::new());
    let config = SamplingConfig::builder().interval_secs(1).build().unwrap();
    let monitored = monitor_resources(sink.clone(), config, sleep_then_answer);

    assert_eq!(monitored.call(3).unwrap(), 42);

    assert_eq!(sink.keys(), vec!["decorator-sleep_then_answer"]);
    let log = sink.latest("decorator-sleep_then_answer").unwrap();
    assert!(
        (2..=4).contains(&log.len()),
        "expected about 3 samples, got {}",
        log.len()
    );

    let stamps: Vec<u64> = log.iter().map(|s| s.ts_ms).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_return_value_is_transparent() {
    init();
    let sink = Arc::new(MemorySink::new());
    let monitored = monitor_resources(sink.clone(), config_ms(50), allocate);

    let direct = allocate(4);
    assert_eq!(monitored.call(4).unwrap(), direct);
    assert_eq!(sink.runs("decorator-allocate").len(), 1);
}

/// A return value larger than the pipe buffer while the sampler is polling
#[test]
fn test_large_return_value_does_not_stall_the_call() {
    init();
    let sink = Arc::new(MemorySink::new());
    let (tx, rx) = mpsc::channel();
    let call_sink = sink.clone();
    thread::spawn(move || {
        let monitored = monitor_resources(call_sink, config_ms(50), big_result);
        let _ = tx.send(monitored.call(1 << 20));
    });

    let value = rx
        .recv_timeout(Duration::from_secs(20))
        .expect("monitored call with a 1 MiB result did not finish")
        .unwrap();
    assert_eq!(value, big_result(1 << 20));
    assert_eq!(sink.runs("decorator-big_result").len(), 1);
}

#[test]
fn test_float_results_are_bit_identical() {
    init();
    let sink = Arc::new(MemorySink::new());
    let monitored = monitor_resources(sink.clone(), fast_config(), float_of);

    for bits in [
        0x305f050c368dcc74u64,
        (0.1f64 + 0.2).to_bits(),
        (-0.0f64).to_bits(),
        f64::MIN_POSITIVE.to_bits() - 1,
        f64::MAX.to_bits(),
    ] {
        let direct = float_of(bits);
        let returned = monitored.call(bits).unwrap();
        assert_eq!(returned.to_bits(), direct.to_bits(), "bits {bits:#x}");
    }
    assert_eq!(sink.runs("decorator-float_of").len(), 5);
}

#[test]
fn test_unencodable_results_are_not_reported_as_panics() {
    init();
    let sink = Arc::new(MemorySink::new());
    let monitored = monitor_resources(sink.clone(), fast_config(), float_of);

    match monitored.call(f64::NAN.to_bits()) {
        Err(WatchmeError::ResultEncode { reason, .. }) => assert!(reason.contains("NaN")),
        other => panic!("unexpected result: {other:?}"),
    }

    let pairs = monitor_resources(sink.clone(), fast_config(), |n: u32| {
        BTreeMap::from([((n, n + 1), "pair".to_string())])
    })
    .named("pairs");
    let result = pairs.call(1);
    assert!(matches!(result, Err(WatchmeError::ResultEncode { .. })));
    assert!(sink.is_empty());
}

#[test]
fn test_samples_describe_the_worker() {
    init();
    let sink = Arc::new(MemorySink::new());
    let monitored = monitor_resources(sink.clone(), fast_config(), allocate);

    monitored.call(16).unwrap();

    let log = sink.latest("decorator-allocate").unwrap();
    assert!(!log.is_empty());
    let me = std::process::id() as u64;
    for sample in &log {
        let pid = sample.pid().unwrap();
        assert_ne!(pid, me);
        assert_eq!(sample.get("ppid").and_then(|v| v.as_u64()), Some(me));
        assert!(sample.get("memory_rss_kb").is_some());
        assert!(sample.get("cpu_percent").is_some());
    }

    let peak_rss = log
        .iter()
        .filter_map(|s| s.get("memory_rss_kb").and_then(|v| v.as_u64()))
        .max()
        .unwrap();
    assert!(peak_rss >= 16 * 1024, "peak rss {peak_rss} kB");
}

#[test]
fn test_skip_and_include_filters_apply() {
    init();
    let sink = Arc::new(MemorySink::new());
    let conflicting = SamplingConfig::builder()
        .include(["pid", "cmdline"])
        .skip(["cmdline"])
        .build();
    assert!(conflicting.is_err());

    let config = SamplingConfig::builder()
        .interval_ms(50)
        .include(["pid", "memory_rss_kb"])
        .build()
        .unwrap();
    let monitored = monitor_resources(sink.clone(), config, sleep_ms);
    monitored.call(300).unwrap();

    let log = sink.latest("decorator-sleep_ms").unwrap();
    assert!(!log.is_empty());
    for sample in &log {
        let keys: Vec<&str> = sample.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["memory_rss_kb", "pid"]);
    }
}

#[test]
fn test_failing_function_propagates_and_writes_nothing() {
    init();
    let sink = Arc::new(MemorySink::new());
    let monitored = monitor_resources(sink.clone(), config_ms(50), fails);

    match monitored.call(()) {
        Err(WatchmeError::WorkerPanicked { message, .. }) => {
            assert_eq!(message, "failure inside the wrapped function")
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(sink.is_empty());
}

#[test]
fn test_worker_exiting_without_result() {
    init();
    let sink = Arc::new(MemorySink::new());
    let monitored = monitor_resources(sink.clone(), config_ms(50), |code: i32| -> u32 {
        thread::sleep(Duration::from_millis(100));
        unsafe { libc::_exit(code) }
    })
    .named("early_exit");

    match monitored.call(7) {
        Err(WatchmeError::ResultUnavailable { status, .. }) => assert_eq!(status.code(), Some(7)),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(sink.is_empty());
}

struct AlwaysFails;

impl ProcessSampler for AlwaysFails {
    fn sample(&mut self, request: &SampleRequest) -> watchme::Result<Vec<Sample>> {
        Err(WatchmeError::ProcessNotFound(request.pid))
    }
}

#[test]
fn test_sampling_failing_every_cycle() {
    init();
    let sink = Arc::new(MemorySink::new());
    let monitored = monitor_resources(sink.clone(), config_ms(50), sleep_ms)
        .with_sampler(|| AlwaysFails);

    assert_eq!(monitored.call(250).unwrap(), 250);
    let log = sink.latest("decorator-sleep_ms").unwrap();
    assert!(log.is_empty());
}

#[test]
fn test_concurrent_calls_do_not_mix_samples() {
    init();
    let sink = Arc::new(MemorySink::new());
    let first = monitor_resources(sink.clone(), config_ms(50), sleep_ms);
    let second = monitor_resources(sink.clone(), config_ms(50), allocate);

    thread::scope(|scope| {
        let a = scope.spawn(|| first.call(500));
        let b = scope.spawn(|| second.call(8));
        assert_eq!(a.join().unwrap().unwrap(), 500);
        assert_eq!(b.join().unwrap().unwrap(), 8 * 1024 * 1024);
    });

    let log_a = sink.latest("decorator-sleep_ms").unwrap();
    let log_b = sink.latest("decorator-allocate").unwrap();
    assert!(!log_a.is_empty() && !log_b.is_empty());

    let pid_a = log_a.first().and_then(Sample::pid).unwrap();
    let pid_b = log_b.first().and_then(Sample::pid).unwrap();
    assert_ne!(pid_a, pid_b);
    assert!(log_a.iter().all(|s| s.pid() == Some(pid_a)));
    assert!(log_b.iter().all(|s| s.pid() == Some(pid_b)));
}

#[test]
fn test_same_function_called_twice() {
    init();
    let sink = Arc::new(MemorySink::new());
    let monitored = monitor_resources(sink.clone(), config_ms(50), sleep_ms);

    monitored.call(150).unwrap();
    monitored.call(150).unwrap();

    let runs = sink.runs("decorator-sleep_ms");
    assert_eq!(runs.len(), 2);
    let pid_0 = runs[0].first().and_then(Sample::pid);
    let pid_1 = runs[1].first().and_then(Sample::pid);
    assert_ne!(pid_0, pid_1);
}

//! Integration tests for the JSON-lines sink

use std::collections::BTreeMap;
use std::fs;
use std::thread;
use std::time::Duration;
use watchme::{
    monitor_resources, ExporterParams, JsonlSink, ResultsSink, Sample, SampleLog,
    SamplingConfig, WatchmeError,
};

fn busy(ms: u64) -> String {
    thread::sleep(Duration::from_millis(ms));
    format!("slept {ms}ms")
}

fn read_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_jsonl_sink_appends_runs() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonlSink::new(dir.path().join("results")).unwrap();
    assert!(sink.directory().is_dir());

    let first: SampleLog = vec![
        Sample::at(1).with_field("pid", 10),
        Sample::at(2).with_field("pid", 10),
    ]
    .into();
    let second: SampleLog = vec![Sample::at(3).with_field("pid", 11)].into();

    sink.finish_runs(BTreeMap::from([("decorator-job".to_string(), first)]))
        .unwrap();
    sink.finish_runs(BTreeMap::from([("decorator-job".to_string(), second)]))
        .unwrap();

    let lines = read_lines(&sink.path_for("decorator-job"));
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["ts_ms"], 1);
    assert_eq!(lines[2]["pid"], 11);
}

#[test]
fn test_jsonl_sink_from_exporter_params() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out");
    let pair = format!("DIRECTORY@{}", target.display());

    let params = ExporterParams::from_pairs(JsonlSink::TYPE, [pair.as_str()]).unwrap();
    let sink = JsonlSink::from_params(params).unwrap();
    assert_eq!(sink.directory(), target.as_path());

    let params = ExporterParams::from_pairs("jsonl", ["mode@append"]).unwrap();
    let missing = JsonlSink::from_params(params);
    assert!(matches!(missing, Err(WatchmeError::MissingParameters { .. })));
}

#[test]
fn test_monitored_call_into_jsonl_sink() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonlSink::new(dir.path()).unwrap();
    let config = SamplingConfig::builder()
        .interval_ms(50)
        .skip(["cmdline", "cwd", "exe"])
        .build()
        .unwrap();

    let monitored = monitor_resources(&sink, config, busy);
    assert_eq!(monitored.call(300).unwrap(), "slept 300ms");

    let lines = read_lines(&sink.path_for("decorator-busy"));
    assert!(!lines.is_empty());
    for line in &lines {
        assert!(line.get("ts_ms").is_some());
        assert!(line.get("pid").is_some());
        assert!(line.get("cmdline").is_none());
    }
}

//! Monitor a CPU and memory hungry function and dump its samples
//!
//! ```sh
//! RUST_LOG=debug cargo run --example monitor_function -- /tmp/watchme-results
//! ```
//!
//! `WATCHME_CONFIG` may hold a JSON sampling configuration, e.g.
//! `{"interval_ms": 250, "skip": "cmdline,cwd"}`.

use std::env;
use std::error::Error;
use watchme::{monitor_resources, JsonlSink, SamplingConfig};

fn crunch(rounds: u64) -> u64 {
    let mut buffers = Vec::new();
    let mut acc = 0u64;
    for round in 0..rounds {
        buffers.push(vec![round as u8; 4 * 1024 * 1024]);
        for i in 0..20_000_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i ^ round);
        }
    }
    acc.wrapping_add(buffers.len() as u64)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let directory = env::args()
        .nth(1)
        .unwrap_or_else(|| "watchme-results".to_string());

    let config = match env::var("WATCHME_CONFIG") {
        Ok(json) => SamplingConfig::from_json(&json)?,
        Err(_) => SamplingConfig::builder().interval_ms(250).build()?,
    };

    let sink = JsonlSink::new(&directory)?;
    let monitored = monitor_resources(&sink, config, crunch);

    let value = monitored.call(8)?;
    println!("crunch returned {value}");
    println!(
        "samples written to {}",
        sink.path_for(&monitored.key()).display()
    );

    Ok(())
}

//! Headless runner.
//!
//! ```text
//! skytether [count] [ticks] [config.json]
//! ```
//!
//! Runs `ticks` fixed steps with `count` balloons and prints one JSON line of
//! metrics per simulated second. Set `RUST_LOG=debug` for engine logs.

use skytether::{Engine, EngineConfig, Subsystem};
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env().init();

    let args: Vec<String> = std::env::args().collect();
    let count: Option<usize> = args.get(1).map(|s| s.parse()).transpose()?;
    let ticks: u64 = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(600);
    let config = match args.get(3) {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let mut builder = Engine::builder(config);
    if let Some(count) = count {
        builder = builder.with_population(count);
    }
    let mut engine = builder.build()?;
    let ticks_per_second = (1.0 / engine.config().fixed_dt).round().max(1.0) as u64;

    let run_start = Instant::now();
    for _ in 0..ticks {
        let frame_start = Instant::now();
        engine.tick();
        let frame_ms = frame_start.elapsed().as_secs_f32() * 1000.0;
        engine.sample_frame(frame_ms, engine.memory_mb());

        if engine.ticks() % ticks_per_second == 0 {
            let errors: serde_json::Map<String, serde_json::Value> = Subsystem::ALL
                .iter()
                .map(|s| (s.name().to_string(), serde_json::to_value(engine.error_stats(*s)).unwrap_or_default()))
                .collect();
            let line = serde_json::json!({
                "tick": engine.ticks(),
                "sim_time": engine.sim_time(),
                "live": engine.live_count(),
                "metrics": engine.metrics(),
                "last_tick": {
                    "contacts": engine.last_tick().contacts,
                    "rope_max_deviation": engine.last_tick().rope_max_deviation,
                    "frozen": engine.last_tick().frozen,
                },
                "errors": errors,
            });
            println!("{}", line);
        }
    }

    log::info!(
        "{} ticks with {} balloons in {:.2}s",
        ticks,
        engine.live_count(),
        run_start.elapsed().as_secs_f32()
    );
    Ok(())
}

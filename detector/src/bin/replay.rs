//! Replays a JSON-lines landmark trace through the classifier, debouncer
//! and command mapper, printing what the live pipeline would have done.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tempo_common::config::Config;
use tempo_detector::replay::{parse_line, Replayer};

const USAGE: &str = "usage: tempo-replay [--config <config.toml>] <trace.jsonl>";

fn parse_args() -> Result<(Option<PathBuf>, PathBuf), String> {
    let mut config = None;
    let mut trace = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().ok_or_else(|| USAGE.to_string())?;
                config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ if trace.is_none() => trace = Some(PathBuf::from(arg)),
            _ => return Err(USAGE.to_string()),
        }
    }
    let trace = trace.ok_or_else(|| USAGE.to_string())?;
    Ok((config, trace))
}

fn main() {
    let (config_path, trace_path) = match parse_args() {
        Ok(a) => a,
        Err(usage) => {
            eprintln!("{usage}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".parse().unwrap_or_default()),
        )
        .with_writer(std::io::stderr)
        .init();

    // The camera section is irrelevant offline, only the thresholds matter.
    let config = match config_path {
        Some(path) => Config::load(&path),
        None => Config::parse("[camera]\nurl = \"\"\n"),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let file = match std::fs::File::open(&trace_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to open {}: {e}", trace_path.display());
            std::process::exit(1);
        }
    };

    let mut replayer = Replayer::new(&config);
    let mut frames = 0u64;
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Failed to read {}: {e}", trace_path.display());
                std::process::exit(1);
            }
        };
        let record = match parse_line(i + 1, &line) {
            Ok(Some(r)) => r,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        };
        frames += 1;
        for event in replayer.step(&record) {
            println!("{event}");
        }
    }

    let state = replayer.player_state();
    println!(
        "\n{frames} frames replayed, final state: playing={} rate={:.2}",
        state.is_playing, state.rate
    );
}

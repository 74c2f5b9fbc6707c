use std::path::PathBuf;
use tempo_common::config::Config;
use tempo_detector::api::{self, ApiState};
use tempo_detector::extractor::SubprocessExtractor;
use tempo_detector::pipeline::{Control, Pipeline};
use tempo_detector::player::RemotePlayer;
use tempo_detector::source;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        camera = config.camera.url,
        mode = config.camera.mode,
        model = config.extractor.command,
        window_ms = config.debounce.window_ms,
        bind = config.api.bind,
        "starting tempo detector"
    );

    let source = match source::build_source(&config.camera) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to build camera source");
            std::process::exit(1);
        }
    };

    let extractor = SubprocessExtractor::new(config.extractor.clone());
    let player = RemotePlayer::new(config.playback.clone());
    let commands = player.command_sender();

    let (pipeline, handle) = Pipeline::new(&config, source, extractor, player);
    let pipeline_task = pipeline.spawn();

    let state = ApiState {
        pipeline: handle.clone(),
        commands,
    };

    tokio::select! {
        result = api::serve(&config.api.bind, state) => {
            if let Err(e) = result {
                eprintln!("HTTP server on {} failed: {e}", config.api.bind);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    if handle.send(Control::Shutdown).await.is_ok() {
        if let Err(e) = pipeline_task.await {
            error!(error = %e, "pipeline task failed");
        }
    }
}

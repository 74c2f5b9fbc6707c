//! HTTP surface for the browser page: status, detection toggle, video id
//! parsing, player state reports and the player command stream.

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tempo_common::video::extract_video_id;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::mapper::PlayerState;
use crate::pipeline::{Control, PipelineHandle};
use crate::player::RelayedCommand;

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: PipelineHandle,
    pub commands: broadcast::Sender<RelayedCommand>,
}

#[derive(Debug, Deserialize)]
struct DetectionRequest {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct VideoQuery {
    url: String,
}

#[derive(Debug, Serialize)]
struct VideoId {
    video_id: String,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ApiError {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/detection", put(set_detection))
        .route("/api/video", get(video_id))
        .route("/api/player/state", post(player_state))
        .route("/api/player/commands", get(player_commands))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: &str, state: ApiState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(state)).await
}

/// GET /api/status
async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.pipeline.status())
}

/// PUT /api/detection
async fn set_detection(
    State(state): State<ApiState>,
    Json(req): Json<DetectionRequest>,
) -> impl IntoResponse {
    match state.pipeline.send(Control::SetDetection(req.enabled)).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// GET /api/video?url=
async fn video_id(Query(q): Query<VideoQuery>) -> impl IntoResponse {
    match extract_video_id(&q.url) {
        Some(video_id) => Json(VideoId { video_id }).into_response(),
        None => error_response(StatusCode::BAD_REQUEST, "not a recognisable video link"),
    }
}

/// POST /api/player/state
async fn player_state(
    State(state): State<ApiState>,
    Json(report): Json<PlayerState>,
) -> impl IntoResponse {
    if !(report.rate > 0.0) {
        return error_response(StatusCode::BAD_REQUEST, "rate must be positive");
    }
    match state.pipeline.send(Control::PlayerReport(report)).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// One page's command subscription. The page owns the camera: when the last
/// subscription goes away detection is switched off.
struct PageSubscription {
    rx: Option<broadcast::Receiver<RelayedCommand>>,
    state: ApiState,
}

impl Drop for PageSubscription {
    fn drop(&mut self) {
        // Unsubscribe first so the count below excludes this page.
        drop(self.rx.take());
        let remaining = self.state.commands.receiver_count();
        info!(subscribers = remaining, "player page left");
        if remaining == 0 {
            if let Err(e) = self.state.pipeline.try_send(Control::SetDetection(false)) {
                warn!(error = %e, "could not disable detection after the last page left");
            }
        }
    }
}

/// GET /api/player/commands (Server-Sent Events)
async fn player_commands(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.commands.subscribe();
    info!(subscribers = state.commands.receiver_count(), "player page subscribed");
    let page = PageSubscription {
        rx: Some(rx),
        state,
    };

    let events = stream::unfold(page, |mut page| async move {
        let rx = page.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(relayed) => match Event::default().event("command").json_data(relayed) {
                    Ok(event) => return Some((Ok(event), page)),
                    Err(e) => warn!(error = %e, "failed to encode player command"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "player page fell behind, commands skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExtractError, HandExtractor};
    use crate::mapper::PlaybackCommand;
    use crate::pipeline::Pipeline;
    use crate::player::{LocalPlayer, RemotePlayer};
    use crate::source::{FrameSink, FrameSource, SourceError};
    use futures_util::future::BoxFuture;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempo_common::config::Config;
    use tempo_common::frame::Frame;
    use tempo_common::landmark::LandmarkSet;

    struct IdleSource;

    impl FrameSource for IdleSource {
        fn name(&self) -> &str {
            "idle"
        }

        fn stream<'a>(&'a self, sink: &'a mut FrameSink) -> BoxFuture<'a, Result<(), SourceError>> {
            Box::pin(async move {
                sink.connected();
                std::future::pending::<()>().await;
                Ok(())
            })
        }
    }

    struct CameraGuard(Arc<AtomicUsize>);

    impl Drop for CameraGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Like `IdleSource`, but counts how many capture tasks hold the camera.
    struct CountingSource {
        active: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn stream<'a>(&'a self, sink: &'a mut FrameSink) -> BoxFuture<'a, Result<(), SourceError>> {
            self.active.fetch_add(1, Ordering::SeqCst);
            let guard = CameraGuard(Arc::clone(&self.active));
            Box::pin(async move {
                let _guard = guard;
                sink.connected();
                std::future::pending::<()>().await;
                Ok(())
            })
        }
    }

    struct NoHands;

    impl HandExtractor for NoHands {
        fn extract<'a>(
            &'a mut self,
            _frame: &'a Frame,
        ) -> BoxFuture<'a, Result<Vec<LandmarkSet>, ExtractError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    async fn start() -> (SocketAddr, broadcast::Sender<RelayedCommand>) {
        let config = Config::parse("[camera]\nurl = \"http://camera.test/\"\n").unwrap();
        let (pipeline, handle) = Pipeline::new(
            &config,
            Arc::new(IdleSource),
            NoHands,
            LocalPlayer::new(Default::default()),
        );
        pipeline.spawn();

        let (commands, _) = broadcast::channel(8);
        let state = ApiState {
            pipeline: handle,
            commands: commands.clone(),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await.unwrap() });
        (addr, commands)
    }

    async fn get_json(client: &reqwest::Client, url: String) -> (u16, serde_json::Value) {
        let resp = client.get(url).send().await.unwrap();
        let status = resp.status().as_u16();
        let body = resp.bytes().await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn send_json(
        request: reqwest::RequestBuilder,
        body: serde_json::Value,
    ) -> reqwest::Response {
        request
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    async fn poll_status(
        client: &reqwest::Client,
        addr: SocketAddr,
        f: impl Fn(&serde_json::Value) -> bool,
    ) -> serde_json::Value {
        for _ in 0..50 {
            let (_, status) = get_json(client, format!("http://{addr}/api/status")).await;
            if f(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("status condition never reached");
    }

    #[tokio::test]
    async fn video_endpoint_parses_links() {
        let (addr, _) = start().await;
        let client = reqwest::Client::new();

        let (status, body) = get_json(
            &client,
            format!("http://{addr}/api/video?url=https%3A%2F%2Fyoutu.be%2FdQw4w9WgXcQ"),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["video_id"], "dQw4w9WgXcQ");

        let (status, body) =
            get_json(&client, format!("http://{addr}/api/video?url=not-a-link")).await;
        assert_eq!(status, 400);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn detection_toggle_is_reflected_in_status() {
        let (addr, _) = start().await;
        let client = reqwest::Client::new();

        let resp = send_json(
            client.put(format!("http://{addr}/api/detection")),
            serde_json::json!({ "enabled": true }),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 202);
        poll_status(&client, addr, |s| s["detecting"] == true).await;

        let resp = send_json(
            client.put(format!("http://{addr}/api/detection")),
            serde_json::json!({ "enabled": false }),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 202);
        poll_status(&client, addr, |s| s["detecting"] == false).await;
    }

    #[tokio::test]
    async fn player_reports_update_status() {
        let (addr, _) = start().await;
        let client = reqwest::Client::new();

        let resp = send_json(
            client.post(format!("http://{addr}/api/player/state")),
            serde_json::json!({ "is_playing": true, "rate": 1.5 }),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 202);
        let status = poll_status(&client, addr, |s| s["player"]["is_playing"] == true).await;
        assert_eq!(status["player"]["rate"], 1.5);

        let resp = send_json(
            client.post(format!("http://{addr}/api/player/state")),
            serde_json::json!({ "is_playing": true, "rate": 0.0 }),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn command_stream_delivers_relayed_commands() {
        let (addr, commands) = start().await;
        let client = reqwest::Client::new();

        let mut resp = client
            .get(format!("http://{addr}/api/player/commands"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(commands.receiver_count(), 1);

        commands
            .send(RelayedCommand {
                command: PlaybackCommand::Play,
                state: PlayerState {
                    is_playing: true,
                    rate: 1.0,
                },
            })
            .unwrap();

        let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8_lossy(&chunk);
        assert!(text.contains("event: command"), "{text}");
        assert!(text.contains(r#""command":"play""#), "{text}");
    }

    #[tokio::test]
    async fn last_page_leaving_releases_camera() {
        let config = Config::parse("[camera]\nurl = \"http://camera.test/\"\n").unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(CountingSource {
            active: Arc::clone(&active),
        });
        let player = RemotePlayer::new(config.playback.clone());
        let commands = player.command_sender();
        let (pipeline, handle) = Pipeline::new(&config, source, NoHands, player);
        pipeline.spawn();

        let state = ApiState {
            pipeline: handle.clone(),
            commands: commands.clone(),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await.unwrap() });

        let client = reqwest::Client::new();
        let page = client
            .get(format!("http://{addr}/api/player/commands"))
            .send()
            .await
            .unwrap();
        assert_eq!(page.status().as_u16(), 200);

        let resp = send_json(
            client.put(format!("http://{addr}/api/detection")),
            serde_json::json!({ "enabled": true }),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 202);
        poll_status(&client, addr, |s| s["detecting"] == true).await;
        assert_eq!(active.load(Ordering::SeqCst), 1);

        drop(page);
        drop(client);

        let mut status = handle.watch_status();
        tokio::time::timeout(Duration::from_secs(20), status.wait_for(|s| !s.detecting))
            .await
            .expect("detection still on after the page left")
            .unwrap();
        for _ in 0..50 {
            if active.load(Ordering::SeqCst) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert_eq!(commands.receiver_count(), 0);
    }

    #[tokio::test]
    async fn one_page_leaving_keeps_detection_for_the_other() {
        let (addr, commands) = start().await;
        let client = reqwest::Client::new();
        let first = client
            .get(format!("http://{addr}/api/player/commands"))
            .send()
            .await
            .unwrap();
        let _second = reqwest::Client::new()
            .get(format!("http://{addr}/api/player/commands"))
            .send()
            .await
            .unwrap();
        send_json(
            client.put(format!("http://{addr}/api/detection")),
            serde_json::json!({ "enabled": true }),
        )
        .await;
        poll_status(&client, addr, |s| s["detecting"] == true).await;

        drop(first);
        for _ in 0..1_000 {
            if commands.receiver_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(commands.receiver_count(), 1);
        let (_, status) = get_json(&client, format!("http://{addr}/api/status")).await;
        assert_eq!(status["detecting"], true);
    }
}

use futures_util::future::BoxFuture;
use std::time::Duration;
use tempo_common::frame::looks_like_jpeg;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{FrameSink, FrameSource, SourceError};

/// Consecutive failed snapshots after which the camera counts as lost.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Polling-based fallback: periodically fetch single JPEG snapshots.
pub struct PollingSource {
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl PollingSource {
    pub fn new(url: &str, interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            url: url.to_string(),
            interval,
            client,
        }
    }

    async fn fetch(&self) -> Result<bytes::Bytes, SourceError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::CameraUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SourceError::HttpStatus(resp.status().as_u16()));
        }
        resp.bytes().await.map_err(SourceError::Stream)
    }

    async fn poll_loop(&self, sink: &mut FrameSink) -> Result<(), SourceError> {
        info!(url = self.url, interval = ?self.interval, "polling camera snapshots");
        // Late ticks are skipped rather than bunched up: only fresh frames matter.
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures: u32 = 0;
        let mut ever_connected = false;

        loop {
            ticker.tick().await;
            match self.fetch().await {
                Ok(jpeg) => {
                    failures = 0;
                    ever_connected = true;
                    sink.connected();
                    if looks_like_jpeg(&jpeg) {
                        sink.push(jpeg);
                    } else {
                        debug!(bytes = jpeg.len(), "skipping non-JPEG snapshot");
                    }
                }
                Err(e) if !ever_connected => return Err(e),
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "failed to fetch camera snapshot");
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        return Err(e);
                    }
                }
            }
        }
    }
}

impl FrameSource for PollingSource {
    fn name(&self) -> &str {
        "polling"
    }

    fn stream<'a>(&'a self, sink: &'a mut FrameSink) -> BoxFuture<'a, Result<(), SourceError>> {
        Box::pin(self.poll_loop(sink))
    }
}

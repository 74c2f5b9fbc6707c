use futures_util::future::BoxFuture;
use image::ImageReader;
use serde::Deserialize;
use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;
use tempo_common::config::ExtractorConfig;
use tempo_common::frame::Frame;
use tempo_common::landmark::{Handedness, Landmark, LandmarkSet};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ExtractError, HandExtractor};

const READY_TIMEOUT: Duration = Duration::from_secs(20);
/// Pause after a failed start before the model is launched again.
const RESPAWN_DELAY: Duration = Duration::from_secs(5);
const REQUEST_HEADER_SIZE: usize = 21; // 8 id + 4 width + 4 height + 1 channels + 4 len
const RGB_CHANNELS: u8 = 3;

#[derive(Deserialize, Debug)]
struct HandReply {
    handedness: Handedness,
    score: f32,
    landmarks: Vec<Landmark>,
}

#[derive(Deserialize, Debug)]
struct ModelReply {
    seq: u64,
    #[serde(default)]
    hands: Vec<HandReply>,
    #[serde(default)]
    error: Option<String>,
}

/// A running landmark model.
struct ModelProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Landmark extractor backed by an external model process.
///
/// Request on stdin (big-endian):
///   [0..8]   request id     (u64)
///   [8..12]  width          (u32)
///   [12..16] height         (u32)
///   [16]     channels = 3   (u8, RGB)
///   [17..21] payload length (u32)
///   [21..]   RGB pixels, row-major
///
/// Reply on stdout: one JSON object per line carrying the request id as
/// `seq`. Replies to cancelled requests are read and discarded.
pub struct SubprocessExtractor {
    config: ExtractorConfig,
    process: Option<ModelProcess>,
    next_request: u64,
    /// Set while a request is being written. Still set on entry means the
    /// previous write was cancelled half-way and the stream is unusable.
    writing: bool,
    /// Earliest time a failed model may be started again.
    respawn_at: Option<Instant>,
}

impl SubprocessExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            process: None,
            next_request: 0,
            writing: false,
            respawn_at: None,
        }
    }

    async fn ensure_running(&mut self) -> Result<(), ExtractError> {
        if self.process.is_some() {
            return Ok(());
        }
        match self.spawn().await {
            Ok(process) => {
                self.process = Some(process);
                self.respawn_at = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?RESPAWN_DELAY, "landmark model failed to start");
                self.respawn_at = Some(Instant::now() + RESPAWN_DELAY);
                Err(e)
            }
        }
    }

    async fn spawn(&self) -> Result<ModelProcess, ExtractError> {
        info!(command = self.config.command, args = ?self.config.args, "starting landmark model");
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractError::Spawn("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Spawn("child stdout unavailable".into()))?;
        let mut stdout = BufReader::new(stdout);

        let mut ready = String::new();
        let read = tokio::time::timeout(READY_TIMEOUT, stdout.read_line(&mut ready))
            .await
            .map_err(|_| ExtractError::Timeout(READY_TIMEOUT.as_millis() as u64))??;
        if read == 0 || ready.trim() != "READY" {
            return Err(ExtractError::Protocol(format!(
                "expected READY, got {:?}",
                ready.trim()
            )));
        }
        info!("landmark model ready");

        Ok(ModelProcess {
            child,
            stdin,
            stdout,
        })
    }

    fn discard_process(&mut self, reason: &str) {
        if let Some(mut process) = self.process.take() {
            warn!(reason, "restarting landmark model");
            let _ = process.child.start_kill();
        }
        self.writing = false;
    }

    async fn roundtrip(&mut self, request_id: u64, request: &[u8]) -> Result<ModelReply, ExtractError> {
        self.writing = true;
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| ExtractError::Protocol("model process not running".into()))?;
        process.stdin.write_all(request).await?;
        process.stdin.flush().await?;
        self.writing = false;

        let mut line = String::new();
        loop {
            line.clear();
            let read = process.stdout.read_line(&mut line).await?;
            if read == 0 {
                return Err(ExtractError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "landmark model closed stdout",
                )));
            }
            let reply = parse_reply(&line)?;
            if reply.seq == request_id {
                return Ok(reply);
            }
            if reply.seq > request_id {
                return Err(ExtractError::Protocol(format!(
                    "reply for future request {} while waiting for {request_id}",
                    reply.seq
                )));
            }
            debug!(stale = reply.seq, request_id, "discarding stale model reply");
        }
    }

    async fn extract_frame(&mut self, frame: &Frame) -> Result<Vec<LandmarkSet>, ExtractError> {
        if self.writing {
            self.discard_process("previous request was cancelled mid-write");
        }
        if let Some(at) = self.respawn_at {
            let now = Instant::now();
            if self.process.is_none() && now < at {
                return Err(ExtractError::Spawn(format!(
                    "landmark model unavailable, next start in {} ms",
                    (at - now).as_millis()
                )));
            }
        }

        let jpeg = frame.jpeg.clone();
        let (width, height, rgb) = tokio::task::spawn_blocking(move || decode_rgb(&jpeg))
            .await
            .map_err(|e| ExtractError::Decode(e.to_string()))??;

        self.ensure_running().await?;

        let request_id = self.next_request;
        self.next_request += 1;
        let request = encode_request(request_id, width, height, &rgb);

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let reply = match tokio::time::timeout(timeout, self.roundtrip(request_id, &request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                self.discard_process("model I/O failed");
                return Err(e);
            }
            Err(_) => {
                self.discard_process("model timed out");
                return Err(ExtractError::Timeout(self.config.timeout_ms));
            }
        };

        if let Some(error) = reply.error {
            return Err(ExtractError::Model(error));
        }
        debug!(seq = frame.seq, request_id, hands = reply.hands.len(), "model reply");
        Ok(select_hands(
            reply.hands,
            self.config.min_hand_confidence,
            self.config.max_hands,
        ))
    }
}

impl HandExtractor for SubprocessExtractor {
    fn extract<'a>(
        &'a mut self,
        frame: &'a Frame,
    ) -> BoxFuture<'a, Result<Vec<LandmarkSet>, ExtractError>> {
        Box::pin(self.extract_frame(frame))
    }
}

/// Serialize one extraction request.
fn encode_request(request_id: u64, width: u32, height: u32, rgb: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(REQUEST_HEADER_SIZE + rgb.len());
    buf.extend_from_slice(&request_id.to_be_bytes());
    buf.extend_from_slice(&width.to_be_bytes());
    buf.extend_from_slice(&height.to_be_bytes());
    buf.push(RGB_CHANNELS);
    buf.extend_from_slice(&(rgb.len() as u32).to_be_bytes());
    buf.extend_from_slice(rgb);
    buf
}

fn parse_reply(line: &str) -> Result<ModelReply, ExtractError> {
    serde_json::from_str(line.trim())
        .map_err(|e| ExtractError::Protocol(format!("bad reply {:?}: {e}", line.trim())))
}

/// Decode a JPEG into packed RGB pixels.
fn decode_rgb(jpeg: &[u8]) -> Result<(u32, u32, Vec<u8>), ExtractError> {
    let img = ImageReader::new(Cursor::new(jpeg))
        .with_guessed_format()
        .map_err(|e| ExtractError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| ExtractError::Decode(e.to_string()))?
        .to_rgb8();
    let (width, height) = img.dimensions();
    Ok((width, height, img.into_raw()))
}

/// Keep confident, well-formed hands, most confident first.
fn select_hands(hands: Vec<HandReply>, min_confidence: f32, max_hands: usize) -> Vec<LandmarkSet> {
    let mut sets: Vec<LandmarkSet> = hands
        .into_iter()
        .filter(|hand| hand.score >= min_confidence)
        .filter_map(|hand| {
            match LandmarkSet::from_points(&hand.landmarks, hand.handedness, hand.score) {
                Ok(set) => Some(set),
                Err(e) => {
                    warn!(error = %e, "dropping malformed hand");
                    None
                }
            }
        })
        .collect();
    sets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    sets.truncate(max_hands);
    sets
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};

    fn tiny_jpeg() -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 2, image::Rgb([200, 10, 10]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    fn hand_json(handedness: &str, score: f32, points: usize) -> String {
        let landmarks: Vec<String> = (0..points)
            .map(|i| format!(r#"{{"x":{},"y":0.5,"z":0.0,"visibility":0.9}}"#, i as f32 / 100.0))
            .collect();
        format!(
            r#"{{"handedness":"{handedness}","score":{score},"landmarks":[{}]}}"#,
            landmarks.join(",")
        )
    }

    #[test]
    fn request_layout() {
        let buf = encode_request(0x0102, 640, 480, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(buf.len(), REQUEST_HEADER_SIZE + 6);
        assert_eq!(u64::from_be_bytes(buf[0..8].try_into().unwrap()), 0x0102);
        assert_eq!(u32::from_be_bytes(buf[8..12].try_into().unwrap()), 640);
        assert_eq!(u32::from_be_bytes(buf[12..16].try_into().unwrap()), 480);
        assert_eq!(buf[16], RGB_CHANNELS);
        assert_eq!(u32::from_be_bytes(buf[17..21].try_into().unwrap()), 6);
        assert_eq!(&buf[21..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn reply_with_hands_parses() {
        let line = format!(r#"{{"seq":4,"hands":[{}],"error":null}}"#, hand_json("Left", 0.9, 21));
        let reply = parse_reply(&line).unwrap();
        assert_eq!(reply.seq, 4);
        assert_eq!(reply.hands.len(), 1);
        assert_eq!(reply.hands[0].handedness, Handedness::Left);
        assert_eq!(reply.hands[0].landmarks[3].confidence, 0.9);
    }

    #[test]
    fn garbage_reply_is_protocol_error() {
        assert!(matches!(parse_reply("Traceback (most recent call last)"), Err(ExtractError::Protocol(_))));
    }

    #[test]
    fn select_hands_filters_and_orders() {
        let line = format!(
            r#"{{"seq":1,"hands":[{},{},{},{}]}}"#,
            hand_json("Left", 0.75, 21),
            hand_json("Right", 0.95, 21),
            hand_json("Left", 0.3, 21),
            hand_json("Right", 0.99, 20),
        );
        let reply = parse_reply(&line).unwrap();
        let sets = select_hands(reply.hands, 0.7, 2);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].handedness, Handedness::Right);
        assert_eq!(sets[0].confidence, 0.95);
        assert_eq!(sets[1].confidence, 0.75);

        let line = format!(r#"{{"seq":1,"hands":[{},{}]}}"#, hand_json("Left", 0.8, 21), hand_json("Right", 0.9, 21));
        let sets = select_hands(parse_reply(&line).unwrap().hands, 0.7, 1);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].handedness, Handedness::Right);
    }

    #[test]
    fn decode_produces_rgb_pixels() {
        let (w, h, rgb) = decode_rgb(&tiny_jpeg()).unwrap();
        assert_eq!((w, h), (4, 2));
        assert_eq!(rgb.len(), 4 * 2 * 3);
        assert!(matches!(decode_rgb(&[0xFF, 0xD8, 0x00]), Err(ExtractError::Decode(_))));
    }

    fn config(command: &str, args: &[&str], timeout_ms: u64) -> ExtractorConfig {
        ExtractorConfig {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_ms,
            ..ExtractorConfig::default()
        }
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let mut extractor =
            SubprocessExtractor::new(config("/nonexistent/landmark-model", &[], 500));
        let frame = Frame::new(tiny_jpeg(), 0, 0);
        assert!(matches!(extractor.extract(&frame).await, Err(ExtractError::Spawn(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_waits_before_respawning() {
        let mut extractor =
            SubprocessExtractor::new(config("/nonexistent/landmark-model", &[], 500));
        let frame = Frame::new(tiny_jpeg(), 0, 0);
        assert!(matches!(extractor.extract(&frame).await, Err(ExtractError::Spawn(_))));
        let first_retry = extractor.respawn_at.unwrap();

        // Frames inside the pause fail fast without another launch.
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(66)).await;
            let err = extractor.extract(&frame).await.unwrap_err();
            assert!(err.to_string().contains("next start in"), "{err}");
        }
        assert_eq!(extractor.respawn_at, Some(first_retry));

        tokio::time::advance(RESPAWN_DELAY).await;
        let err = extractor.extract(&frame).await.unwrap_err();
        assert!(!err.to_string().contains("next start in"), "{err}");
        assert!(extractor.respawn_at.unwrap() > first_retry);
    }

    #[tokio::test]
    async fn model_without_ready_is_protocol_error() {
        let mut extractor = SubprocessExtractor::new(config("sh", &["-c", "echo HELLO"], 2000));
        let frame = Frame::new(tiny_jpeg(), 0, 0);
        assert!(matches!(extractor.extract(&frame).await, Err(ExtractError::Protocol(_))));
        assert!(extractor.process.is_none());
    }

    #[tokio::test]
    async fn silent_model_times_out_and_is_discarded() {
        let mut extractor =
            SubprocessExtractor::new(config("sh", &["-c", "echo READY; sleep 5"], 200));
        let frame = Frame::new(tiny_jpeg(), 0, 0);
        assert!(matches!(extractor.extract(&frame).await, Err(ExtractError::Timeout(200))));
        assert!(extractor.process.is_none());
    }

    #[tokio::test]
    async fn scripted_model_answers_request() {
        // Answers request 0 without reading it; the request fits in the pipe buffer.
        let script = format!(
            "echo READY; echo '{{\"seq\":0,\"hands\":[{}]}}'; sleep 1",
            hand_json("Left", 0.9, 21)
        );
        let mut extractor = SubprocessExtractor::new(config("sh", &["-c", &script], 2000));
        let frame = Frame::new(tiny_jpeg(), 0, 0);
        let hands = extractor.extract(&frame).await.unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0].handedness, Handedness::Left);
        assert!(extractor.process.is_some());
    }
}

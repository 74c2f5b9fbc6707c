use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use std::time::Duration;
use tempo_common::frame::looks_like_jpeg;
use tracing::{debug, info};

use super::{FrameSink, FrameSource, SourceError};

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of part headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg {
        /// Offset to resume the boundary search from.
        scan_from: usize,
    },
}

/// Incremental splitter for a `multipart/x-mixed-replace` body.
pub struct MjpegParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
}

impl MjpegParser {
    pub fn new(boundary: &str) -> Self {
        let boundary = boundary.trim_start_matches("--");
        Self {
            boundary: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
        }
    }

    /// Feed one network chunk and return every JPEG it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let marker_len = self.boundary.len();
        let mut out = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        let _ = self.buffer.split_to(pos + marker_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > marker_len {
                            let _ = self.buffer.split_to(self.buffer.len() - marker_len);
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.state = ParseState::CollectingJpeg { scan_from: 0 };
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg { scan_from } => {
                    match find_subsequence(&self.buffer[scan_from..], &self.boundary) {
                        Some(pos) => {
                            let jpeg_end = scan_from + pos;
                            // Strip trailing \r\n before boundary
                            let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                                jpeg_end - 2
                            } else {
                                jpeg_end
                            };
                            let mut part = self.buffer.split_to(jpeg_end + marker_len);
                            part.truncate(end);
                            if !part.is_empty() {
                                out.push(part.freeze());
                            }
                            self.state = ParseState::SeekingHeaderEnd;
                        }
                        None => {
                            // Avoid re-scanning data already searched
                            self.state = ParseState::CollectingJpeg {
                                scan_from: self.buffer.len().saturating_sub(marker_len),
                            };
                            break;
                        }
                    }
                }
            }
        }

        out
    }
}

/// Extract the multipart boundary from a `Content-Type` header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"'))
        .filter(|b| !b.is_empty())
}

/// Camera exposed as an HTTP MJPEG stream.
pub struct MjpegSource {
    url: String,
    client: reqwest::Client,
}

impl MjpegSource {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            url: url.to_string(),
            client,
        }
    }

    async fn consume(&self, sink: &mut FrameSink) -> Result<(), SourceError> {
        info!(url = self.url, "connecting to MJPEG stream");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::CameraUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }

        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or(DEFAULT_BOUNDARY)
            .to_string();
        info!(status = %response.status(), boundary, "connected to MJPEG stream");
        sink.connected();

        let mut parser = MjpegParser::new(&boundary);
        let mut byte_stream = response.bytes_stream();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(SourceError::Stream)?;
            for jpeg in parser.push(&chunk) {
                if looks_like_jpeg(&jpeg) {
                    sink.push(jpeg);
                } else {
                    debug!(bytes = jpeg.len(), "skipping non-JPEG part");
                }
            }
        }

        Ok(())
    }
}

impl FrameSource for MjpegSource {
    fn name(&self) -> &str {
        "mjpeg"
    }

    fn stream<'a>(&'a self, sink: &'a mut FrameSink) -> BoxFuture<'a, Result<(), SourceError>> {
        Box::pin(self.consume(sink))
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

use bytes::Bytes;

/// A camera frame as handed to the landmark extractor.
///
/// `timestamp_ms` is monotonic (milliseconds since the detector's clock
/// epoch), never wall-clock, so the debouncer can rely on it for ordering.
/// `seq` restarts at zero for every camera session.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub timestamp_ms: u64,
    /// Encoded JPEG bytes, opaque to everything except the extractor.
    pub jpeg: Bytes,
}

impl Frame {
    pub fn new(jpeg: impl Into<Bytes>, timestamp_ms: u64, seq: u64) -> Self {
        Self {
            seq,
            timestamp_ms,
            jpeg: jpeg.into(),
        }
    }

    /// Returns the size of the encoded image in bytes.
    pub fn payload_size(&self) -> usize {
        self.jpeg.len()
    }
}

/// Quick sanity check against the JPEG SOI marker. Sources use it to skip
/// garbage parts before they become frames.
pub fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xD8])
}

//! Hand landmark extraction.

pub mod subprocess;

use futures_util::future::BoxFuture;
use tempo_common::frame::Frame;
use tempo_common::landmark::LandmarkSet;

pub use subprocess::SubprocessExtractor;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to spawn landmark model: {0}")]
    Spawn(String),
    #[error("landmark model I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("landmark model protocol violation: {0}")]
    Protocol(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("landmark model did not answer within {0} ms")]
    Timeout(u64),
    #[error("landmark model reported: {0}")]
    Model(String),
}

/// Produces zero or more hand landmark sets per frame.
///
/// Errors are per frame: the caller skips the frame and carries on, so an
/// implementation must stay usable after returning `Err`. Dropping the
/// returned future cancels the extraction.
pub trait HandExtractor: Send + 'static {
    fn extract<'a>(
        &'a mut self,
        frame: &'a Frame,
    ) -> BoxFuture<'a, Result<Vec<LandmarkSet>, ExtractError>>;
}

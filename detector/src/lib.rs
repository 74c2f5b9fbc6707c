pub mod api;
pub mod classifier;
pub mod debounce;
pub mod extractor;
pub mod mapper;
pub mod pipeline;
pub mod player;
pub mod replay;
pub mod source;
pub mod tempo;

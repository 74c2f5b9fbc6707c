pub mod config;
pub mod frame;
pub mod gesture;
pub mod landmark;
pub mod video;

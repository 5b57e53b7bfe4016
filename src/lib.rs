//! Local video catalog with background previews and resumable playback positions.

pub mod cli;
pub mod config;
pub mod media;
pub mod nav;
pub mod session;
pub mod store;

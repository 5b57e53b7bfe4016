//! Durable playback positions.

pub mod map;
pub mod positions;

pub use map::{JsonFileMap, KeyValueMap, MemoryMap, StoreError};
pub use positions::PositionStore;

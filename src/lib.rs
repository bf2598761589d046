//! Unattended video playout driver for an OBS-style engine.
//!
//! Walks a media library, loads each file into the engine's media source,
//! mirrors the title and timecode into a text source, and keeps going across
//! engine restarts and bad files.

pub mod catalog;
pub mod engine;
pub mod orchestrator;
pub mod overlay;
pub mod session;
pub mod settings;
pub mod shutdown;
pub mod status;
pub mod store;

pub use catalog::{Catalog, MediaItem, PlaylistOrder};
pub use engine::{EngineControl, EngineError, ObsClient};
pub use orchestrator::{Exit, Orchestrator, Phase, StopReason};
pub use settings::Settings;

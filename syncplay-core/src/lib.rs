//! # SyncPlay Core
//!
//! Synchronized playback of a frame sequence and its PCM track: one
//! buffering thread feeding two bounded queues, a frame-paced render thread,
//! and a pull callback for the host audio thread.

// ============================================================================
// Shared State
// ============================================================================
pub mod state;
pub mod frame_queue;
pub mod gate;
pub mod config;

// ============================================================================
// Frame Sources
// ============================================================================
pub mod frame_source;
#[cfg(feature = "image-sequence")]
pub mod image_sequence;

// ============================================================================
// Playback Threads
// ============================================================================
pub mod pipeline;
pub mod renderer;
pub mod audio;
#[cfg(feature = "audio")]
pub mod audio_output;

// ============================================================================
// Control
// ============================================================================
pub mod transport;

pub use audio::{AudioFormat, AudioPull, AudioPuller, AudioStats, StreamSignal};
pub use config::{ConfigError, PlayerConfig};
pub use frame_source::{AudioChunk, FrameDims, FrameSource, SourceError, TestPatternSource, VideoFrame};
pub use renderer::DisplaySink;
pub use state::{format_position, PlaybackMode, PlaybackState};
pub use transport::{NullReporter, PlayerError, PositionReporter, Session, SessionReport};

#[cfg(feature = "image-sequence")]
pub use image_sequence::ImageSequenceSource;

#[cfg(feature = "audio")]
pub use audio_output::{AudioOutput, OutputError};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

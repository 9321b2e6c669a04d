//! Shared Playback State
//!
//! The control block read by the buffering thread, the render thread and the
//! audio callback on every iteration. Everything is atomic so none of them
//! ever holds a lock across a blocking queue call.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shown while no position is meaningful (after stop).
pub const POSITION_PLACEHOLDER: &str = "--:--";

/// Transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlaybackMode {
    Playing = 0,
    Paused = 1,
}

impl PlaybackMode {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Playing,
            _ => Self::Paused,
        }
    }

    /// Glyph for a play/pause indicator: what pressing the button would do.
    pub fn indicator(&self) -> &'static str {
        match self {
            Self::Playing => "\u{23f8}",
            Self::Paused => "\u{25b6}",
        }
    }
}

/// Control block shared by every actor of a playback session
#[derive(Debug)]
pub struct PlaybackState {
    frame_pointer: AtomicU64,
    mode: AtomicU8,
    total_frames: u64,
    frame_interval: Duration,
}

impl PlaybackState {
    /// New session state: pointer at 0, mode Playing.
    pub fn new(total_frames: u64, frame_interval: Duration) -> Self {
        Self {
            frame_pointer: AtomicU64::new(0),
            mode: AtomicU8::new(PlaybackMode::Playing as u8),
            total_frames,
            frame_interval,
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        PlaybackMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    pub fn set_mode(&self, mode: PlaybackMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.mode() == PlaybackMode::Playing
    }

    pub fn frame_pointer(&self) -> u64 {
        self.frame_pointer.load(Ordering::SeqCst)
    }

    /// User-initiated pointer write (seek, stop). Clamped to `total_frames`.
    pub fn set_frame_pointer(&self, frame: u64) -> u64 {
        let frame = frame.min(self.total_frames);
        self.frame_pointer.store(frame, Ordering::SeqCst);
        frame
    }

    /// Advance `expected -> expected + 1`.
    ///
    /// Fails when a seek or stop replaced the pointer while the frame at
    /// `expected` was being buffered; the user's write is kept.
    pub fn advance_from(&self, expected: u64) -> bool {
        if expected >= self.total_frames {
            return false;
        }
        self.frame_pointer
            .compare_exchange(expected, expected + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Pointer has reached the end of the stream
    pub fn at_end(&self) -> bool {
        self.frame_pointer() >= self.total_frames
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn position_label(&self, frame: u64) -> String {
        format_position(self.frame_interval, frame)
    }
}

/// Format the elapsed time at `frame` as `MM:SS`.
///
/// Seconds are floored and minutes wrap at the hour.
pub fn format_position(frame_interval: Duration, frame: u64) -> String {
    let secs = (frame_interval.as_nanos() * u128::from(frame) / 1_000_000_000) as u64;
    format!("{:02}:{:02}", (secs / 60) % 60, secs % 60)
}

//! Frame Sources
//!
//! Index-addressed access to decoded video frames and their matching PCM
//! chunks. The engine only ever asks for `0..frame_count()`.

use std::f64::consts::TAU;
use std::time::Duration;

use thiserror::Error;

use crate::audio::AudioFormat;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Frame {index} out of range (source has {count} frames)")]
    OutOfRange { index: u64, count: u64 },
    #[error("No frames found in {0}")]
    Empty(String),
    #[error("Image decode failed for {path}: {reason}")]
    Image { path: String, reason: String },
    #[error("Audio decode failed: {0}")]
    Audio(String),
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed frame geometry of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDims {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel (3 = RGB24)
    pub channels: u32,
}

impl FrameDims {
    pub const fn rgb(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channels: 3,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

/// A decoded video frame, packed row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Source index this frame was produced from
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// All-black frame, shown before playback and after stop
    pub fn blank(dims: FrameDims) -> Self {
        Self {
            index: 0,
            width: dims.width,
            height: dims.height,
            channels: dims.channels,
            data: vec![0u8; dims.buffer_size()],
        }
    }
}

/// Interleaved little-endian PCM for exactly one video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub index: u64,
    pub data: Vec<u8>,
}

/// Index-addressed media source shared by a playback session
pub trait FrameSource: Send + Sync {
    /// Number of video frames (and audio chunks)
    fn frame_count(&self) -> u64;

    /// Nominal spacing between video frames
    fn frame_interval(&self) -> Duration;

    fn dimensions(&self) -> FrameDims;

    fn audio_format(&self) -> AudioFormat;

    /// Decoded video frame at `index`; fails when `index >= frame_count()`
    fn video_frame(&self, index: u64) -> Result<VideoFrame, SourceError>;

    /// PCM chunk at `index`, `audio_format().chunk_bytes()` long
    fn audio_frame(&self, index: u64) -> Result<AudioChunk, SourceError>;

    /// Name for logs
    fn name(&self) -> &str {
        "source"
    }
}

/// Frame interval for a nominal frame rate
pub fn interval_for_fps(fps: f64) -> Duration {
    if fps > 0.0 {
        Duration::from_nanos((1_000_000_000.0 / fps).round() as u64)
    } else {
        Duration::from_millis(33)
    }
}

/// Sample-frames of audio per video frame, at least one
pub(crate) fn frames_per_buffer(sample_rate: u32, fps: f64) -> u32 {
    (f64::from(sample_rate) / fps).round().max(1.0) as u32
}

pub(crate) fn check_index(index: u64, count: u64) -> Result<(), SourceError> {
    if index >= count {
        return Err(SourceError::OutOfRange { index, count });
    }
    Ok(())
}

// ============================================================================
// Test Pattern Source
// ============================================================================

/// Synthetic source: animated colour bars plus a 440 Hz tone.
///
/// Deterministic per index. The first eight bytes of every frame hold the
/// index as little-endian `u64`, so consumers can tell which frame they got.
pub struct TestPatternSource {
    frames: u64,
    interval: Duration,
    dims: FrameDims,
    format: AudioFormat,
    tone_hz: f64,
}

impl TestPatternSource {
    pub fn new(frames: u64, fps: f64, dims: FrameDims) -> Self {
        let sample_rate = 44_100u32;
        let fps = if fps > 0.0 { fps } else { 30.0 };
        Self {
            frames,
            interval: interval_for_fps(fps),
            dims,
            format: AudioFormat {
                sample_width: 2,
                channels: 2,
                sample_rate,
                frames_per_buffer: frames_per_buffer(sample_rate, fps),
            },
            tone_hz: 440.0,
        }
    }

    /// Index stamped into the first bytes of a test pattern frame
    pub fn stamped_index(frame: &VideoFrame) -> Option<u64> {
        let bytes: [u8; 8] = frame.data.get(..8)?.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }
}

impl FrameSource for TestPatternSource {
    fn frame_count(&self) -> u64 {
        self.frames
    }

    fn frame_interval(&self) -> Duration {
        self.interval
    }

    fn dimensions(&self) -> FrameDims {
        self.dims
    }

    fn audio_format(&self) -> AudioFormat {
        self.format
    }

    fn video_frame(&self, index: u64) -> Result<VideoFrame, SourceError> {
        check_index(index, self.frames)?;

        let FrameDims { width, height, channels } = self.dims;
        let mut data = vec![0u8; self.dims.buffer_size()];
        let offset = (index % 256) as u8;
        let stride = channels as usize;

        for y in 0..height {
            for x in 0..width {
                let idx = (y as usize * width as usize + x as usize) * stride;
                let bar = (x * 8 / width.max(1)) as u8;
                let rgb = [
                    ((bar & 1) * 255).wrapping_add(offset),
                    (((bar >> 1) & 1) * 255).wrapping_add(offset),
                    (((bar >> 2) & 1) * 255).wrapping_add(offset),
                ];
                for (c, value) in rgb.iter().take(stride).enumerate() {
                    data[idx + c] = *value;
                }
            }
        }

        let stamp = index.to_le_bytes();
        let n = stamp.len().min(data.len());
        data[..n].copy_from_slice(&stamp[..n]);

        Ok(VideoFrame {
            index,
            width,
            height,
            channels,
            data,
        })
    }

    fn audio_frame(&self, index: u64) -> Result<AudioChunk, SourceError> {
        check_index(index, self.frames)?;

        let per_chunk = self.format.frames_per_buffer as u64;
        let rate = self.format.sample_rate as f64;
        let channels = self.format.channels as usize;
        let mut data = Vec::with_capacity(self.format.chunk_bytes());

        for i in 0..per_chunk {
            // Phase-continuous across chunks
            let t = (index * per_chunk + i) as f64 / rate;
            let sample = ((TAU * self.tone_hz * t).sin() * 0.25 * i16::MAX as f64) as i16;
            for _ in 0..channels {
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }

        Ok(AudioChunk { index, data })
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> TestPatternSource {
        TestPatternSource::new(10, 25.0, FrameDims::rgb(32, 8))
    }

    #[test]
    fn test_dims() {
        let dims = FrameDims::rgb(640, 480);
        assert_eq!(dims.buffer_size(), 640 * 480 * 3);
        assert_eq!(VideoFrame::blank(dims).data.len(), dims.buffer_size());
    }

    #[test]
    fn test_pattern_frames() {
        let src = source();
        let frame = src.video_frame(7).unwrap();
        assert_eq!(frame.index, 7);
        assert_eq!(frame.data.len(), 32 * 8 * 3);
        assert_eq!(TestPatternSource::stamped_index(&frame), Some(7));
        assert_eq!(src.frame_interval(), Duration::from_millis(40));
    }

    #[test]
    fn test_pattern_audio_size() {
        let src = source();
        let chunk = src.audio_frame(3).unwrap();
        assert_eq!(chunk.index, 3);
        assert_eq!(chunk.data.len(), src.audio_format().chunk_bytes());
        assert_eq!(src.audio_format().frames_per_buffer, 1_764);
    }

    #[test]
    fn test_extreme_frame_rate_keeps_audio_paced() {
        let src = TestPatternSource::new(1, 100_000.0, FrameDims::rgb(2, 2));
        let format = src.audio_format();
        assert_eq!(format.frames_per_buffer, 1);
        assert_eq!(format.chunk_bytes(), 4);
        assert!(!format.buffer_duration().is_zero());
        assert_eq!(src.audio_frame(0).unwrap().data.len(), 4);
    }

    #[test]
    fn test_out_of_range() {
        let src = source();
        assert!(matches!(
            src.video_frame(10),
            Err(SourceError::OutOfRange { index: 10, count: 10 })
        ));
        assert!(src.audio_frame(11).is_err());
    }
}

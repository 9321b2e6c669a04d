//! Image Sequence Source
//!
//! A directory of still frames (sorted by file name) plus the first `*.wav`
//! found next to them. Frames are decoded on request; the audio track is read
//! once and sliced into one chunk per video frame.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::imageops::FilterType;

use crate::audio::AudioFormat;
use crate::frame_source::{
    check_index, frames_per_buffer, interval_for_fps, AudioChunk, FrameDims, FrameSource,
    SourceError, VideoFrame,
};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

pub struct ImageSequenceSource {
    name: String,
    frames: Vec<PathBuf>,
    interval: Duration,
    dims: FrameDims,
    format: AudioFormat,
    /// Whole track, already converted to the output sample width
    pcm: Vec<u8>,
}

impl ImageSequenceSource {
    /// Open `dir` at `fps`, taking frame dimensions from the first image
    pub fn open<P: AsRef<Path>>(dir: P, fps: f64) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let frames = list_frames(dir)?;
        let first = decode_rgb(&frames[0])?;
        let dims = FrameDims::rgb(first.width(), first.height());
        Self::build(dir, frames, fps, dims)
    }

    /// Open `dir` at `fps`, scaling every frame to `dims`
    pub fn with_dims<P: AsRef<Path>>(dir: P, fps: f64, dims: FrameDims) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let frames = list_frames(dir)?;
        Self::build(dir, frames, fps, FrameDims::rgb(dims.width, dims.height))
    }

    fn build(dir: &Path, frames: Vec<PathBuf>, fps: f64, dims: FrameDims) -> Result<Self, SourceError> {
        let fps = if fps > 0.0 { fps } else { 30.0 };

        let (format, pcm) = match find_wav(dir)? {
            Some(wav) => {
                tracing::info!("Audio track: {}", wav.display());
                read_wav(&wav, fps)?
            }
            None => {
                tracing::warn!("No .wav in {}, playing silence", dir.display());
                (silent_format(fps), Vec::new())
            }
        };

        tracing::info!(
            "Image sequence {}: {} frames, {}x{} @ {} fps, audio {} Hz x{} ({}-byte samples)",
            dir.display(),
            frames.len(),
            dims.width,
            dims.height,
            fps,
            format.sample_rate,
            format.channels,
            format.sample_width
        );

        Ok(Self {
            name: dir.display().to_string(),
            frames,
            interval: interval_for_fps(fps),
            dims,
            format,
            pcm,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
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
        check_index(index, self.frame_count())?;

        let mut rgb = decode_rgb(&self.frames[index as usize])?;
        if rgb.width() != self.dims.width || rgb.height() != self.dims.height {
            rgb = image::imageops::resize(&rgb, self.dims.width, self.dims.height, FilterType::Triangle);
        }

        Ok(VideoFrame {
            index,
            width: self.dims.width,
            height: self.dims.height,
            channels: self.dims.channels,
            data: rgb.into_raw(),
        })
    }

    fn audio_frame(&self, index: u64) -> Result<AudioChunk, SourceError> {
        check_index(index, self.frame_count())?;

        let size = self.format.chunk_bytes();
        let mut data = vec![0u8; size];
        let start = (index as usize).saturating_mul(size);
        if start < self.pcm.len() {
            let end = (start + size).min(self.pcm.len());
            data[..end - start].copy_from_slice(&self.pcm[start..end]);
        }

        Ok(AudioChunk { index, data })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, FRAME_EXTENSIONS) {
            frames.push(path);
        }
    }

    if frames.is_empty() {
        return Err(SourceError::Empty(dir.display().to_string()));
    }
    frames.sort();
    Ok(frames)
}

fn find_wav(dir: &Path) -> Result<Option<PathBuf>, SourceError> {
    let mut wavs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, &["wav"]) {
            wavs.push(path);
        }
    }
    wavs.sort();
    Ok(wavs.into_iter().next())
}

fn decode_rgb(path: &Path) -> Result<image::RgbImage, SourceError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| SourceError::Image {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

fn silent_format(fps: f64) -> AudioFormat {
    AudioFormat {
        sample_width: 2,
        channels: 2,
        sample_rate: 44_100,
        frames_per_buffer: frames_per_buffer(44_100, fps),
    }
}

/// Read an integer PCM wav into little-endian bytes.
///
/// 8-bit becomes signed so zero is silence at every width, 24-bit is
/// widened to 32-bit so every sample width maps onto a native host type.
fn read_wav(path: &Path, fps: f64) -> Result<(AudioFormat, Vec<u8>), SourceError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| SourceError::Audio(e.to_string()))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int {
        return Err(SourceError::UnsupportedFormat("floating point wav".to_string()));
    }

    let sample_width: u16 = match spec.bits_per_sample {
        8 => 1,
        16 => 2,
        24 | 32 => 4,
        bits => {
            return Err(SourceError::UnsupportedFormat(format!("{} bits per sample", bits)));
        }
    };

    let samples = reader
        .samples::<i32>()
        .collect::<Result<Vec<i32>, _>>()
        .map_err(|e| SourceError::Audio(e.to_string()))?;

    let mut pcm = Vec::with_capacity(samples.len() * sample_width as usize);
    for s in samples {
        match spec.bits_per_sample {
            8 => pcm.push(s as i8 as u8),
            16 => pcm.extend_from_slice(&(s as i16).to_le_bytes()),
            24 => pcm.extend_from_slice(&(s << 8).to_le_bytes()),
            _ => pcm.extend_from_slice(&s.to_le_bytes()),
        }
    }

    let format = AudioFormat {
        sample_width,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        frames_per_buffer: frames_per_buffer(spec.sample_rate, fps),
    };

    Ok((format, pcm))
}

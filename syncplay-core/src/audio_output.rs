// Audio Output - cpal host stream driven by an AudioPuller
//
// The stream's data callback runs on cpal's real-time thread and only calls
// `AudioPuller::fill` on a scratch buffer sized once up front.
// cpal::Stream is not Send, so an AudioOutput stays on the thread that opened it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, SizedSample, Stream, StreamConfig};
use thiserror::Error;

use crate::audio::{AudioFormat, AudioPuller, StreamSignal};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("No default output device found")]
    NoDevice,
    #[error("Unsupported sample width: {0} bytes")]
    UnsupportedWidth(u16),
    #[error("Failed to build stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("Failed to start stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
    #[error("Failed to pause stream: {0}")]
    Pause(#[from] cpal::PauseStreamError),
}

/// Little-endian PCM sample the stream can be built for
trait PcmSample: SizedSample + Send + 'static {
    const WIDTH: usize;

    fn from_le(bytes: &[u8]) -> Self;
}

impl PcmSample for i8 {
    const WIDTH: usize = 1;

    fn from_le(bytes: &[u8]) -> Self {
        bytes[0] as i8
    }
}

impl PcmSample for i16 {
    const WIDTH: usize = 2;

    fn from_le(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl PcmSample for i32 {
    const WIDTH: usize = 4;

    fn from_le(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Host sample type for a PCM sample width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    I8,
    I16,
    I32,
}

impl SampleKind {
    fn for_width(width: u16) -> Result<Self, OutputError> {
        match width {
            1 => Ok(Self::I8),
            2 => Ok(Self::I16),
            4 => Ok(Self::I32),
            width => Err(OutputError::UnsupportedWidth(width)),
        }
    }
}

/// Open output stream pulling from a session
pub struct AudioOutput {
    stream: Stream,
    aborted: Arc<AtomicBool>,
    paused: bool,
}

impl AudioOutput {
    /// Open the default output device in the puller's format and start it
    pub fn open(puller: AudioPuller) -> Result<Self, OutputError> {
        let format = puller.format();
        let kind = SampleKind::for_width(format.sample_width)?;
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;

        if let Ok(name) = device.name() {
            tracing::info!(
                "Audio output: {} ({} Hz x{}, {}-byte samples, {} frames/buffer)",
                name,
                format.sample_rate,
                format.channels,
                format.sample_width,
                format.frames_per_buffer
            );
        }

        let aborted = Arc::new(AtomicBool::new(false));
        let fixed = stream_config(&format, BufferSize::Fixed(format.frames_per_buffer));

        let stream = match build_for_kind(kind, &device, &fixed, &format, &puller, &aborted) {
            Ok(stream) => stream,
            Err(OutputError::Build(e)) => {
                // Not every backend honours a fixed buffer size
                tracing::warn!("Fixed buffer size rejected ({}), using device default", e);
                let config = stream_config(&format, BufferSize::Default);
                build_for_kind(kind, &device, &config, &format, &puller, &aborted)?
            }
            Err(e) => return Err(e),
        };

        stream.play()?;
        Ok(Self {
            stream,
            aborted,
            paused: false,
        })
    }

    pub fn pause(&mut self) -> Result<(), OutputError> {
        self.stream.pause()?;
        self.paused = true;
        Ok(())
    }

    /// Pause the stream once the callback has signalled abort.
    ///
    /// Call periodically from the owning thread. Returns whether the stream
    /// is aborted.
    pub fn service(&mut self) -> bool {
        let aborted = self.aborted.load(Ordering::SeqCst);
        if aborted && !self.paused {
            tracing::warn!("Audio stream aborted, pausing output");
            if let Err(e) = self.pause() {
                tracing::error!("{}", e);
            }
        }
        aborted
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        if !self.paused {
            let _ = self.stream.pause();
        }
        tracing::debug!("Audio output released");
    }
}

fn stream_config(format: &AudioFormat, buffer_size: BufferSize) -> StreamConfig {
    StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size,
    }
}

fn build_for_kind(
    kind: SampleKind,
    device: &Device,
    config: &StreamConfig,
    format: &AudioFormat,
    puller: &AudioPuller,
    aborted: &Arc<AtomicBool>,
) -> Result<Stream, OutputError> {
    match kind {
        SampleKind::I8 => build::<i8>(device, config, format, puller.clone(), aborted.clone()),
        SampleKind::I16 => build::<i16>(device, config, format, puller.clone(), aborted.clone()),
        SampleKind::I32 => build::<i32>(device, config, format, puller.clone(), aborted.clone()),
    }
}

fn build<T: PcmSample>(
    device: &Device,
    config: &StreamConfig,
    format: &AudioFormat,
    puller: AudioPuller,
    aborted: Arc<AtomicBool>,
) -> Result<Stream, OutputError> {
    // Sized for the requested buffer; a larger host request grows it once
    let mut scratch = vec![0u8; format.chunk_bytes()];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let needed = data.len() * T::WIDTH;
            if scratch.len() < needed {
                scratch.resize(needed, 0);
            }
            let bytes = &mut scratch[..needed];

            if puller.fill(bytes) == StreamSignal::Abort {
                aborted.store(true, Ordering::SeqCst);
            }
            for (sample, raw) in data.iter_mut().zip(bytes.chunks_exact(T::WIDTH)) {
                *sample = T::from_le(raw);
            }
        },
        |err| tracing::error!("Audio stream error: {}", err),
        None,
    )?;

    Ok(stream)
}

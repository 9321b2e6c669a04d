// Audio Pull Side
// The host audio subsystem calls us from its own real-time thread; nothing
// here may block longer than the configured pop timeout.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::frame_queue::BoundedQueue;
use crate::frame_source::AudioChunk;
use crate::state::PlaybackState;

// ============================================================================
// Types
// ============================================================================

/// Fixed PCM layout of a source's audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Bytes per sample (1, 2 or 4)
    pub sample_width: u16,
    pub channels: u16,
    pub sample_rate: u32,
    /// Sample-frames in one chunk, i.e. per video frame
    pub frames_per_buffer: u32,
}

impl AudioFormat {
    /// Bytes needed for `frame_count` sample-frames
    pub fn bytes_for(&self, frame_count: usize) -> usize {
        frame_count
            .saturating_mul(self.channels as usize)
            .saturating_mul(self.sample_width as usize)
    }

    /// Size of one chunk as produced by a frame source
    pub fn chunk_bytes(&self) -> usize {
        self.bytes_for(self.frames_per_buffer as usize)
    }

    /// Wall-clock length of one chunk
    pub fn buffer_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(u64::from(self.frames_per_buffer) * 1_000_000_000 / u64::from(self.sample_rate))
    }
}

/// What the host should do after a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSignal {
    Continue,
    Abort,
}

/// Result of one pull: bytes for the host plus a continue/abort signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPull {
    pub data: Vec<u8>,
    pub signal: StreamSignal,
}

impl AudioPull {
    fn aborted() -> Self {
        Self {
            data: vec![0u8; 1],
            signal: StreamSignal::Abort,
        }
    }
}

#[derive(Debug, Default)]
struct AudioCounters {
    delivered: AtomicU64,
    underruns: AtomicU64,
    paused: AtomicU64,
    aborted: AtomicBool,
}

/// Chunk the host has only partly consumed
#[derive(Debug)]
struct PartialChunk {
    chunk: AudioChunk,
    offset: usize,
}

/// Callback statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStats {
    pub chunks_delivered: u64,
    /// Playing, but the queue stayed empty for the whole pop timeout
    pub underruns: u64,
    pub paused_callbacks: u64,
    pub aborted: bool,
}

// ============================================================================
// Audio Puller
// ============================================================================

/// Pull handle given to the audio host. Cheap to clone; all clones share
/// the same queue, read cursor and counters.
///
/// Host buffers need not line up with chunks: a request shorter than a chunk
/// leaves the rest for the next callback, a longer one spans chunks.
#[derive(Clone)]
pub struct AudioPuller {
    state: Arc<PlaybackState>,
    queue: Arc<BoundedQueue<AudioChunk>>,
    format: AudioFormat,
    pop_timeout: Duration,
    partial: Arc<Mutex<Option<PartialChunk>>>,
    counters: Arc<AudioCounters>,
}

impl AudioPuller {
    pub fn new(
        state: Arc<PlaybackState>,
        queue: Arc<BoundedQueue<AudioChunk>>,
        format: AudioFormat,
        pop_timeout: Duration,
    ) -> Self {
        Self {
            state,
            queue,
            format,
            pop_timeout,
            partial: Arc::new(Mutex::new(None)),
            counters: Arc::new(AudioCounters::default()),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Produce `frame_count` sample-frames for the host.
    ///
    /// Always returns exactly `format.bytes_for(frame_count)` bytes unless the
    /// stream is aborted, in which case a single byte comes back with
    /// [`StreamSignal::Abort`].
    pub fn pull(&self, frame_count: usize) -> AudioPull {
        if self.is_aborted() {
            return AudioPull::aborted();
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut data = vec![0u8; self.format.bytes_for(frame_count)];
            self.fill_inner(&mut data);
            data
        }));

        match result {
            Ok(data) => AudioPull {
                data,
                signal: StreamSignal::Continue,
            },
            Err(payload) => {
                self.abort(payload.as_ref());
                AudioPull::aborted()
            }
        }
    }

    /// Fill a host-owned buffer in place. Never allocates.
    pub fn fill(&self, out: &mut [u8]) -> StreamSignal {
        if self.is_aborted() {
            out.fill(0);
            return StreamSignal::Abort;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.fill_inner(out)));

        match result {
            Ok(()) => StreamSignal::Continue,
            Err(payload) => {
                self.abort(payload.as_ref());
                out.fill(0);
                StreamSignal::Abort
            }
        }
    }

    fn fill_inner(&self, out: &mut [u8]) {
        if !self.state.is_playing() {
            out.fill(0);
            self.counters.paused.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut partial = self.partial.lock();
        let mut written = 0;

        while written < out.len() {
            if partial.is_none() {
                match self.queue.pop_timeout(self.pop_timeout) {
                    Some(chunk) => {
                        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                        *partial = Some(PartialChunk { chunk, offset: 0 });
                    }
                    None => {
                        // Underrun: keep the host stream alive with silence
                        out[written..].fill(0);
                        self.counters.underruns.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
            }

            let Some(current) = partial.as_mut() else { break };
            let rest = &current.chunk.data[current.offset..];
            let n = rest.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&rest[..n]);
            written += n;
            current.offset += n;

            if current.offset >= current.chunk.data.len() {
                *partial = None;
            }
        }
    }

    fn abort(&self, payload: &(dyn Any + Send)) {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!("Audio callback failed, stream aborted: {}", reason);
        self.counters.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.counters.aborted.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> AudioStats {
        AudioStats {
            chunks_delivered: self.counters.delivered.load(Ordering::Relaxed),
            underruns: self.counters.underruns.load(Ordering::Relaxed),
            paused_callbacks: self.counters.paused.load(Ordering::Relaxed),
            aborted: self.is_aborted(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

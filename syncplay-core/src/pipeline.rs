//! # Buffering Pipeline
//!
//! Producer thread: while playing, fetch the frame pair at the frame pointer,
//! push video then audio, advance the pointer and report the new position.
//!
//! Both items of a pair are pushed in the same iteration before the pointer
//! moves, so the N-th video frame and the N-th audio chunk drained by the
//! consumers always share a source index. Queue capacity is the only thing
//! limiting how far ahead of playback this thread runs.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::frame_queue::BoundedQueue;
use crate::frame_source::{AudioChunk, FrameSource, SourceError, VideoFrame};
use crate::state::{PlaybackMode, PlaybackState};
use crate::transport::ReporterGate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_buffered: u64,
    pub source_errors: u64,
    /// Pairs buffered while a seek/stop moved the pointer underneath
    pub superseded: u64,
}

pub struct BufferingPipeline {
    source: Arc<dyn FrameSource>,
    state: Arc<PlaybackState>,
    video_queue: Arc<BoundedQueue<VideoFrame>>,
    audio_queue: Arc<BoundedQueue<AudioChunk>>,
    reporter: Arc<ReporterGate>,
    stop: Arc<AtomicBool>,
    idle_poll: Duration,
    push_poll: Duration,
}

impl BufferingPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn FrameSource>,
        state: Arc<PlaybackState>,
        video_queue: Arc<BoundedQueue<VideoFrame>>,
        audio_queue: Arc<BoundedQueue<AudioChunk>>,
        reporter: Arc<ReporterGate>,
        stop: Arc<AtomicBool>,
        idle_poll: Duration,
        push_poll: Duration,
    ) -> Self {
        Self {
            source,
            state,
            video_queue,
            audio_queue,
            reporter,
            stop,
            idle_poll,
            push_poll,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<PipelineStats>> {
        thread::Builder::new()
            .name("syncplay-buffer".into())
            .spawn(move || self.run())
    }

    pub fn run(self) -> PipelineStats {
        tracing::debug!("Buffering thread started ({})", self.source.name());

        let mut stats = PipelineStats::default();
        let total = self.state.total_frames();

        while !self.stop.load(Ordering::SeqCst) {
            if !self.state.is_playing() {
                thread::sleep(self.idle_poll);
                continue;
            }

            // One load per iteration: a seek can land at any point
            let index = self.state.frame_pointer();
            if index >= total {
                self.pause_at_end();
                continue;
            }

            let (video, audio) = match self.fetch(index) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("Frame {} unavailable: {}", index, e);
                    stats.source_errors += 1;
                    self.state.set_mode(PlaybackMode::Paused);
                    self.reporter.with(|r| r.play_state(PlaybackMode::Paused));
                    continue;
                }
            };

            if self.video_queue.push_cancellable(video, &self.stop, self.push_poll).is_err() {
                break;
            }
            if self.audio_queue.push_cancellable(audio, &self.stop, self.push_poll).is_err() {
                break;
            }
            stats.frames_buffered += 1;

            if !self.state.advance_from(index) {
                stats.superseded += 1;
                continue;
            }

            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let next = index + 1;
            let label = self.state.position_label(next);
            self.reporter.with(|r| {
                // The controller writes the pointer before taking this lock,
                // so a seek/stop that raced the advance reports after us or
                // is seen here
                if self.state.frame_pointer() != next {
                    return;
                }
                r.position(next, &label);
                if next == total {
                    tracing::info!("End of stream at frame {}", total);
                    self.state.set_mode(PlaybackMode::Paused);
                    r.play_state(PlaybackMode::Paused);
                }
            });
        }

        tracing::debug!(
            "Buffering thread stopped: {} buffered, {} superseded, {} source errors",
            stats.frames_buffered,
            stats.superseded,
            stats.source_errors
        );
        stats
    }

    fn fetch(&self, index: u64) -> Result<(VideoFrame, AudioChunk), SourceError> {
        let video = self.source.video_frame(index)?;
        let audio = self.source.audio_frame(index)?;
        Ok((video, audio))
    }

    fn pause_at_end(&self) {
        tracing::debug!("Pointer at end of stream, pausing");
        self.state.set_mode(PlaybackMode::Paused);
        self.reporter.with(|r| r.play_state(PlaybackMode::Paused));
    }
}

//! Transport Control
//!
//! A [`Session`] owns everything one playback needs: the shared state, both
//! queues, the buffering and render threads, and the gated sinks. User
//! intents (play/pause, stop, seek, close) become state writes here.
//!
//! The audio host is not owned: it gets an [`AudioPuller`] from
//! [`Session::audio_puller`] and is released by the caller after
//! [`Session::close`] returns. Until then the puller sees `Paused` and
//! produces silence.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;

use crate::audio::{AudioPuller, AudioStats};
use crate::config::{ConfigError, PlayerConfig};
use crate::frame_queue::{BoundedQueue, QueueStats};
use crate::frame_source::{AudioChunk, FrameSource, VideoFrame};
use crate::gate::SinkGate;
use crate::pipeline::{BufferingPipeline, PipelineStats};
use crate::renderer::{DisplayGate, DisplaySink, RenderStats, VideoRenderer};
use crate::state::{PlaybackMode, PlaybackState, POSITION_PLACEHOLDER};

// ============================================================================
// Reporting
// ============================================================================

/// Receives position and play-state updates for a UI
pub trait PositionReporter: Send {
    /// `frame` is the new frame pointer, `label` its `MM:SS` form
    fn position(&mut self, frame: u64, label: &str);

    /// Play/pause indicator changed
    fn play_state(&mut self, mode: PlaybackMode);
}

/// Discards every report
pub struct NullReporter;

impl PositionReporter for NullReporter {
    fn position(&mut self, _frame: u64, _label: &str) {}

    fn play_state(&mut self, _mode: PlaybackMode) {}
}

pub type ReporterGate = SinkGate<Box<dyn PositionReporter>>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Session already closed")]
    Closed,
    #[error("Thread {0} panicked")]
    ThreadPanicked(&'static str),
    #[error("Failed to spawn playback thread: {0}")]
    Spawn(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything a closed session has to say about its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub pipeline: PipelineStats,
    pub render: RenderStats,
    pub audio: AudioStats,
    pub final_position: u64,
}

// ============================================================================
// Session
// ============================================================================

const BUFFER_THREAD: &str = "syncplay-buffer";
const RENDER_THREAD: &str = "syncplay-render";

pub struct Session {
    name: String,
    state: Arc<PlaybackState>,
    video_queue: Arc<BoundedQueue<VideoFrame>>,
    audio_queue: Arc<BoundedQueue<AudioChunk>>,
    display: Arc<DisplayGate>,
    reporter: Arc<ReporterGate>,
    puller: AudioPuller,
    blank: VideoFrame,

    buffer_stop: Arc<AtomicBool>,
    render_stop: Arc<AtomicBool>,
    buffer_thread: Option<JoinHandle<PipelineStats>>,
    render_thread: Option<JoinHandle<RenderStats>>,
    closed: bool,
}

impl Session {
    /// Start playing `source` from frame 0.
    ///
    /// The blank frame is presented before either thread starts.
    pub fn open(
        source: Arc<dyn FrameSource>,
        config: &PlayerConfig,
        display: Box<dyn DisplaySink>,
        reporter: Box<dyn PositionReporter>,
    ) -> Result<Self, PlayerError> {
        config.validate()?;

        let total = source.frame_count();
        let interval = source.frame_interval();
        let state = Arc::new(PlaybackState::new(total, interval));
        let video_queue = Arc::new(BoundedQueue::new(config.queue_capacity));
        let audio_queue = Arc::new(BoundedQueue::new(config.queue_capacity));
        let puller = AudioPuller::new(
            state.clone(),
            audio_queue.clone(),
            source.audio_format(),
            config.audio_pop_timeout(),
        );

        let blank = VideoFrame::blank(source.dimensions());
        let display = Arc::new(SinkGate::new(display));
        display.with(|sink| sink.present(&blank));

        let mut session = Self {
            name: source.name().to_string(),
            state: state.clone(),
            video_queue: video_queue.clone(),
            audio_queue: audio_queue.clone(),
            display: display.clone(),
            reporter: Arc::new(SinkGate::new(reporter)),
            puller,
            blank,
            buffer_stop: Arc::new(AtomicBool::new(false)),
            render_stop: Arc::new(AtomicBool::new(false)),
            buffer_thread: None,
            render_thread: None,
            closed: false,
        };

        // On a spawn failure the early return drops `session`, which joins
        // whatever did start
        session.buffer_thread = Some(
            BufferingPipeline::new(
                source,
                state.clone(),
                video_queue.clone(),
                audio_queue,
                session.reporter.clone(),
                session.buffer_stop.clone(),
                config.idle_poll(),
                config.push_poll(),
            )
            .spawn()?,
        );

        session.render_thread = Some(
            VideoRenderer::new(
                state,
                video_queue,
                display,
                session.render_stop.clone(),
                config.video_pop_timeout(),
                config.idle_poll(),
            )
            .spawn()?,
        );

        tracing::info!(
            "Session opened: {} ({} frames, {:.3}s/frame, queue depth {})",
            session.name,
            total,
            interval.as_secs_f64(),
            config.queue_capacity
        );
        Ok(session)
    }

    /// Toggle play/pause. Entering `Playing` at end of stream is refused.
    pub fn play_pause(&self) -> PlaybackMode {
        if self.closed {
            return self.state.mode();
        }

        let next = match self.state.mode() {
            PlaybackMode::Playing => PlaybackMode::Paused,
            PlaybackMode::Paused if !self.state.at_end() => PlaybackMode::Playing,
            PlaybackMode::Paused => {
                tracing::debug!("Play ignored at end of stream");
                return PlaybackMode::Paused;
            }
        };

        self.state.set_mode(next);
        self.reporter.with(|r| r.play_state(next));
        tracing::debug!("Transport: {:?}", next);
        next
    }

    /// Pause, rewind to frame 0 and show the blank frame
    pub fn stop(&self) {
        if self.closed {
            return;
        }

        self.state.set_mode(PlaybackMode::Paused);
        self.state.set_frame_pointer(0);
        self.reporter.with(|r| {
            r.position(0, POSITION_PLACEHOLDER);
            r.play_state(PlaybackMode::Paused);
        });
        // Renderer checks the mode under this same lock, so nothing can
        // overdraw the blank until play resumes
        self.display.with(|sink| sink.present(&self.blank));
        tracing::debug!("Transport: stop");
    }

    /// Move the frame pointer. Already-buffered frames are not flushed.
    ///
    /// Returns the pointer actually set (clamped to the frame count).
    pub fn seek(&self, target: u64) -> u64 {
        if self.closed {
            return self.state.frame_pointer();
        }

        let frame = self.state.set_frame_pointer(target);
        let label = self.state.position_label(frame);
        self.reporter.with(|r| r.position(frame, &label));
        tracing::debug!("Transport: seek {} -> {}", target, frame);
        frame
    }

    /// Stop both threads and release the display and reporter.
    ///
    /// Order: pause, stop buffering, drain both queues so a blocked push
    /// returns, join buffering, stop and join rendering, close the gates.
    pub fn close(&mut self) -> Result<SessionReport, PlayerError> {
        if self.closed {
            return Err(PlayerError::Closed);
        }
        self.closed = true;

        self.state.set_mode(PlaybackMode::Paused);

        self.buffer_stop.store(true, Ordering::SeqCst);
        let drained = self.video_queue.drain() + self.audio_queue.drain();
        let pipeline = join(self.buffer_thread.take(), BUFFER_THREAD);

        self.render_stop.store(true, Ordering::SeqCst);
        let render = join(self.render_thread.take(), RENDER_THREAD);

        self.display.close();
        self.reporter.close();
        // Pushed between the first drain and the stop flag being seen
        let drained = drained + self.video_queue.drain() + self.audio_queue.drain();

        let report = SessionReport {
            pipeline: pipeline?,
            render: render?,
            audio: self.puller.stats(),
            final_position: self.state.frame_pointer(),
        };

        tracing::info!(
            "Session closed: {} at frame {}/{} ({} buffered, {} presented, {} audio chunks, {} underruns, {} dropped on close)",
            self.name,
            report.final_position,
            self.state.total_frames(),
            report.pipeline.frames_buffered,
            report.render.frames_presented,
            report.audio.chunks_delivered,
            report.audio.underruns,
            drained
        );
        Ok(report)
    }

    pub fn state(&self) -> &Arc<PlaybackState> {
        &self.state
    }

    /// Handle for the audio host; clones share the session's audio queue
    pub fn audio_puller(&self) -> AudioPuller {
        self.puller.clone()
    }

    pub fn position(&self) -> u64 {
        self.state.frame_pointer()
    }

    pub fn mode(&self) -> PlaybackMode {
        self.state.mode()
    }

    pub fn total_frames(&self) -> u64 {
        self.state.total_frames()
    }

    /// `(video, audio)` items currently buffered
    pub fn queue_depths(&self) -> (usize, usize) {
        (self.video_queue.len(), self.audio_queue.len())
    }

    pub fn queue_stats(&self) -> (QueueStats, QueueStats) {
        (self.video_queue.stats(), self.audio_queue.stats())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!("Session shutdown incomplete: {}", e);
        }
    }
}

fn join<T: Default>(handle: Option<JoinHandle<T>>, name: &'static str) -> Result<T, PlayerError> {
    match handle {
        Some(handle) => handle.join().map_err(|_| {
            tracing::error!("Thread {} panicked", name);
            PlayerError::ThreadPanicked(name)
        }),
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::StreamSignal;
    use crate::frame_source::{FrameDims, TestPatternSource};
    use parking_lot::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    /// (index, blank) of every presented frame
    #[derive(Clone, Default)]
    struct Screen(Arc<Mutex<Vec<(u64, bool)>>>);

    impl DisplaySink for Screen {
        fn present(&mut self, frame: &VideoFrame) {
            let blank = frame.data.iter().all(|&b| b == 0);
            self.0.lock().push((frame.index, blank));
        }
    }

    #[derive(Default)]
    struct Reports {
        positions: Vec<(u64, String)>,
        states: Vec<PlaybackMode>,
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Reports>>);

    impl PositionReporter for Recorder {
        fn position(&mut self, frame: u64, label: &str) {
            self.0.lock().positions.push((frame, label.to_string()));
        }

        fn play_state(&mut self, mode: PlaybackMode) {
            self.0.lock().states.push(mode);
        }
    }

    /// Stands in for the host audio thread: pulls one buffer per millisecond
    struct AudioHost {
        stop: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    }

    impl AudioHost {
        fn start(puller: AudioPuller) -> Self {
            let stop = Arc::new(AtomicBool::new(false));
            let flag = stop.clone();
            let frames = puller.format().frames_per_buffer as usize;
            let handle = thread::spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    if puller.pull(frames).signal == StreamSignal::Abort {
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            });
            Self {
                stop,
                handle: Some(handle),
            }
        }
    }

    impl Drop for AudioHost {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = self.handle.take() {
                handle.join().unwrap();
            }
        }
    }

    struct Harness {
        session: Session,
        screen: Screen,
        reports: Recorder,
    }

    fn open(frames: u64, fps: f64) -> Harness {
        let source = Arc::new(TestPatternSource::new(frames, fps, FrameDims::rgb(8, 2)));
        let screen = Screen::default();
        let reports = Recorder::default();
        let session = Session::open(
            source,
            &PlayerConfig::default(),
            Box::new(screen.clone()),
            Box::new(reports.clone()),
        )
        .unwrap();
        Harness {
            session,
            screen,
            reports,
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_blank_frame_shown_on_open() {
        let mut h = open(10, 25.0);
        assert!(!h.session.is_closed());
        h.session.play_pause();
        assert_eq!(h.screen.0.lock().first(), Some(&(0, true)));
        h.session.close().unwrap();
    }

    #[test]
    fn test_plays_to_end_then_auto_pauses() {
        let mut h = open(100, 200.0);
        let _host = AudioHost::start(h.session.audio_puller());

        assert!(wait_for(|| h.session.mode() == PlaybackMode::Paused));
        assert_eq!(h.session.position(), 100);

        // Stays paused; play is refused at end of stream
        thread::sleep(Duration::from_millis(30));
        assert_eq!(h.session.mode(), PlaybackMode::Paused);
        assert_eq!(h.session.play_pause(), PlaybackMode::Paused);

        {
            let reports = h.reports.0.lock();
            assert_eq!(reports.positions.len(), 100);
            assert_eq!(reports.positions.last(), Some(&(100, "00:00".to_string())));
            assert_eq!(reports.states.last(), Some(&PlaybackMode::Paused));
        }

        // Frames were shown in source order with none skipped
        let shown: Vec<u64> = h.screen.0.lock().iter().skip(1).map(|&(i, _)| i).collect();
        assert!(shown.len() >= 90, "only {} frames shown", shown.len());
        assert!(shown.iter().enumerate().all(|(n, &i)| i == n as u64));

        let report = h.session.close().unwrap();
        assert_eq!(report.pipeline.frames_buffered, 100);
        assert_eq!(report.final_position, 100);
        assert!(!report.audio.aborted);
    }

    #[test]
    fn test_seek_while_paused_does_not_buffer() {
        let mut h = open(100, 25.0);
        let _host = AudioHost::start(h.session.audio_puller());

        assert_eq!(h.session.play_pause(), PlaybackMode::Paused);
        thread::sleep(Duration::from_millis(20));
        h.session.seek(10);
        let (video_before, audio_before) = h.session.queue_stats();

        assert_eq!(h.session.seek(50), 50);
        assert_eq!(h.session.position(), 50);
        thread::sleep(Duration::from_millis(60));

        let (video_after, audio_after) = h.session.queue_stats();
        assert_eq!(video_after.pushed, video_before.pushed);
        assert_eq!(audio_after.pushed, audio_before.pushed);
        assert_eq!(h.session.position(), 50);
        assert!(h
            .reports
            .0
            .lock()
            .positions
            .contains(&(50, "00:02".to_string())));

        assert_eq!(h.session.play_pause(), PlaybackMode::Playing);
        assert!(wait_for(|| h.session.position() > 50));
        h.session.close().unwrap();
    }

    #[test]
    fn test_stop_rewinds_and_shows_blank() {
        let mut h = open(200, 100.0);
        let _host = AudioHost::start(h.session.audio_puller());

        assert!(wait_for(|| h.session.position() >= 20));
        h.session.stop();

        assert_eq!(h.session.mode(), PlaybackMode::Paused);
        assert_eq!(h.session.position(), 0);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(h.screen.0.lock().last(), Some(&(0, true)));
        {
            let reports = h.reports.0.lock();
            assert_eq!(reports.positions.last(), Some(&(0, POSITION_PLACEHOLDER.to_string())));
            assert_eq!(reports.states.last(), Some(&PlaybackMode::Paused));
        }
        h.session.close().unwrap();
    }

    #[test]
    fn test_play_pause_toggles_until_end() {
        let mut h = open(100, 25.0);
        let _host = AudioHost::start(h.session.audio_puller());

        assert_eq!(h.session.play_pause(), PlaybackMode::Paused);
        assert_eq!(h.session.play_pause(), PlaybackMode::Playing);
        assert_eq!(h.session.play_pause(), PlaybackMode::Paused);
        assert_eq!(h.session.play_pause(), PlaybackMode::Playing);

        // Seeking to the end while playing pauses on the next iteration
        assert_eq!(h.session.seek(500), 100);
        assert!(wait_for(|| h.session.mode() == PlaybackMode::Paused));
        assert_eq!(h.session.play_pause(), PlaybackMode::Paused);

        h.session.seek(99);
        assert_eq!(h.session.play_pause(), PlaybackMode::Playing);
        h.session.close().unwrap();
    }

    #[test]
    fn test_close_while_blocked_on_full_queue() {
        // No audio host: the audio queue fills and buffering blocks on it
        let mut h = open(1_000, 100.0);
        assert!(wait_for(|| h.session.queue_depths().1 == 2));
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        let report = h.session.close().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(report.pipeline.frames_buffered <= 3);
        assert_eq!(h.session.queue_depths(), (0, 0));

        assert!(h.session.is_closed());
        assert!(matches!(h.session.close(), Err(PlayerError::Closed)));
    }

    #[test]
    fn test_close_releases_sinks() {
        let mut h = open(50, 100.0);
        let _host = AudioHost::start(h.session.audio_puller());
        assert!(wait_for(|| h.session.position() >= 5));

        h.session.close().unwrap();
        assert_eq!(Arc::strong_count(&h.screen.0), 1);
        assert_eq!(Arc::strong_count(&h.reports.0), 1);

        // Controls are inert afterwards
        let shown = h.screen.0.lock().len();
        h.session.stop();
        assert_eq!(h.screen.0.lock().len(), shown);
    }

    #[test]
    fn test_audio_goes_silent_after_close() {
        let mut h = open(50, 100.0);
        let puller = h.session.audio_puller();
        h.session.close().unwrap();

        let pull = puller.pull(64);
        assert_eq!(pull.signal, StreamSignal::Continue);
        assert!(pull.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let source = Arc::new(TestPatternSource::new(10, 25.0, FrameDims::rgb(2, 2)));
        let config = PlayerConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        let result = Session::open(source, &config, Box::new(Screen::default()), Box::new(NullReporter));
        assert!(matches!(result, Err(PlayerError::Config(_))));
    }
}

//! Video Renderer
//!
//! Pops frames from the video queue at the source frame rate and hands them
//! to the display sink. Sleeps only the time left in each frame slot, so
//! jitter in decode or present does not slow the average rate down.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::frame_queue::BoundedQueue;
use crate::frame_source::VideoFrame;
use crate::gate::SinkGate;
use crate::state::PlaybackState;

/// Receives every presented frame. Replaces whatever was shown before.
pub trait DisplaySink: Send {
    fn present(&mut self, frame: &VideoFrame);
}

impl<F> DisplaySink for F
where
    F: FnMut(&VideoFrame) + Send,
{
    fn present(&mut self, frame: &VideoFrame) {
        self(frame)
    }
}

pub type DisplayGate = SinkGate<Box<dyn DisplaySink>>;

// ============================================================================
// Frame Pacer
// ============================================================================

/// Residual-sleep pacing: `max(0, target - elapsed since last tick)`
pub struct FramePacer {
    target: Duration,
    last: Instant,
    count: u64,
}

impl FramePacer {
    pub fn new(target: Duration) -> Self {
        Self {
            target,
            last: Instant::now(),
            count: 0,
        }
    }

    /// Sleep out the rest of the current slot. Returns the time slept.
    pub fn wait(&mut self) -> Duration {
        let remaining = self.time_until_next();
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
        self.last = Instant::now();
        self.count += 1;
        remaining
    }

    pub fn time_until_next(&self) -> Duration {
        self.target.saturating_sub(self.last.elapsed())
    }

    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    pub fn ticks(&self) -> u64 {
        self.count
    }
}

// ============================================================================
// Render Loop
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_presented: u64,
    /// Playing ticks where no frame arrived within the pop timeout
    pub starved_ticks: u64,
}

pub struct VideoRenderer {
    state: Arc<PlaybackState>,
    queue: Arc<BoundedQueue<VideoFrame>>,
    display: Arc<DisplayGate>,
    stop: Arc<AtomicBool>,
    pop_timeout: Duration,
    idle_poll: Duration,
}

impl VideoRenderer {
    pub fn new(
        state: Arc<PlaybackState>,
        queue: Arc<BoundedQueue<VideoFrame>>,
        display: Arc<DisplayGate>,
        stop: Arc<AtomicBool>,
        pop_timeout: Duration,
        idle_poll: Duration,
    ) -> Self {
        Self {
            state,
            queue,
            display,
            stop,
            pop_timeout,
            idle_poll,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<RenderStats>> {
        thread::Builder::new()
            .name("syncplay-render".into())
            .spawn(move || self.run())
    }

    pub fn run(self) -> RenderStats {
        tracing::debug!("Render thread started");

        let mut stats = RenderStats::default();
        let mut pacer = FramePacer::new(self.state.frame_interval());
        // Popped while a pause/stop raced the present; shown on resume
        let mut pending: Option<VideoFrame> = None;

        while !self.stop.load(Ordering::SeqCst) {
            if !self.state.is_playing() {
                thread::sleep(self.idle_poll);
                pacer.reset();
                continue;
            }

            let frame = pending.take().or_else(|| self.queue.pop_timeout(self.pop_timeout));

            match frame {
                Some(frame) => match self.present(&frame) {
                    Some(true) => stats.frames_presented += 1,
                    Some(false) => pending = Some(frame),
                    None => {}
                },
                None => stats.starved_ticks += 1,
            }

            pacer.wait();
        }

        tracing::debug!(
            "Render thread stopped: {} presented, {} starved ticks",
            stats.frames_presented,
            stats.starved_ticks
        );
        stats
    }

    /// `Some(false)` when paused or stopping, `None` once the sink is gone.
    ///
    /// The mode is checked under the gate lock: `stop()` pauses before it
    /// presents the blank frame, so the blank can never be overdrawn.
    fn present(&self, frame: &VideoFrame) -> Option<bool> {
        if self.stop.load(Ordering::SeqCst) {
            return None;
        }
        self.display.with(|sink| {
            if self.state.is_playing() {
                sink.present(frame);
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::FrameDims;
    use crate::state::PlaybackMode;
    use parking_lot::Mutex;

    fn frame(index: u64) -> VideoFrame {
        let mut frame = VideoFrame::blank(FrameDims::rgb(2, 2));
        frame.index = index;
        frame
    }

    struct Fixture {
        state: Arc<PlaybackState>,
        queue: Arc<BoundedQueue<VideoFrame>>,
        shown: Arc<Mutex<Vec<u64>>>,
        stop: Arc<AtomicBool>,
        handle: JoinHandle<RenderStats>,
    }

    fn start(interval: Duration) -> Fixture {
        let state = Arc::new(PlaybackState::new(100, interval));
        let queue = Arc::new(BoundedQueue::new(2));
        let shown = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let sink: Box<dyn DisplaySink> = {
            let shown = shown.clone();
            Box::new(move |f: &VideoFrame| shown.lock().push(f.index))
        };
        let display = Arc::new(SinkGate::new(sink));

        let handle = VideoRenderer::new(
            state.clone(),
            queue.clone(),
            display,
            stop.clone(),
            Duration::from_millis(10),
            Duration::from_millis(1),
        )
        .spawn()
        .unwrap();

        Fixture {
            state,
            queue,
            shown,
            stop,
            handle,
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_pacer_subtracts_work_time() {
        let mut pacer = FramePacer::new(Duration::from_millis(40));
        thread::sleep(Duration::from_millis(15));
        let slept = pacer.wait();
        assert!(slept <= Duration::from_millis(25));
        assert_eq!(pacer.ticks(), 1);
    }

    #[test]
    fn test_pacer_never_sleeps_when_late() {
        let mut pacer = FramePacer::new(Duration::from_millis(5));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(pacer.wait(), Duration::ZERO);
    }

    #[test]
    fn test_presents_in_order() {
        let fx = start(Duration::from_millis(2));
        for i in 0..6 {
            fx.queue.push_timeout(frame(i), Duration::from_secs(1)).unwrap();
        }

        assert!(wait_for(|| fx.shown.lock().len() == 6));
        fx.stop.store(true, Ordering::SeqCst);
        let stats = fx.handle.join().unwrap();

        assert_eq!(*fx.shown.lock(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(stats.frames_presented, 6);
    }

    #[test]
    fn test_starvation_is_not_end_of_stream() {
        let fx = start(Duration::from_millis(2));
        thread::sleep(Duration::from_millis(50));
        fx.queue.push(frame(9)).unwrap();

        assert!(wait_for(|| fx.shown.lock().len() == 1));
        fx.stop.store(true, Ordering::SeqCst);
        let stats = fx.handle.join().unwrap();
        assert!(stats.starved_ticks > 0);
    }

    #[test]
    fn test_paused_leaves_queue_alone() {
        let fx = start(Duration::from_millis(2));
        fx.state.set_mode(PlaybackMode::Paused);
        fx.queue.push(frame(1)).unwrap();

        thread::sleep(Duration::from_millis(40));
        assert_eq!(fx.queue.len(), 1);
        assert!(fx.shown.lock().is_empty());

        fx.state.set_mode(PlaybackMode::Playing);
        assert!(wait_for(|| fx.shown.lock().len() == 1));
        fx.stop.store(true, Ordering::SeqCst);
        fx.handle.join().unwrap();
    }

    #[test]
    fn test_paced_at_frame_interval() {
        let fx = start(Duration::from_millis(20));
        let start = Instant::now();
        for i in 0..5 {
            fx.queue.push_timeout(frame(i), Duration::from_secs(1)).unwrap();
        }

        assert!(wait_for(|| fx.shown.lock().len() == 5));
        // Five slots of 20ms: the fifth frame cannot show before ~80ms
        assert!(start.elapsed() >= Duration::from_millis(75));
        fx.stop.store(true, Ordering::SeqCst);
        fx.handle.join().unwrap();
    }
}

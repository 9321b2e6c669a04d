//! # SyncPlay Player
//!
//! Headless console front end: plays an image-sequence directory (or a
//! synthetic test pattern) with its audio track and takes transport
//! commands on stdin.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use syncplay_core::renderer::FramePacer;
use syncplay_core::{
    AudioPuller, DisplaySink, FrameDims, FrameSource, ImageSequenceSource, PlaybackMode,
    PlayerConfig, PositionReporter, Session, StreamSignal, TestPatternSource, VideoFrame,
};

const DEFAULT_FPS: f64 = 30.0;
const TEST_PATTERN_DIMS: FrameDims = FrameDims::rgb(320, 240);

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum SourceSpec {
    Directory(PathBuf),
    TestPattern(u64),
}

#[derive(Debug, Clone, PartialEq)]
struct Options {
    source: SourceSpec,
    fps: f64,
    config: Option<PathBuf>,
    audio: bool,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut directory: Option<PathBuf> = None;
    let mut test_frames: Option<u64> = None;
    let mut fps = DEFAULT_FPS;
    let mut config: Option<PathBuf> = None;
    let mut audio = true;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--fps" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --fps"))?;
                fps = value
                    .parse::<f64>()
                    .map_err(|e| anyhow::anyhow!("Invalid frame rate {}: {}", value, e))?;
                if fps.is_nan() || fps <= 0.0 {
                    anyhow::bail!("Frame rate must be positive, got {}", value);
                }
                i += 2;
            }
            "--config" | "-c" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                config = Some(PathBuf::from(value));
                i += 2;
            }
            "--test-pattern" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --test-pattern"))?;
                test_frames = Some(
                    value
                        .parse::<u64>()
                        .map_err(|e| anyhow::anyhow!("Invalid frame count {}: {}", value, e))?,
                );
                i += 2;
            }
            "--no-audio" => {
                audio = false;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg if arg.starts_with('-') => {
                anyhow::bail!("Unknown option {}", arg);
            }
            arg => {
                directory = Some(PathBuf::from(arg));
                i += 1;
            }
        }
    }

    let source = match (directory, test_frames) {
        (Some(dir), None) => SourceSpec::Directory(dir),
        (None, Some(frames)) => SourceSpec::TestPattern(frames),
        (Some(_), Some(_)) => anyhow::bail!("Give either a directory or --test-pattern, not both"),
        (None, None) => {
            print_usage();
            anyhow::bail!("Missing frame directory");
        }
    };

    Ok(Options {
        source,
        fps,
        config,
        audio,
    })
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  syncplay <DIR> [--fps <n>] [--config <file>] [--no-audio]\n  syncplay --test-pattern <frames> [--fps <n>]\n\nCommands (stdin): p = play/pause, s = stop, seek <frame>, q = quit\n"
    );
}

// ============================================================================
// Console Commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    PlayPause,
    Stop,
    Seek(u64),
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "p" | "pause" | "play" => Command::PlayPause,
        "s" | "stop" => Command::Stop,
        "q" | "quit" | "exit" => Command::Quit,
        "seek" => Command::Seek(words.next()?.parse().ok()?),
        _ => return None,
    };
    Some(command)
}

/// Forward stdin lines as commands; EOF becomes `Quit`
fn spawn_command_reader(tx: mpsc::Sender<Command>) -> Result<()> {
    thread::Builder::new()
        .name("syncplay-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            return;
                        }
                    }
                    None => eprintln!("Unknown command: {}", line.trim()),
                }
            }
            let _ = tx.send(Command::Quit);
        })
        .context("Failed to spawn stdin reader")?;
    Ok(())
}

// ============================================================================
// Display and Position Output
// ============================================================================

/// Counts presented frames and logs a brightness summary for each
struct ConsoleDisplay {
    presented: Arc<AtomicU64>,
}

impl DisplaySink for ConsoleDisplay {
    fn present(&mut self, frame: &VideoFrame) {
        let n = self.presented.fetch_add(1, Ordering::Relaxed) + 1;
        let mean = if frame.data.is_empty() {
            0
        } else {
            frame.data.iter().map(|&b| u64::from(b)).sum::<u64>() / frame.data.len() as u64
        };
        tracing::debug!(
            "Present #{}: frame {} {}x{} mean {}",
            n,
            frame.index,
            frame.width,
            frame.height,
            mean
        );
    }
}

/// `MM:SS  frame/total  [state]` on stderr
struct ConsoleReporter {
    total: u64,
    mode: PlaybackMode,
}

impl ConsoleReporter {
    fn state_label(&self) -> &'static str {
        match self.mode {
            PlaybackMode::Playing => "playing",
            PlaybackMode::Paused => "paused",
        }
    }
}

impl PositionReporter for ConsoleReporter {
    fn position(&mut self, frame: u64, label: &str) {
        eprintln!("{}  {}/{}  [{}]", label, frame, self.total, self.state_label());
    }

    fn play_state(&mut self, mode: PlaybackMode) {
        self.mode = mode;
        eprintln!("{} {}", mode.indicator(), self.state_label());
    }
}

// ============================================================================
// Audio Host
// ============================================================================

/// Stand-in for an audio device: pulls one buffer per buffer duration
struct NullAudioHost {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl NullAudioHost {
    fn start(puller: AudioPuller) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let format = puller.format();

        let handle = thread::Builder::new()
            .name("syncplay-audio".into())
            .spawn(move || {
                let mut buffer = vec![0u8; format.chunk_bytes()];
                let mut pacer = FramePacer::new(format.buffer_duration());
                while !flag.load(Ordering::SeqCst) {
                    if puller.fill(&mut buffer) == StreamSignal::Abort {
                        tracing::warn!("Audio stream aborted");
                        break;
                    }
                    pacer.wait();
                }
            })
            .context("Failed to spawn audio thread")?;

        tracing::info!(
            "Null audio host: {} Hz x{}, one buffer every {:?}",
            format.sample_rate,
            format.channels,
            format.buffer_duration()
        );
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for NullAudioHost {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Audio thread panicked");
            }
        }
    }
}

enum AudioHost {
    #[cfg(feature = "audio")]
    Device(syncplay_core::AudioOutput),
    Null(NullAudioHost),
    Disabled,
}

impl AudioHost {
    fn open(puller: AudioPuller, enabled: bool) -> Result<Self> {
        if !enabled {
            tracing::info!("Audio disabled");
            return Ok(Self::Disabled);
        }

        #[cfg(feature = "audio")]
        match syncplay_core::AudioOutput::open(puller.clone()) {
            Ok(output) => return Ok(Self::Device(output)),
            Err(e) => tracing::warn!("Audio device unavailable ({}), using null host", e),
        }

        Ok(Self::Null(NullAudioHost::start(puller)?))
    }

    /// Periodic upkeep from the main thread
    fn service(&mut self) {
        #[cfg(feature = "audio")]
        if let Self::Device(output) = self {
            output.service();
        }
    }
}

// ============================================================================
// Main
// ============================================================================

fn open_source(options: &Options) -> Result<Arc<dyn FrameSource>> {
    let source: Arc<dyn FrameSource> = match &options.source {
        SourceSpec::Directory(dir) => Arc::new(
            ImageSequenceSource::open(dir, options.fps)
                .with_context(|| format!("Failed to open {}", dir.display()))?,
        ),
        SourceSpec::TestPattern(frames) => {
            Arc::new(TestPatternSource::new(*frames, options.fps, TEST_PATTERN_DIMS))
        }
    };
    Ok(source)
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("syncplay=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("SyncPlay v{}", syncplay_core::VERSION);

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;

    let config = match &options.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    let source = open_source(&options)?;
    let total = source.frame_count();
    let presented = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let mut session = Session::open(
        source,
        &config,
        Box::new(ConsoleDisplay {
            presented: presented.clone(),
        }),
        Box::new(ConsoleReporter {
            total,
            mode: PlaybackMode::Playing,
        }),
    )
    .context("Failed to start playback")?;

    let mut audio = AudioHost::open(session.audio_puller(), options.audio)?;

    let (tx, rx) = mpsc::channel();
    spawn_command_reader(tx)?;
    print_usage();

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Command::PlayPause) => {
                session.play_pause();
            }
            Ok(Command::Stop) => session.stop(),
            Ok(Command::Seek(frame)) => {
                session.seek(frame);
            }
            Ok(Command::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        audio.service();
    }

    let report = session.close().context("Playback shutdown failed")?;
    drop(audio);

    tracing::info!(
        "Played {:.1}s: stopped at frame {}/{}, {} frames shown, {} audio chunks, {} underruns{}",
        started.elapsed().as_secs_f64(),
        report.final_position,
        total,
        presented.load(Ordering::Relaxed),
        report.audio.chunks_delivered,
        report.audio.underruns,
        if report.audio.aborted { ", audio aborted" } else { "" }
    );

    Ok(())
}

//! Tracer lifecycle and the background sampling loop
//!
//! A tracer moves through Created → Running → Stopping → Stopped:
//!
//! - start: open the encoder, write the `hz` metadata event, spawn the
//!   sampling thread. Any failure leaves the tracer Stopped with that error.
//! - running: every tick captures a snapshot, diffs each context against
//!   the previous snapshot and encodes the events. Cancellation is only
//!   observed between ticks.
//! - stop: drops the cancellation sender (one-shot, cannot fire twice),
//!   waits for the loop's result on a one-slot channel, then finalizes the
//!   encoder. The previous snapshot and sample counter live on the sampling
//!   thread only.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;

use crate::capture::default_capturer;
use crate::dump::ParseError;
use crate::filter::SAMPLER_THREAD_NAME;
use crate::json_output::Encoder;
use crate::model::Snapshot;
use crate::sampler::Sampler;
use crate::state_frames::StateFrames;

/// Default number of snapshots per second
pub const DEFAULT_HZ: u32 = 99;

/// Errors that end a trace
#[derive(Error, Debug, Clone)]
pub enum TraceError {
    #[error("failed to write trace: {0}")]
    Write(Arc<io::Error>),

    #[error("failed to capture stacks: {0}")]
    Capture(Arc<io::Error>),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to create trace file {}: {source}", .path.display())]
    CreateFile { path: PathBuf, source: Arc<io::Error> },

    #[error("failed to close trace file: {0}")]
    CloseFile(Arc<io::Error>),

    #[error("failed to spawn sampling thread: {0}")]
    Spawn(Arc<io::Error>),

    #[error("sampling thread panicked")]
    SamplerPanicked,

    #[error("tracer is already stopped")]
    AlreadyStopped,
}

impl TraceError {
    pub fn write(e: io::Error) -> Self {
        Self::Write(Arc::new(e))
    }

    pub fn capture(e: io::Error) -> Self {
        Self::Capture(Arc::new(e))
    }
}

/// Tracer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracerConfig {
    /// Snapshots per second (0 = [`DEFAULT_HZ`])
    pub hz: u32,
    /// Placement of scheduler-state frames
    pub state_frames: StateFrames,
    /// Keep the tracer's own contexts in the trace
    pub include_self: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            hz: DEFAULT_HZ,
            state_frames: StateFrames::default(),
            include_self: false,
        }
    }
}

impl TracerConfig {
    /// Replace unset values with their defaults
    pub fn with_defaults(mut self) -> Self {
        if self.hz == 0 {
            self.hz = DEFAULT_HZ;
        }
        self
    }

    /// Time between two snapshots
    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.hz.max(1)
    }
}

/// What the sampling thread hands back when it exits
struct SamplerExit<W: Write> {
    encoder: Encoder<W>,
    samples: u64,
    result: Result<(), TraceError>,
}

struct Running<W: Write> {
    /// Dropping the sender is the stop signal
    cancel: Sender<()>,
    done: Receiver<SamplerExit<W>>,
    handle: JoinHandle<()>,
}

enum State<W: Write> {
    Running(Running<W>),
    Stopped {
        sink: Option<W>,
        /// Returned by every further `stop` call
        error: TraceError,
    },
}

/// Handle to a running trace.
///
/// The sink is owned by the sampling thread until [`Tracer::stop`] returns.
pub struct Tracer<W: Write + Send + 'static> {
    hz: u32,
    samples: u64,
    state: State<W>,
}

impl<W: Write + Send + 'static> Tracer<W> {
    /// Start tracing the current process into `sink`
    pub fn start(sink: W, config: TracerConfig) -> Self {
        let config = config.with_defaults();
        let sampler = Sampler::new(default_capturer(), &config);
        Self::start_with(sink, config, sampler)
    }

    /// Start tracing with a custom sampler
    pub fn start_with(sink: W, config: TracerConfig, sampler: Sampler) -> Self {
        let hz = config.with_defaults().hz;
        let mut encoder = Encoder::new(sink);

        if let Err(e) = encoder.open().and_then(|()| encoder.custom_meta("hz", hz)) {
            tracing::debug!(error = %e, "failed to write trace header");
            return Self::stopped(hz, Some(encoder.into_inner()), TraceError::write(e));
        }

        let (cancel_tx, cancel_rx) = channel::bounded::<()>(0);
        let (done_tx, done_rx) = channel::bounded(1);
        let interval = Duration::from_secs(1) / hz;

        let spawned = thread::Builder::new()
            .name(SAMPLER_THREAD_NAME.to_string())
            .spawn(move || {
                let exit = sample_loop(encoder, sampler, interval, &cancel_rx);
                // The receiver only goes away if the tracer was dropped
                let _ = done_tx.send(exit);
            });

        match spawned {
            Ok(handle) => {
                tracing::debug!(hz, "tracer started");
                Self {
                    hz,
                    samples: 0,
                    state: State::Running(Running {
                        cancel: cancel_tx,
                        done: done_rx,
                        handle,
                    }),
                }
            }
            Err(e) => Self::stopped(hz, None, TraceError::Spawn(Arc::new(e))),
        }
    }

    fn stopped(hz: u32, sink: Option<W>, error: TraceError) -> Self {
        Self {
            hz,
            samples: 0,
            state: State::Stopped { sink, error },
        }
    }

    /// Stop sampling and finalize the output.
    ///
    /// Returns the error that ended the trace, if any. Later calls return
    /// the same error, or [`TraceError::AlreadyStopped`] after a clean stop,
    /// and never write to the sink.
    pub fn stop(&mut self) -> Result<(), TraceError> {
        if let State::Stopped { error, .. } = &self.state {
            return Err(error.clone());
        }
        let placeholder = State::Stopped {
            sink: None,
            error: TraceError::AlreadyStopped,
        };
        let State::Running(running) = std::mem::replace(&mut self.state, placeholder) else {
            return Err(TraceError::AlreadyStopped);
        };

        let Running {
            cancel,
            done,
            handle,
        } = running;
        drop(cancel);
        let exit = done.recv();
        if handle.join().is_err() {
            tracing::warn!("sampling thread panicked");
        }

        let (result, sink) = match exit {
            Ok(SamplerExit {
                mut encoder,
                samples,
                result,
            }) => {
                self.samples = samples;
                let finish = encoder.finish().map_err(TraceError::write);
                tracing::debug!(samples, events = encoder.events_written(), "tracer stopped");
                (result.and(finish), Some(encoder.into_inner()))
            }
            Err(_) => (Err(TraceError::SamplerPanicked), None),
        };

        let error = match &result {
            Ok(()) => TraceError::AlreadyStopped,
            Err(e) => e.clone(),
        };
        self.state = State::Stopped { sink, error };
        result
    }

    /// Configured sampling frequency
    pub fn hz(&self) -> u32 {
        self.hz
    }

    /// Number of snapshots taken; known once stopped
    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    /// Take the sink back after the tracer stopped
    pub fn take_sink(&mut self) -> Option<W> {
        match &mut self.state {
            State::Stopped { sink, .. } => sink.take(),
            State::Running(_) => None,
        }
    }
}

impl<W: Write + Send + 'static> Drop for Tracer<W> {
    /// Cancels and joins the sampler without finalizing the output
    fn drop(&mut self) {
        let placeholder = State::Stopped {
            sink: None,
            error: TraceError::AlreadyStopped,
        };
        if let State::Running(running) = std::mem::replace(&mut self.state, placeholder) {
            drop(running.cancel);
            let _ = running.handle.join();
        }
    }
}

impl<W: Write + Send + 'static> std::fmt::Debug for Tracer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("hz", &self.hz)
            .field("samples", &self.samples)
            .field("running", &self.is_running())
            .finish()
    }
}

fn sample_loop<W: Write>(
    mut encoder: Encoder<W>,
    mut sampler: Sampler,
    interval: Duration,
    cancel: &Receiver<()>,
) -> SamplerExit<W> {
    let mut samples = 0;
    let result = run(&mut encoder, &mut sampler, interval, cancel, &mut samples);
    if let Err(e) = &result {
        tracing::warn!(error = %e, samples, "sampling loop failed");
    }
    SamplerExit {
        encoder,
        samples,
        result,
    }
}

fn run<W: Write>(
    encoder: &mut Encoder<W>,
    sampler: &mut Sampler,
    interval: Duration,
    cancel: &Receiver<()>,
    samples: &mut u64,
) -> Result<(), TraceError> {
    let ticker = channel::tick(interval);
    let start = Instant::now();
    let mut now = start;
    let mut prev = Snapshot::default();

    loop {
        *samples += 1;
        let ts = micros_since(start, now);
        let current = Snapshot::new(ts, sampler.sample()?);
        tracing::trace!(ts, contexts = current.len(), "sample");

        for (id, ctx) in &current.contexts {
            encoder
                .encode_diff(ts, prev.get(*id), Some(ctx))
                .map_err(TraceError::write)?;
        }
        for (id, ctx) in &prev.contexts {
            if !current.contexts.contains_key(id) {
                encoder
                    .encode_diff(ts, Some(ctx), None)
                    .map_err(TraceError::write)?;
            }
        }
        prev = current;

        channel::select! {
            recv(ticker) -> tick => now = tick.unwrap_or_else(|_| Instant::now()),
            recv(cancel) -> _ => {
                let ts = micros_since(start, Instant::now());
                for ctx in prev.contexts.values() {
                    encoder
                        .encode_diff(ts, Some(ctx), None)
                        .map_err(TraceError::write)?;
                }
                return Ok(());
            }
        }
    }
}

fn micros_since(start: Instant, now: Instant) -> f64 {
    now.saturating_duration_since(start).as_secs_f64() * 1e6
}

/// Tracer writing to a file it creates and closes
#[derive(Debug)]
pub struct FileTracer {
    path: PathBuf,
    tracer: Result<Tracer<BufWriter<File>>, TraceError>,
}

/// Start tracing the current process into a new file at `path`.
///
/// Failing to create the file is reported by [`FileTracer::stop`].
pub fn trace_file(path: impl AsRef<Path>, config: TracerConfig) -> FileTracer {
    let config = config.with_defaults();
    let sampler = Sampler::new(default_capturer(), &config);
    trace_file_with(path, config, sampler)
}

/// [`trace_file`] with a custom sampler
pub fn trace_file_with(path: impl AsRef<Path>, config: TracerConfig, sampler: Sampler) -> FileTracer {
    let path = path.as_ref().to_path_buf();
    let tracer = match File::create(&path) {
        Ok(file) => Ok(Tracer::start_with(BufWriter::new(file), config, sampler)),
        Err(e) => Err(TraceError::CreateFile {
            path: path.clone(),
            source: Arc::new(e),
        }),
    };
    FileTracer { path, tracer }
}

impl FileTracer {
    /// Stop the tracer, then flush and close the file. The tracer's error
    /// takes precedence over a close error.
    pub fn stop(&mut self) -> Result<(), TraceError> {
        let tracer = match &mut self.tracer {
            Ok(tracer) => tracer,
            Err(e) => return Err(e.clone()),
        };
        let result = tracer.stop();
        let Some(writer) = tracer.take_sink() else {
            return result;
        };
        let closed = writer
            .into_inner()
            .map(drop)
            .map_err(|e| TraceError::CloseFile(Arc::new(e.into_error())));
        result.and(closed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of snapshots taken; known once stopped
    pub fn samples(&self) -> u64 {
        self.tracer.as_ref().map(Tracer::samples).unwrap_or(0)
    }
}

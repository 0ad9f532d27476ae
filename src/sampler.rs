//! Snapshot pipeline: capture, parse, add state frames, drop own contexts

use std::io;

use crate::capture::StackCapturer;
use crate::dump::{DumpParser, StackParser};
use crate::filter::SelfFilter;
use crate::state_frames::{add_state_frames, StateFrames};
use crate::model::ExecutionContext;
use crate::tracer::{TraceError, TracerConfig};

/// Initial capture buffer size; doubled whenever a dump fills it
pub const INITIAL_BUFFER_SIZE: usize = 16 * 1024;

/// Produces one list of execution contexts per call
pub struct Sampler {
    capturer: Box<dyn StackCapturer>,
    parser: Box<dyn StackParser>,
    buf: Vec<u8>,
    state_frames: StateFrames,
    filter: SelfFilter,
}

impl Sampler {
    /// Sampler reading dumps from `capturer` with the default parser
    pub fn new(capturer: Box<dyn StackCapturer>, config: &TracerConfig) -> Self {
        Self {
            capturer,
            parser: Box::new(DumpParser::new()),
            buf: Vec::new(),
            state_frames: config.state_frames,
            filter: SelfFilter::new(config.include_self),
        }
    }

    /// Replace the dump parser
    pub fn with_parser(mut self, parser: impl StackParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Replace the self-exclusion filter
    pub fn with_filter(mut self, filter: SelfFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Current capture buffer size
    pub fn buffer_size(&self) -> usize {
        self.buf.len()
    }

    /// Capture one snapshot. A dump that does not parse cleanly is an
    /// error; the first parse error is reported.
    pub fn sample(&mut self) -> Result<Vec<ExecutionContext>, TraceError> {
        let n = self.capture_raw().map_err(TraceError::capture)?;

        let (mut contexts, errors) = self.parser.parse(&self.buf[..n]);
        if let Some(err) = errors.into_iter().next() {
            return Err(TraceError::Parse(err));
        }

        add_state_frames(&mut contexts, self.state_frames);
        self.filter.apply(&mut contexts);
        Ok(contexts)
    }

    /// Fill the buffer with a complete dump, growing it until the dump fits
    fn capture_raw(&mut self) -> io::Result<usize> {
        if self.buf.is_empty() {
            self.buf = vec![0; INITIAL_BUFFER_SIZE];
        }
        loop {
            let n = self.capturer.capture(&mut self.buf)?;
            if n < self.buf.len() {
                return Ok(n);
            }
            let size = self.buf.len() * 2;
            tracing::debug!(size, "stack dump truncated, growing capture buffer");
            self.buf = vec![0; size];
        }
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("buffer_size", &self.buf.len())
            .field("state_frames", &self.state_frames)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

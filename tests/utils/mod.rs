// Shared helpers for tracer integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spanshot::capture::fill_buffer;
use spanshot::dump::format_dump;
use spanshot::sampler::Sampler;
use spanshot::{ExecutionContext, Phase, TraceEvent, TracerConfig};

/// Capturer replaying one dump per call; the last dump repeats forever
pub fn scripted(
    snapshots: Vec<Vec<ExecutionContext>>,
) -> impl FnMut(&mut [u8]) -> io::Result<usize> + Send {
    let dumps: Vec<String> = snapshots.iter().map(|s| format_dump(s)).collect();
    let mut next = 0;
    move |buf: &mut [u8]| {
        let dump = dumps.get(next.min(dumps.len().saturating_sub(1)));
        next += 1;
        Ok(fill_buffer(buf, dump.map(String::as_bytes).unwrap_or_default()))
    }
}

/// Sampler over a scripted capturer
pub fn scripted_sampler(snapshots: Vec<Vec<ExecutionContext>>, config: &TracerConfig) -> Sampler {
    Sampler::new(Box::new(scripted(snapshots)), config)
}

/// Parse a finished trace
pub fn parse_trace(bytes: &[u8]) -> Vec<TraceEvent> {
    serde_json::from_slice(bytes).expect("trace is a valid JSON array of events")
}

/// Check that Begin/End events of every context nest like a stack.
/// Returns the frames still open per context.
pub fn check_nesting(events: &[TraceEvent]) -> HashMap<u64, Vec<String>> {
    let mut open: HashMap<u64, Vec<String>> = HashMap::new();
    for ev in events {
        match ev.ph {
            Phase::Begin => open.entry(ev.pid).or_default().push(ev.name.clone()),
            Phase::End => {
                let top = open.get_mut(&ev.pid).and_then(Vec::pop);
                assert_eq!(top.as_deref(), Some(ev.name.as_str()), "unbalanced End {ev:?}");
            }
            Phase::Metadata => {}
        }
    }
    open.retain(|_, stack| !stack.is_empty());
    open
}

pub fn count(events: &[TraceEvent], ph: Phase) -> usize {
    events.iter().filter(|e| e.ph == ph).count()
}

/// Writer that accepts `limit` bytes and then fails; counts write calls
#[derive(Debug, Clone)]
pub struct FailingWriter {
    limit: usize,
    written: usize,
    pub calls: Arc<AtomicUsize>,
}

impl FailingWriter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            written: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.written + buf.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Writer recording every byte; calls are counted for no-write checks
#[derive(Debug, Clone, Default)]
pub struct CountingWriter {
    pub bytes: Vec<u8>,
    pub calls: Arc<AtomicUsize>,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

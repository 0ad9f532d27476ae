//! Trace Event Format output
//!
//! Events are written as one JSON array, the format read by Chrome's
//! `about:tracing` and Perfetto. The encoder streams: every event is
//! serialized straight to the sink, so memory use does not grow with the
//! length of the trace. Until [`Encoder::finish`] runs, the output is an
//! unterminated array.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::differ;
use crate::model::ExecutionContext;

/// Every context is modelled as a process with a single thread
pub const THREAD_ID: u64 = 1;

/// Event phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "B")]
    Begin,
    #[serde(rename = "E")]
    End,
    #[serde(rename = "M")]
    Metadata,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// A single trace event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub name: String,
    pub ph: Phase,
    /// Microseconds since trace start
    pub ts: f64,
    /// Context id (0 for trace-wide metadata)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pid: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub tid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
}

impl TraceEvent {
    pub fn begin(name: impl Into<String>, ts: f64, pid: u64) -> Self {
        Self {
            name: name.into(),
            ph: Phase::Begin,
            ts,
            pid,
            tid: THREAD_ID,
            args: None,
        }
    }

    pub fn end(name: impl Into<String>, ts: f64, pid: u64) -> Self {
        Self {
            ph: Phase::End,
            ..Self::begin(name, ts, pid)
        }
    }

    /// Names the track of context `pid`
    pub fn process_name(pid: u64, display: impl Into<String>) -> Self {
        let mut args = Map::new();
        args.insert("name".to_string(), Value::String(display.into()));
        Self {
            name: "process_name".to_string(),
            ph: Phase::Metadata,
            ts: 0.0,
            pid,
            tid: THREAD_ID,
            args: Some(args),
        }
    }

    /// Trace-wide metadata event carrying `{name: value}`
    pub fn custom_meta(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let mut args = Map::new();
        args.insert(name.clone(), value.into());
        Self {
            name,
            ph: Phase::Metadata,
            ts: 0.0,
            pid: 0,
            tid: 0,
            args: Some(args),
        }
    }
}

/// Streaming encoder for a JSON array of trace events.
///
/// Single writer: only the sampling loop encodes.
#[derive(Debug)]
pub struct Encoder<W: Write> {
    sink: W,
    first: bool,
    finished: bool,
    events: u64,
}

impl<W: Write> Encoder<W> {
    /// Wrap a sink. Nothing is written until [`Encoder::open`].
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            first: true,
            finished: false,
            events: 0,
        }
    }

    /// Write the array start token
    pub fn open(&mut self) -> io::Result<()> {
        self.sink.write_all(b"[")
    }

    /// Append one event
    pub fn encode(&mut self, event: &TraceEvent) -> io::Result<()> {
        if self.first {
            self.first = false;
        } else {
            self.sink.write_all(b",")?;
        }
        serde_json::to_writer(&mut self.sink, event)?;
        self.sink.write_all(b"\n")?;
        self.events += 1;
        Ok(())
    }

    /// Write a trace-wide metadata event carrying `{name: value}`
    pub fn custom_meta(&mut self, name: &str, value: impl Into<Value>) -> io::Result<()> {
        self.encode(&TraceEvent::custom_meta(name, value))
    }

    /// Diff two samples of one context and encode the resulting events
    pub fn encode_diff(
        &mut self,
        ts: f64,
        prev: Option<&ExecutionContext>,
        current: Option<&ExecutionContext>,
    ) -> io::Result<()> {
        differ::diff(ts, prev, current, |event| self.encode(&event))
    }

    /// Write the array end token and flush. Only the first call writes.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.sink.write_all(b"]")?;
        self.sink.flush()
    }

    /// Number of events written so far
    pub fn events_written(&self) -> u64 {
        self.events
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

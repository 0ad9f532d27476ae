//! Snapshot data model
//!
//! A snapshot is the state of every execution context at one sampling
//! instant. Stacks are stored the way they are captured: leaf first, root
//! last.

use std::collections::BTreeMap;

/// A single stack frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Function symbol. The only field used to compare frames.
    pub func: String,
    /// Source file (informational)
    pub file: String,
    /// Source line (informational)
    pub line: u32,
}

impl Frame {
    /// Create a frame without location information
    pub fn new(func: impl Into<String>) -> Self {
        Self {
            func: func.into(),
            file: String::new(),
            line: 0,
        }
    }

    /// Create a frame with a source location
    pub fn with_location(func: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            func: func.into(),
            file: file.into(),
            line,
        }
    }
}

/// One concurrently schedulable unit of work and its call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Stable id, unique among contexts alive at the same time
    pub id: u64,
    /// Lifecycle state label (e.g. "running", "sleeping")
    pub state: String,
    /// Frames ordered leaf first, root last
    pub stack: Vec<Frame>,
    /// Frame that created this context, if known
    pub created_by: Option<Frame>,
}

impl ExecutionContext {
    /// Create a context from a leaf-first list of function names
    pub fn new(id: u64, state: impl Into<String>, leaf_first: &[&str]) -> Self {
        Self {
            id,
            state: state.into(),
            stack: leaf_first.iter().map(|f| Frame::new(*f)).collect(),
            created_by: None,
        }
    }

    /// Set the creating frame
    pub fn created_by(mut self, frame: Frame) -> Self {
        self.created_by = Some(frame);
        self
    }

    /// Number of frames on the stack
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Root frame (outermost), if the stack is not empty
    pub fn root(&self) -> Option<&Frame> {
        self.stack.last()
    }
}

/// All execution contexts at one sampling instant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Microseconds since trace start
    pub ts: f64,
    /// Contexts keyed by id
    pub contexts: BTreeMap<u64, ExecutionContext>,
}

impl Snapshot {
    /// Build a snapshot from captured contexts. If the same id appears
    /// more than once, the last entry wins.
    pub fn new(ts: f64, contexts: impl IntoIterator<Item = ExecutionContext>) -> Self {
        let mut map = BTreeMap::new();
        for ctx in contexts {
            if let Some(previous) = map.insert(ctx.id, ctx) {
                tracing::warn!(id = previous.id, "duplicate execution context id in snapshot");
            }
        }
        Self { ts, contexts: map }
    }

    pub fn get(&self, id: u64) -> Option<&ExecutionContext> {
        self.contexts.get(&id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

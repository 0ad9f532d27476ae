//! Textual stack dump format
//!
//! Capturers produce a plain-text dump of every execution context; this
//! module parses it back into [`ExecutionContext`] values. Layout:
//!
//! ```text
//! context 42 [sleeping]:
//! do_nanosleep
//! worker_loop
//! 	src/worker.rs:88
//! main
//! 	src/main.rs:12
//! created by spawn_workers
//! 	src/main.rs:9
//!
//! context 43 [runnable]:
//! ...
//! ```
//!
//! Frames are leaf first. The tab-indented location line is optional for
//! every frame, and `created by` must be the last entry of a context.

use std::io::{self, Write};

use thiserror::Error;

use crate::model::{ExecutionContext, Frame};

const HEADER_PREFIX: &str = "context ";
const CREATOR_PREFIX: &str = "created by ";

/// Whether `func` can be written as a frame line and read back as one
pub fn is_frame_name(func: &str) -> bool {
    !func.trim().is_empty()
        && !func.starts_with(char::is_whitespace)
        && !func.starts_with(HEADER_PREFIX)
        && !func.starts_with(CREATOR_PREFIX)
}

/// Error produced while parsing a dump
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stack dump line {line}: {kind}")]
pub struct ParseError {
    /// 1-based line number
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("invalid context header {0:?}")]
    InvalidHeader(String),

    #[error("invalid context id {0:?}")]
    InvalidId(String),

    #[error("frame outside of a context: {0:?}")]
    FrameOutsideContext(String),

    #[error("location without a frame: {0:?}")]
    OrphanLocation(String),

    #[error("invalid location {0:?}")]
    InvalidLocation(String),

    #[error("frame after creator: {0:?}")]
    FrameAfterCreator(String),
}

/// Turns raw dump bytes into structured contexts.
///
/// Parsing may partially fail: implementations return every context they
/// could parse together with all errors encountered.
pub trait StackParser: Send {
    fn parse(&self, dump: &[u8]) -> (Vec<ExecutionContext>, Vec<ParseError>);
}

/// Parser for the format described in the module docs
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpParser;

impl DumpParser {
    pub fn new() -> Self {
        Self
    }
}

/// Context under construction
struct Pending {
    ctx: ExecutionContext,
    /// Set once `created by` was seen
    sealed: bool,
    /// Whether the last entry can still take a location line
    can_locate: bool,
}

impl Pending {
    fn last_frame_mut(&mut self) -> Option<&mut Frame> {
        if self.sealed {
            self.ctx.created_by.as_mut()
        } else {
            self.ctx.stack.last_mut()
        }
    }
}

enum ParseState {
    /// Between contexts
    Idle,
    /// Inside a well-formed context
    Context(Pending),
    /// Skipping the rest of a malformed context
    Skipping,
}

impl StackParser for DumpParser {
    fn parse(&self, dump: &[u8]) -> (Vec<ExecutionContext>, Vec<ParseError>) {
        let text = String::from_utf8_lossy(dump);
        let mut contexts = Vec::new();
        let mut errors = Vec::new();
        let mut state = ParseState::Idle;

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let fail = |kind| ParseError { line, kind };

            if raw.trim().is_empty() {
                if let ParseState::Context(pending) = std::mem::replace(&mut state, ParseState::Idle) {
                    contexts.push(pending.ctx);
                }
                continue;
            }

            if raw.starts_with(HEADER_PREFIX) {
                if let ParseState::Context(pending) = state {
                    contexts.push(pending.ctx);
                }
                state = match parse_header(raw) {
                    Ok(ctx) => ParseState::Context(Pending {
                        ctx,
                        sealed: false,
                        can_locate: false,
                    }),
                    Err(kind) => {
                        errors.push(fail(kind));
                        ParseState::Skipping
                    }
                };
                continue;
            }

            state = match state {
                ParseState::Skipping => ParseState::Skipping,
                ParseState::Idle => {
                    errors.push(fail(ParseErrorKind::FrameOutsideContext(raw.to_string())));
                    ParseState::Skipping
                }
                ParseState::Context(mut pending) => {
                    if raw.starts_with(char::is_whitespace) {
                        match (pending.can_locate, parse_location(raw.trim())) {
                            (false, _) => {
                                errors.push(fail(ParseErrorKind::OrphanLocation(raw.to_string())));
                                ParseState::Skipping
                            }
                            (true, Err(kind)) => {
                                errors.push(fail(kind));
                                ParseState::Skipping
                            }
                            (true, Ok((file, line_no))) => {
                                if let Some(frame) = pending.last_frame_mut() {
                                    frame.file = file;
                                    frame.line = line_no;
                                }
                                pending.can_locate = false;
                                ParseState::Context(pending)
                            }
                        }
                    } else if pending.sealed {
                        errors.push(fail(ParseErrorKind::FrameAfterCreator(raw.to_string())));
                        ParseState::Skipping
                    } else if let Some(creator) = raw.strip_prefix(CREATOR_PREFIX) {
                        pending.ctx.created_by = Some(Frame::new(creator.trim_end()));
                        pending.sealed = true;
                        pending.can_locate = true;
                        ParseState::Context(pending)
                    } else {
                        pending.ctx.stack.push(Frame::new(raw.trim_end()));
                        pending.can_locate = true;
                        ParseState::Context(pending)
                    }
                }
            };
        }

        if let ParseState::Context(pending) = state {
            contexts.push(pending.ctx);
        }

        (contexts, errors)
    }
}

fn parse_header(raw: &str) -> Result<ExecutionContext, ParseErrorKind> {
    let invalid = || ParseErrorKind::InvalidHeader(raw.to_string());
    let body = raw
        .trim_end()
        .strip_prefix(HEADER_PREFIX)
        .and_then(|s| s.strip_suffix(':'))
        .ok_or_else(invalid)?;
    let (id, state) = body.split_once(' ').ok_or_else(invalid)?;
    let state = state
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(invalid)?;
    let id = id
        .parse::<u64>()
        .map_err(|_| ParseErrorKind::InvalidId(id.to_string()))?;

    Ok(ExecutionContext {
        id,
        state: state.to_string(),
        stack: Vec::new(),
        created_by: None,
    })
}

fn parse_location(loc: &str) -> Result<(String, u32), ParseErrorKind> {
    let (file, line) = loc
        .rsplit_once(':')
        .ok_or_else(|| ParseErrorKind::InvalidLocation(loc.to_string()))?;
    let line = line
        .parse::<u32>()
        .map_err(|_| ParseErrorKind::InvalidLocation(loc.to_string()))?;
    Ok((file.to_string(), line))
}

/// Write one context in dump format, followed by a blank line
pub fn write_context<W: Write>(w: &mut W, ctx: &ExecutionContext) -> io::Result<()> {
    writeln!(w, "{HEADER_PREFIX}{} [{}]:", ctx.id, ctx.state)?;
    for frame in &ctx.stack {
        writeln!(w, "{}", frame.func)?;
        write_location(w, frame)?;
    }
    if let Some(creator) = &ctx.created_by {
        writeln!(w, "{CREATOR_PREFIX}{}", creator.func)?;
        write_location(w, creator)?;
    }
    writeln!(w)
}

fn write_location<W: Write>(w: &mut W, frame: &Frame) -> io::Result<()> {
    if frame.file.is_empty() {
        return Ok(());
    }
    writeln!(w, "\t{}:{}", frame.file, frame.line)
}

/// Render a full dump for a list of contexts
pub fn format_dump<'a>(contexts: impl IntoIterator<Item = &'a ExecutionContext>) -> String {
    let mut out = Vec::new();
    for ctx in contexts {
        // Writing into a Vec cannot fail
        let _ = write_context(&mut out, ctx);
    }
    String::from_utf8_lossy(&out).into_owned()
}

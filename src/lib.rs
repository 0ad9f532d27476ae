//! spanshot - sampling profiler producing Chrome trace timelines
//!
//! A background thread periodically captures the stack of every execution
//! context, diffs each stack against its previous sample and streams the
//! inferred Begin/End events to a sink in Trace Event Format. The result
//! opens in `about:tracing` or Perfetto as one track per context.
//!
//! ```no_run
//! use spanshot::tracer::{Tracer, TracerConfig};
//!
//! let file = std::fs::File::create("trace.json")?;
//! let mut tracer = Tracer::start(std::io::BufWriter::new(file), TracerConfig::default());
//! // ... workload ...
//! tracer.stop()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod capture;
pub mod cli;
pub mod differ;
pub mod dump;
pub mod filter;
pub mod json_output;
pub mod model;
#[cfg(target_os = "linux")]
pub mod procfs;
pub mod sampler;
pub mod state_frames;
pub mod tracer;

pub use json_output::{Encoder, Phase, TraceEvent};
pub use model::{ExecutionContext, Frame, Snapshot};
pub use tracer::{trace_file, FileTracer, TraceError, Tracer, TracerConfig};

//! CLI argument parsing for spanshot

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::state_frames::StateFrames;
use crate::tracer::{TracerConfig, DEFAULT_HZ};

#[derive(Parser, Debug)]
#[command(name = "spanshot")]
#[command(version)]
#[command(about = "Sampling profiler that writes thread timelines as Chrome trace events", long_about = None)]
pub struct Cli {
    /// Snapshots per second
    #[arg(long = "hz", value_name = "N", default_value_t = DEFAULT_HZ, value_parser = clap::value_parser!(u32).range(1..))]
    pub hz: u32,

    /// Seconds to sample an attached process (ignored when tracing a command)
    #[arg(short = 'd', long = "duration", value_name = "SECS", default_value = "30", value_parser = parse_duration)]
    pub duration: Duration,

    /// Trace output file
    #[arg(short = 'o', long = "output", value_name = "FILE", default_value = "spanshot.json")]
    pub output: PathBuf,

    /// Where to place the scheduler-state frame of each context
    #[arg(long = "state-frames", value_enum, default_value_t = StateFrames::Leaf)]
    pub state_frames: StateFrames,

    /// Keep spanshot's own threads in the trace
    #[arg(long = "include-self")]
    pub include_self: bool,

    /// Attach to running process by PID (mutually exclusive with command)
    #[arg(short = 'p', long = "pid", value_name = "PID")]
    pub pid: Option<u32>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,

    /// Command to trace (everything after --)
    #[arg(last = true)]
    pub command: Option<Vec<String>>,
}

impl Cli {
    pub fn tracer_config(&self) -> TracerConfig {
        TracerConfig {
            hz: self.hz,
            state_frames: self.state_frames,
            include_self: self.include_self,
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid duration: {e}"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("duration must be a positive number of seconds, got {s}"));
    }
    Ok(Duration::from_secs_f64(secs))
}

use std::path::Path;
use std::process::{Command, ExitCode};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use spanshot::capture::process_capturer;
use spanshot::cli::Cli;
use spanshot::sampler::Sampler;
use spanshot::tracer::{self, FileTracer, TracerConfig};
use tracing_subscriber::EnvFilter;

/// How often an attached process is checked for exit
const LIVENESS_POLL: Duration = Duration::from_millis(100);

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn start(pid: u32, output: &Path, config: TracerConfig) -> FileTracer {
    let sampler = Sampler::new(process_capturer(pid), &config);
    tracer::trace_file_with(output, config, sampler)
}

fn finish(mut tracer: FileTracer) -> Result<()> {
    tracer
        .stop()
        .with_context(|| format!("failed to write trace to {}", tracer.path().display()))?;
    eprintln!(
        "[spanshot: wrote {} samples to {}]",
        tracer.samples(),
        tracer.path().display()
    );
    Ok(())
}

/// Sample a running process until `duration` elapses or it exits
fn attach_to_pid(pid: u32, duration: Duration, output: &Path, config: TracerConfig) -> Result<()> {
    let proc_dir = Path::new("/proc").join(pid.to_string());
    if !proc_dir.exists() {
        anyhow::bail!("No such process: {pid}");
    }

    let tracer = start(pid, output, config);
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline && proc_dir.exists() {
        thread::sleep(LIVENESS_POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
    finish(tracer)
}

/// Run a command and sample it until it exits. Returns its exit code.
fn trace_command(command: &[String], output: &Path, config: TracerConfig) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .context("Command must not be empty")?;
    let mut child = Command::new(program)
        .args(args)
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    let tracer = start(child.id(), output, config);
    let status = child.wait().context("failed to wait for command")?;
    finish(tracer)?;

    tracing::debug!(?status, "command exited");
    Ok(status.code().unwrap_or(1))
}

/// Execute the tracer based on PID or command arguments
fn run_tracer(args: &Cli) -> Result<i32> {
    let config = args.tracer_config();
    match (args.pid, &args.command) {
        (Some(pid), None) => {
            attach_to_pid(pid, args.duration, &args.output, config)?;
            Ok(0)
        }
        (None, Some(command)) => trace_command(command, &args.output, config),
        (Some(_), Some(_)) => {
            anyhow::bail!("Cannot specify both -p PID and command. Choose one.");
        }
        (None, None) => {
            anyhow::bail!("Must specify either -p PID or command. Usage: spanshot -p PID or spanshot -- COMMAND [ARGS...]");
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let code = run_tracer(&args)?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

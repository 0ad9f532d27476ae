//! Thread stack capture through `/proc` (Linux)
//!
//! Every thread of the target process becomes one execution context:
//!
//! - id: the thread id
//! - state: the scheduler state letter from `task/<tid>/stat`
//! - frames: kernel stack symbols from `task/<tid>/stack` when readable
//!   (usually requires `CAP_SYS_ADMIN`), otherwise the `wchan` symbol
//! - root frame: the thread name from `task/<tid>/comm`
//!
//! Threads that exit while being read are skipped. A process that is gone
//! produces an empty dump, which the tracer turns into End events for
//! everything still open.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;

use crate::capture::{fill_buffer, StackCapturer};
use crate::dump::{is_frame_name, write_context};
use crate::model::{ExecutionContext, Frame};

/// Captures the threads of one process
#[derive(Debug, Clone)]
pub struct ProcfsCapturer {
    pid: u32,
    root: PathBuf,
    /// `None` until the first read attempt of a `stack` file
    kernel_stacks: Option<bool>,
}

impl ProcfsCapturer {
    /// Capture the threads of `pid`
    pub fn new(pid: u32) -> Self {
        Self::with_proc_root(pid, "/proc")
    }

    /// Capture the threads of the calling process
    pub fn current_process() -> Self {
        Self::new(std::process::id())
    }

    /// Read from an alternate procfs mount
    pub fn with_proc_root(pid: u32, proc_root: impl AsRef<Path>) -> Self {
        Self {
            pid,
            root: proc_root.as_ref().join(pid.to_string()),
            kernel_stacks: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Read every thread of the process. An exited process yields no
    /// contexts.
    pub fn contexts(&mut self) -> io::Result<Vec<ExecutionContext>> {
        let task_dir = self.root.join("task");
        let entries = match fs::read_dir(&task_dir) {
            Ok(entries) => entries,
            Err(e) if is_gone(&e) => {
                tracing::debug!(pid = self.pid, "process is gone, reporting no threads");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut tids: Vec<u64> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        tids.sort_unstable();

        let main_name = read_trimmed(&self.root.join("comm")).ok();

        let mut contexts = Vec::with_capacity(tids.len());
        for tid in tids {
            match self.read_thread(&task_dir.join(tid.to_string()), tid, main_name.as_deref()) {
                Ok(ctx) => contexts.push(ctx),
                Err(e) if is_gone(&e) => {
                    tracing::trace!(tid, "thread exited during capture");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(contexts)
    }

    fn read_thread(
        &mut self,
        dir: &Path,
        tid: u64,
        main_name: Option<&str>,
    ) -> io::Result<ExecutionContext> {
        let stat = read_lossy(&dir.join("stat"))?;
        let state = parse_stat_state(&stat)
            .map(state_label)
            .unwrap_or("unknown")
            .to_string();
        let name = read_trimmed(&dir.join("comm"))?;

        let mut stack = self.kernel_frames(dir);
        if stack.is_empty() {
            if let Some(wchan) = read_trimmed(&dir.join("wchan")).ok().filter(|w| is_symbol(w)) {
                stack.push(Frame::new(wchan));
            }
        }
        stack.push(thread_frame(name, tid));

        let created_by = if tid == u64::from(self.pid) {
            None
        } else {
            main_name.map(|name| thread_frame(name.to_string(), u64::from(self.pid)))
        };

        Ok(ExecutionContext {
            id: tid,
            state,
            stack,
            created_by,
        })
    }

    fn kernel_frames(&mut self, dir: &Path) -> Vec<Frame> {
        if self.kernel_stacks == Some(false) {
            return Vec::new();
        }
        match read_lossy(&dir.join("stack")) {
            Ok(text) => {
                self.kernel_stacks = Some(true);
                parse_kernel_stack(&text)
            }
            // Either the thread just exited (caught by the next tick) or
            // this procfs has no stack files at all.
            Err(e) if is_gone(&e) => Vec::new(),
            Err(e) => {
                if self.kernel_stacks.is_none() {
                    tracing::debug!(error = %e, "kernel stacks unavailable, falling back to wchan");
                }
                self.kernel_stacks = Some(false);
                Vec::new()
            }
        }
    }
}

impl StackCapturer for ProcfsCapturer {
    fn capture(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut dump = Vec::new();
        for ctx in self.contexts()? {
            write_context(&mut dump, &ctx)?;
        }
        Ok(fill_buffer(buf, &dump))
    }
}

/// Scheduler state letter. `comm` may contain spaces and parentheses, so
/// the letter is located after the last `)`.
fn parse_stat_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

/// Human-readable label for a `/proc/<pid>/stat` state letter
pub fn state_label(state: char) -> &'static str {
    match state {
        'R' => "runnable",
        'S' => "sleeping",
        'D' => "disk sleep",
        'T' => "stopped",
        't' => "tracing stop",
        'Z' => "zombie",
        'X' | 'x' => "dead",
        'I' => "idle",
        'W' => "waking",
        'P' => "parked",
        _ => "unknown",
    }
}

/// Symbols from a `/proc/<pid>/stack` listing, innermost first.
/// Lines look like `[<0>] do_nanosleep+0x6f/0x140`.
fn parse_kernel_stack(text: &str) -> Vec<Frame> {
    text.lines()
        .filter_map(|line| {
            let symbol = match line.split_once("] ") {
                Some((_, symbol)) => symbol,
                None => line,
            };
            let symbol = symbol.split('+').next()?.trim();
            is_symbol(symbol).then(|| Frame::new(symbol))
        })
        .collect()
}

/// Frame for a thread name. Names the dump format cannot carry get a
/// placeholder or have their first space replaced.
fn thread_frame(name: String, tid: u64) -> Frame {
    let name: String = name
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    let name = name.trim_start();
    if name.trim().is_empty() {
        Frame::new(format!("thread-{tid}"))
    } else if is_frame_name(name) {
        Frame::new(name)
    } else {
        Frame::new(name.replacen(' ', "_", 1))
    }
}

fn is_symbol(s: &str) -> bool {
    !s.is_empty() && s != "0"
}

/// Read a procfs file as text. `comm` is cut at 15 bytes, which may split
/// a multi-byte character.
fn read_lossy(path: &Path) -> io::Result<String> {
    Ok(String::from_utf8_lossy(&fs::read(path)?).into_owned())
}

fn read_trimmed(path: &Path) -> io::Result<String> {
    Ok(read_lossy(path)?.trim_end().to_string())
}

/// The process or thread exited between listing and reading
fn is_gone(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(Errno::ESRCH as i32)
}

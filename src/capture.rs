//! Raw stack capture
//!
//! A capturer writes a textual dump (see [`crate::dump`]) of every execution
//! context into a caller-provided buffer. It is the only platform-specific
//! piece of the pipeline.

use std::io;

/// Produces a raw snapshot of all execution contexts.
///
/// `capture` fills `buf` and returns the number of bytes written. Returning
/// `buf.len()` signals that the dump may have been truncated; the caller
/// then retries with a larger buffer.
pub trait StackCapturer: Send {
    fn capture(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<F> StackCapturer for F
where
    F: FnMut(&mut [u8]) -> io::Result<usize> + Send,
{
    fn capture(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self(buf)
    }
}

/// Copy as much of `dump` as fits into `buf`.
///
/// Helper for capturers that render the whole dump up front.
pub fn fill_buffer(buf: &mut [u8], dump: &[u8]) -> usize {
    let n = dump.len().min(buf.len());
    buf[..n].copy_from_slice(&dump[..n]);
    n
}

/// Capturer for platforms without thread introspection
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedCapturer;

impl StackCapturer for UnsupportedCapturer {
    fn capture(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stack capture is not supported on this platform",
        ))
    }
}

/// Capturer for the current process on this platform
pub fn default_capturer() -> Box<dyn StackCapturer> {
    process_capturer(std::process::id())
}

/// Capturer for the threads of another process
#[cfg(target_os = "linux")]
pub fn process_capturer(pid: u32) -> Box<dyn StackCapturer> {
    Box::new(crate::procfs::ProcfsCapturer::new(pid))
}

/// Capturer for the threads of another process
#[cfg(not(target_os = "linux"))]
pub fn process_capturer(_pid: u32) -> Box<dyn StackCapturer> {
    Box::new(UnsupportedCapturer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_buffer_truncates() {
        let mut buf = [0u8; 4];
        assert_eq!(fill_buffer(&mut buf, b"abcdef"), 4);
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn test_fill_buffer_short_dump() {
        let mut buf = [0u8; 8];
        assert_eq!(fill_buffer(&mut buf, b"ab"), 2);
        assert_eq!(&buf[..2], b"ab");
    }

    #[test]
    fn test_closure_is_a_capturer() {
        let mut capturer = |buf: &mut [u8]| Ok::<_, io::Error>(fill_buffer(buf, b"context 1 [running]:\n"));
        let mut buf = vec![0u8; 64];
        let n = capturer.capture(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"context 1 [running]:\n");
    }

    #[test]
    fn test_unsupported_capturer_errors() {
        let mut buf = vec![0u8; 16];
        let err = UnsupportedCapturer.capture(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}

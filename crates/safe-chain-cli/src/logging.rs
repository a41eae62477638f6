//! Buffered log output (spec §4.8 step 4): the wrapped child inherits our
//! stdio, so tracing output is buffered rather than written straight to
//! the terminal, and flushed once the child exits (or on SIGINT/SIGTERM)
//! so our log lines never interleave with the child's own escape
//! sequences.
//!
//! Grounded on the teacher's `FeedbackMakeWriter`/`FeedbackWriter`
//! (`feedback/src/lib.rs`): a `tracing_subscriber::fmt::writer::MakeWriter`
//! backed by a shared, lock-guarded byte buffer.

use crate::flags::LogLevel;
use std::io;
use std::io::Write as _;
use std::sync::Arc;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
pub struct BufferedLog {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl BufferedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_writer(&self) -> BufferedMakeWriter {
        BufferedMakeWriter {
            buffer: self.buffer.clone(),
        }
    }

    /// Drains the buffer and writes it to stderr in one shot. Safe to call
    /// more than once (a later call simply has nothing left to flush).
    pub fn flush_to_stderr(&self) {
        let bytes = {
            let mut guard = self
                .buffer
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        if bytes.is_empty() {
            return;
        }
        let _ = io::stderr().write_all(&bytes);
    }
}

#[derive(Clone)]
pub struct BufferedMakeWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for BufferedMakeWriter {
    type Writer = BufferedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferedWriter {
            buffer: self.buffer.clone(),
        }
    }
}

pub struct BufferedWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for BufferedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Installs the global tracing subscriber, buffering output behind `log`.
/// `--safe-chain-logging=silent` (the default) filters everything but
/// warnings and errors; `normal` is info-and-above; `verbose` is
/// trace-and-above, matching the spec's "verbose log" escalation points
/// sprinkled through §4.4/§4.6/§4.8.
pub fn init(log: &BufferedLog, level: LogLevel) {
    let filter = match level {
        LogLevel::Silent => LevelFilter::WARN,
        LogLevel::Normal => LevelFilter::INFO,
        LogLevel::Verbose => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(log.make_writer())
        .with_ansi(false)
        .with_max_level(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_buffers_until_flushed() {
        let log = BufferedLog::new();
        {
            let mut writer = log.make_writer().make_writer();
            writer.write_all(b"hello").unwrap();
        }
        let buffered = log
            .buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        assert_eq!(buffered, b"hello");
    }

    #[test]
    fn flush_drains_the_buffer() {
        let log = BufferedLog::new();
        {
            let mut writer = log.make_writer().make_writer();
            writer.write_all(b"hello").unwrap();
        }
        log.flush_to_stderr();
        let buffered = log
            .buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        assert!(buffered.is_empty());
    }
}

//! In-process ring buffer of formatted log lines, fed by a
//! `tracing_subscriber::fmt::Layer` writer, served by `/logs` (§4.9).

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        })
    }

    fn push_line(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The most recent `limit` lines, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(limit);
        lines.iter().skip(skip).cloned().collect()
    }
}

/// `Write` sink that splits whatever `tracing_subscriber::fmt` hands it
/// into lines and appends each to a [`LogBuffer`].
struct BufferWriter(Arc<LogBuffer>);

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for line in String::from_utf8_lossy(buf).lines() {
            if !line.is_empty() {
                self.0.push_line(line.to_string());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `MakeWriter` implementation handed to `tracing_subscriber::fmt::layer().with_writer(...)`
/// at startup (wired in the Supervisor, §4.10) so every formatted log
/// line also lands in the buffer `/logs` serves.
#[derive(Clone)]
pub struct BufferMakeWriter(pub Arc<LogBuffer>);

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for BufferMakeWriter {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter(self.0.clone())
    }
}

#[cfg(test)]
impl LogBuffer {
    /// Push a line directly, bypassing the `tracing` writer plumbing.
    /// Used by `crawlforge-api`'s router-level tests.
    pub fn push_line_for_test(&self, line: String) {
        self.push_line(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn ring_buffer_drops_oldest_past_capacity() {
        let buf = LogBuffer::new(3);
        for i in 0..5 {
            buf.push_line(format!("line {i}"));
        }
        let recent = buf.recent(10);
        assert_eq!(recent, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn recent_respects_limit() {
        let buf = LogBuffer::new(10);
        for i in 0..5 {
            buf.push_line(format!("line {i}"));
        }
        assert_eq!(buf.recent(2), vec!["line 3", "line 4"]);
    }

    #[test]
    fn writer_splits_multiline_writes() {
        let buf = LogBuffer::new(10);
        let mut writer = BufferWriter(buf.clone());
        writer.write_all(b"first\nsecond\n").unwrap();
        assert_eq!(buf.recent(10), vec!["first", "second"]);
    }
}

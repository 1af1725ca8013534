//! candump-format frame logging
//!
//! Wraps any transport and appends every frame crossing it, sent or
//! received, to a canutils-compatible log file:
//!
//! ```text
//! (1699999999.123456) can0 123#DEADBEEF
//! ```

use can_testbench_core::{CanTransport, Frame};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport decorator that logs all traffic in canutils format
pub struct LoggedTransport {
    inner: Arc<dyn CanTransport>,
    writer: Mutex<LineWriter<File>>,
    channel: String,
}

impl LoggedTransport {
    /// Wrap `inner`, appending to the log file at `path`
    pub fn new(inner: Arc<dyn CanTransport>, path: &Path, channel: &str) -> io::Result<Self> {
        let file = File::options().create(true).append(true).open(path)?;
        Ok(Self {
            inner,
            writer: Mutex::new(LineWriter::new(file)),
            channel: channel.to_string(),
        })
    }

    fn append(&self, frame: &Frame) {
        let mut line = String::with_capacity(48);
        let secs = frame.timestamp.timestamp();
        let micros = frame.timestamp.timestamp_subsec_micros();
        if frame.is_extended {
            let _ = write!(line, "({}.{:06}) {} {:08X}#", secs, micros, self.channel, frame.can_id);
        } else {
            let _ = write!(line, "({}.{:06}) {} {:03X}#", secs, micros, self.channel, frame.can_id);
        }
        for byte in &frame.data {
            let _ = write!(line, "{:02X}", byte);
        }
        line.push('\n');

        let mut writer = self.writer.lock().expect("frame log poisoned");
        if let Err(e) = writer.write_all(line.as_bytes()) {
            log::warn!("Frame log write failed: {}", e);
        }
    }
}

impl CanTransport for LoggedTransport {
    fn recv(&self, timeout: Duration) -> can_testbench_core::Result<Option<Frame>> {
        let frame = self.inner.recv(timeout)?;
        if let Some(frame) = &frame {
            self.append(frame);
        }
        Ok(frame)
    }

    fn send(&self, frame: &Frame) -> can_testbench_core::Result<()> {
        self.inner.send(frame)?;
        self.append(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_testbench_core::transport::loopback;
    use chrono::TimeZone;

    #[test]
    fn test_log_line_format() {
        let dir = std::env::temp_dir().join("can-testbench-framelog-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("log-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let (a, b) = loopback();
        let logged = LoggedTransport::new(Arc::new(a), &path, "can0").unwrap();

        let mut frame = Frame::new(0x123, false, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        frame.timestamp = chrono::Utc.timestamp_opt(1699999999, 123_456_000).unwrap();
        logged.send(&frame).unwrap();
        drop(logged); // flush

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "(1699999999.123456) can0 123#DEADBEEF\n");

        let received = b.recv(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(received.can_id, 0x123);
        let _ = std::fs::remove_file(&path);
    }
}

//! Report destination
//!
//! Standard output in production; an in-memory buffer in tests.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Where rendered report text goes
#[derive(Clone, Default)]
pub struct OutputSink {
    buffer: Option<Arc<Mutex<Vec<u8>>>>,
}

impl OutputSink {
    pub fn stdout() -> Self {
        Self { buffer: None }
    }

    /// Capture output in memory
    #[cfg(test)]
    pub fn buffer() -> Self {
        Self {
            buffer: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Write text as-is; empty text writes nothing
    pub fn write(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        match &self.buffer {
            Some(buffer) => buffer.lock().extend_from_slice(text.as_bytes()),
            None => {
                let mut stdout = std::io::stdout().lock();
                if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
                    debug!("Failed to write report: {}", e);
                }
            }
        }
    }

    /// Captured bytes (always empty for stdout)
    #[cfg(test)]
    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .as_ref()
            .map(|b| b.lock().clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink() {
        let sink = OutputSink::buffer();
        let clone = sink.clone();
        sink.write("a: ok\n");
        clone.write("");
        clone.write("b: ok\n");
        assert_eq!(sink.contents_string(), "a: ok\nb: ok\n");
    }
}

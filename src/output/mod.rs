//! Output capture and surveillance
//!
//! The service's stdout and stderr are piped into an [`OutputCapture`] for the
//! whole scenario window. Once the window closes the text is written back to
//! the real streams and then classified by [`OutputSurveillance`].

mod capture;
mod checker;

pub use capture::OutputCapture;
pub use checker::{FalsePositiveRule, OutputSurveillance, RuleFlags, SuspiciousOutput};

use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use tracing::warn;

/// Which of the two captured streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => f.write_str("stdout"),
            Stream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Bytes captured from the service for one scenario window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn new(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn bytes(&self, stream: Stream) -> &[u8] {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    /// Stream contents as text; invalid UTF-8 becomes U+FFFD
    pub fn text(&self, stream: Stream) -> Cow<'_, str> {
        String::from_utf8_lossy(self.bytes(stream))
    }

    /// Write both streams back to the harness's own stdout and stderr, byte for byte
    pub fn emit(&self) {
        if !self.stdout.is_empty() {
            let mut out = std::io::stdout().lock();
            if let Err(e) = out.write_all(&self.stdout).and_then(|_| out.flush()) {
                warn!("Failed to re-emit captured stdout: {}", e);
            }
        }
        if !self.stderr.is_empty() {
            let mut err = std::io::stderr().lock();
            if let Err(e) = err.write_all(&self.stderr).and_then(|_| err.flush()) {
                warn!("Failed to re-emit captured stderr: {}", e);
            }
        }
    }
}

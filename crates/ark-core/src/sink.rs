//! Progress output sinks.

use std::io::Write;
use tracing::warn;

/// Destinations for human-readable progress lines during refresh, up,
/// and destroy.
///
/// The console sink writes to stdout. The optional secondary sink is
/// any byte stream supplied by the caller; it is flushed and dropped
/// exactly once per run, on every exit path.
pub struct ProgressSinks {
    console: bool,
    secondary: Option<Box<dyn Write + Send>>,
}

impl ProgressSinks {
    /// Console-only output.
    pub fn console() -> Self {
        Self {
            console: true,
            secondary: None,
        }
    }

    /// No output at all.
    pub fn quiet() -> Self {
        Self {
            console: false,
            secondary: None,
        }
    }

    /// Attach a secondary byte-stream consumer.
    pub fn with_secondary(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.secondary = Some(sink);
        self
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Write one progress line to every configured destination.
    /// Write failures on the secondary sink are logged, not fatal.
    pub fn write_line(&mut self, line: &str) {
        if self.console {
            println!("{line}");
        }
        if let Some(sink) = self.secondary.as_mut() {
            if let Err(e) = writeln!(sink, "{line}") {
                warn!(error = %e, "secondary progress sink write failed");
            }
        }
    }

    /// Flush and drop the secondary sink. Idempotent: only the first
    /// call closes anything. Returns whether a sink was closed.
    pub fn close(&mut self) -> bool {
        match self.secondary.take() {
            Some(mut sink) => {
                if let Err(e) = sink.flush() {
                    warn!(error = %e, "secondary progress sink flush failed");
                }
                true
            }
            None => false,
        }
    }
}

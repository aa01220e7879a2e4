//! Output module for response bodies and statistics
//!
//! This module handles:
//! - Routing response bodies to standard output (or nowhere)
//! - Recording request timing and printing the statistics block

pub mod stats;

pub use stats::{
    print_statistics, RequestReport, RequestTiming, StatsRecorder, TimingDelta, TimingReport,
};

use std::io::{self, Write};

/// Destination for decoded response bodies
#[derive(Debug)]
pub enum OutputSink {
    /// Write bodies to standard output
    Stdout(io::Stdout),
    /// Drop bodies (`--null-out`)
    Discard,
}

impl OutputSink {
    /// Picks the sink for the configured output mode
    pub fn new(null_out: bool) -> Self {
        if null_out {
            Self::Discard
        } else {
            Self::Stdout(io::stdout())
        }
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(out) => out.write(buf),
            Self::Discard => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(out) => out.flush(),
            Self::Discard => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_accepts_everything() {
        let mut sink = OutputSink::new(true);
        assert_eq!(sink.write(b"dropped").unwrap(), 7);
        sink.flush().unwrap();
    }

    #[test]
    fn test_new_picks_stdout() {
        assert!(matches!(OutputSink::new(false), OutputSink::Stdout(_)));
    }
}

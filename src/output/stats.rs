//! Request timing statistics
//!
//! This module records lifecycle timestamps and renders the per-request
//! statistics block printed with `--stat`.

use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Lifecycle timestamps of a single request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestTiming {
    /// Stream opened (request headers sent)
    pub open: Option<Instant>,

    /// First response header block received
    pub reply: Option<Instant>,

    /// Stream closed
    pub complete: Option<Instant>,
}

impl RequestTiming {
    pub fn record_open(&mut self, at: Instant) {
        self.open = Some(at);
    }

    /// Records the reply time; later header blocks (trailers) are ignored
    pub fn record_reply(&mut self, at: Instant) {
        self.reply.get_or_insert(at);
    }

    pub fn record_complete(&mut self, at: Instant) {
        self.complete = Some(at);
    }
}

/// A timestamp expressed relative to the handshake and to the stream open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingDelta {
    pub from_handshake: Duration,
    pub from_open: Duration,
}

/// Reporting deltas for one request; unset timestamps give `None`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingReport {
    pub response_headers: Option<TimingDelta>,
    pub completed: Option<TimingDelta>,
}

/// Session-wide timing state
///
/// Holds the handshake-complete timestamp, which every request report is
/// measured against.
#[derive(Debug, Clone, Default)]
pub struct StatsRecorder {
    handshake: Option<Instant>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the handshake time
    ///
    /// # Returns
    ///
    /// `false` (leaving the first value in place) if it was already recorded
    pub fn record_handshake(&mut self, at: Instant) -> bool {
        if self.handshake.is_some() {
            return false;
        }
        self.handshake = Some(at);
        true
    }

    pub fn handshake(&self) -> Option<Instant> {
        self.handshake
    }

    /// Computes the reporting deltas for one request
    pub fn report(&self, timing: &RequestTiming) -> TimingReport {
        TimingReport {
            response_headers: self.delta(timing.open, timing.reply),
            completed: self.delta(timing.open, timing.complete),
        }
    }

    fn delta(&self, open: Option<Instant>, event: Option<Instant>) -> Option<TimingDelta> {
        let event = event?;
        Some(TimingDelta {
            from_handshake: event.checked_duration_since(self.handshake?)?,
            from_open: event.checked_duration_since(open?)?,
        })
    }
}

/// Final state of one request, as reported after its session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestReport {
    pub uri: String,
    pub level: u32,
    pub status: Option<u16>,
    pub timing: TimingReport,
    pub completed: bool,
}

fn format_ms(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64() * 1000.0)
}

/// Writes the statistics block for a list of requests
///
/// # Example
///
/// ```
/// use h2fetch::output::{print_statistics, RequestReport, TimingReport};
///
/// let report = RequestReport {
///     uri: "http://example.com/".to_string(),
///     level: 0,
///     status: Some(200),
///     timing: TimingReport::default(),
///     completed: true,
/// };
/// let mut out = Vec::new();
/// print_statistics(&mut out, &[report]).unwrap();
/// assert!(String::from_utf8(out).unwrap().contains("Status: 200"));
/// ```
pub fn print_statistics<W: Write>(out: &mut W, requests: &[RequestReport]) -> io::Result<()> {
    writeln!(out, "***** Statistics *****")?;

    for (i, request) in requests.iter().enumerate() {
        writeln!(out, "#{}: {}", i + 1, request.uri)?;
        if let Some(status) = request.status {
            writeln!(out, "    Status: {}", status)?;
        }
        writeln!(out, "    Delta (ms) from handshake(HEADERS):")?;
        if let Some(delta) = request.timing.response_headers {
            writeln!(
                out,
                "        Response headers: {}({})",
                format_ms(delta.from_handshake),
                format_ms(delta.from_open)
            )?;
        }
        if let Some(delta) = request.timing.completed {
            writeln!(
                out,
                "        Completed: {}({})",
                format_ms(delta.from_handshake),
                format_ms(delta.from_open)
            )?;
        }
    }

    Ok(())
}

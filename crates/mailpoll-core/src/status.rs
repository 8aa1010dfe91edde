//! Poll results, status records and progress reporting.

use std::fmt;

/// Outcome of a single non-blocking engine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollResult {
    /// The operation is still running; poll again.
    Continue,
    /// The operation finished successfully.
    Success,
    /// The operation failed; the engine holds the error.
    Failure,
}

impl PollResult {
    /// Returns true while polling should continue.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Continue)
    }

    /// Returns true for a completed, successful operation.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Stable numeric error codes surfaced in status records.
pub mod codes {
    /// TCP connect failed.
    pub const TCP_CONNECTION: i32 = -1;
    /// Operation needs a connection.
    pub const TCP_NOT_CONNECTED: i32 = -2;
    /// Timed out while connecting or waiting for a response.
    pub const TCP_CONNECTION_TIMEOUT: i32 = -3;
    /// TLS upgrade failed.
    pub const TCP_TLS_HANDSHAKE: i32 = -4;
    /// Write failed.
    pub const TCP_SEND_DATA: i32 = -5;
    /// Read failed.
    pub const TCP_READ_DATA: i32 = -6;

    /// Not authenticated.
    pub const AUTH_UNAUTHENTICATE: i32 = -200;
    /// Server rejected the credentials.
    pub const AUTH_AUTHENTICATION: i32 = -201;
    /// No offered mechanism fits the credentials.
    pub const AUTH_OAUTH2_NOT_SUPPORTED: i32 = -202;
}

/// Status record emitted on each engine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status<S> {
    /// Protocol state the engine is in.
    pub state: S,
    /// Error code, set only for failures.
    pub code: Option<i32>,
    /// Human-readable text.
    pub text: String,
    /// Transfer progress in percent, for uploads and downloads.
    pub progress: Option<u8>,
}

impl<S> Status<S> {
    /// Informational record.
    pub fn info(state: S, text: impl Into<String>) -> Self {
        Self {
            state,
            code: None,
            text: text.into(),
            progress: None,
        }
    }

    /// Failure record.
    pub fn error(state: S, code: i32, text: impl Into<String>) -> Self {
        Self {
            state,
            code: Some(code),
            text: text.into(),
            progress: None,
        }
    }

    /// Progress record.
    pub fn progress(state: S, percent: u8, text: impl Into<String>) -> Self {
        Self {
            state,
            code: None,
            text: text.into(),
            progress: Some(percent),
        }
    }

    /// Returns true for failure records.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.code.is_some()
    }
}

impl<S: fmt::Display> fmt::Display for Status<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.state, self.text)?;
        if let Some(code) = self.code {
            write!(f, " (code {code})")?;
        }
        if let Some(p) = self.progress {
            write!(f, " {p}%")?;
        }
        Ok(())
    }
}

/// Receiver of status records.
pub trait StatusSink<S>: Send {
    /// Called once per record.
    fn on_status(&mut self, status: &Status<S>);
}

impl<S, F> StatusSink<S> for F
where
    F: FnMut(&Status<S>) + Send,
{
    fn on_status(&mut self, status: &Status<S>) {
        self(status);
    }
}

/// Default sink: logs records through `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct TracingStatus {
    protocol: &'static str,
}

impl TracingStatus {
    /// Creates a sink labelling records with `protocol` (`imap`, `smtp`).
    #[must_use]
    pub const fn new(protocol: &'static str) -> Self {
        Self { protocol }
    }
}

impl<S: fmt::Display> StatusSink<S> for TracingStatus {
    fn on_status(&mut self, status: &Status<S>) {
        let protocol = self.protocol;
        match status.code {
            Some(code) => tracing::error!(protocol, code, "{status}"),
            None if status.progress.is_some() => tracing::debug!(protocol, "{status}"),
            None => tracing::info!(protocol, "{status}"),
        }
    }
}

/// Collects records in memory.
#[derive(Debug, Clone, Default)]
pub struct CollectingStatus<S> {
    /// Records received so far.
    pub records: Vec<Status<S>>,
}

impl<S> CollectingStatus<S> {
    /// Creates an empty collector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<S: Clone + Send> StatusSink<S> for CollectingStatus<S> {
    fn on_status(&mut self, status: &Status<S>) {
        self.records.push(status.clone());
    }
}

/// Throttles progress notifications.
///
/// A new percentage is reported at 0 and 100, or once it moved more than
/// five points from the last reported value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    last: Option<u8>,
}

impl ProgressTracker {
    /// Creates a tracker that has reported nothing yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Forgets the last reported value.
    pub const fn reset(&mut self) {
        self.last = None;
    }

    /// Feeds `done` out of `total` units; returns the percentage to report.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn update(&mut self, done: u64, total: u64) -> Option<u8> {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };
        let report = match self.last {
            None => true,
            Some(last) if last == percent => false,
            Some(last) => percent == 0 || percent == 100 || percent.abs_diff(last) > 5,
        };
        if report {
            self.last = Some(percent);
            Some(percent)
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn poll_result_predicates() {
        assert!(PollResult::Continue.is_pending());
        assert!(PollResult::Success.is_success());
        assert!(!PollResult::Failure.is_pending());
        assert!(!PollResult::Failure.is_success());
    }

    #[test]
    fn status_display() {
        let s = Status::error("auth", codes::AUTH_AUTHENTICATION, "bad credentials");
        assert_eq!(s.to_string(), "[auth] bad credentials (code -201)");
        assert!(s.is_error());

        let p = Status::progress("send", 40, "photo.jpg");
        assert_eq!(p.to_string(), "[send] photo.jpg 40%");
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |s: &Status<u8>| seen.push(s.text.clone());
            sink.on_status(&Status::info(0, "hello"));
        }
        assert_eq!(seen, vec!["hello".to_string()]);
    }

    #[test]
    fn collecting_sink() {
        let mut sink = CollectingStatus::new();
        sink.on_status(&Status::info(1u8, "a"));
        sink.on_status(&Status::info(2u8, "b"));
        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.records[1].state, 2);
    }

    mod progress_tests {
        use super::*;

        #[test]
        fn reports_first_value() {
            let mut p = ProgressTracker::new();
            assert_eq!(p.update(0, 100), Some(0));
        }

        #[test]
        fn throttles_small_steps() {
            let mut p = ProgressTracker::new();
            assert_eq!(p.update(0, 100), Some(0));
            assert_eq!(p.update(3, 100), None);
            assert_eq!(p.update(5, 100), None);
            assert_eq!(p.update(6, 100), Some(6));
            assert_eq!(p.update(10, 100), None);
            assert_eq!(p.update(13, 100), Some(13));
        }

        #[test]
        fn always_reports_completion_once() {
            let mut p = ProgressTracker::new();
            assert_eq!(p.update(97, 100), Some(97));
            assert_eq!(p.update(100, 100), Some(100));
            assert_eq!(p.update(100, 100), None);
        }

        #[test]
        fn empty_total_is_complete() {
            let mut p = ProgressTracker::new();
            assert_eq!(p.update(0, 0), Some(100));
        }

        #[test]
        fn reset_reports_again() {
            let mut p = ProgressTracker::new();
            let _ = p.update(50, 100);
            p.reset();
            assert_eq!(p.update(50, 100), Some(50));
        }
    }
}

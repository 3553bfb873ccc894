//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{PgpkitError, Result};

/// Phase of a long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    PreparingKeys,
    UnlockingKey,
    Encrypting,
    Decrypting,
    Signing,
    Verifying,
    Importing,
    Exporting,
    Done,
}

/// Receives progress updates from a running operation
pub trait ProgressReporter {
    fn report(&self, step: Step, percent: u8);
}

impl<F: Fn(Step, u8)> ProgressReporter for F {
    fn report(&self, step: Step, percent: u8) {
        self(step, percent)
    }
}

/// Reporter that discards updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _step: Step, _percent: u8) {}
}

/// Shared flag that asks a running operation to stop
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reporter and optional cancellation token handed to an operation
#[derive(Clone, Copy)]
pub struct Progress<'a> {
    reporter: &'a dyn ProgressReporter,
    cancel: Option<&'a CancelToken>,
}

impl<'a> Progress<'a> {
    pub fn new(reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            reporter,
            cancel: None,
        }
    }

    pub fn none() -> Progress<'static> {
        Progress {
            reporter: &NoProgress,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn report(&self, step: Step, percent: u8) {
        self.reporter.report(step, percent.min(100));
    }

    /// Reports `done` out of `total` bytes; unknown totals report nothing
    pub fn report_bytes(&self, step: Step, done: u64, total: Option<u64>) {
        if let Some(total) = total.filter(|t| *t > 0) {
            let percent = (done.min(total) * 100 / total) as u8;
            self.report(step, percent);
        }
    }

    /// Fails with `Cancelled` once the token has been triggered
    pub fn check(&self) -> Result<()> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(PgpkitError::Cancelled),
            _ => Ok(()),
        }
    }
}

impl Default for Progress<'static> {
    fn default() -> Self {
        Progress::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_reporter_and_clamping() {
        let seen = Mutex::new(Vec::new());
        let reporter = |step: Step, percent: u8| seen.lock().unwrap().push((step, percent));
        let progress = Progress::new(&reporter);
        progress.report(Step::Encrypting, 150);
        progress.report_bytes(Step::Encrypting, 50, Some(200));
        progress.report_bytes(Step::Encrypting, 50, None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Step::Encrypting, 100), (Step::Encrypting, 25)]
        );
    }

    #[test]
    fn test_cancellation() {
        let token = CancelToken::new();
        let progress = Progress::none().with_cancel(&token);
        assert!(progress.check().is_ok());
        token.clone().cancel();
        assert!(matches!(progress.check(), Err(PgpkitError::Cancelled)));
    }
}

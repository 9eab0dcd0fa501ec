//! Progress events and cooperative cancellation.
//!
//! Progress is a one-way notification: events go to an unbounded channel
//! and a dropped receiver is ignored. Every reporting point checks the
//! cancellation token first.

use crate::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Step of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Committing,
    Opening,
    Pulling,
    Detecting,
    Pushing,
    Applying,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub stage: Stage,
    /// 0..=100
    pub percent: u8,
    pub message: String,
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
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

/// Where a session sends progress and looks for cancellation.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<mpsc::UnboundedSender<Progress>>,
    cancel: CancelToken,
}

impl ProgressReporter {
    /// A reporter that discards events and is never cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// A reporter together with the receiving end of its events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let reporter = Self {
            sender: Some(sender),
            cancel: CancelToken::new(),
        };
        (reporter, receiver)
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Fail with [`Error::Cancelled`] if cancellation was requested,
    /// otherwise emit the event.
    pub fn report(&self, stage: Stage, percent: u8, message: impl Into<String>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.notify(stage, percent, message);
        Ok(())
    }

    /// Emit the event without a cancellation check.
    pub fn notify(&self, stage: Stage, percent: u8, message: impl Into<String>) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Progress {
                stage,
                percent: percent.min(100),
                message: message.into(),
            });
        }
    }
}

/// Linear progress between `from` and `to` percent.
pub(crate) fn percent_between(from: u8, to: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return to;
    }
    let span = usize::from(to.saturating_sub(from));
    let step = span * done.min(total) / total;
    from.saturating_add(u8::try_from(step).unwrap_or(u8::MAX)).min(to)
}

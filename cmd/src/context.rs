use std::fmt::Display;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Why a [`RunContext`] stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    TimedOut,
}

impl Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interrupted::Cancelled => write!(f, "cancelled"),
            Interrupted::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Cancellation and deadline shared by a caller and the command it runs.
///
/// Clones observe the same token, so cancelling any clone stops every run
/// that was handed one.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Sets the deadline to `timeout` from now, keeping the earlier one if set.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Non-blocking check, `None` while the context is still live.
    pub fn interrupted(&self) -> Option<Interrupted> {
        if self.token.is_cancelled() {
            return Some(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupted::TimedOut),
            _ => None,
        }
    }

    /// Resolves once the token is cancelled or the deadline passes.
    pub async fn done(&self) -> Interrupted {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => Interrupted::Cancelled,
                _ = sleep_until(deadline) => Interrupted::TimedOut,
            },
            None => {
                self.token.cancelled().await;
                Interrupted::Cancelled
            }
        }
    }
}

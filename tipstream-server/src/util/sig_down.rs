//! Shutdown signal fan-out.
//!
//! [`SigDown`] turns SIGTERM or SIGINT (Ctrl+C on Windows) into a cancelled
//! [`CancellationToken`]. The HTTP server, the poller and the overlay
//! notifier each hold a clone and wind down when it fires.

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels a shared token on the first shutdown signal.
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct SigDown {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl SigDown {
    /// Installs the signal handlers.
    ///
    /// # Errors
    ///
    /// Returns [`std::io::Error`] if a handler cannot be registered.
    #[allow(clippy::unnecessary_wraps)] // only fallible on Unix
    pub fn try_new() -> Result<Self, std::io::Error> {
        Self::with_token(CancellationToken::new())
    }

    /// Like [`SigDown::try_new`], cancelling an existing token.
    ///
    /// # Errors
    ///
    /// Returns [`std::io::Error`] if a handler cannot be registered.
    #[allow(clippy::unnecessary_wraps)]
    pub fn with_token(token: CancellationToken) -> Result<Self, std::io::Error> {
        let tracker = TaskTracker::new();
        let trigger = token.clone();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            tracker.spawn(async move {
                let name = tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                    () = trigger.cancelled() => return,
                };
                tracing::info!(signal = name, "Shutdown requested");
                trigger.cancel();
            });
        }

        #[cfg(windows)]
        {
            tracker.spawn(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!(signal = "ctrl-c", "Shutdown requested");
                        trigger.cancel();
                    }
                    () = trigger.cancelled() => {}
                }
            });
        }

        tracker.close();
        Ok(Self { tracker, token })
    }

    /// Token cancelled on shutdown.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for shutdown and for the signal task to finish.
    pub async fn recv(&self) {
        self.token.cancelled().await;
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_external_cancel_releases_recv() {
        let token = CancellationToken::new();
        let sig_down = SigDown::with_token(token.clone()).unwrap();
        assert!(!sig_down.cancellation_token().is_cancelled());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), sig_down.recv())
            .await
            .unwrap();
        assert!(sig_down.cancellation_token().is_cancelled());
    }
}

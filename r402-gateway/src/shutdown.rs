//! Graceful shutdown signal handling.
//!
//! Listens for SIGTERM/SIGINT on Unix (Ctrl+C on other platforms) and
//! cancels a [`CancellationToken`] that the HTTP server and both background
//! tasks (the pending-payment janitor, upstream idle eviction) watch to stop
//! accepting new work before the process exits.

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Watches for an OS shutdown signal and fans it out via a cancellation token.
#[allow(missing_debug_implementations)]
pub struct ShutdownSignal {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl ShutdownSignal {
    /// Registers the process's signal handlers.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if Unix signal registration fails.
    #[allow(clippy::unnecessary_wraps)]
    pub fn try_new() -> Result<Self, std::io::Error> {
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            task_tracker.spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => inner.cancel(),
                    _ = sigint.recv() => inner.cancel(),
                }
            });
        }

        #[cfg(windows)]
        {
            task_tracker.spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                inner.cancel();
            });
        }

        task_tracker.close();
        Ok(Self { task_tracker, cancellation_token: outer })
    }

    /// A token clone for distributing to background tasks.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Resolves once the signal has fired, after the handler task itself completes.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}

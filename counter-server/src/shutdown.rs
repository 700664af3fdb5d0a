//! Shutdown triggers and outcome reporting.
//!
//! A shutdown starts from an OS signal or from a fatal condition raised
//! anywhere in the process (HTTP server failure, task panic). The first
//! cause wins; later ones are ignored.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Why the process is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// SIGINT or SIGTERM.
    Signal(&'static str),
    /// Unexpected failure that escalated to shutdown.
    Fatal(String),
}

impl ShutdownCause {
    /// Whether this cause alone means a failing exit status.
    pub fn is_failure(&self) -> bool {
        matches!(self, ShutdownCause::Fatal(_))
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Signal(name) => write!(f, "received {}", name),
            ShutdownCause::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

/// Shared handle for requesting shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<Option<ShutdownCause>>>,
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownTrigger {
    /// Create an untriggered handle.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Returns false if a cause was already recorded.
    pub fn trigger(&self, cause: ShutdownCause) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            tracing::warn!("Shutdown requested: {}", cause);
            *current = Some(cause);
            true
        })
    }

    /// The recorded cause, if any.
    pub fn cause(&self) -> Option<ShutdownCause> {
        self.tx.borrow().clone()
    }

    /// Wait until shutdown is requested.
    #[allow(clippy::let_and_return)]
    pub async fn wait(&self) -> ShutdownCause {
        let mut rx = self.tx.subscribe();
        let cause = match rx.wait_for(Option::is_some).await {
            Ok(cause) => cause
                .clone()
                .unwrap_or_else(|| ShutdownCause::Fatal("empty shutdown cause".into())),
            // Unreachable while `self` holds the sender.
            Err(_) => ShutdownCause::Fatal("shutdown channel closed".into()),
        };
        cause
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
pub async fn wait_for_signal() -> ShutdownCause {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => ShutdownCause::Signal("SIGINT"),
        _ = terminate => ShutdownCause::Signal("SIGTERM"),
    }
}

/// Escalate any panic to a fatal shutdown.
///
/// The previous hook still runs, so the panic message is printed as usual.
pub fn install_panic_hook(trigger: ShutdownTrigger) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        trigger.trigger(ShutdownCause::Fatal(format!("panic: {}", info)));
    }));
}

/// Outcome of the graceful shutdown sequence.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// What started the shutdown.
    pub cause: ShutdownCause,
    /// Final counter flushed and store closed.
    pub store_closed: bool,
    /// Clients connected when the sequence closed them.
    pub clients_closed: usize,
    /// HTTP listener stopped without error.
    pub http_stopped: bool,
    /// The sequence ran past its deadline.
    pub timed_out: bool,
}

impl ShutdownReport {
    /// Report for a sequence that did not finish in time.
    pub fn timed_out(cause: ShutdownCause) -> Self {
        Self {
            cause,
            store_closed: false,
            clients_closed: 0,
            http_stopped: false,
            timed_out: true,
        }
    }

    /// Whether every step succeeded after a non-fatal cause.
    pub fn is_clean(&self) -> bool {
        !self.cause.is_failure() && self.store_closed && self.http_stopped && !self.timed_out
    }

    /// Process exit status: 0 for a clean shutdown, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_report() -> ShutdownReport {
        ShutdownReport {
            cause: ShutdownCause::Signal("SIGTERM"),
            store_closed: true,
            clients_closed: 3,
            http_stopped: true,
            timed_out: false,
        }
    }

    #[test]
    fn first_cause_wins() {
        let trigger = ShutdownTrigger::new();
        assert!(trigger.trigger(ShutdownCause::Signal("SIGINT")));
        assert!(!trigger.trigger(ShutdownCause::Fatal("late".into())));
        assert_eq!(trigger.cause(), Some(ShutdownCause::Signal("SIGINT")));
    }

    #[tokio::test]
    async fn wait_resolves_on_trigger() {
        let trigger = ShutdownTrigger::new();
        let waiter = {
            let trigger = trigger.clone();
            tokio::spawn(async move { trigger.wait().await })
        };
        tokio::task::yield_now().await;

        trigger.trigger(ShutdownCause::Fatal("http".into()));
        assert_eq!(waiter.await.unwrap(), ShutdownCause::Fatal("http".into()));
    }

    #[tokio::test]
    async fn wait_returns_immediately_if_already_triggered() {
        let trigger = ShutdownTrigger::new();
        trigger.trigger(ShutdownCause::Signal("SIGTERM"));
        assert_eq!(trigger.wait().await, ShutdownCause::Signal("SIGTERM"));
    }

    #[tokio::test]
    async fn panicking_task_escalates_to_fatal() {
        let saved = std::panic::take_hook();
        let trigger = ShutdownTrigger::new();
        install_panic_hook(trigger.clone());

        let task = tokio::spawn(async {
            panic!("sweeper exploded");
        });
        let joined = task.await;

        let cause = tokio::time::timeout(std::time::Duration::from_secs(1), trigger.wait()).await;

        // Drop our hook and put back whatever the test harness had installed.
        let _ = std::panic::take_hook();
        std::panic::set_hook(saved);

        assert!(joined.unwrap_err().is_panic());
        match cause {
            Ok(ShutdownCause::Fatal(reason)) => assert!(reason.contains("sweeper exploded")),
            other => panic!("expected fatal cause, got {:?}", other),
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(clean_report().exit_code(), 0);

        let mut report = clean_report();
        report.store_closed = false;
        assert_eq!(report.exit_code(), 1);

        let mut report = clean_report();
        report.cause = ShutdownCause::Fatal("panic".into());
        assert_eq!(report.exit_code(), 1);

        let report = ShutdownReport::timed_out(ShutdownCause::Signal("SIGINT"));
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn cause_display() {
        assert_eq!(
            ShutdownCause::Signal("SIGINT").to_string(),
            "received SIGINT"
        );
        assert_eq!(
            ShutdownCause::Fatal("boom".into()).to_string(),
            "fatal: boom"
        );
    }
}

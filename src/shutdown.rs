//! Process shutdown plumbing.
//!
//! `shutdown_signal` resolves on Ctrl-C or SIGTERM. The playout loop never
//! awaits it directly; it holds a [`Shutdown`] handle and races every sleep
//! and engine call against it, so shutdown latency is bounded by one poll
//! interval.

use std::future::Future;

use tokio::sync::watch;
use tracing::warn;

/// Cloneable view of the shutdown flag.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Owner side: flips the flag once.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested. If the trigger side is
    /// dropped without firing, this never resolves.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Run `fut` unless shutdown is requested first. `None` means
    /// interrupted.
    pub async fn guard<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if self.is_triggered() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.wait() => None,
            out = fut => Some(out),
        }
    }

    /// Sleep for `dur`; returns `false` if woken by shutdown.
    pub async fn sleep(&mut self, dur: std::time::Duration) -> bool {
        self.guard(tokio::time::sleep(dur)).await.is_some()
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok(); };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn guard_returns_none_after_trigger() {
        let (trigger, mut shutdown) = channel();
        assert_eq!(shutdown.guard(async { 5 }).await, Some(5));

        trigger.trigger();
        assert!(shutdown.is_triggered());
        assert_eq!(shutdown.guard(async { 5 }).await, None);
        assert!(!shutdown.sleep(Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_cut_short_by_trigger() {
        let (trigger, mut shutdown) = channel();
        let sleeper = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(3600)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.trigger();
        assert!(!sleeper.await.unwrap());
    }
}

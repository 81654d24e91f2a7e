//! Shutdown coordination and the periodic background reconciler
use crate::manager::BundleStore;
use crate::reconcile::{self, ReconcileTotals};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

/// Shared shutdown flag for long-running store tasks
#[derive(Clone)]
pub struct StoreRuntime {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    fatal_error: Arc<AtomicBool>,
}

impl StoreRuntime {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            shutdown_rx,
            fatal_error: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Clone and hand to background tasks
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn trigger_fatal_shutdown(&self) {
        self.fatal_error.store(true, Ordering::Relaxed);
        self.trigger_shutdown();
    }

    pub fn is_fatal_shutdown(&self) -> bool {
        self.fatal_error.load(Ordering::Relaxed)
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Resolves on Ctrl+C or a programmatic shutdown, whichever comes first
    pub fn create_shutdown_future(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let fatal = self.fatal_error.clone();

        async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    log::info!("[Reconcile] Shutdown signal (Ctrl+C) received");
                }
                _ = wait_for_flag(&mut shutdown_rx) => {
                    if fatal.load(Ordering::Relaxed) {
                        log::error!("[Reconcile] Shutdown triggered by fatal error");
                    }
                }
            }
        }
    }
}

impl Default for StoreRuntime {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_flag(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Run `reconcile_all` every `interval` until shutdown.
///
/// The first pass runs immediately. Each pass happens on the blocking pool;
/// a pass that panics stops the loop and marks the shutdown as fatal.
pub async fn run_reconcile_loop(
    store: Arc<BundleStore>,
    interval: Duration,
    runtime: StoreRuntime,
) -> ReconcileTotals {
    let mut shutdown = runtime.shutdown_signal();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut totals = ReconcileTotals::default();

    log::info!("[Reconcile] Background reconciler started (interval {:?})", interval);

    loop {
        tokio::select! {
            _ = wait_for_flag(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }
        if runtime.is_shutting_down() {
            break;
        }

        let pass_store = store.clone();
        match tokio::task::spawn_blocking(move || reconcile::reconcile_all(&pass_store)).await {
            Ok(report) => totals.record(report),
            Err(e) => {
                log::error!("[Reconcile] Pass aborted: {}", e);
                runtime.trigger_fatal_shutdown();
                break;
            }
        }
    }

    log::info!("[Reconcile] Background reconciler stopped after {} pass(es)", totals.passes);
    totals
}

//! Interval-driven polling loop with a manual trigger.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;

use crate::config::PollerConfig;
use crate::poller::orchestrator::{BatchOrchestrator, CycleSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingOptions {
    pub interval_minutes: u64,
    pub max_results: u32,
    pub concurrency: usize,
    pub enable_rate_limit: bool,
    pub enable_circuit_breaker: bool,
}

impl PollingOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }

    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            max_results: self.max_results,
            concurrency: self.concurrency,
            enable_rate_limit: self.enable_rate_limit,
            enable_circuit_breaker: self.enable_circuit_breaker,
        }
    }
}

impl From<&PollerConfig> for PollingOptions {
    fn from(config: &PollerConfig) -> Self {
        Self {
            interval_minutes: config.polling.interval_minutes,
            max_results: config.selection.max_results,
            concurrency: config.polling.concurrency,
            enable_rate_limit: config.rate_limit.enabled,
            enable_circuit_breaker: config.circuit_breaker.enabled,
        }
    }
}

/// A running polling loop on its own thread and runtime.
///
/// The first cycle runs immediately. Cycles never overlap: a trigger that
/// arrives mid-cycle runs right after it.
pub struct PollingLoop {
    shutdown: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    trigger_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PollingLoop {
    pub fn start(orchestrator: Arc<BatchOrchestrator>, options: PollingOptions) -> Self {
        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let shutdown = Arc::new(AtomicBool::new(false));
        let cycles = Arc::new(AtomicU64::new(0));

        let handle = {
            let shutdown = Arc::clone(&shutdown);
            let cycles = Arc::clone(&cycles);
            std::thread::spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to start polling runtime");
                        return;
                    }
                };
                rt.block_on(poll_loop(orchestrator, options, trigger_rx, shutdown, cycles));
            })
        };

        Self {
            shutdown,
            cycles,
            trigger_tx,
            handle: Some(handle),
        }
    }

    /// Requests a cycle now. Returns false if the loop has exited.
    pub fn trigger(&self) -> bool {
        self.trigger_tx.send(()).is_ok()
    }

    /// A sender other components can use to trigger cycles.
    pub fn trigger_sender(&self) -> broadcast::Sender<()> {
        self.trigger_tx.clone()
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the loop to exit after the current cycle.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        // Wake the select so the flag is seen.
        let _ = self.trigger_tx.send(());
    }

    /// Stops the loop and waits for its thread.
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Polling thread panicked");
            }
        }
    }
}

async fn poll_loop(
    orchestrator: Arc<BatchOrchestrator>,
    options: PollingOptions,
    mut trigger_rx: broadcast::Receiver<()>,
    shutdown: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
) {
    let settings = options.cycle_settings();
    let mut ticker = tokio::time::interval(options.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        interval_minutes = options.interval_minutes,
        max_results = options.max_results,
        concurrency = options.concurrency,
        "Polling loop started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            received = trigger_rx.recv() => match received {
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    tracing::debug!("Manual poll triggered");
                }
                Err(RecvError::Closed) => break,
            },
        }

        if shutdown.load(Ordering::Acquire) {
            break;
        }

        if let Err(e) = orchestrator.run_cycle_with(&settings).await {
            tracing::error!(error = %e, "Poll cycle failed, waiting for next tick");
        }
        cycles.fetch_add(1, Ordering::AcqRel);
    }

    tracing::info!("Polling loop stopped");
}

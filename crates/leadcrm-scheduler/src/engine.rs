//! Periodic scheduler: two independent timers, one per item class.
//!
//! Each loop ticks on a `tokio::time::interval`, scans, and hands the batch
//! to the [`TransitionEngine`]. A class never overlaps with itself; a tick
//! that finds the previous one still running is skipped. A panic on one
//! item is caught inside the batch; anything escaping a tick is caught by
//! the loop, which re-arms.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use leadcrm_core::config::SchedulerConfig;
use leadcrm_core::error::Result;
use leadcrm_core::traits::{Clock, DeliveryGateway, SchedulerStore};
use leadcrm_core::types::ItemClass;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::scanner::Scanner;
use crate::transition::{TickReport, TransitionEngine, panic_message};

/// Result of asking for a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// The previous tick of the same class was still running.
    Skipped,
}

/// Counters for one item class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub transitioned: u64,
    pub failed: u64,
}

/// Snapshot returned by [`CrmScheduler::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub running: bool,
    pub messages: ClassStats,
    pub contacts: ClassStats,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    transitioned: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ClassStats {
        ClassStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            transitioned: self.transitioned.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct Lane {
    guard: Mutex<()>,
    counters: Counters,
}

impl Lane {
    fn new() -> Self {
        Self { guard: Mutex::new(()), counters: Counters::default() }
    }
}

struct Inner {
    scanner: Scanner,
    engine: TransitionEngine,
    messages: Lane,
    contacts: Lane,
    shutdown_rx: watch::Receiver<bool>,
}

impl Inner {
    fn lane(&self, class: ItemClass) -> &Lane {
        match class {
            ItemClass::Messages => &self.messages,
            ItemClass::Contacts => &self.contacts,
        }
    }

    async fn run_tick(&self, class: ItemClass) -> Result<TickOutcome> {
        let lane = self.lane(class);
        let Ok(_running) = lane.guard.try_lock() else {
            lane.counters.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("⏭️ {} tick skipped: previous tick still running", class);
            return Ok(TickOutcome::Skipped);
        };

        lane.counters.ticks.fetch_add(1, Ordering::Relaxed);
        let items = self.scanner.scan(class)?;
        let report = self.engine.run_batch(class, items, &self.shutdown_rx).await;

        lane.counters
            .transitioned
            .fetch_add(report.transitioned as u64, Ordering::Relaxed);
        lane.counters.failed.fetch_add(report.failed as u64, Ordering::Relaxed);

        if report.scanned > 0 {
            tracing::info!(
                "📬 {} tick: {} due, {} transitioned, {} failed, {} vanished ({}ms)",
                class,
                report.scanned,
                report.transitioned,
                report.failed,
                report.vanished,
                report.elapsed_ms
            );
        } else {
            tracing::debug!("{} tick: nothing due", class);
        }
        Ok(TickOutcome::Completed(report))
    }
}

/// The background scheduler. Owned by the host process: construct it,
/// `start()` it once the store is ready, `stop().await` it on shutdown.
pub struct CrmScheduler {
    inner: Arc<Inner>,
    message_period: Duration,
    contact_period: Duration,
    shutdown_tx: watch::Sender<bool>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl CrmScheduler {
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        gateway: Arc<dyn DeliveryGateway>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Inner {
            scanner: Scanner::new(store.clone(), clock.clone()),
            engine: TransitionEngine::new(store, gateway, clock, config.delivery_timeout()),
            messages: Lane::new(),
            contacts: Lane::new(),
            shutdown_rx,
        };
        Self {
            inner: Arc::new(inner),
            message_period: config.message_interval(),
            contact_period: config.contact_interval(),
            shutdown_tx,
            handles: std::sync::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Override the timer periods (sub-second periods for tests and demos).
    pub fn with_periods(mut self, messages: Duration, contacts: Duration) -> Self {
        self.message_period = messages;
        self.contact_period = contacts;
        self
    }

    /// Spawn both timer loops. Calling it again, or after `stop`, does
    /// nothing. Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            tracing::warn!("⚠️ Scheduler already stopped; not restarting");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Scheduler already running");
            return;
        }

        let loops = [
            (ItemClass::Messages, self.message_period),
            (ItemClass::Contacts, self.contact_period),
        ];
        let spawned: Vec<JoinHandle<()>> = loops
            .into_iter()
            .map(|(class, period)| tokio::spawn(run_loop(self.inner.clone(), class, period)))
            .collect();

        match self.handles.lock() {
            Ok(mut handles) => handles.extend(spawned),
            Err(poisoned) => poisoned.into_inner().extend(spawned),
        }
        tracing::info!(
            "⏰ Scheduler started (messages every {}s, contacts every {}s)",
            self.message_period.as_secs(),
            self.contact_period.as_secs()
        );
    }

    /// Stop both loops and wait for in-flight ticks to finish their current
    /// item. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(true);

        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("⚠️ Scheduler loop ended abnormally: {e}");
            }
        }
        if self.started.load(Ordering::SeqCst) {
            tracing::info!("🛑 Scheduler stopped");
        }
    }

    /// Run one tick of `class` now, outside the timers. Honors the same
    /// overlap guard as the timed ticks.
    pub async fn run_tick(&self, class: ItemClass) -> Result<TickOutcome> {
        self.inner.run_tick(class).await
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            running: self.is_running(),
            messages: self.inner.messages.counters.snapshot(),
            contacts: self.inner.contacts.counters.snapshot(),
        }
    }
}

async fn run_loop(inner: Arc<Inner>, class: ItemClass, period: Duration) {
    let mut shutdown = inner.shutdown_rx.clone();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if *shutdown.borrow() {
            break;
        }

        match AssertUnwindSafe(inner.run_tick(class)).catch_unwind().await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("⚠️ {} tick failed: {e}", class),
            Err(panic) => tracing::error!("💥 {} tick panicked: {}", class, panic_message(&*panic)),
        }
    }
    tracing::debug!("{} loop exited", class);
}

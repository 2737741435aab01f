//! Background sync: flushes the outbox when tags are requested.
//!
//! [`BackgroundSync`] is the [`SyncTrigger`] handed to the store; the
//! matching [`BackgroundSyncHandle`] runs the loop that turns requests into
//! flushes, re-schedules with backoff while entries stay queued and
//! optionally flushes on a fixed period.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::outbox::FlushReport;
use crate::store::OfflineSyncStore;
use crate::transport::SyncTransport;
use crate::trigger::{SyncTag, SyncTrigger};
use lectio_common::RetryConfig;

/// Background sync configuration.
#[derive(Debug, Clone)]
pub struct BackgroundSyncConfig {
    /// Backoff between flushes while entries remain queued.
    pub retry: RetryConfig,
    /// Flush every tag on this period, if set.
    pub periodic: Option<Duration>,
    /// Pending requests buffered before new ones are discarded.
    pub channel_capacity: usize,
}

impl Default for BackgroundSyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::new(5).with_initial_delay(Duration::from_secs(2)),
            periodic: None,
            channel_capacity: 64,
        }
    }
}

impl BackgroundSyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_periodic(mut self, period: Duration) -> Self {
        self.periodic = Some(period);
        self
    }
}

#[derive(Debug)]
enum SyncCommand {
    Flush(SyncTag),
    Shutdown,
}

/// Sending side of background sync. Cheap to clone.
#[derive(Clone)]
pub struct BackgroundSync {
    command_tx: mpsc::Sender<SyncCommand>,
    shutdown: Arc<AtomicBool>,
}

impl BackgroundSync {
    pub fn new(config: BackgroundSyncConfig) -> (Self, BackgroundSyncHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));

        let sync = Self {
            command_tx,
            shutdown: shutdown.clone(),
        };
        let handle = BackgroundSyncHandle {
            config,
            command_rx,
            shutdown,
        };

        (sync, handle)
    }

    /// Stop the background loop.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(SyncCommand::Shutdown).await;
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl SyncTrigger for BackgroundSync {
    fn request(&self, tag: SyncTag) {
        if let Err(e) = self.command_tx.try_send(SyncCommand::Flush(tag)) {
            debug!(%tag, error = %e, "sync request not queued");
        }
    }
}

/// Per-tag backoff bookkeeping.
#[derive(Default)]
struct Backoff {
    attempts: HashMap<SyncTag, u32>,
    due: HashMap<SyncTag, Instant>,
}

impl Backoff {
    fn schedule(&mut self, tag: SyncTag, retry: &RetryConfig) -> Duration {
        let attempt = self.attempts.entry(tag).or_insert(0);
        let delay = retry.delay_for_attempt(*attempt);
        *attempt += 1;
        self.due.insert(tag, Instant::now() + delay);
        delay
    }

    fn reset(&mut self, tag: SyncTag) {
        self.attempts.remove(&tag);
        self.due.remove(&tag);
    }

    fn next_due(&self) -> Option<Instant> {
        self.due.values().min().copied()
    }

    fn take_due(&mut self, now: Instant) -> Vec<SyncTag> {
        let mut due: Vec<SyncTag> = self
            .due
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(tag, _)| *tag)
            .collect();
        due.sort();
        for tag in &due {
            self.due.remove(tag);
        }
        due
    }
}

/// Receiving side of background sync; see [`BackgroundSyncHandle::run`].
pub struct BackgroundSyncHandle {
    config: BackgroundSyncConfig,
    command_rx: mpsc::Receiver<SyncCommand>,
    shutdown: Arc<AtomicBool>,
}

impl BackgroundSyncHandle {
    /// Run the background loop until shutdown.
    ///
    /// Should be spawned in a tokio task. Duplicate requests that arrive
    /// together are flushed once. Every flush report is passed to
    /// `on_report`; dropped entries in it are user-visible failures.
    pub async fn run<F>(
        mut self,
        store: Arc<OfflineSyncStore>,
        transport: Arc<dyn SyncTransport>,
        on_report: F,
    ) where
        F: Fn(SyncTag, &FlushReport) + Send + Sync + 'static,
    {
        let mut periodic = self.config.periodic.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        let mut backoff = Backoff::default();

        info!("background sync started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let tags: BTreeSet<SyncTag> = tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(SyncCommand::Flush(tag)) = command else {
                        break;
                    };
                    let mut tags = BTreeSet::from([tag]);
                    let mut stop = false;
                    while let Ok(command) = self.command_rx.try_recv() {
                        match command {
                            SyncCommand::Flush(tag) => {
                                tags.insert(tag);
                            }
                            SyncCommand::Shutdown => stop = true,
                        }
                    }
                    if stop {
                        break;
                    }
                    tags
                }

                _ = Self::wait_until(backoff.next_due()) => {
                    backoff.take_due(Instant::now()).into_iter().collect()
                }

                _ = Self::wait_for_periodic(&mut periodic) => {
                    debug!("periodic sync");
                    SyncTag::ALL.into_iter().collect()
                }
            };

            for tag in tags {
                self.flush(tag, &store, transport.as_ref(), &mut backoff, &on_report)
                    .await;
            }
        }

        info!("background sync stopped");
    }

    async fn flush<F>(
        &self,
        tag: SyncTag,
        store: &OfflineSyncStore,
        transport: &dyn SyncTransport,
        backoff: &mut Backoff,
        on_report: &F,
    ) where
        F: Fn(SyncTag, &FlushReport),
    {
        match store.flush_kind(transport, tag.kind()).await {
            Ok(report) => {
                on_report(tag, &report);
                if report.remaining == 0 {
                    backoff.reset(tag);
                } else {
                    let delay = backoff.schedule(tag, &self.config.retry);
                    debug!(%tag, remaining = report.remaining, ?delay, "entries remain, flush rescheduled");
                }
            }
            Err(e) => {
                let delay = backoff.schedule(tag, &self.config.retry);
                error!(%tag, error = %e, ?delay, "background flush failed");
            }
        }
    }

    async fn wait_until(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    async fn wait_for_periodic(periodic: &mut Option<Interval>) {
        match periodic {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

//! Serial flush worker
//!
//! All writes to the [`EventStore`] and every call into the [`Transport`]
//! happen on one dedicated thread that drains a FIFO of tasks. Only one add
//! or flush ever runs at a time, so a batch that is read, delivered and then
//! truncated is always a strict prefix of what is pending.
//!
//! Submitting a task is a channel send and never blocks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use crate::db::EventStore;
use crate::error::{Error, Result};
use crate::types::Event;

use super::client::{DeliveryOutcome, Transport};
use super::events::{BatchPayload, PayloadContext};

/// When adds trigger flushes and how much one flush sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Pending events required before an add schedules a flush
    pub min_batch_size: usize,
    /// Events per delivery attempt
    pub max_batch_size: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            min_batch_size: 1,
            max_batch_size: 50,
        }
    }
}

impl FlushPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.min_batch_size == 0 || self.max_batch_size == 0 {
            return Err(Error::Config("batch sizes must be at least 1".to_string()));
        }
        if self.min_batch_size > self.max_batch_size {
            return Err(Error::Config(
                "min_batch_size cannot exceed max_batch_size".to_string(),
            ));
        }
        Ok(())
    }
}

/// Worker statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushStats {
    /// Events persisted
    pub events_appended: usize,
    /// Events lost because the append failed
    pub append_failures: usize,
    /// Flush tasks run
    pub flushes: usize,
    /// Events removed after a successful delivery
    pub events_delivered: usize,
    /// Events removed after the collector rejected their batch
    pub events_discarded: usize,
    /// Delivery attempts that left their batch pending
    pub transient_failures: usize,
    /// Peek or truncate calls that failed
    pub storage_errors: usize,
}

enum Task {
    Add(Event),
    Flush,
    SetExternalUserId(Option<String>),
    SetExperimentVariations(Option<BTreeMap<String, String>>),
    Sync(oneshot::Sender<()>),
    Shutdown,
}

impl Task {
    /// Adds and flushes count towards "is work already queued"
    fn is_work(&self) -> bool {
        matches!(self, Task::Add(_) | Task::Flush)
    }
}

/// Handle to the flush worker
pub struct FlushScheduler {
    sender: mpsc::UnboundedSender<Task>,
    queued_work: Arc<AtomicUsize>,
    stats: Arc<Mutex<FlushStats>>,
    worker: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Spawn the worker thread
    pub fn start<T: Transport>(
        store: EventStore,
        transport: T,
        context: PayloadContext,
        policy: FlushPolicy,
    ) -> Result<Self> {
        policy.validate()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let queued_work = Arc::new(AtomicUsize::new(0));
        let stats = Arc::new(Mutex::new(FlushStats::default()));

        let worker = Worker {
            store,
            transport,
            context,
            policy,
            sender: sender.clone(),
            queued_work: queued_work.clone(),
            stats: stats.clone(),
        };

        let handle = std::thread::Builder::new()
            .name("beacon-flush".to_string())
            .spawn(move || worker.run(receiver))
            .map_err(|e| Error::Scheduler(format!("failed to spawn flush worker: {}", e)))?;

        Ok(Self {
            sender,
            queued_work,
            stats,
            worker: Some(handle),
        })
    }

    /// Queue an event for persistence
    pub fn add(&self, event: Event) {
        self.submit(Task::Add(event));
    }

    /// Queue a flush regardless of the batching policy
    pub fn flush(&self) {
        self.submit(Task::Flush);
    }

    /// Set the user id sent with batches flushed after this point
    pub fn set_external_user_id(&self, user_id: Option<String>) {
        self.submit(Task::SetExternalUserId(user_id));
    }

    /// Set the experiment variations sent with later batches
    pub fn set_experiment_variations(&self, variations: Option<BTreeMap<String, String>>) {
        self.submit(Task::SetExperimentVariations(variations));
    }

    /// Block until every task submitted so far, and every flush those tasks
    /// scheduled, has completed.
    ///
    /// Must not be called from inside an async runtime.
    pub fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        self.submit(Task::Sync(tx));
        // An error means the worker is gone, which is as idle as it gets.
        let _ = rx.blocking_recv();
    }

    /// Snapshot of the worker statistics
    pub fn stats(&self) -> FlushStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run every queued task, then stop the worker and wait for it
    pub fn shutdown(mut self) {
        self.submit(Task::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("Flush worker panicked");
            }
        }
    }

    fn submit(&self, task: Task) {
        let is_work = task.is_work();
        if is_work {
            self.queued_work.fetch_add(1, Ordering::SeqCst);
        }
        if self.sender.send(task).is_err() {
            if is_work {
                self.queued_work.fetch_sub(1, Ordering::SeqCst);
            }
            tracing::debug!("Flush worker stopped, dropping task");
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        // The worker holds its own sender, so closing ours is not enough.
        // Not joined; the worker exits on its own once drained.
        if self.worker.is_some() {
            let _ = self.sender.send(Task::Shutdown);
        }
    }
}

struct Worker<T> {
    store: EventStore,
    transport: T,
    context: PayloadContext,
    policy: FlushPolicy,
    sender: mpsc::UnboundedSender<Task>,
    queued_work: Arc<AtomicUsize>,
    stats: Arc<Mutex<FlushStats>>,
}

impl<T: Transport> Worker<T> {
    fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Task>) {
        tracing::debug!(app_key = %self.context.app_key, "Flush worker started");

        while let Some(task) = receiver.blocking_recv() {
            if let Task::Shutdown = task {
                // Drain what is already queued, including flushes the
                // drained adds schedule.
                while let Ok(task) = receiver.try_recv() {
                    if !matches!(task, Task::Shutdown) {
                        self.handle(task);
                    }
                }
                break;
            }
            self.handle(task);
        }

        tracing::debug!(app_key = %self.context.app_key, "Flush worker stopped");
    }

    fn handle(&mut self, task: Task) {
        if task.is_work() {
            self.queued_work.fetch_sub(1, Ordering::SeqCst);
        }

        match task {
            Task::Add(event) => self.run_add(event),
            Task::Flush => self.run_flush(),
            Task::SetExternalUserId(user_id) => {
                self.context.identity.external_user_id = user_id;
            }
            Task::SetExperimentVariations(variations) => {
                self.context.identity.experiment_variation_ids = variations;
            }
            Task::Sync(done) => {
                if self.queued_work.load(Ordering::SeqCst) > 0 {
                    // Flushes scheduled by earlier adds sit behind us.
                    let _ = self.sender.send(Task::Sync(done));
                } else {
                    let _ = done.send(());
                }
            }
            Task::Shutdown => {}
        }
    }

    fn run_add(&mut self, event: Event) {
        let appended = match self.store.append(&event) {
            Ok(cursor) => {
                self.update_stats(|s| s.events_appended += 1);
                tracing::debug!(
                    %cursor,
                    event_type = %event.event_type,
                    "Stored event"
                );
                true
            }
            Err(e) => {
                self.update_stats(|s| s.append_failures += 1);
                tracing::warn!(error = %e, event_type = %event.event_type, "Failed to store event");
                false
            }
        };

        // Earlier adds may have deferred their flush to this one, so the
        // check runs even when this append failed.
        let eligible = if appended && self.policy.min_batch_size == 1 {
            true
        } else {
            match self.store.count() {
                Ok(pending) => pending > 0 && pending >= self.policy.min_batch_size,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to count pending events");
                    false
                }
            }
        };

        // Anything still queued will schedule or perform a flush itself.
        if eligible && self.queued_work.load(Ordering::SeqCst) == 0 {
            self.queued_work.fetch_add(1, Ordering::SeqCst);
            if self.sender.send(Task::Flush).is_err() {
                self.queued_work.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn run_flush(&mut self) {
        self.update_stats(|s| s.flushes += 1);

        let batch = match self.store.peek(self.policy.max_batch_size) {
            Ok(Some(batch)) => batch,
            Ok(None) => return,
            Err(e) => {
                self.update_stats(|s| s.storage_errors += 1);
                tracing::warn!(error = %e, "Failed to read pending events");
                return;
            }
        };

        let outcome = if batch.is_empty() {
            // Every covered record was undecodable; nothing to send.
            DeliveryOutcome::Rejected { status: 0 }
        } else {
            let payload = BatchPayload::new(&self.context, &batch.events);
            self.transport.deliver(&payload)
        };

        if !outcome.is_terminal() {
            self.update_stats(|s| s.transient_failures += 1);
            if let DeliveryOutcome::Failed { reason } = &outcome {
                tracing::warn!(events = batch.len(), reason = %reason, "Delivery failed, keeping batch");
            }
            return;
        }

        match &outcome {
            DeliveryOutcome::Rejected { status } => {
                tracing::warn!(
                    events = batch.records,
                    status,
                    "Collector rejected batch, discarding"
                );
            }
            _ => {
                tracing::debug!(events = batch.len(), cursor = %batch.cursor, "Delivered batch");
            }
        }

        match self.store.remove_up_to(batch.cursor) {
            Ok(removed) => self.update_stats(|s| match outcome {
                DeliveryOutcome::Delivered => s.events_delivered += removed,
                _ => s.events_discarded += removed,
            }),
            Err(e) => {
                // The batch stays pending and is sent again next flush.
                self.update_stats(|s| s.storage_errors += 1);
                tracing::warn!(error = %e, cursor = %batch.cursor, "Failed to remove delivered events");
            }
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut FlushStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

#![warn(missing_docs)]
//! # studysync-buffer
//!
//! ## Purpose
//! Accumulates capture events in an ordered queue, mirrors it into the durable
//! slot and delivers it to the sync endpoint in batches.
//!
//! ## Responsibilities
//! - Stamp pushed events with ids and timestamps, preserving insertion order.
//! - Coalesce durable writes behind a throttle window.
//! - Drop the oldest events, durable and live, once the storage budget is
//!   exceeded.
//! - Run single-flight flushes that acknowledge only the snapshotted ids.
//! - Drive retry backoff, the periodic flush trigger and unload delivery.
//! - Publish debounced [`SyncStatus`] snapshots.
//!
//! ## Data flow
//! [`EventBuffer::push`] -> queue -> persist throttle -> [`PersistenceStore`].
//! [`EventBuffer::begin_flush`] -> [`InFlightBatch`] -> transport ->
//! [`EventBuffer::complete_flush`] -> acknowledge or back off.
//!
//! ## Ownership and lifetimes
//! The buffer owns its queue, timers and status publisher by value and is
//! driven from one thread. Time is injected on every call; nothing here reads
//! the system clock or spawns work.
//!
//! ## Error model
//! Only construction can fail ([`BufferError`]). Delivery and storage failures
//! are absorbed, logged and reflected in [`SyncStatus`]. Eviction under the
//! storage budget is the only path that discards events before delivery.
//!
//! ## Security and privacy notes
//! Logs carry counts, batch ids and error classes, never payloads.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//!
//! use studysync_buffer::EventBuffer;
//! use studysync_core::{BufferConfig, EventKind, NewEvent};
//! use studysync_store::{MemoryStore, PersistenceStore};
//! use studysync_upload::OfflineTransport;
//!
//! let store = PersistenceStore::new(Arc::new(MemoryStore::new()));
//! let mut buffer = EventBuffer::new(
//!     BufferConfig::default(),
//!     store,
//!     Arc::new(OfflineTransport),
//!     0,
//! )
//! .expect("default config is valid");
//!
//! buffer.push(NewEvent::new(EventKind::QuestionView, "s-1", serde_json::json!({})), 10);
//! assert_eq!(buffer.len(), 1);
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use studysync_core::{
    BufferConfig, CaptureEvent, CoreError, Deadline, IdGenerator, Interval, NewEvent,
    PERSIST_THROTTLE_MS, STATUS_DEBOUNCE_MS, SyncRequest, SyncStatus,
};
use studysync_store::PersistenceStore;
use studysync_ui::StatusPublisher;
use studysync_upload::{
    FailureClass, RetryDecision, RetryPolicy, RetryScheduler, SyncTransport, UploadError,
    classify_upload_error, sync_request_for,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Prefix of ids assigned by the buffer.
pub const EVENT_ID_PREFIX: &str = "evt";

/// Snapshot of the queue handed to the transport by [`EventBuffer::begin_flush`].
#[derive(Debug, Clone)]
pub struct InFlightBatch {
    request: SyncRequest,
    ids: HashSet<String>,
    generation: u64,
}

impl InFlightBatch {
    /// Request to deliver.
    pub fn request(&self) -> &SyncRequest {
        &self.request
    }

    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.request.events.len()
    }

    /// Returns `true` for an empty batch. Never the case for a started flush.
    pub fn is_empty(&self) -> bool {
        self.request.events.is_empty()
    }

    /// Returns `true` when `id` is part of this batch.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was sent: a flush was in flight, the queue was empty or the
    /// completion was stale.
    Skipped,
    /// The backend acknowledged the batch.
    Delivered {
        /// Events removed from the queue.
        events: usize,
    },
    /// Delivery failed; the queue is intact.
    Failed {
        /// Retry class of the failure.
        class: FailureClass,
        /// Backoff decision taken.
        decision: RetryDecision,
    },
}

/// Running counters, useful for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Events accepted by [`EventBuffer::push`].
    pub pushed: u64,
    /// Events restored from the durable slot.
    pub restored: u64,
    /// Flush attempts handed to the transport.
    pub flush_attempts: u64,
    /// Events acknowledged by the backend.
    pub delivered: u64,
    /// Failed flush attempts.
    pub failed_flushes: u64,
    /// Best-effort unload deliveries issued.
    pub best_effort_sends: u64,
    /// Durable slot writes (including clears).
    pub persist_writes: u64,
    /// Events dropped, from the queue and the slot, to fit the byte budget.
    pub evicted: u64,
}

/// Durable, retrying event queue.
pub struct EventBuffer {
    config: BufferConfig,
    queue: Vec<CaptureEvent>,
    store: PersistenceStore,
    transport: Arc<dyn SyncTransport>,
    retry: RetryScheduler,
    ids: IdGenerator,
    status: StatusPublisher,
    is_flushing: bool,
    flush_generation: u64,
    restored: bool,
    persist_timer: Deadline,
    retry_timer: Deadline,
    flush_interval: Interval,
    stats: BufferStats,
}

impl EventBuffer {
    /// Creates a buffer and restores the durable queue.
    ///
    /// # Errors
    /// Returns [`BufferError::Config`] when `config` fails validation.
    pub fn new(
        config: BufferConfig,
        store: PersistenceStore,
        transport: Arc<dyn SyncTransport>,
        now_ms: u64,
    ) -> Result<Self, BufferError> {
        let mut buffer = Self::with_deferred_restore(config, store, transport, now_ms)?;
        buffer.restore(now_ms);
        Ok(buffer)
    }

    /// Creates a buffer that accepts pushes before [`EventBuffer::restore`]
    /// runs. Restored events are placed ahead of those pushes.
    ///
    /// # Errors
    /// Returns [`BufferError::Config`] when `config` fails validation.
    pub fn with_deferred_restore(
        config: BufferConfig,
        store: PersistenceStore,
        transport: Arc<dyn SyncTransport>,
        now_ms: u64,
    ) -> Result<Self, BufferError> {
        config.validate()?;
        let mut flush_interval = Interval::new(config.flush_interval_ms);
        flush_interval.start(now_ms);

        Ok(Self {
            config,
            queue: Vec::new(),
            store,
            transport,
            retry: RetryScheduler::new(RetryPolicy::from_config(&config)),
            ids: IdGenerator::new(EVENT_ID_PREFIX),
            status: StatusPublisher::new(STATUS_DEBOUNCE_MS),
            is_flushing: false,
            flush_generation: 0,
            restored: false,
            persist_timer: Deadline::default(),
            retry_timer: Deadline::default(),
            flush_interval,
            stats: BufferStats::default(),
        })
    }

    /// Replaces the id generator, e.g. with a seeded one for fixtures.
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Loads the durable queue and prepends it. Runs once; returns the number
    /// of events restored.
    ///
    /// Persisted events whose id is already queued (or repeated in the slot)
    /// are skipped.
    pub fn restore(&mut self, now_ms: u64) -> usize {
        if self.restored {
            return 0;
        }
        self.restored = true;

        let mut seen: HashSet<String> = self.queue.iter().map(|event| event.id.clone()).collect();
        let persisted: Vec<CaptureEvent> = self
            .store
            .load()
            .into_iter()
            .filter(|event| seen.insert(event.id.clone()))
            .collect();
        let count = persisted.len();
        if count == 0 {
            return 0;
        }

        let pushed_early = std::mem::replace(&mut self.queue, persisted);
        let early = pushed_early.len();
        self.queue.extend(pushed_early);
        self.stats.restored += count as u64;
        info!(restored = count, pushed_early = early, "restored pending events");

        if early > 0 {
            self.persist_now(now_ms);
        }
        self.publish_queue_len(now_ms);
        count
    }

    /// Appends one event and returns it as queued.
    ///
    /// Arms the coalesced persist throttle and flushes immediately once the
    /// queue reaches `max_size`, unless a retry is already scheduled.
    pub fn push(&mut self, event: NewEvent, now_ms: u64) -> CaptureEvent {
        let captured = CaptureEvent {
            id: self.ids.next_id(now_ms),
            kind: event.kind,
            session_ref: event.session_ref,
            payload: event.payload,
            timestamp: now_ms,
        };
        self.queue.push(captured.clone());
        self.stats.pushed += 1;
        self.persist_timer.arm_if_idle(now_ms, PERSIST_THROTTLE_MS);
        self.publish_queue_len(now_ms);

        if self.queue.len() >= self.config.max_size
            && !self.is_flushing
            && !self.retry_timer.is_armed()
        {
            debug!(queued = self.queue.len(), "queue reached max size, flushing");
            self.flush(now_ms);
        }
        captured
    }

    /// Delivers the current queue through the transport.
    pub fn flush(&mut self, now_ms: u64) -> FlushOutcome {
        let Some(batch) = self.begin_flush(now_ms) else {
            return FlushOutcome::Skipped;
        };
        let result = self.transport.send(batch.request());
        self.complete_flush(batch, result, now_ms)
    }

    /// Persists synchronously, then flushes.
    pub fn force_flush(&mut self, now_ms: u64) -> FlushOutcome {
        self.persist_now(now_ms);
        self.flush(now_ms)
    }

    /// Starts a flush by snapshotting the queue.
    ///
    /// Returns `None` while another flush is in flight or when the queue is
    /// empty. The caller delivers [`InFlightBatch::request`] and reports the
    /// result to [`EventBuffer::complete_flush`]; pushes may happen in between.
    pub fn begin_flush(&mut self, now_ms: u64) -> Option<InFlightBatch> {
        if self.is_flushing {
            debug!("flush already in flight");
            return None;
        }
        if self.queue.is_empty() {
            return None;
        }

        self.is_flushing = true;
        self.flush_generation += 1;
        self.retry_timer.cancel();
        self.stats.flush_attempts += 1;

        let ids = self.queue.iter().map(|event| event.id.clone()).collect();
        let request = sync_request_for(self.queue.clone(), now_ms);
        debug!(batch_id = %request.batch_id, events = request.events.len(), "flush started");

        let queued = self.queue.len();
        self.status.update(now_ms, |status| {
            status.is_pending = true;
            status.next_retry_at = None;
            status.queued_events = queued;
        });

        Some(InFlightBatch {
            request,
            ids,
            generation: self.flush_generation,
        })
    }

    /// Finishes a flush started by [`EventBuffer::begin_flush`].
    ///
    /// On success only ids from the batch leave the queue. On failure the
    /// whole live queue is persisted and a retry is scheduled or abandoned.
    /// A batch that is not the one in flight is ignored.
    pub fn complete_flush(
        &mut self,
        batch: InFlightBatch,
        result: Result<(), UploadError>,
        now_ms: u64,
    ) -> FlushOutcome {
        if !self.is_flushing || batch.generation != self.flush_generation {
            warn!(batch_id = %batch.request.batch_id, "ignoring stale flush completion");
            return FlushOutcome::Skipped;
        }
        self.is_flushing = false;

        match result {
            Ok(()) => self.acknowledge(&batch, now_ms),
            Err(upload_error) => self.back_off(&batch, &upload_error, now_ms),
        }
    }

    fn acknowledge(&mut self, batch: &InFlightBatch, now_ms: u64) -> FlushOutcome {
        let before = self.queue.len();
        self.queue.retain(|event| !batch.ids.contains(&event.id));
        let delivered = before - self.queue.len();

        self.retry.record_success();
        self.stats.delivered += delivered as u64;
        self.persist_now(now_ms);

        let queued = self.queue.len();
        self.status.update(now_ms, |status| {
            status.is_pending = false;
            status.last_sync_at = Some(now_ms);
            status.failed_attempts = 0;
            status.next_retry_at = None;
            status.queued_events = queued;
        });
        debug!(
            batch_id = %batch.request.batch_id,
            delivered,
            remaining = queued,
            "flush acknowledged"
        );
        FlushOutcome::Delivered { events: delivered }
    }

    fn back_off(
        &mut self,
        batch: &InFlightBatch,
        upload_error: &UploadError,
        now_ms: u64,
    ) -> FlushOutcome {
        self.stats.failed_flushes += 1;
        self.persist_now(now_ms);

        let class = classify_upload_error(upload_error);
        let decision = match class {
            FailureClass::Retriable => self.retry.record_failure(),
            FailureClass::Permanent => RetryDecision::GiveUp {
                attempts: self.retry.give_up(),
            },
        };

        let next_retry_at = match decision {
            RetryDecision::RetryAfter { attempt, delay_ms } => {
                self.retry_timer.arm(now_ms, delay_ms);
                warn!(
                    batch_id = %batch.request.batch_id,
                    error = %upload_error,
                    attempt,
                    delay_ms,
                    "flush failed, retry scheduled"
                );
                self.retry_timer.at()
            }
            RetryDecision::GiveUp { attempts } => {
                self.retry_timer.cancel();
                if class == FailureClass::Permanent {
                    error!(
                        batch_id = %batch.request.batch_id,
                        error = %upload_error,
                        "flush rejected permanently, events stay queued"
                    );
                } else {
                    warn!(
                        batch_id = %batch.request.batch_id,
                        error = %upload_error,
                        attempts,
                        "flush retries exhausted, waiting for the next trigger"
                    );
                }
                None
            }
        };

        let failed_attempts = self.retry.attempts();
        let queued = self.queue.len();
        self.status.update(now_ms, |status| {
            status.is_pending = false;
            status.failed_attempts = failed_attempts;
            status.next_retry_at = next_retry_at;
            status.queued_events = queued;
        });
        FlushOutcome::Failed { class, decision }
    }

    /// Persists the queue and hands it to the best-effort channel.
    ///
    /// Returns `true` when a best-effort send was issued. Retry state is left
    /// untouched.
    pub fn on_page_unload(&mut self, now_ms: u64) -> bool {
        self.persist_now(now_ms);
        if self.queue.is_empty() {
            return false;
        }
        let request = sync_request_for(self.queue.clone(), now_ms);
        debug!(batch_id = %request.batch_id, events = request.events.len(), "unload delivery");
        self.transport.send_best_effort(&request);
        self.stats.best_effort_sends += 1;
        true
    }

    /// Fires every due timer: persist throttle, retry, periodic flush and
    /// status publication, in that order.
    pub fn poll(&mut self, now_ms: u64) {
        if self.persist_timer.take_if_due(now_ms).is_some() {
            self.persist_now(now_ms);
        }

        if self.retry_timer.take_if_due(now_ms).is_some() {
            debug!(attempt = self.retry.attempts(), "retry timer fired");
            self.flush(now_ms);
        }

        let mut periodic_due = false;
        while self.flush_interval.take_if_due(now_ms).is_some() {
            periodic_due = true;
        }
        if periodic_due && !self.queue.is_empty() && !self.is_flushing {
            self.flush(now_ms);
        }

        self.status.poll(now_ms);
    }

    /// Earliest time at which [`EventBuffer::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<u64> {
        [
            self.persist_timer.at(),
            self.retry_timer.at(),
            self.flush_interval.next_at(),
            self.status.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Cancels every timer, persists synchronously and publishes the final
    /// status. An in-flight flush may still be completed afterwards.
    pub fn shutdown(&mut self, now_ms: u64) {
        self.persist_timer.cancel();
        self.retry_timer.cancel();
        self.flush_interval.stop();
        self.persist_now(now_ms);
        let queued = self.queue.len();
        self.status.update(now_ms, |status| {
            status.next_retry_at = None;
            status.queued_events = queued;
        });
        self.status.flush();
        info!(queued, "event buffer shut down");
    }

    /// Queue in delivery order.
    pub fn events(&self) -> &[CaptureEvent] {
        &self.queue
    }

    /// Queue length.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns `true` while a flush is in flight.
    pub fn is_flushing(&self) -> bool {
        self.is_flushing
    }

    /// Last published status snapshot.
    pub fn status(&self) -> &SyncStatus {
        self.status.published()
    }

    /// Authoritative status, possibly not yet published.
    pub fn latest_status(&self) -> &SyncStatus {
        self.status.latest()
    }

    /// Subscribes to published status snapshots.
    pub fn subscribe(&mut self) -> Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Running counters.
    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Buffer configuration.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Durable slot backing this buffer.
    pub fn store(&self) -> &PersistenceStore {
        &self.store
    }

    // Evicted events leave the live queue too. Saving repeats until a write
    // lands or the remainder fits the budget.
    fn persist_now(&mut self, now_ms: u64) {
        self.persist_timer.cancel();
        self.stats.persist_writes += 1;
        let mut evicted = 0;
        loop {
            if self.queue.is_empty() {
                self.store.clear();
                break;
            }
            let report = self
                .store
                .save_with_report(&self.queue, self.config.max_persisted_bytes);
            if report.evicted > 0 {
                self.queue.drain(..report.evicted);
                evicted += report.evicted;
            }
            debug!(
                events = self.queue.len(),
                bytes = report.bytes,
                persisted = report.persisted,
                "pending queue persisted"
            );
            if report.persisted || report.evicted == 0 {
                break;
            }
        }

        if evicted > 0 {
            self.stats.evicted += evicted as u64;
            warn!(
                evicted,
                remaining = self.queue.len(),
                "storage budget exceeded, oldest events dropped"
            );
            self.publish_queue_len(now_ms);
        }
    }

    fn publish_queue_len(&mut self, now_ms: u64) {
        let queued = self.queue.len();
        self.status
            .update(now_ms, |status| status.queued_events = queued);
    }
}

/// Buffer construction errors.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Configuration failed validation.
    #[error("buffer configuration rejected: {0}")]
    Config(#[from] CoreError),
}

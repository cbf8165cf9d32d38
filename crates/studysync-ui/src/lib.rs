#![warn(missing_docs)]
//! # studysync-ui
//!
//! ## Purpose
//! Defines the UI-facing side of sync status: debounced publication of
//! [`SyncStatus`] snapshots and their projection into display-safe text.
//!
//! ## Responsibilities
//! - Absorb high-frequency status mutation and publish at most one snapshot
//!   per debounce window, always trailing with the latest value.
//! - Fan snapshots out to any number of channel subscribers.
//! - Project snapshots into a coarse [`StageStatus`] plus a status line.
//!
//! ## Data flow
//! Event buffer mutation -> [`StatusPublisher::update`] -> debounce window ->
//! [`StatusPublisher::poll`] -> subscribers -> [`project_sync_status`].
//!
//! ## Ownership and lifetimes
//! The publisher owns the authoritative latest snapshot; subscribers receive
//! owned clones, so no observer can hold a borrow into buffer state.
//!
//! ## Error model
//! This crate favors explicit state over recoverable errors. Disconnected
//! subscribers are dropped silently.
//!
//! ## Security and privacy notes
//! Snapshots carry counts and timestamps only, never event payloads.

use std::sync::mpsc::{self, Receiver, Sender};

use studysync_core::{Deadline, SyncStatus};

/// Coarse sync stage used by status indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Nothing queued and nothing delivered yet.
    Idle,
    /// A delivery is in flight.
    Running,
    /// Everything captured so far has been delivered.
    Healthy,
    /// Events are waiting after failed deliveries.
    Degraded,
}

/// Display projection of one status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiSyncState {
    /// Coarse stage.
    pub stage: StageStatus,
    /// Human-readable status line.
    pub label: String,
}

/// Debounced publisher of [`SyncStatus`] snapshots.
#[derive(Debug)]
pub struct StatusPublisher {
    debounce_ms: u64,
    latest: SyncStatus,
    published: SyncStatus,
    window: Deadline,
    subscribers: Vec<Sender<SyncStatus>>,
    publications: u64,
}

impl StatusPublisher {
    /// Creates a publisher with the given debounce window.
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            latest: SyncStatus::default(),
            published: SyncStatus::default(),
            window: Deadline::default(),
            subscribers: Vec::new(),
            publications: 0,
        }
    }

    /// Mutates the authoritative snapshot.
    ///
    /// The first change after a publication opens a debounce window; later
    /// changes inside the window only update the value published when it closes.
    pub fn update(&mut self, now_ms: u64, mutate: impl FnOnce(&mut SyncStatus)) {
        mutate(&mut self.latest);
        if self.latest != self.published {
            self.window.arm_if_idle(now_ms, self.debounce_ms);
        }
    }

    /// Authoritative snapshot, possibly not yet published.
    pub fn latest(&self) -> &SyncStatus {
        &self.latest
    }

    /// Snapshot observers have last seen.
    pub fn published(&self) -> &SyncStatus {
        &self.published
    }

    /// Number of publications so far.
    pub fn publications(&self) -> u64 {
        self.publications
    }

    /// Registers a new observer channel.
    pub fn subscribe(&mut self) -> Receiver<SyncStatus> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.push(sender);
        receiver
    }

    /// Close of the current debounce window, if one is open.
    pub fn next_deadline(&self) -> Option<u64> {
        self.window.at()
    }

    /// Publishes when the debounce window has closed. Returns `true` on publish.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self.window.take_if_due(now_ms).is_none() || self.latest == self.published {
            return false;
        }
        self.publish();
        true
    }

    /// Publishes immediately when anything changed, closing any open window.
    pub fn flush(&mut self) -> bool {
        self.window.cancel();
        if self.latest == self.published {
            return false;
        }
        self.publish();
        true
    }

    fn publish(&mut self) {
        self.published = self.latest.clone();
        self.publications += 1;
        let snapshot = &self.published;
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }
}

/// Projects a snapshot into display-safe state.
pub fn project_sync_status(status: &SyncStatus, now_ms: u64) -> UiSyncState {
    if status.is_pending {
        return UiSyncState {
            stage: StageStatus::Running,
            label: format!("Syncing {}", plural_events(status.queued_events)),
        };
    }

    if status.queued_events == 0 {
        let stage = if status.last_sync_at.is_some() {
            StageStatus::Healthy
        } else {
            StageStatus::Idle
        };
        return UiSyncState {
            stage,
            label: "All activity saved".to_string(),
        };
    }

    let waiting = plural_events(status.queued_events);
    match status.next_retry_at {
        Some(retry_at) => {
            let seconds = retry_at.saturating_sub(now_ms).div_ceil(1_000);
            UiSyncState {
                stage: StageStatus::Degraded,
                label: format!(
                    "{waiting} waiting, retry {} in {seconds}s",
                    status.failed_attempts
                ),
            }
        }
        None if status.failed_attempts > 0 || status.last_sync_at.is_none() => UiSyncState {
            stage: if status.failed_attempts > 0 {
                StageStatus::Degraded
            } else {
                StageStatus::Idle
            },
            label: format!("{waiting} waiting to sync"),
        },
        None => UiSyncState {
            stage: StageStatus::Healthy,
            label: format!("{waiting} waiting to sync"),
        },
    }
}

fn plural_events(count: usize) -> String {
    if count == 1 {
        "1 event".to_string()
    } else {
        format!("{count} events")
    }
}

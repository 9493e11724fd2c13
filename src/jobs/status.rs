// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Per-job status channels.
//!
//! Each job gets a `watch` channel carrying its latest snapshot. A new
//! subscriber observes the current snapshot immediately, so a late-joining or
//! reconnecting observer is never left without state. Publishing with no
//! observers is fine — the registry remains the durable record and polling
//! still works.

use std::collections::HashMap;

use tokio::sync::watch;

use super::types::{JobId, JobSnapshot};

/// Registry of job id -> snapshot channel.
#[derive(Debug, Default)]
pub struct StatusChannels {
    channels: HashMap<JobId, watch::Sender<JobSnapshot>>,
}

impl StatusChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the channel for a new job, seeded with its initial snapshot.
    pub fn create(&mut self, snapshot: JobSnapshot) {
        let (tx, _) = watch::channel(snapshot.clone());
        self.channels.insert(snapshot.id, tx);
    }

    /// Subscribe to a job's status. The receiver's first borrow is the
    /// current snapshot. None for an unknown id.
    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<JobSnapshot>> {
        self.channels.get(id).map(watch::Sender::subscribe)
    }

    /// Push a status event. Send errors (no live receivers) are ignored;
    /// `watch` keeps the value for the next subscriber either way.
    pub fn publish(&self, snapshot: JobSnapshot) {
        if let Some(tx) = self.channels.get(&snapshot.id) {
            let _ = tx.send(snapshot);
        }
    }

    /// Drop a job's channel (terminal cancellation). Any live subscription
    /// ends; no further events are delivered for this id.
    pub fn remove(&mut self, id: &str) {
        self.channels.remove(id);
    }
}

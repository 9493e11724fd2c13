// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Top-level job coordinator.
//!
//! Owns the registry, the admission queue, the live process table, and the
//! status channels behind a single mutex. Worker events (progress lines,
//! exits) arrive on an unbounded channel consumed by one event-loop task, so
//! every read-then-write of shared state happens under the same lock and
//! admission can never race past the ceiling. The lock is never held across
//! an await, and slow operations (fork/exec of the worker) run with the lock
//! released: admission takes the slot under the lock, spawns unlocked, then
//! re-locks to record the handle or roll the slot back.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};

use crate::config::Settings;
use crate::error::CoreError;
use crate::jobs::process::{self, ProcessHandle, WorkerEvent};
use crate::jobs::queue::AdmissionQueue;
use crate::jobs::registry::JobRegistry;
use crate::jobs::status::StatusChannels;
use crate::jobs::types::{new_job_id, Job, JobId, JobSnapshot, JobStatus, SubmitRequest};

/// Shared engine state. All cross-component access goes through the
/// coordinator; nothing else holds a reference.
struct Inner {
    registry: JobRegistry,
    queue: AdmissionQueue,
    processes: HashMap<JobId, ProcessHandle>,
    channels: StatusChannels,
    /// Jobs that hold a slot but whose worker is still being spawned (the
    /// lock is released around the fork/exec). Cancellation marks these by
    /// removing the record; admission rolls the slot back when it re-locks.
    admitting: HashSet<JobId>,
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Accepts submissions, drives admission, supervises workers, and relays
/// their events into the registry and status channels.
pub struct Coordinator {
    inner: Arc<Mutex<Inner>>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    settings: Settings,
}

impl Coordinator {
    /// Create the coordinator and start its event-loop task.
    pub fn new(settings: Settings) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            registry: JobRegistry::new(),
            queue: AdmissionQueue::new(settings.concurrency_limit),
            processes: HashMap::new(),
            channels: StatusChannels::new(),
            admitting: HashSet::new(),
        }));

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_event_loop(
            Arc::clone(&inner),
            events_rx,
            events_tx.clone(),
            settings.clone(),
        ));

        Self {
            inner,
            events_tx,
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }

    /// Accept a new download job: create the record, queue it, announce
    /// `queued`, and attempt admission. Returns the new job id.
    pub fn submit(&self, req: SubmitRequest) -> Result<JobId, CoreError> {
        if req.url.trim().is_empty() {
            return Err(CoreError::Validation("missing source url".into()));
        }
        if req.format_id.trim().is_empty() {
            return Err(CoreError::Validation("missing format selector".into()));
        }

        let id = new_job_id();
        let job = Job::new(id.clone(), req);
        tracing::info!(job_id = %id, title = %job.title, "job submitted");

        {
            let mut inner = self.lock();
            let snapshot = job.snapshot();
            inner.registry.create(job);
            inner.channels.create(snapshot);
            inner.queue.enqueue(id.clone());
            push_status(&mut inner, &id, JobStatus::Queued, 0.0);
        }
        admit_pending(&self.inner, &self.settings, &self.events_tx);
        Ok(id)
    }

    /// Update the concurrency ceiling and admit as many pending jobs as the
    /// new ceiling allows. Lowering never preempts active jobs.
    pub fn set_limit(&self, limit: usize) -> Result<(), CoreError> {
        if limit == 0 {
            return Err(CoreError::Validation(
                "limit must be a positive integer".into(),
            ));
        }
        {
            let mut inner = self.lock();
            inner.queue.set_ceiling(limit);
            tracing::info!(limit, "concurrency limit changed");
        }
        admit_pending(&self.inner, &self.settings, &self.events_tx);
        Ok(())
    }

    /// Suspend an active worker. The job stays admitted (it keeps its slot)
    /// and reports `paused` at its last known progress.
    pub fn pause(&self, id: &str) -> Result<(), CoreError> {
        let mut inner = self.lock();
        let handle = inner
            .processes
            .get(id)
            .ok_or_else(|| CoreError::NotActive(id.to_string()))?;
        handle.pause().map_err(CoreError::Signal)?;
        tracing::info!(job_id = %id, "job paused");
        let progress = inner.registry.get(id).map(|j| j.progress).unwrap_or(0.0);
        push_status(&mut inner, id, JobStatus::Paused, progress);
        Ok(())
    }

    /// Continue a suspended worker; reports `downloading` at the last known
    /// progress.
    pub fn resume(&self, id: &str) -> Result<(), CoreError> {
        let mut inner = self.lock();
        let handle = inner
            .processes
            .get(id)
            .ok_or_else(|| CoreError::NotActive(id.to_string()))?;
        handle.resume().map_err(CoreError::Signal)?;
        tracing::info!(job_id = %id, "job resumed");
        let progress = inner.registry.get(id).map(|j| j.progress).unwrap_or(0.0);
        push_status(&mut inner, id, JobStatus::Downloading, progress);
        Ok(())
    }

    /// Cancel a job. Pending: dropped from the queue and the registry.
    /// Active (or paused): the worker is killed, the slot released, the
    /// record removed; the worker's exit event finds no record and is
    /// ignored. Idempotent — unknown or already-terminal ids are a no-op.
    pub fn cancel(&self, id: &str) -> Result<(), CoreError> {
        let slot_freed = {
            let mut inner = self.lock();
            if !inner.registry.contains(id) {
                return Ok(());
            }

            if inner.queue.remove(id) {
                inner.registry.remove(id);
                inner.channels.remove(id);
                tracing::info!(job_id = %id, "pending job cancelled");
                return Ok(());
            }

            if inner.admitting.contains(id) {
                // Worker spawn in flight; removing the record tells the
                // admission pass to kill it and give the slot back.
                inner.registry.remove(id);
                inner.channels.remove(id);
                tracing::info!(job_id = %id, "job cancelled during admission");
                return Ok(());
            }

            if let Some(handle) = inner.processes.remove(id) {
                if let Err(e) = handle.terminate() {
                    // Worker likely exited in the same instant; teardown
                    // proceeds.
                    tracing::warn!(job_id = %id, "terminate failed: {}", e);
                }
                inner.queue.release();
                inner.registry.remove(id);
                inner.channels.remove(id);
                tracing::info!(job_id = %id, "active job cancelled");
                true
            } else {
                // Terminal job: record kept, nothing to do.
                false
            }
        };

        if slot_freed {
            admit_pending(&self.inner, &self.settings, &self.events_tx);
        }
        Ok(())
    }

    /// Subscribe to a job's status stream. The receiver's first borrow is
    /// the current snapshot. None for unknown ids.
    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<JobSnapshot>> {
        self.lock().channels.subscribe(id)
    }

    /// Current snapshot of one job.
    pub fn snapshot(&self, id: &str) -> Option<JobSnapshot> {
        self.lock().registry.snapshot(id)
    }

    /// Snapshots of every tracked job, oldest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.lock().registry.snapshots()
    }

    /// (active, pending) counts for health reporting.
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.queue.active(), inner.queue.pending())
    }
}

/// Registry write + status publish, in that order — the registry stays the
/// durable record even with no live observers.
fn push_status(inner: &mut Inner, id: &str, status: JobStatus, progress: f64) {
    if let Some(snapshot) = inner.registry.update(id, status, progress) {
        inner.channels.publish(snapshot);
    }
}

/// Admit as many pending jobs as the ceiling allows in one pass. Each
/// admission resets progress for the fresh run, spawns the worker, and
/// announces `downloading` at 0. A failed spawn resolves to `error` and
/// frees the slot so the pass continues.
///
/// The fork/exec never runs under the lock: phase 1 takes a slot and
/// snapshots the job, phase 2 spawns unlocked, phase 3 re-locks to record
/// the handle — or rolls the slot back if the job was cancelled meanwhile.
/// `try_admit_one` keeps the check-and-increment atomic, so concurrent
/// passes still never exceed the ceiling.
fn admit_pending(
    inner: &Arc<Mutex<Inner>>,
    settings: &Settings,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) {
    loop {
        let job = {
            let mut guard = lock_inner(inner);
            let Some(id) = guard.queue.try_admit_one() else {
                break;
            };
            let Some(job) = guard.registry.get(&id).cloned() else {
                // A cancelled pending job leaves the queue with its record;
                // a dangling id here is a bookkeeping bug.
                tracing::error!(job_id = %id, "admitted job has no registry record");
                guard.queue.release();
                continue;
            };
            guard.registry.reset_progress(&id);
            guard.admitting.insert(id);
            job
        };

        let spawned = process::spawn_worker(
            &job,
            &settings.worker_program,
            &settings.storage_dir,
            events.clone(),
        );

        let mut guard = lock_inner(inner);
        let id = &job.id;
        guard.admitting.remove(id);
        match spawned {
            Ok(handle) => {
                if guard.registry.contains(id) {
                    guard
                        .registry
                        .set_output_path(id, process::public_path(&job.title, &job.format_id));
                    guard.processes.insert(id.clone(), handle);
                    push_status(&mut guard, id, JobStatus::Downloading, 0.0);
                } else {
                    // Cancelled while the worker was being spawned: the
                    // record is gone, so kill the fresh process and give
                    // the slot back. Its exit event finds no record.
                    if let Err(e) = handle.terminate() {
                        tracing::warn!(job_id = %id, "terminate failed: {}", e);
                    }
                    guard.queue.release();
                    tracing::info!(job_id = %id, "worker discarded after cancellation");
                }
            }
            Err(e) => {
                tracing::error!(job_id = %id, "worker spawn failed: {}", e);
                guard.queue.release();
                let progress = guard.registry.get(id).map(|j| j.progress).unwrap_or(0.0);
                push_status(&mut guard, id, JobStatus::Error, progress);
            }
        }
    }
}

/// The serialization point for worker events: processed in arrival order,
/// one at a time, under the shared lock.
async fn run_event_loop(
    inner: Arc<Mutex<Inner>>,
    mut events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    settings: Settings,
) {
    while let Some(event) = events_rx.recv().await {
        let slot_freed = {
            let mut guard = lock_inner(&inner);
            match event {
                WorkerEvent::Progress { id, percent } => {
                    let Some(job) = guard.registry.get(&id) else {
                        continue; // cancelled; stale progress
                    };
                    let status = job.status;
                    if status.is_terminal() {
                        continue;
                    }
                    // Progress never changes the state machine: a paused job
                    // stays paused even if a buffered line arrives late.
                    push_status(&mut guard, &id, status, percent);
                    false
                }
                WorkerEvent::Exited { id, code } => {
                    let Some(job) = guard.registry.get(&id) else {
                        tracing::debug!(job_id = %id, "exit for cancelled job ignored");
                        continue;
                    };
                    if job.status == JobStatus::Paused {
                        // The worker was expected to be suspended, not gone.
                        // Guard against racing exit delivery; see DESIGN notes.
                        tracing::debug!(job_id = %id, "exit while paused ignored");
                        continue;
                    }
                    if guard.processes.remove(&id).is_none() {
                        tracing::debug!(job_id = %id, "exit with no live handle ignored");
                        continue;
                    }

                    if code == Some(0) {
                        push_status(&mut guard, &id, JobStatus::Completed, 100.0);
                    } else {
                        guard.registry.clear_output_path(&id);
                        let progress =
                            guard.registry.get(&id).map(|j| j.progress).unwrap_or(0.0);
                        push_status(&mut guard, &id, JobStatus::Error, progress);
                        tracing::warn!(job_id = %id, ?code, "worker failed");
                    }

                    guard.queue.release();
                    true
                }
            }
        };

        if slot_freed {
            admit_pending(&inner, &settings, &events_tx);
        }
    }
}

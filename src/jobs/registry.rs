// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Authoritative job registry: the single source of truth for status and
//! progress. Updates clamp progress so late worker reports never regress the
//! displayed value; the only way progress goes back to 0 is an explicit
//! reset at admission time.

use std::collections::HashMap;

use super::types::{Job, JobId, JobSnapshot, JobStatus};

/// Mapping from job identifier to job record. One record per id for the
/// job's entire lifetime; removed only on cancellation.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created job. Identifier collisions cannot happen with
    /// a UUID-class generator; one anyway is a programming error.
    pub fn create(&mut self, job: Job) {
        let prev = self.jobs.insert(job.id.clone(), job);
        assert!(prev.is_none(), "job id collision in registry");
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    /// Current snapshot of a job, if it exists.
    pub fn snapshot(&self, id: &str) -> Option<JobSnapshot> {
        self.jobs.get(id).map(Job::snapshot)
    }

    /// All snapshots, oldest submission first.
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs.iter().map(|j| j.snapshot()).collect()
    }

    /// Update status and progress. Progress is clamped to
    /// `max(current, incoming)`. Returns the updated snapshot, or None for an
    /// unknown id.
    pub fn update(&mut self, id: &str, status: JobStatus, progress: f64) -> Option<JobSnapshot> {
        let job = self.jobs.get_mut(id)?;
        job.status = status;
        job.progress = job.progress.max(progress);
        Some(job.snapshot())
    }

    /// Record the planned output path (on successful worker start).
    pub fn set_output_path(&mut self, id: &str, path: String) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.output_path = Some(path);
        }
    }

    /// Drop the output path (on error exit: no output is attached).
    pub fn clear_output_path(&mut self, id: &str) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.output_path = None;
        }
    }

    /// Reset progress to 0 for a fresh run. Called at admission, never from
    /// a progress update.
    pub fn reset_progress(&mut self, id: &str) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.progress = 0.0;
        }
    }

    /// Remove a job record. Cancellation only.
    pub fn remove(&mut self, id: &str) -> Option<Job> {
        self.jobs.remove(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

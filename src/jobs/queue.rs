// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Admission queue: FIFO pending jobs plus a mutable concurrency ceiling.
//!
//! `try_admit_one` is the single serialization point for admission. It is
//! only ever called with the coordinator lock held, so the check-and-increment
//! pair can never race past the ceiling.

use std::collections::VecDeque;

use super::types::JobId;

/// Ordered pending jobs and active-slot accounting. Invariant: active count
/// never exceeds the ceiling at any observation point.
#[derive(Debug)]
pub struct AdmissionQueue {
    pending: VecDeque<JobId>,
    active: usize,
    ceiling: usize,
}

impl AdmissionQueue {
    /// Create a queue with the given concurrency ceiling (clamped to >= 1).
    pub fn new(ceiling: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            active: 0,
            ceiling: ceiling.max(1),
        }
    }

    /// Append a job to the pending sequence. Insertion order is admission
    /// priority.
    pub fn enqueue(&mut self, id: JobId) {
        self.pending.push_back(id);
    }

    /// Update the ceiling. A lowered ceiling does not preempt already-active
    /// jobs; the caller re-runs admission to pick up a raised one.
    pub fn set_ceiling(&mut self, n: usize) {
        debug_assert!(n >= 1, "ceiling must be validated by the caller");
        self.ceiling = n.max(1);
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// If a slot is free and a job is pending, pop the head and take the
    /// slot. Strict FIFO; no priority.
    pub fn try_admit_one(&mut self) -> Option<JobId> {
        if self.active >= self.ceiling {
            return None;
        }
        let id = self.pending.pop_front()?;
        self.active += 1;
        id.into()
    }

    /// Give back one slot. Called exactly once per process teardown; a double
    /// release is a design bug, not a runtime condition.
    pub fn release(&mut self) {
        assert!(self.active > 0, "admission slot double-released");
        self.active -= 1;
    }

    /// Remove a still-pending job (cancellation before admission). Returns
    /// false if the id is not pending — an idempotent no-op once admitted.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.pending.iter().position(|p| p == id) {
            Some(idx) => {
                self.pending.remove(idx);
                true
            }
            None => false,
        }
    }
}

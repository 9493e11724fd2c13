// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Job lifecycle engine.
//!
//! Accepts download submissions, admits them under a bounded concurrency
//! ceiling, supervises one external worker process per admitted job, tracks
//! progress, and pushes live status to observers.
//!
//! # Architecture
//!
//! ```text
//! submit ──▶ JobRegistry.create + AdmissionQueue.enqueue
//!                     │
//!                     ▼
//!            Coordinator admission pass ──▶ spawn worker (ProcessHandle)
//!                     ▲                            │
//!                     │ release slot      progress / exit events
//!                     │                            ▼
//!            event loop (single serialization point)
//!                     │
//!                     ▼
//!            JobRegistry.update + StatusChannels.publish
//! ```
//!
//! Status state machine:
//! `queued → downloading → {paused ↔ downloading} → {completed | error}`;
//! cancellation removes the record from any non-terminal state. `completed`
//! and `error` are terminal.

pub mod coordinator;
pub mod process;
pub mod queue;
pub mod registry;
pub mod status;
pub mod types;

pub use coordinator::Coordinator;
pub use process::{ProcessHandle, WorkerEvent};
pub use queue::AdmissionQueue;
pub use registry::JobRegistry;
pub use status::StatusChannels;
pub use types::{new_job_id, Job, JobId, JobSnapshot, JobStatus, SubmitRequest};

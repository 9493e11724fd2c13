// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! tubequeue - download job lifecycle engine
//!
//! Queue first, download when a slot opens.
//!
//! tubequeue supervises externally-executed download jobs (one worker
//! process per job, `yt-dlp` by default) behind an HTTP + WebSocket API.
//! Submissions are admitted FIFO under an adjustable concurrency ceiling;
//! admitted jobs can be paused, resumed, and cancelled, and every status
//! change is pushed live to registered observers.
//!
//! # Core Modules
//!
//! - [`jobs`] - Job lifecycle engine: registry, admission queue, process
//!   supervision, status channels, and the coordinator tying them together
//! - [`resolve`] - Source metadata resolution (`yt-dlp -J`)
//! - [`thumbs`] - Thumbnail probe and download proxy
//! - [`server`] - HTTP + WebSocket API surface
//! - [`config`] - Runtime settings
//! - [`error`] - Engine error taxonomy and its HTTP mapping

pub mod config;
pub mod error;
pub mod jobs;
pub mod resolve;
pub mod server;
pub mod thumbs;

// Re-export the engine's core types
pub use error::CoreError;
pub use jobs::{Coordinator, Job, JobId, JobSnapshot, JobStatus, SubmitRequest};
pub use server::Server;

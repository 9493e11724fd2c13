// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Job types for the download lifecycle engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque job identifier (UUID v4, hex, 32 chars). Generated at submission,
/// never reused.
pub type JobId = String;

/// Generate a random UUID v4 job identifier.
pub fn new_job_id() -> JobId {
    use rand::Rng;

    let mut rng = rand::thread_rng();

    // Generate 16 random bytes
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);

    // Set version (4) and variant (RFC 4122) bits
    bytes[6] = (bytes[6] & 0x0f) | 0x40; // Version 4
    bytes[8] = (bytes[8] & 0x3f) | 0x80; // Variant RFC 4122

    let mut out = String::with_capacity(32);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Status of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the admission queue
    Queued,
    /// Worker process running
    Downloading,
    /// Worker process suspended by user
    Paused,
    /// Worker exited with code 0
    Completed,
    /// Worker failed to start or exited non-zero
    Error,
}

impl JobStatus {
    /// Returns true if no further transitions leave this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

/// Submission input for a new download job.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    /// Source URL.
    pub url: String,
    /// Format selector passed to the worker (e.g. "137", "bestaudio").
    pub format_id: String,
    /// Display title; sanitized before it becomes a filename.
    #[serde(default)]
    pub title: String,
    /// Channel / uploader name (display only).
    #[serde(default)]
    pub channel: Option<String>,
    /// Thumbnail URL (display only).
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// One tracked download job, from submission to terminal state.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub format_id: String,
    pub title: String,
    pub channel: Option<String>,
    pub thumbnail: Option<String>,
    pub status: JobStatus,
    /// Percent complete, 0-100. Never regresses within a single run.
    pub progress: f64,
    /// Public path of the output file. Set on successful worker start,
    /// cleared again if the worker exits with an error.
    pub output_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh job record in `Queued` at progress 0.
    pub fn new(id: JobId, req: SubmitRequest) -> Self {
        Self {
            id,
            url: req.url,
            format_id: req.format_id,
            title: req.title,
            channel: req.channel,
            thumbnail: req.thumbnail,
            status: JobStatus::Queued,
            progress: 0.0,
            output_path: None,
            created_at: Utc::now(),
        }
    }

    /// The full observable state of this job, as sent to observers.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            file_path: self.output_path.clone(),
        }
    }
}

/// Status event / snapshot shape pushed to every observer. Callers
/// distinguish outcomes solely by `status`, never by shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub file_path: Option<String>,
}

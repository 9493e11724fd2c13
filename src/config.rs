// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Runtime settings for the server and the worker supervisor.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Default port the API server listens on.
pub const DEFAULT_PORT: u16 = 3000;

/// Default concurrency ceiling for simultaneously active workers.
pub const DEFAULT_LIMIT: usize = 3;

/// Default external worker program.
pub const DEFAULT_WORKER: &str = "yt-dlp";

/// Runtime settings. Built from CLI flags; every field has a sensible
/// default.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address to bind to (127.0.0.1 by default for local-only access).
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Storage root shared by all jobs; each job derives its output path
    /// from its sanitized title under this directory.
    pub storage_dir: PathBuf,
    /// Initial concurrency ceiling.
    pub concurrency_limit: usize,
    /// Worker program invoked per job. Overridable so deployments can pin a
    /// specific binary (and tests can substitute a stub).
    pub worker_program: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            storage_dir: default_storage_dir(),
            concurrency_limit: DEFAULT_LIMIT,
            worker_program: DEFAULT_WORKER.to_string(),
        }
    }
}

/// Default storage root: `<local data dir>/tubequeue/downloads`, or a
/// relative `downloads/` when no data dir is available.
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tubequeue").join("downloads"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

/// Make sure the storage root exists before any job runs.
pub fn ensure_storage_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create storage dir {}", dir.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.port, DEFAULT_PORT);
        assert_eq!(s.concurrency_limit, DEFAULT_LIMIT);
        assert_eq!(s.worker_program, "yt-dlp");
        assert_eq!(s.bind_address, "127.0.0.1");
    }

    #[test]
    fn ensure_storage_dir_creates_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b").join("downloads");
        ensure_storage_dir(&nested).unwrap();
        assert!(nested.is_dir());
        // Idempotent on an existing directory.
        ensure_storage_dir(&nested).unwrap();
    }
}

// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Worker process supervision.
//!
//! Owns one external `yt-dlp` invocation from start to termination:
//! builds the argv from the job's format selector and sanitized title,
//! spawns the process, translates its progress output into `WorkerEvent`s,
//! and delivers pause/resume/terminate signals.
//!
//! Progress lines look like `[download]  42.3% of 10.00MiB at ...`. The
//! worker may emit several progress sequences (separate video/audio passes,
//! then a merge post-process), so a parsed value is only forwarded if it is
//! greater than the last forwarded value — or exactly zero, which marks the
//! legitimate start of a new segment. Naive forwarding would show visible
//! regressions.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::types::{Job, JobId};

/// Numeric percentage in a worker progress line.
static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3}(?:\.\d{1,2})?)%").expect("valid percent regex"));

/// Events emitted by a supervised worker, funneled into the coordinator's
/// serialization point.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A new (already filtered) progress value.
    Progress { id: JobId, percent: f64 },
    /// The process exited. `code` is None when killed by a signal.
    Exited { id: JobId, code: Option<i32> },
}

/// Live association between a job and its running worker. At most one per
/// job id; owned by the coordinator while the job is admitted.
#[derive(Debug)]
pub struct ProcessHandle {
    pub job_id: JobId,
    pid: u32,
}

impl ProcessHandle {
    /// Suspend the worker (SIGSTOP).
    pub fn pause(&self) -> io::Result<()> {
        send_signal(self.pid, SignalKind::Stop)
    }

    /// Continue a suspended worker (SIGCONT).
    pub fn resume(&self) -> io::Result<()> {
        send_signal(self.pid, SignalKind::Continue)
    }

    /// Forcibly kill the worker (SIGKILL). Used for cancellation; the
    /// coordinator releases the admission slot.
    pub fn terminate(&self) -> io::Result<()> {
        send_signal(self.pid, SignalKind::Kill)
    }
}

#[derive(Debug, Clone, Copy)]
enum SignalKind {
    Stop,
    Continue,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, kind: SignalKind) -> io::Result<()> {
    let sig = match kind {
        SignalKind::Stop => libc::SIGSTOP,
        SignalKind::Continue => libc::SIGCONT,
        SignalKind::Kill => libc::SIGKILL,
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _kind: SignalKind) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "worker signals require a Unix platform",
    ))
}

/// Sanitize a display title into a filesystem-safe filename stem: letters,
/// digits, underscore, hyphen, and space survive; everything else becomes
/// an underscore.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Container extension for a format selector: audio-only selectors target
/// mp3, everything else is merged into mp4.
pub fn output_extension(format_id: &str) -> &'static str {
    if format_id.contains("audio") {
        "mp3"
    } else {
        "mp4"
    }
}

/// Stream selection expression: audio selectors pass through unchanged; any
/// other selector gets a best-audio fallback so video and audio merge.
pub fn format_expression(format_id: &str) -> String {
    if format_id.contains("audio") {
        format_id.to_string()
    } else {
        format!("{}+bestaudio/best", format_id)
    }
}

/// Filesystem output path for a job under the storage root. Two jobs with
/// colliding sanitized titles collide here; accepted, not silently resolved.
pub fn output_file(storage_dir: &Path, title: &str, format_id: &str) -> PathBuf {
    let filename = format!("{}.{}", sanitize_title(title), output_extension(format_id));
    storage_dir.join(filename)
}

/// Public URL path for a completed file. The sanitized charset leaves only
/// spaces to escape.
pub fn public_path(title: &str, format_id: &str) -> String {
    let filename = format!("{}.{}", sanitize_title(title), output_extension(format_id));
    format!("/downloads/{}", filename.replace(' ', "%20"))
}

/// Worker argv for one job.
pub fn build_args(job: &Job, output: &Path) -> Vec<String> {
    vec![
        "-f".into(),
        format_expression(&job.format_id),
        "--merge-output-format".into(),
        output_extension(&job.format_id).into(),
        "--newline".into(),
        "--progress".into(),
        "--no-warnings".into(),
        "--ignore-errors".into(),
        "-o".into(),
        output.to_string_lossy().into_owned(),
        job.url.clone(),
    ]
}

/// Extract the percentage from one worker output line, if it carries one.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    if !line.contains('%') {
        return None;
    }
    let caps = PERCENT_RE.captures(line)?;
    caps.get(1)?.as_str().parse().ok()
}

/// Forwarding filter: a value passes only if it advances past the last
/// forwarded one, or is exactly zero (new-segment reset notification).
pub fn should_forward(percent: f64, last_forwarded: f64) -> bool {
    percent > last_forwarded || percent == 0.0
}

/// Spawn one worker for `job` and supervise it: a reader task parses stdout
/// progress, logs stderr, and reports the exit through `events`. Exactly one
/// process per call; the returned handle is the only way to signal it.
pub fn spawn_worker(
    job: &Job,
    program: &str,
    storage_dir: &Path,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> io::Result<ProcessHandle> {
    let output = output_file(storage_dir, &job.title, &job.format_id);
    let args = build_args(job, &output);

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let pid = child.id().ok_or_else(|| {
        io::Error::new(io::ErrorKind::Other, "worker exited before pid was known")
    })?;

    tracing::info!(job_id = %job.id, pid, title = %job.title, "worker started");

    let id = job.id.clone();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    if let Some(stderr) = stderr {
        let id = id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(job_id = %id, "worker stderr: {}", line);
            }
        });
    }

    tokio::spawn(async move {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            let mut last_forwarded = 0.0_f64;
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(percent) = parse_progress_line(&line) else {
                    continue;
                };
                if should_forward(percent, last_forwarded) {
                    last_forwarded = percent;
                    if events
                        .send(WorkerEvent::Progress {
                            id: id.clone(),
                            percent,
                        })
                        .is_err()
                    {
                        // Coordinator gone; keep draining so the child
                        // doesn't block on a full pipe.
                        break;
                    }
                }
            }
        }

        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(job_id = %id, "worker wait failed: {}", e);
                None
            }
        };
        tracing::info!(job_id = %id, ?code, "worker exited");
        let _ = events.send(WorkerEvent::Exited { id, code });
    });

    Ok(ProcessHandle { job_id: job.id.clone(), pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{new_job_id, SubmitRequest};

    fn job(title: &str, format_id: &str) -> Job {
        Job::new(
            new_job_id(),
            SubmitRequest {
                url: "https://example.com/watch?v=abc".into(),
                format_id: format_id.into(),
                title: title.into(),
                channel: None,
                thumbnail: None,
            },
        )
    }

    #[test]
    fn sanitize_keeps_safe_subset() {
        assert_eq!(sanitize_title("My Video - Part 2"), "My Video - Part 2");
        assert_eq!(sanitize_title("a/b\\c:d*e?\"f\""), "a_b_c_d_e__f_");
        assert_eq!(sanitize_title("日本語 title!"), "____ title_");
    }

    #[test]
    fn audio_selector_passes_through_to_mp3() {
        assert_eq!(format_expression("bestaudio"), "bestaudio");
        assert_eq!(output_extension("bestaudio"), "mp3");
    }

    #[test]
    fn video_selector_gets_bestaudio_fallback_and_mp4() {
        assert_eq!(format_expression("137"), "137+bestaudio/best");
        assert_eq!(output_extension("137"), "mp4");
    }

    #[test]
    fn argv_matches_worker_contract() {
        let j = job("Talk", "137");
        let out = output_file(Path::new("/var/data/downloads"), &j.title, &j.format_id);
        let args = build_args(&j, &out);
        assert_eq!(
            args,
            vec![
                "-f",
                "137+bestaudio/best",
                "--merge-output-format",
                "mp4",
                "--newline",
                "--progress",
                "--no-warnings",
                "--ignore-errors",
                "-o",
                "/var/data/downloads/Talk.mp4",
                "https://example.com/watch?v=abc",
            ]
        );
    }

    #[test]
    fn public_path_escapes_spaces_only() {
        assert_eq!(
            public_path("My Talk", "bestaudio"),
            "/downloads/My%20Talk.mp3"
        );
    }

    #[test]
    fn parses_percent_lines() {
        assert_eq!(
            parse_progress_line("[download]  42.3% of 10.00MiB at 1.2MiB/s"),
            Some(42.3)
        );
        assert_eq!(parse_progress_line("[download] 100% of 10MiB"), Some(100.0));
        assert_eq!(parse_progress_line("[merge] finishing up"), None);
        assert_eq!(parse_progress_line("no percent here"), None);
    }

    #[test]
    fn malformed_percent_lines_are_skipped() {
        assert_eq!(parse_progress_line("stuck at ...% somewhere"), None);
    }

    #[test]
    fn forward_filter_is_monotonic_with_zero_reset() {
        assert!(should_forward(5.0, 0.0));
        assert!(!should_forward(5.0, 10.0));
        assert!(!should_forward(10.0, 10.0));
        assert!(should_forward(0.0, 87.5));
    }

    /// Stub worker: a shell script that ignores the yt-dlp argv and prints
    /// canned progress lines.
    #[cfg(unix)]
    fn stub_worker(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn supervises_a_stub_worker_to_exit() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_worker(
            dir.path(),
            "printf '[download]  50.0%% of x\\n[download] 100%% of x\\n'",
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let j = job("stub", "137");
        let handle = spawn_worker(&j, program.to_str().unwrap(), dir.path(), tx).unwrap();
        assert_eq!(handle.job_id, j.id);

        let mut percents = Vec::new();
        let mut exit = None;
        while let Some(ev) = rx.recv().await {
            match ev {
                WorkerEvent::Progress { percent, .. } => percents.push(percent),
                WorkerEvent::Exited { code, .. } => {
                    exit = Some(code);
                    break;
                }
            }
        }
        assert_eq!(percents, vec![50.0, 100.0]);
        assert_eq!(exit, Some(Some(0)));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn regressing_progress_is_not_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_worker(
            dir.path(),
            "printf '[download] 80%% of x\\n[download] 30%% of x\\n[download] 90%% of x\\n'",
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let j = job("regress", "137");
        spawn_worker(&j, program.to_str().unwrap(), dir.path(), tx).unwrap();

        let mut percents = Vec::new();
        while let Some(ev) = rx.recv().await {
            match ev {
                WorkerEvent::Progress { percent, .. } => percents.push(percent),
                WorkerEvent::Exited { .. } => break,
            }
        }
        assert_eq!(percents, vec![80.0, 90.0]);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_worker(dir.path(), "exit 3");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let j = job("fail", "137");
        spawn_worker(&j, program.to_str().unwrap(), dir.path(), tx).unwrap();

        loop {
            match rx.recv().await.expect("event") {
                WorkerEvent::Exited { code, .. } => {
                    assert_eq!(code, Some(3));
                    break;
                }
                WorkerEvent::Progress { .. } => {}
            }
        }
    }

    #[tokio::test]
    async fn spawn_of_missing_program_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let j = job("nope", "137");
        let err = spawn_worker(&j, "/nonexistent/worker", Path::new("/tmp"), tx);
        assert!(err.is_err());
    }
}

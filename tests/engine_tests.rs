// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! End-to-end engine tests driving the coordinator against stub worker
//! scripts: admission under a ceiling, FIFO order, pause/resume, exit
//! outcomes, cancellation, and live status streams.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use tubequeue::config::Settings;
use tubequeue::jobs::{Coordinator, JobSnapshot, JobStatus, SubmitRequest};

/// Write an executable shell script that stands in for the real worker.
fn stub_worker(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn settings(storage: &Path, worker: &Path, limit: usize) -> Settings {
    Settings {
        storage_dir: storage.to_path_buf(),
        worker_program: worker.to_string_lossy().into_owned(),
        concurrency_limit: limit,
        ..Settings::default()
    }
}

fn request(title: &str) -> SubmitRequest {
    SubmitRequest {
        url: format!("https://example.com/watch?v={}", title),
        format_id: "137".into(),
        title: title.into(),
        channel: None,
        thumbnail: None,
    }
}

/// Poll until the job's snapshot satisfies `pred`, or panic after 5s.
async fn wait_for(
    coordinator: &Coordinator,
    id: &str,
    pred: impl Fn(&JobSnapshot) -> bool,
) -> JobSnapshot {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(snap) = coordinator.snapshot(id) {
            if pred(&snap) {
                return snap;
            }
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting on job {}",
            id
        );
        sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_status(coordinator: &Coordinator, id: &str, status: JobStatus) -> JobSnapshot {
    wait_for(coordinator, id, |s| s.status == status).await
}

#[tokio::test]
async fn ceiling_bounds_admission_fifo() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(dir.path(), "slow", "sleep 30");
    let c = Coordinator::new(settings(dir.path(), &worker, 2));

    let a = c.submit(request("a")).unwrap();
    let b = c.submit(request("b")).unwrap();
    let x = c.submit(request("c")).unwrap();
    let y = c.submit(request("d")).unwrap();

    wait_for_status(&c, &a, JobStatus::Downloading).await;
    wait_for_status(&c, &b, JobStatus::Downloading).await;
    assert_eq!(c.snapshot(&x).unwrap().status, JobStatus::Queued);
    assert_eq!(c.snapshot(&y).unwrap().status, JobStatus::Queued);
    assert_eq!(c.counts(), (2, 2));

    // Freeing one slot admits the oldest pending job, not the newest.
    c.cancel(&a).unwrap();
    wait_for_status(&c, &x, JobStatus::Downloading).await;
    assert_eq!(c.snapshot(&y).unwrap().status, JobStatus::Queued);
    assert_eq!(c.counts(), (2, 1));
}

#[tokio::test]
async fn successful_exit_completes_at_100_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(
        dir.path(),
        "ok",
        "printf '[download]  50.0%% of x\\n[download] 100%% of x\\n'",
    );
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let id = c.submit(request("My Talk")).unwrap();
    let snap = wait_for_status(&c, &id, JobStatus::Completed).await;
    assert_eq!(snap.progress, 100.0);
    assert_eq!(snap.file_path.as_deref(), Some("/downloads/My%20Talk.mp4"));
}

#[tokio::test]
async fn completion_admits_the_next_pending_job() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(dir.path(), "quick", "exit 0");
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let a = c.submit(request("first")).unwrap();
    let b = c.submit(request("second")).unwrap();

    wait_for_status(&c, &a, JobStatus::Completed).await;
    wait_for_status(&c, &b, JobStatus::Completed).await;
    assert_eq!(c.counts(), (0, 0));
}

#[tokio::test]
async fn failed_exit_resolves_to_error_without_path() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(
        dir.path(),
        "bad",
        "printf '[download]  37.0%% of x\\n'; exit 1",
    );
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let id = c.submit(request("broken")).unwrap();
    let snap = wait_for_status(&c, &id, JobStatus::Error).await;
    assert_eq!(snap.progress, 37.0);
    assert!(snap.file_path.is_none());
    // The slot is free again.
    assert_eq!(c.counts(), (0, 0));
}

#[tokio::test]
async fn pause_and_resume_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(dir.path(), "slow", "sleep 30");
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let id = c.submit(request("pausable")).unwrap();
    wait_for_status(&c, &id, JobStatus::Downloading).await;

    c.pause(&id).unwrap();
    assert_eq!(c.snapshot(&id).unwrap().status, JobStatus::Paused);
    // Paused jobs keep their slot; nothing else is admitted.
    assert_eq!(c.counts(), (1, 0));

    c.resume(&id).unwrap();
    assert_eq!(c.snapshot(&id).unwrap().status, JobStatus::Downloading);

    c.cancel(&id).unwrap();
}

#[tokio::test]
async fn exit_while_paused_produces_no_state_change() {
    let dir = tempfile::tempdir().unwrap();
    // Two commands so the shell stays the supervised process (matchable by
    // pkill under the script path) instead of exec'ing the sleep.
    let worker = stub_worker(dir.path(), "suspended", "sleep 30\nexit 0");
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let id = c.submit(request("suspended")).unwrap();
    wait_for_status(&c, &id, JobStatus::Downloading).await;
    c.pause(&id).unwrap();
    assert_eq!(c.snapshot(&id).unwrap().status, JobStatus::Paused);

    // Kill the suspended worker out from under the engine.
    let pattern = worker.to_string_lossy().into_owned();
    let killed = std::process::Command::new("pkill")
        .args(["-9", "-f", &pattern])
        .status()
        .unwrap();
    assert!(killed.success(), "no stub worker process to kill");

    // The exit event arrives and is ignored: the job stays paused at its
    // last progress and keeps holding its slot.
    sleep(Duration::from_millis(300)).await;
    let snap = c.snapshot(&id).unwrap();
    assert_eq!(snap.status, JobStatus::Paused);
    assert_eq!(c.counts(), (1, 0));

    // Cancellation is still the way out.
    c.cancel(&id).unwrap();
    assert!(c.snapshot(&id).is_none());
    assert_eq!(c.counts(), (0, 0));
}

#[tokio::test]
async fn parallel_submissions_never_exceed_the_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(dir.path(), "slow", "sleep 30");
    let c = Arc::new(Coordinator::new(settings(dir.path(), &worker, 2)));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let c = Arc::clone(&c);
        tasks.push(tokio::spawn(async move {
            c.submit(request(&format!("job-{}", i))).unwrap()
        }));
    }
    let mut ids = Vec::new();
    for t in tasks {
        ids.push(t.await.unwrap());
    }

    // Admission settles at exactly the ceiling and never overshoots it,
    // even with submissions racing each other.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let (active, pending) = c.counts();
        assert!(active <= 2, "ceiling exceeded: {} active", active);
        if (active, pending) == (2, 6) {
            break;
        }
        assert!(Instant::now() < deadline, "admission never settled");
        sleep(Duration::from_millis(10)).await;
    }
    let downloading = c
        .list()
        .iter()
        .filter(|s| s.status == JobStatus::Downloading)
        .count();
    assert_eq!(downloading, 2);

    for id in &ids {
        c.cancel(id).unwrap();
    }
    assert_eq!(c.counts(), (0, 0));
}

#[tokio::test]
async fn cancel_pending_drops_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(dir.path(), "slow", "sleep 30");
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let a = c.submit(request("active")).unwrap();
    let b = c.submit(request("pending")).unwrap();
    wait_for_status(&c, &a, JobStatus::Downloading).await;

    c.cancel(&b).unwrap();
    assert!(c.snapshot(&b).is_none());
    assert_eq!(c.counts(), (1, 0));
    // Cancelling again is a no-op.
    c.cancel(&b).unwrap();

    c.cancel(&a).unwrap();
    assert!(c.snapshot(&a).is_none());
    assert_eq!(c.counts(), (0, 0));
}

#[tokio::test]
async fn cancelling_active_frees_slot_for_pending() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(dir.path(), "slow", "sleep 30");
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let a = c.submit(request("doomed")).unwrap();
    let b = c.submit(request("waiting")).unwrap();
    wait_for_status(&c, &a, JobStatus::Downloading).await;

    c.cancel(&a).unwrap();
    wait_for_status(&c, &b, JobStatus::Downloading).await;
    c.cancel(&b).unwrap();
}

#[tokio::test]
async fn lowering_the_limit_never_preempts() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(dir.path(), "slow", "sleep 30");
    let c = Coordinator::new(settings(dir.path(), &worker, 2));

    let a = c.submit(request("one")).unwrap();
    let b = c.submit(request("two")).unwrap();
    wait_for_status(&c, &a, JobStatus::Downloading).await;
    wait_for_status(&c, &b, JobStatus::Downloading).await;

    c.set_limit(1).unwrap();
    assert_eq!(c.snapshot(&a).unwrap().status, JobStatus::Downloading);
    assert_eq!(c.snapshot(&b).unwrap().status, JobStatus::Downloading);
    assert_eq!(c.counts(), (2, 0));

    c.cancel(&a).unwrap();
    c.cancel(&b).unwrap();
}

#[tokio::test]
async fn raising_the_limit_admits_pending_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(dir.path(), "slow", "sleep 30");
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let a = c.submit(request("one")).unwrap();
    let b = c.submit(request("two")).unwrap();
    wait_for_status(&c, &a, JobStatus::Downloading).await;
    assert_eq!(c.snapshot(&b).unwrap().status, JobStatus::Queued);

    c.set_limit(2).unwrap();
    wait_for_status(&c, &b, JobStatus::Downloading).await;

    c.cancel(&a).unwrap();
    c.cancel(&b).unwrap();
}

#[tokio::test]
async fn status_stream_reaches_the_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(
        dir.path(),
        "steady",
        "printf '[download]  25.0%% of x\\n'; sleep 0.2; printf '[download] 100%% of x\\n'",
    );
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let id = c.submit(request("streamed")).unwrap();
    let mut rx = c.subscribe(&id).expect("channel exists for live job");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snap = rx.borrow_and_update().clone();
        if snap.status == JobStatus::Completed {
            assert_eq!(snap.progress, 100.0);
            assert!(snap.file_path.is_some());
            break;
        }
        assert!(Instant::now() < deadline, "stream never completed");
        rx.changed().await.expect("stream closed early");
    }
}

#[tokio::test]
async fn late_subscriber_sees_the_terminal_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(dir.path(), "quick", "exit 0");
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let id = c.submit(request("done")).unwrap();
    wait_for_status(&c, &id, JobStatus::Completed).await;

    let rx = c.subscribe(&id).expect("terminal jobs stay subscribable");
    assert_eq!(rx.borrow().status, JobStatus::Completed);
}

#[tokio::test]
async fn listing_returns_jobs_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let worker = stub_worker(dir.path(), "slow", "sleep 30");
    let c = Coordinator::new(settings(dir.path(), &worker, 1));

    let a = c.submit(request("a")).unwrap();
    let b = c.submit(request("b")).unwrap();
    let ids: Vec<_> = c.list().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![a.clone(), b.clone()]);

    c.cancel(&a).unwrap();
    c.cancel(&b).unwrap();
}

//! Job store persistence: title dedup, interrupted writes, corrupt files,
//! change detection and inbox intake.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{test_config, wait_completed, DownProbe, ScriptedImplementer};
use prometheus_lane_scheduler::builders::SchedulerBuilder;
use prometheus_lane_scheduler::core::Job;
use prometheus_lane_scheduler::infra::atomic_file::StagedWrite;
use prometheus_lane_scheduler::infra::{ChangeDetector, Inbox, JobStore};
use serde_json::json;

fn job(title: &str) -> Job {
    Job::new(title, "python", json!({"title": title}))
}

fn titles(jobs: &[Job]) -> Vec<&str> {
    jobs.iter().map(|j| j.title.as_str()).collect()
}

#[test]
fn test_append_dedups_by_title() {
    let dir = tempfile::tempdir().unwrap();
    let store = JobStore::new(dir.path().join("jobs.json"));
    assert!(store.append(job("a")).unwrap());
    assert!(store.append(job("b")).unwrap());
    assert!(!store.append(job("a").with_priority(1)).unwrap());

    let jobs = store.load().unwrap();
    assert_eq!(titles(&jobs), vec!["a", "b"]);
    assert_eq!(jobs[0].priority, 1);
}

#[test]
fn test_concurrent_appends_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    store.append(job(&format!("t{t}-{i}"))).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(store.load().unwrap().len(), 80);
}

#[test]
fn test_interrupted_write_keeps_previous_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    let store = JobStore::new(&path);
    store.append(job("survivor")).unwrap();
    let before = std::fs::read_to_string(&path).unwrap();

    let staged = StagedWrite::stage(&path, b"[{\"title\": \"half-writ").unwrap();
    let temp = staged.temp_path().to_path_buf();
    assert!(temp.exists());
    drop(staged);

    assert!(!temp.exists());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    assert_eq!(titles(&store.load().unwrap()), vec!["survivor"]);
}

#[test]
fn test_corrupt_store_reads_as_empty_and_recovers_on_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    std::fs::write(&path, "{ not json").unwrap();
    let store = JobStore::new(&path);

    let snapshot = store.load_snapshot().unwrap();
    assert!(snapshot.corrupt);
    assert!(snapshot.jobs.is_empty());

    assert!(store.append(job("fresh")).unwrap());
    let snapshot = store.load_snapshot().unwrap();
    assert!(!snapshot.corrupt);
    assert_eq!(titles(&snapshot.jobs), vec!["fresh"]);
}

#[test]
fn test_replace_swaps_job_for_variants() {
    let dir = tempfile::tempdir().unwrap();
    let store = JobStore::new(dir.path().join("jobs.json"));
    store.append(job("keep")).unwrap();
    store.append(job("orig")).unwrap();

    let added = store
        .replace("orig", vec![job("orig v1"), job("orig v2"), job("keep")])
        .unwrap();
    assert_eq!(added, vec!["orig v1", "orig v2"]);
    assert_eq!(titles(&store.load().unwrap()), vec!["keep", "orig v1", "orig v2"]);
    assert!(store.remove("orig v1").unwrap());
    assert!(!store.remove("orig v1").unwrap());
}

#[test]
fn test_change_detector_reports_only_new_titles() {
    let dir = tempfile::tempdir().unwrap();
    let store = JobStore::new(dir.path().join("jobs.json"));
    let mut detector = ChangeDetector::new(store.clone());

    store.append(job("one")).unwrap();
    assert_eq!(titles(&detector.poll().unwrap()), vec!["one"]);
    assert!(detector.poll().unwrap().is_empty());

    store.append(job("two")).unwrap();
    assert_eq!(titles(&detector.poll().unwrap()), vec!["two"]);
    assert_eq!(titles(&detector.force_rescan().unwrap()), vec!["one", "two"]);
}

#[test]
fn test_inbox_merges_and_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let inbox_dir = dir.path().join("inbox");
    std::fs::create_dir_all(&inbox_dir).unwrap();
    std::fs::write(
        inbox_dir.join("a.json"),
        json!([{"title": "from-a"}, {"payload": 1}]).to_string(),
    )
    .unwrap();
    std::fs::write(inbox_dir.join("b.json"), json!({"title": "from-b"}).to_string()).unwrap();
    std::fs::write(inbox_dir.join("c.json"), "garbage").unwrap();

    let store = JobStore::new(dir.path().join("jobs.json"));
    let report = Inbox::new(&inbox_dir).sweep(&store).unwrap();

    assert_eq!(report.accepted, vec!["from-a", "from-b"]);
    assert_eq!(report.invalid.len(), 1);
    assert_eq!(report.rejected_files, vec![inbox_dir.join("c.json.rejected")]);
    assert!(!inbox_dir.join("a.json").exists());
    assert_eq!(titles(&store.load().unwrap()), vec!["from-a", "from-b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduler_runs_inbox_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let inbox_dir = dir.path().join("inbox");
    let mut cfg = test_config(dir.path(), 1);
    cfg.paths.inbox_dir = Some(inbox_dir.clone());
    let scheduler = SchedulerBuilder::new(cfg)
        .implementer(ScriptedImplementer::default())
        .probe(DownProbe)
        .build()
        .unwrap();
    let handle = scheduler.start();

    std::fs::create_dir_all(&inbox_dir).unwrap();
    std::fs::write(inbox_dir.join("drop.json"), json!({"title": "dropped-in"}).to_string()).unwrap();

    let stats = wait_completed(&scheduler, 1, Duration::from_secs(5)).await;
    handle.shutdown().await;
    assert_eq!(stats.completed, 1);
    assert!(scheduler.store().load().unwrap().is_empty());
}

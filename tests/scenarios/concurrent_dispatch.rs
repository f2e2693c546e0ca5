//! Test: Concurrent dispatch - racing callers never claim the same job twice

use crate::helpers::*;
use lockstep::core::{JobStatus, NewJob};
use lockstep::execution::Dispatcher;
use lockstep::persistence::{InMemoryJobRepository, JobRepository};
use std::collections::HashSet;
use std::sync::Arc;

async fn racing_claims(repo: Arc<dyn JobRepository>) {
    let dispatcher = Dispatcher::new(repo.clone());
    let job = repo
        .create_job(NewJob::new("a1", "node-a").with_status(JobStatus::Scheduled))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let dispatcher = dispatcher.clone();
        let job = job.clone();
        tasks.push(tokio::spawn(async move { dispatcher.start(&job).await }));
    }

    let mut won = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(job) => {
                assert_eq!(job.status, JobStatus::Running);
                won += 1;
            }
            Err(e) => assert!(e.is_conflict()),
        }
    }
    assert_eq!(won, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_claim_wins_in_memory() {
    racing_claims(Arc::new(InMemoryJobRepository::new())).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_claim_wins_in_sqlite() {
    let dir = scratch_dir("db");
    let repo = lockstep::persistence::SqliteJobRepository::at_path(&dir.join("jobs.db"))
        .await
        .unwrap();
    racing_claims(Arc::new(repo)).await;
    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_competing_dispatchers_split_the_queue() {
    let repo: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    for _ in 0..20 {
        repo.create_job(NewJob::new("a1", "node-a").with_status(JobStatus::Scheduled))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let dispatcher = Dispatcher::new(repo.clone());
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = dispatcher.dispatch("node-a").await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }
    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_promotion_schedules_each_job_once() {
    let repo: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    for _ in 0..10 {
        repo.create_job(NewJob::new("a1", "node-a")).await.unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let dispatcher = Dispatcher::new(repo.clone());
        tasks.push(tokio::spawn(async move {
            dispatcher.schedule_unlocked("a1").await.unwrap().len()
        }));
    }

    let mut promoted = 0;
    for task in tasks {
        promoted += task.await.unwrap();
    }
    assert_eq!(promoted, 10);
}

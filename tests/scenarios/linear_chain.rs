//! Test: Linear chain - J1 -> J2 -> J3 driven through the lifecycle

use lockstep::core::{JobStatus, NewJob};
use lockstep::execution::Dispatcher;
use lockstep::persistence::{InMemoryJobRepository, JobRepository};
use std::sync::Arc;

fn ids(jobs: &[lockstep::Job]) -> Vec<String> {
    jobs.iter().map(|j| j.id.clone()).collect()
}

#[tokio::test]
async fn test_linear_chain_runs_in_order() {
    let repo: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    let dispatcher = Dispatcher::new(repo.clone());
    let locks = dispatcher.locks();

    let j1 = repo.create_job(NewJob::new("a1", "node-a")).await.unwrap();
    let j2 = repo.create_job(NewJob::new("a1", "node-a").with_lock_counter(1)).await.unwrap();
    let j3 = repo.create_job(NewJob::new("a1", "node-a").with_lock_counter(1)).await.unwrap();
    locks.add_locks(&j1, &[j2.clone()]).await.unwrap();
    locks.add_locks(&j2, &[j3.clone()]).await.unwrap();

    // only the head of the chain is free
    assert_eq!(ids(&locks.list_unlocked("a1").await.unwrap()), vec![j1.id.clone()]);
    assert!(locks.is_locked(&j2).await.unwrap());
    assert!(locks.is_locked(&j3).await.unwrap());

    let scheduled = dispatcher.schedule_unlocked("a1").await.unwrap();
    assert_eq!(ids(&scheduled), vec![j1.id.clone()]);

    let running = dispatcher.dispatch("node-a").await.unwrap().unwrap();
    assert_eq!(running.id, j1.id);
    assert_eq!(running.status, JobStatus::Running);
    assert!(dispatcher.dispatch("node-a").await.unwrap().is_none());

    dispatcher.complete(&running).await.unwrap();
    locks.unlock(&running).await.unwrap();

    assert!(!locks.is_locked(&j2).await.unwrap());
    assert!(locks.is_locked(&j3).await.unwrap());
    let unlocked = locks.list_unlocked("a1").await.unwrap();
    assert_eq!(ids(&unlocked), vec![j1.id.clone(), j2.id.clone()]);

    // of those, only J2 is still waiting to be scheduled
    let pending: Vec<_> = unlocked
        .into_iter()
        .filter(|j| j.status == JobStatus::Waiting)
        .collect();
    assert_eq!(ids(&pending), vec![j2.id.clone()]);

    // J2 then J3
    for expected in [&j2, &j3] {
        dispatcher.schedule_unlocked("a1").await.unwrap();
        let job = dispatcher.dispatch("node-a").await.unwrap().unwrap();
        assert_eq!(job.id, expected.id);
        let job = dispatcher.complete(&job).await.unwrap();
        locks.unlock(&job).await.unwrap();
    }

    for job in [&j1, &j2, &j3] {
        let stored = repo.get_job(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.scheduling_time.unwrap() <= stored.execution_time.unwrap());
        assert!(stored.execution_time.unwrap() <= stored.termination_time.unwrap());
    }
    assert_eq!(repo.get_job(&j3.id).await.unwrap().lock_counter, 1);
}

#[tokio::test]
async fn test_complete_on_scheduled_job_is_a_conflict() {
    let repo: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    let dispatcher = Dispatcher::new(repo.clone());

    let job = repo.create_job(NewJob::new("a1", "node-a")).await.unwrap();
    let job = dispatcher.schedule(&job).await.unwrap();

    let err = dispatcher.complete(&job).await.unwrap_err();
    assert!(err.is_conflict());
    let message = err.to_string();
    assert!(message.contains("job="));
    assert!(message.contains("artifact=a1"));
    assert!(message.contains("component=node-a"));

    assert_eq!(repo.get_job(&job.id).await.unwrap().status, JobStatus::Scheduled);
}

#[tokio::test]
async fn test_terminal_jobs_never_move_again() {
    let repo: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    let dispatcher = Dispatcher::new(repo.clone());

    let job = repo
        .create_job(NewJob::new("a1", "node-a").with_status(JobStatus::Scheduled))
        .await
        .unwrap();
    let job = dispatcher.start(&job).await.unwrap();
    let job = dispatcher.fail(&job).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);

    assert!(dispatcher.complete(&job).await.unwrap_err().is_conflict());
    assert!(dispatcher.schedule(&job).await.unwrap_err().is_conflict());
    assert_eq!(repo.get_job(&job.id).await.unwrap().status, JobStatus::Error);
}

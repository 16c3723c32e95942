mod common;

use std::time::Duration;

use pipewright::adapters::providers::MockResponse;
use pipewright::domain::models::{AutomationLevel, RunStatus, Stage};
use pipewright::domain::ports::CardRepository;
use pipewright::services::{WorkerSettings, WorkerState};

use common::{test_worker_settings, Harness};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_poll_executes_and_auto_advances_autonomous_run() {
    let h = Harness::new().await;
    h.mock
        .respond_when("research", MockResponse::success("# Findings\nClinics lose 12% of slots."))
        .await;
    let card = h.seed_card(Stage::Discovery).await;
    let run = h.queue(&card, Stage::Discovery, AutomationLevel::Autonomous).await;
    let worker = h.worker("worker-test-1", test_worker_settings());

    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert!(worker.drain(WAIT).await);

    let done = h.runs.get_run(run.id).await.unwrap();
    assert_eq!(done.status, RunStatus::Succeeded, "error: {:?}", done.error_summary);
    assert_eq!(done.claimed_by.as_deref(), Some("worker-test-1"));
    assert_eq!(done.metadata["workerId"], serde_json::json!("worker-test-1"));
    assert_eq!(done.metadata["autoAdvance"], serde_json::json!(true));
    assert!(done.metadata.contains_key("durationMs"));
    assert!(done.finished_at.is_some());

    let artifacts = h.runs.list_artifacts(run.id).await.unwrap();
    assert!(artifacts.iter().any(|a| a.artifact_type == "document"));

    let moved = h.cards.get_card(card.id).await.unwrap().unwrap();
    assert_eq!(moved.stage, Stage::Prd);
    let transitions = h.runs.list_transitions(card.id).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].from_stage, Some(Stage::Discovery));
    assert_eq!(transitions[0].to_stage, Stage::Prd);
    assert_eq!(transitions[0].actor, "worker:worker-test-1");
    assert_eq!(transitions[0].run_id, Some(run.id));

    let workers = h.runs.list_workers().await.unwrap();
    let row = workers.iter().find(|w| w.worker_id == "worker-test-1").unwrap();
    assert_eq!(row.processed_count, 1);
    assert_eq!(row.failed_count, 0);
    assert_eq!(row.active_run_id, None);
}

#[tokio::test]
async fn test_manual_run_leaves_card_in_place() {
    let h = Harness::new().await;
    let card = h.seed_card(Stage::Discovery).await;
    let run = h.queue(&card, Stage::Discovery, AutomationLevel::Manual).await;
    let worker = h.worker("worker-test-2", test_worker_settings());

    worker.poll_once().await.unwrap();
    assert!(worker.drain(WAIT).await);

    let done = h.runs.get_run(run.id).await.unwrap();
    assert_eq!(done.status, RunStatus::Succeeded);
    // the recommendation is recorded even though nothing moved
    assert_eq!(done.metadata["autoAdvance"], serde_json::json!(true));
    assert_eq!(h.cards.get_card(card.id).await.unwrap().unwrap().stage, Stage::Discovery);
    assert!(h.runs.list_transitions(card.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_panicking_execution_fails_only_its_run() {
    let h = Harness::new().await;
    h.mock.push_response(MockResponse::panicking()).await;
    let first_card = h.seed_card(Stage::Discovery).await;
    let first = h.queue(&first_card, Stage::Discovery, AutomationLevel::Manual).await;
    let worker = h.worker(
        "worker-test-3",
        WorkerSettings {
            max_concurrent: 1,
            ..test_worker_settings()
        },
    );

    worker.poll_once().await.unwrap();
    assert!(worker.drain(WAIT).await);
    let failed = h.runs.get_run(first.id).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.error_summary.unwrap().contains("panic"));

    // the worker keeps going
    let second_card = h.seed_card(Stage::Discovery).await;
    let second = h.queue(&second_card, Stage::Discovery, AutomationLevel::Manual).await;
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert!(worker.drain(WAIT).await);
    assert_eq!(h.runs.get_run(second.id).await.unwrap().status, RunStatus::Succeeded);

    let row = h
        .runs
        .list_workers()
        .await
        .unwrap()
        .into_iter()
        .find(|w| w.worker_id == "worker-test-3")
        .unwrap();
    assert_eq!(row.failed_count, 1);
    assert_eq!(row.processed_count, 1);
}

#[tokio::test]
async fn test_capacity_limits_claims_per_poll() {
    let h = Harness::new().await;
    for response in [
        MockResponse::success("slow one").with_delay(Duration::from_millis(200)),
        MockResponse::success("slow two").with_delay(Duration::from_millis(200)),
    ] {
        h.mock.push_response(response).await;
    }
    let mut queued = Vec::new();
    for _ in 0..3 {
        let card = h.seed_card(Stage::Discovery).await;
        queued.push(h.queue(&card, Stage::Discovery, AutomationLevel::Manual).await);
    }
    let worker = h.worker("worker-test-4", test_worker_settings());

    assert_eq!(worker.poll_once().await.unwrap(), 2);
    // full: nothing more is claimed until a slot frees up
    assert_eq!(worker.poll_once().await.unwrap(), 0);
    assert_eq!(worker.report().await.active_runs.len(), 2);

    assert!(worker.drain(WAIT).await);
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert!(worker.drain(WAIT).await);
    for run in queued {
        assert_eq!(h.runs.get_run(run.id).await.unwrap().status, RunStatus::Succeeded);
    }
}

#[tokio::test]
async fn test_execution_error_fails_run_with_reason() {
    let h = Harness::new().await;
    // Design needs a PRD that does not exist
    let card = h.seed_card(Stage::Design).await;
    let run = h.queue(&card, Stage::Design, AutomationLevel::Autonomous).await;
    let worker = h.worker("worker-test-5", test_worker_settings());

    worker.poll_once().await.unwrap();
    assert!(worker.drain(WAIT).await);

    let failed = h.runs.get_run(run.id).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.error_summary.unwrap().contains("prd"));
    assert_eq!(h.cards.get_card(card.id).await.unwrap().unwrap().stage, Stage::Design);
    assert_eq!(h.mock.call_count().await, 0);
}

#[tokio::test]
async fn test_start_and_stop_lifecycle() {
    let h = Harness::new().await;
    let card = h.seed_card(Stage::Prd).await;
    let run = h.queue(&card, Stage::Prd, AutomationLevel::Manual).await;
    let worker = h.worker("worker-test-6", test_worker_settings());
    assert_eq!(worker.state().await, WorkerState::Stopped);

    worker.start().await.unwrap();
    assert_eq!(worker.state().await, WorkerState::Running);
    assert!(worker.start().await.is_err());

    let done = h.wait_terminal(run.id, WAIT).await;
    assert_eq!(done.status, RunStatus::Succeeded);

    assert!(worker.stop().await.unwrap());
    assert_eq!(worker.state().await, WorkerState::Stopped);
    let row = h
        .runs
        .list_workers()
        .await
        .unwrap()
        .into_iter()
        .find(|w| w.worker_id == "worker-test-6")
        .unwrap();
    assert_eq!(row.active_run_id, None);

    // stopping twice is harmless
    assert!(worker.stop().await.unwrap());
}

#[tokio::test]
async fn test_stop_reports_runs_that_outlive_the_shutdown_timeout() {
    let h = Harness::new().await;
    h.mock
        .push_response(MockResponse::success("# Findings\nslow").with_delay(Duration::from_millis(800)))
        .await;
    let card = h.seed_card(Stage::Discovery).await;
    let run = h.queue(&card, Stage::Discovery, AutomationLevel::Manual).await;
    let worker = h.worker(
        "worker-test-7",
        WorkerSettings {
            shutdown_timeout: Duration::from_millis(50),
            ..test_worker_settings()
        },
    );

    worker.start().await.unwrap();
    let deadline = tokio::time::Instant::now() + WAIT;
    while h.runs.get_run(run.id).await.unwrap().status == RunStatus::Queued {
        assert!(tokio::time::Instant::now() < deadline, "run was never claimed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(!worker.stop().await.unwrap());
    assert_eq!(worker.state().await, WorkerState::Stopped);
    assert_eq!(worker.report().await.active_runs, vec![run.id]);

    // the execution is not abandoned, it finishes after stop returns
    assert!(worker.drain(WAIT).await);
    assert_eq!(h.runs.get_run(run.id).await.unwrap().status, RunStatus::Succeeded);
}

mod common;

use chrono::Duration as ChronoDuration;
use futures::future::join_all;
use serde_json::Map;
use std::time::Duration;

use pipewright::domain::errors::DomainError;
use pipewright::domain::models::{AutomationLevel, LogLevel, RunStatus, Stage, WorkerStatus};
use pipewright::services::{EngineOperations, RunManagerSettings, RESCUE_REASON};

use common::{test_run_settings, Harness};

fn fast_rescue_settings() -> RunManagerSettings {
    RunManagerSettings {
        stuck_run: ChronoDuration::zero(),
        stale_worker: ChronoDuration::seconds(60),
        ..test_run_settings()
    }
}

#[tokio::test]
async fn test_create_is_idempotent_while_active() {
    let h = Harness::new().await;
    let card = h.seed_card(Stage::Prd).await;

    let first = h.queue(&card, Stage::Prd, AutomationLevel::Manual).await;
    let second = h.queue(&card, Stage::Prd, AutomationLevel::Autonomous).await;
    assert_eq!(first.id, second.id);
    assert_eq!(second.status, RunStatus::Queued);
    assert_eq!(second.provider, common::MOCK);

    // a different stage of the same card is independent
    let design = h.queue(&card, Stage::Design, AutomationLevel::Manual).await;
    assert_ne!(design.id, first.id);

    // once terminal, a new run may be created
    assert!(h.runs.cancel_run(first.id, "changed my mind").await.unwrap());
    let third = h.queue(&card, Stage::Prd, AutomationLevel::Manual).await;
    assert_ne!(third.id, first.id);
    assert_eq!(h.runs.list_runs_for_card(card.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let h = Harness::new().await;
    let card = h.seed_card(Stage::Prd).await;
    let run = h.queue(&card, Stage::Prd, AutomationLevel::Manual).await;

    let claims = (0..8).map(|i| {
        let runs = h.runs.clone();
        async move { runs.claim_run(run.id, &format!("worker-{i}")).await.unwrap() }
    });
    let results = join_all(claims).await;
    assert_eq!(results.iter().filter(|won| **won).count(), 1);

    let stored = h.runs.get_run(run.id).await.unwrap();
    assert_eq!(stored.status, RunStatus::Running);
    assert!(stored.started_at.is_some());
    assert!(stored.claimed_by.is_some());
}

#[tokio::test]
async fn test_complete_never_resurrects_terminal_runs() {
    let h = Harness::new().await;
    let card = h.seed_card(Stage::Prd).await;
    let run = h.queue(&card, Stage::Prd, AutomationLevel::Manual).await;
    assert!(h.runs.claim_run(run.id, "worker-a").await.unwrap());

    assert!(h.runs.cancel_run(run.id, "operator stop").await.unwrap());
    let late = h
        .runs
        .complete_run(run.id, RunStatus::Succeeded, None, Map::new())
        .await
        .unwrap();
    assert!(!late);

    let stored = h.runs.get_run(run.id).await.unwrap();
    assert_eq!(stored.status, RunStatus::Cancelled);
    assert_eq!(stored.error_summary.as_deref(), Some("operator stop"));
    assert!(!h.runs.cancel_run(run.id, "again").await.unwrap());

    let err = h
        .runs
        .complete_run(run.id, RunStatus::Running, None, Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn test_retry_lineage_and_attempt_limit() {
    let settings = RunManagerSettings {
        max_attempts: 2,
        ..test_run_settings()
    };
    let h = Harness::with_settings(settings).await;
    let card = h.seed_card(Stage::Prd).await;
    let run = h.queue(&card, Stage::Prd, AutomationLevel::Assisted).await;

    // only failed or cancelled runs are retryable
    let err = h.runs.retry_run(run.id, "cli").await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidStateTransition { .. }));

    h.runs
        .complete_run(run.id, RunStatus::Failed, Some("provider said no"), Map::new())
        .await
        .unwrap();
    let retry = h.runs.retry_run(run.id, "cli").await.unwrap();
    assert_ne!(retry.id, run.id);
    assert_eq!(retry.attempt, 2);
    assert_eq!(retry.automation_level, AutomationLevel::Assisted);
    assert_eq!(retry.metadata["retryOf"], serde_json::json!(run.id.to_string()));

    // the original is untouched
    let original = h.runs.get_run(run.id).await.unwrap();
    assert_eq!(original.status, RunStatus::Failed);
    assert_eq!(original.attempt, 1);

    h.runs
        .complete_run(retry.id, RunStatus::Failed, Some("again"), Map::new())
        .await
        .unwrap();
    let err = h.runs.retry_run(retry.id, "cli").await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::MaxAttemptsExceeded { attempt: 2, max_attempts: 2 }
    ));
}

#[tokio::test]
async fn test_superseded_attempt_cannot_be_retried() {
    let settings = RunManagerSettings {
        max_attempts: 2,
        ..test_run_settings()
    };
    let h = Harness::with_settings(settings).await;
    let card = h.seed_card(Stage::Prd).await;
    let first = h.queue(&card, Stage::Prd, AutomationLevel::Manual).await;
    h.runs
        .complete_run(first.id, RunStatus::Failed, Some("first"), Map::new())
        .await
        .unwrap();

    let second = h.runs.retry_run(first.id, "cli").await.unwrap();
    // retrying the same run while its retry is pending hands back the retry
    let again = h.runs.retry_run(first.id, "cli").await.unwrap();
    assert_eq!(again.id, second.id);

    h.runs
        .complete_run(second.id, RunStatus::Failed, Some("second"), Map::new())
        .await
        .unwrap();
    let err = h.runs.retry_run(first.id, "cli").await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::AlreadyRetried { run_id, retry_id } if run_id == first.id && retry_id == second.id
    ));
    assert!(matches!(
        h.runs.retry_run(second.id, "cli").await.unwrap_err(),
        DomainError::MaxAttemptsExceeded { attempt: 2, max_attempts: 2 }
    ));

    let mut attempts: Vec<u32> = h
        .runs
        .list_runs_for_card(card.id)
        .await
        .unwrap()
        .iter()
        .map(|r| r.attempt)
        .collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test]
async fn test_card_sweep_unlocks_cards_of_dead_runs() {
    let h = Harness::with_settings(fast_rescue_settings()).await;
    let stuck_card = h.seed_card(Stage::Design).await;
    let live_card = h.seed_card(Stage::Design).await;
    let stuck = h.queue(&stuck_card, Stage::Design, AutomationLevel::Manual).await;
    let live = h.queue(&live_card, Stage::Design, AutomationLevel::Manual).await;
    assert!(h.runs.claim_run(stuck.id, "worker-gone").await.unwrap());
    assert!(h.runs.claim_run(live.id, "worker-alive").await.unwrap());
    h.runs.register_worker("worker-alive", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let unlocked = h.runs.unlock_stuck_cards().await.unwrap();
    assert_eq!(unlocked, vec![stuck_card.id]);
    assert_eq!(h.runs.get_run(stuck.id).await.unwrap().status, RunStatus::Failed);
    assert!(h.runs.get_active_run(stuck_card.id, None).await.unwrap().is_none());
    assert!(h.runs.get_active_run(live_card.id, None).await.unwrap().is_some());

    assert!(h.runs.unlock_stuck_cards().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rescue_spares_corroborated_runs() {
    let h = Harness::with_settings(fast_rescue_settings()).await;
    let orphan_card = h.seed_card(Stage::Prd).await;
    let owned_card = h.seed_card(Stage::Prd).await;

    let orphan = h.queue(&orphan_card, Stage::Prd, AutomationLevel::Manual).await;
    let owned = h.queue(&owned_card, Stage::Prd, AutomationLevel::Manual).await;
    assert!(h.runs.claim_run(orphan.id, "worker-gone").await.unwrap());
    assert!(h.runs.claim_run(owned.id, "worker-alive").await.unwrap());
    h.runs.register_worker("worker-alive", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = EngineOperations::new(h.runs.clone()).rescue().await.unwrap();
    assert_eq!(report.rescued_runs, vec![orphan.id]);
    assert_eq!(report.unlocked_cards, vec![orphan_card.id]);

    let rescued = h.runs.get_run(orphan.id).await.unwrap();
    assert_eq!(rescued.status, RunStatus::Failed);
    assert_eq!(rescued.error_summary.as_deref(), Some(RESCUE_REASON));
    let logs = h.runs.list_logs(orphan.id).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.level == LogLevel::Error && l.message == RESCUE_REASON));

    assert_eq!(h.runs.get_run(owned.id).await.unwrap().status, RunStatus::Running);

    // the card is free for a new run
    let next = h.queue(&orphan_card, Stage::Prd, AutomationLevel::Manual).await;
    assert_ne!(next.id, orphan.id);

    // a second sweep finds nothing new
    assert!(h.runs.rescue_stuck_runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_heartbeat_advertising_a_run_vouches_for_it() {
    let h = Harness::with_settings(fast_rescue_settings()).await;
    let card = h.seed_card(Stage::Discovery).await;
    let run = h.queue(&card, Stage::Discovery, AutomationLevel::Manual).await;
    assert!(h.runs.claim_run(run.id, "worker-old-name").await.unwrap());
    h.runs
        .update_worker_heartbeat("worker-new-name", None, WorkerStatus::Processing, Some(run.id))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert!(h.runs.rescue_stuck_runs().await.unwrap().is_empty());
    assert_eq!(h.runs.get_run(run.id).await.unwrap().status, RunStatus::Running);
}

#[tokio::test]
async fn test_health_reports_stalled_queue() {
    let h = Harness::new().await;
    let card = h.seed_card(Stage::Prd).await;
    h.queue(&card, Stage::Prd, AutomationLevel::Manual).await;
    let ops = EngineOperations::new(h.runs.clone());

    let health = ops.health(None).await.unwrap();
    assert_eq!(health.queued_runs, 1);
    assert_eq!(health.active_workers, 0);
    assert!(health.stalled);

    h.runs.register_worker("worker-a", Some(h.workspace_id)).await.unwrap();
    let health = ops.health(Some(h.workspace_id)).await.unwrap();
    assert_eq!(health.active_workers, 1);
    assert!(!health.stalled);
    assert!(h.runs.has_active_workers(None).await.unwrap());
    assert_eq!(ops.workers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cleanup_keeps_fresh_heartbeats() {
    let h = Harness::new().await;
    h.runs.register_worker("worker-a", None).await.unwrap();
    let removed = EngineOperations::new(h.runs.clone()).cleanup().await.unwrap();
    assert_eq!(removed, 0);
    assert_eq!(h.runs.list_workers().await.unwrap().len(), 1);
}

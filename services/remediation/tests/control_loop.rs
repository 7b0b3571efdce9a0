//! End-to-end control loop behaviour against a mock worker pool

use async_trait::async_trait;
use mockito::Matcher;
use remediation_loop::analyzers::names;
use remediation_loop::{
    Analyzer, AnalyzerError, AnalyzerResult, AnalyzerSet, AnalyzerTier, ControlLoopEngine,
    CycleMode, DispatchStatus, HistoryStore, HttpWorkerPool, Issue, Severity, StrategyResolver,
    TaskStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Reports one dead process, optionally after a delay
struct DeadProcess {
    delay: Duration,
}

#[async_trait]
impl Analyzer for DeadProcess {
    fn name(&self) -> &str {
        names::PROCESS_LIVENESS
    }

    async fn analyze(&self) -> Result<AnalyzerResult, AnalyzerError> {
        tokio::time::sleep(self.delay).await;
        let mut result = AnalyzerResult::new(names::PROCESS_LIVENESS);
        result.push_issue(
            Issue::new(
                names::PROCESS_LIVENESS,
                "missing-ingest",
                Severity::Critical,
                "ingest has never reported a heartbeat",
            )
            .with_data("process", "ingest"),
        );
        Ok(result)
    }
}

fn engine(pool_base: &str, history: Arc<HistoryStore>, delay: Duration) -> ControlLoopEngine {
    let analyzers =
        AnalyzerSet::new().with(AnalyzerTier::Fast, Arc::new(DeadProcess { delay }));
    let pool = HttpWorkerPool::with_timeout(pool_base, Duration::from_secs(5)).unwrap();
    ControlLoopEngine::new(
        analyzers,
        StrategyResolver::with_defaults(),
        Arc::new(pool),
        history,
    )
}

#[tokio::test]
async fn test_full_cycle_dispatches_to_worker_pool() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/tasks")
        .match_body(Matcher::PartialJson(json!({
            "task": {"type": "process.revive", "payload": {"process": "ingest"}}
        })))
        .with_status(200)
        .with_body(r#"{"squadId":"ops-1"}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let history = Arc::new(HistoryStore::new(dir.path().join("history.json")));
    let engine = engine(&server.url(), history.clone(), Duration::ZERO);

    let cycle = engine
        .run_cycle("interval", None, CycleMode::Full)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(cycle.dispatch_results.len(), 1);
    assert_eq!(cycle.dispatch_results[0].status, DispatchStatus::Dispatched);
    assert_eq!(cycle.dispatch_results[0].squad_id.as_deref(), Some("ops-1"));
    assert_eq!(
        cycle.summary,
        "Cycle via control loop [interval]: 1 findings, 1 tasks generated, 1 dispatched, 0 queued, 0 failed."
    );
    assert_eq!(history.latest().await.unwrap().unwrap().id, cycle.id);
}

#[tokio::test]
async fn test_light_cycle_never_dispatches() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/tasks")
        .expect(0)
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let history = Arc::new(HistoryStore::new(dir.path().join("history.json")));
    let engine = engine(&server.url(), history, Duration::ZERO);

    let cycle = engine
        .run_cycle("request-volume", None, CycleMode::Light)
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(cycle.dispatch_results.is_empty());
    assert!(!cycle.generated_tasks.is_empty());
    assert!(cycle
        .generated_tasks
        .iter()
        .all(|task| task.status == TaskStatus::Suggested));
    assert!(cycle.summary.contains("[light]"));
}

#[tokio::test]
async fn test_overlapping_request_gets_previous_cycle() {
    let dir = tempdir().unwrap();
    let history = Arc::new(HistoryStore::new(dir.path().join("history.json")));
    let engine = Arc::new(engine(
        "http://127.0.0.1:1",
        history,
        Duration::from_millis(300),
    ));

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_cycle("interval", None, CycleMode::Light).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.is_running());

    let overlapping = engine
        .run_cycle("deploy", None, CycleMode::Full)
        .await
        .unwrap();
    assert_eq!(overlapping.summary, "Control loop has not completed a cycle yet.");
    assert!(overlapping.analysis.is_empty());

    let status = engine.status().await;
    assert!(status.is_running);
    assert_eq!(status.pending_triggers, vec!["deploy".to_string()]);

    let completed = running.await.unwrap().unwrap();
    assert_eq!(completed.trigger, "interval");
    assert!(!engine.is_running());
    assert_eq!(engine.history(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_history_is_capped() {
    let dir = tempdir().unwrap();
    let history = Arc::new(HistoryStore::new(dir.path().join("history.json")));
    let engine = engine("http://127.0.0.1:1", history.clone(), Duration::ZERO);

    let first = engine
        .run_cycle("interval", None, CycleMode::Light)
        .await
        .unwrap();
    let mut last = first.clone();
    for _ in 0..history.limit() {
        last = engine
            .run_cycle("interval", None, CycleMode::Light)
            .await
            .unwrap();
    }

    let cycles = history.load().await.unwrap();
    assert_eq!(cycles.len(), history.limit());
    assert_eq!(cycles[0].id, last.id);
    assert!(cycles.iter().all(|cycle| cycle.id != first.id));
}

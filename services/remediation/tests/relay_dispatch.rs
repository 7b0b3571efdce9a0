//! Tasks dispatched through a relay reaching the worker pool on flush

use mockito::{Matcher, Mock, ServerGuard};
use remediation_loop::{CycleMode, DispatchStatus, RemediationService};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use vigil_config::{RelaySettings, VigilConfig};

fn relayed_config(dir: &Path, pool_base: &str) -> VigilConfig {
    let mut config = VigilConfig::default();
    config.global.working_dir = dir.to_path_buf();
    config.control_loop.interval_secs = 0;
    config.control_loop.worker_pool_base = pool_base.to_string();
    config.control_loop.dispatch_relay = Some("tasks".to_string());
    config.probes.health_paths.clear();
    config.probes.env_snapshots.clear();
    config.probes.typecheck_command.clear();
    config.probes.lint_command.clear();
    config.probes.expected_processes = vec!["ingest".to_string()];
    config.relays = vec![RelaySettings {
        id: "tasks".to_string(),
        label: None,
        direction: "bidirectional".to_string(),
        channel: "ops".to_string(),
        buffer_limit: 16,
        drop_policy: "drop-oldest".to_string(),
        remote_hint: None,
    }];
    config
}

async fn revive_mock(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/tasks")
        .match_body(Matcher::PartialJson(json!({
            "task": {"type": "process.revive", "payload": {"process": "ingest"}}
        })))
        .with_status(200)
        .with_body(r#"{"squadId":"ops-2"}"#)
        .expect(1)
        .create_async()
        .await
}

#[tokio::test]
async fn test_relayed_task_reaches_worker_pool_on_flush() {
    let mut server = mockito::Server::new_async().await;
    let mock = revive_mock(&mut server).await;

    let dir = tempdir().unwrap();
    let service = RemediationService::build(relayed_config(dir.path(), &server.url())).unwrap();

    let cycle = service
        .engine()
        .run_cycle("manual", None, CycleMode::Full)
        .await
        .unwrap();

    assert_eq!(cycle.dispatch_results.len(), 1);
    assert_eq!(cycle.dispatch_results[0].status, DispatchStatus::Queued);
    assert!(cycle.summary.contains("0 dispatched, 1 queued, 0 failed."));
    assert_eq!(service.relays().buffered_messages("tasks").unwrap().len(), 1);

    let reports = service.flush_relays().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].attempted, 1);
    assert_eq!(reports[0].forwarded, 1);
    assert_eq!(reports[0].failed, 0);

    mock.assert_async().await;
    assert!(service.relays().buffered_messages("tasks").unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduled_flush_delivers_without_shutdown() {
    let mut server = mockito::Server::new_async().await;
    let mock = revive_mock(&mut server).await;

    let dir = tempdir().unwrap();
    let service = RemediationService::build(relayed_config(dir.path(), &server.url())).unwrap();
    let flusher = service.start_relay_flush(Duration::from_millis(50));

    service
        .engine()
        .run_cycle("manual", None, CycleMode::Full)
        .await
        .unwrap();

    let mut delivered = false;
    for _ in 0..100 {
        if mock.matched_async().await {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    flusher.abort();

    assert!(delivered);
    mock.assert_async().await;
    let stats = service.relays().stats("tasks").unwrap();
    assert_eq!(stats.buffered, 0);
}

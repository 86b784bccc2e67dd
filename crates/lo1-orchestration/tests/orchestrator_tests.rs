//! End-to-end orchestration tests against real host processes.
//!
//! These scenarios use dev-mode services only, so they run without a
//! container daemon: the compose phases are skipped because no compose
//! service exists, and teardown of the (empty) compose project is
//! best-effort.

use lo1_orchestration::cancel::CancelToken;
use lo1_orchestration::events::{EventBus, OrchestratorEvent, ServiceStatus};
use lo1_orchestration::orchestrator::{Orchestrator, StartOptions, StopOptions};
use lo1_orchestration::plugins::PluginRegistry;
use lo1_orchestration::runners::RunnerKind;
use lo1_orchestration::Error;
use std::path::Path;

fn write_manifest(dir: &Path, yaml: &str) {
    std::fs::write(dir.join("lo1.yaml"), yaml).unwrap();
}

fn orchestrator() -> (Orchestrator, async_channel::Receiver<OrchestratorEvent>, CancelToken) {
    let (events, rx) = EventBus::new();
    let cancel = CancelToken::new();
    let orchestrator = Orchestrator::new(PluginRegistry::new(), events, cancel.clone());
    (orchestrator, rx, cancel)
}

fn drain(rx: &async_channel::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn service_events(events: &[OrchestratorEvent]) -> Vec<(String, ServiceStatus)> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::Service { service, status } => Some((service.clone(), *status)),
            _ => None,
        })
        .collect()
}

fn position(events: &[(String, ServiceStatus)], service: &str, status: ServiceStatus) -> usize {
    events
        .iter()
        .position(|(s, st)| s == service && *st == status)
        .unwrap_or_else(|| panic!("no {:?} event for '{}'", status, service))
}

const LINEAR_STACK: &str = r#"
version: "1"
name: linear
services:
  db:
    command: sleep 30
  api:
    command: sleep 30
    dependsOn: [db]
  web:
    command: sleep 30
    dependsOn: [api]
"#;

#[test]
fn test_linear_stack_starts_in_layer_order_and_stops_clean() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), LINEAR_STACK);

        let (orchestrator, rx, _cancel) = orchestrator();
        let started = orchestrator
            .start(StartOptions::new(dir.path()))
            .await
            .unwrap();

        assert_eq!(started.handles.len(), 3);
        for handle in &started.handles {
            assert_eq!(handle.kind(), RunnerKind::Process);
            assert!(handle.is_running());
        }

        // Start events follow the layer order db -> api -> web.
        let events = drain(&rx);
        let service_events = service_events(&events);
        let db_started = position(&service_events, "db", ServiceStatus::Started);
        let api_starting = position(&service_events, "api", ServiceStatus::Starting);
        let api_started = position(&service_events, "api", ServiceStatus::Started);
        let web_starting = position(&service_events, "web", ServiceStatus::Starting);
        assert!(db_started < api_starting);
        assert!(api_started < web_starting);

        // The state file records every runner identity.
        let state_path = dir.path().join(".lo1/state.json");
        let raw = std::fs::read_to_string(&state_path).unwrap();
        let state: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(state["projectName"], "lo1-linear");
        for name in ["db", "api", "web"] {
            assert_eq!(state["services"][name]["runner"], "process");
            assert!(state["services"][name]["pid"].as_u64().unwrap() > 0);
        }

        // Ready phase was emitted.
        assert!(events.iter().any(
            |e| matches!(e, OrchestratorEvent::Phase { phase } if phase == "Ready")
        ));

        // Stop with the in-memory handles: no state file survives.
        orchestrator
            .stop(StopOptions::new(dir.path()), Some(started.handles.clone()))
            .await
            .unwrap();
        assert!(!state_path.exists());
        for handle in &started.handles {
            assert!(!handle.is_running());
        }

        let events = drain(&rx);
        assert!(events.iter().any(
            |e| matches!(e, OrchestratorEvent::Phase { phase } if phase == "Stopped")
        ));
    });
}

#[test]
fn test_diamond_layers() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
version: "1"
name: diamond
services:
  db:
    command: sleep 30
  api:
    command: sleep 30
    dependsOn: [db]
  worker:
    command: sleep 30
    dependsOn: [db]
  app:
    command: sleep 30
    dependsOn: [api, worker]
"#,
        );

        let (orchestrator, rx, _cancel) = orchestrator();
        let started = orchestrator
            .start(StartOptions::new(dir.path()))
            .await
            .unwrap();
        assert_eq!(started.handles.len(), 4);

        let events = service_events(&drain(&rx));
        let db_started = position(&events, "db", ServiceStatus::Started);
        let api_starting = position(&events, "api", ServiceStatus::Starting);
        let worker_starting = position(&events, "worker", ServiceStatus::Starting);
        let api_started = position(&events, "api", ServiceStatus::Started);
        let worker_started = position(&events, "worker", ServiceStatus::Started);
        let app_starting = position(&events, "app", ServiceStatus::Starting);

        // db strictly first; api and worker both before app.
        assert!(db_started < api_starting);
        assert!(db_started < worker_starting);
        assert!(api_started < app_starting);
        assert!(worker_started < app_starting);

        orchestrator
            .stop(StopOptions::new(dir.path()), Some(started.handles))
            .await
            .unwrap();
    });
}

#[test]
fn test_service_filter_starts_only_closure() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), LINEAR_STACK);

        let (orchestrator, _rx, _cancel) = orchestrator();
        let mut opts = StartOptions::new(dir.path());
        opts.service_filter = Some(vec!["api".to_string()]);

        let started = orchestrator.start(opts).await.unwrap();
        let mut names: Vec<&str> = started
            .handles
            .iter()
            .map(|h| h.service_name())
            .collect();
        names.sort();
        assert_eq!(names, vec!["api", "db"]);

        orchestrator
            .stop(StopOptions::new(dir.path()), Some(started.handles))
            .await
            .unwrap();
    });
}

#[test]
fn test_cancellation_before_startup_has_no_side_effects() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), LINEAR_STACK);

        let (orchestrator, _rx, cancel) = orchestrator();
        cancel.cancel();

        let err = orchestrator
            .start(StartOptions::new(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Orchestrator { .. }));
        assert!(!dir.path().join(".lo1/state.json").exists());
    });
}

#[test]
fn test_probe_failure_tears_down_started_layers() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
version: "1"
name: probe
services:
  db:
    command: sleep 30
  api:
    command: sleep 30
    dependsOn: [db]
    readinessProbe:
      url: http://127.0.0.1:1/unused
      timeoutMs: 200
      intervalMs: 20
"#,
        );

        let (orchestrator, rx, _cancel) = orchestrator();
        let err = orchestrator
            .start(StartOptions::new(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadinessProbe { .. }));

        // db came up in layer 0 and was torn back down.
        let events = service_events(&drain(&rx));
        let db_started = position(&events, "db", ServiceStatus::Started);
        let db_stopped = position(&events, "db", ServiceStatus::Stopped);
        assert!(db_started < db_stopped);
    });
}

#[test]
fn test_stale_state_is_cleaned_before_new_run() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), LINEAR_STACK);

        // A previous run left a state file behind, pointing at a process
        // that no longer exists.
        let lo1_dir = dir.path().join(".lo1");
        std::fs::create_dir_all(&lo1_dir).unwrap();
        std::fs::write(
            lo1_dir.join("state.json"),
            serde_json::json!({
                "workspaceName": "old",
                "projectName": "lo1-old",
                "fileArgs": [],
                "workspaceDir": dir.path(),
                "services": {
                    "ghost": { "runner": "process", "pid": 99999 }
                }
            })
            .to_string(),
        )
        .unwrap();

        let (orchestrator, rx, _cancel) = orchestrator();
        let started = orchestrator
            .start(StartOptions::new(dir.path()))
            .await
            .unwrap();

        let events = drain(&rx);
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::Phase { phase } if phase == "Cleaning up stale workspace"
        )));

        // The new run owns the state file now.
        let raw = std::fs::read_to_string(lo1_dir.join("state.json")).unwrap();
        let state: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(state["projectName"], "lo1-linear");

        orchestrator
            .stop(StopOptions::new(dir.path()), Some(started.handles))
            .await
            .unwrap();
    });
}

#[test]
fn test_stop_without_state_is_a_noop() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();

        let (orchestrator, rx, _cancel) = orchestrator();
        orchestrator
            .stop(StopOptions::new(dir.path()), None)
            .await
            .unwrap();

        let events = drain(&rx);
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::Phase { phase } if phase == "No running workspace found"
        )));
    });
}

#[test]
fn test_workspace_hooks_run_in_order() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("hook-order");
        write_manifest(
            dir.path(),
            &format!(
                r#"
version: "1"
name: hooks
hooks:
  postInfrastructure: "echo infra >> {log}"
  postSetup: "echo setup >> {log}"
  preStop: "echo stop >> {log}"
services:
  api:
    command: sleep 30
"#,
                log = log.display()
            ),
        );

        let (orchestrator, _rx, _cancel) = orchestrator();
        let started = orchestrator
            .start(StartOptions::new(dir.path()))
            .await
            .unwrap();
        orchestrator
            .stop(StopOptions::new(dir.path()), Some(started.handles))
            .await
            .unwrap();

        let recorded = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = recorded.lines().collect();
        assert_eq!(lines, vec!["infra", "setup", "stop"]);
    });
}

#[test]
fn test_skip_mode_services_are_not_started() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
version: "1"
name: skips
services:
  api:
    command: sleep 30
  ghost:
    mode: skip
    command: sleep 30
"#,
        );

        let (orchestrator, _rx, _cancel) = orchestrator();
        let started = orchestrator
            .start(StartOptions::new(dir.path()))
            .await
            .unwrap();
        assert_eq!(started.handles.len(), 1);
        assert_eq!(started.handles[0].service_name(), "api");

        orchestrator
            .stop(StopOptions::new(dir.path()), Some(started.handles))
            .await
            .unwrap();
    });
}

#[test]
fn test_cycle_fails_before_any_start() {
    smol::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
version: "1"
name: cyclic
services:
  a:
    command: sleep 30
    dependsOn: [b]
  b:
    command: sleep 30
    dependsOn: [c]
  c:
    command: sleep 30
    dependsOn: [a]
"#,
        );

        let (orchestrator, rx, _cancel) = orchestrator();
        let err = orchestrator
            .start(StartOptions::new(dir.path()))
            .await
            .unwrap_err();

        match err {
            Error::CycleDetected { path } => {
                for node in ["a", "b", "c"] {
                    assert!(path.contains(node), "path: {}", path);
                }
            }
            other => panic!("unexpected error: {}", other),
        }

        let events = service_events(&drain(&rx));
        assert!(events.is_empty());
    });
}

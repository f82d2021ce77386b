//! Subcommands against a configuration on disk

use std::path::{Path, PathBuf};

use forkswap_core::markers::{FileMarkerStore, MarkerOutcome, MarkerStore};
use forkswap_daemon::app::{self, Deployment};
use forkswap_daemon::{run, Action, Exit, Invocation, LogFormat};
use forkswap_test_utils::{target_id, SAMPLE_CONFIG};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::watch;

const ALL_TARGETS: [&str; 5] = ["node1-el", "node2-el", "node1-cl", "node2-cl", "refresh"];

/// Sample configuration with markers under a temp dir and `extra` appended
fn write_config(dir: &TempDir, extra: &str) -> PathBuf {
    let markers = dir.path().join("markers");
    let raw = format!(
        "{SAMPLE_CONFIG}\n[markers]\ndir = {:?}\n{extra}",
        markers.display().to_string()
    );
    let path = dir.path().join("forkswap.toml");
    std::fs::write(&path, raw).unwrap();
    path
}

/// Sources that never answer; only used where the clock is not polled
const DEAD_SOURCE: &str = "[progress]\nsources = [\"http://127.0.0.1:1\"]\n";

fn markers(dir: &TempDir) -> FileMarkerStore {
    FileMarkerStore::open(dir.path().join("markers")).unwrap()
}

async fn invoke(config: &Path, action: Action, shutdown: watch::Receiver<bool>) -> (anyhow::Result<Exit>, String) {
    let invocation = Invocation {
        config: config.to_path_buf(),
        log_format: LogFormat::Text,
        action,
    };
    let mut out = Vec::new();
    let result = run(invocation, shutdown, &mut out).await;
    (result, String::from_utf8(out).unwrap())
}

async fn invoke_once(config: &Path, action: Action) -> (anyhow::Result<Exit>, String) {
    let (_tx, rx) = watch::channel(false);
    invoke(config, action, rx).await
}

#[tokio::test]
async fn plan_lists_thresholds_in_registry_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "");
    let (result, out) = invoke_once(&config, Action::Plan { json: false }).await;
    assert_eq!(result.unwrap(), Exit::Success);

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 6);
    assert!(lines[0].starts_with('#'));
    for (line, id) in lines[1..].iter().zip(ALL_TARGETS) {
        assert!(line.contains(id), "{line}");
    }
    assert!(lines[1].contains("epoch >= 4"));
    assert!(lines[3].contains("slot >= 204 (224 - 20)"));
    assert!(lines[4].contains("slot >= 209 (224 - 15)"));
    assert!(lines[5].contains("after node2-cl"));
}

#[tokio::test]
async fn plan_json_has_trigger_slots() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "");
    let (result, out) = invoke_once(&config, Action::Plan { json: true }).await;
    assert_eq!(result.unwrap(), Exit::Success);

    let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 5);
    assert_eq!(rows[0]["activation"]["rule"], "epoch-threshold");
    assert_eq!(rows[1]["trigger_slot"], 160);
    assert_eq!(rows[3]["trigger_slot"], 209);
    assert_eq!(rows[4]["activation"]["target_id"], "node2-cl");
    assert!(rows[4]["trigger_slot"].is_null());
}

#[tokio::test]
async fn status_without_sources_reports_unknown_progress() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "");
    markers(&dir)
        .mark_complete(&target_id("node2-cl"), MarkerOutcome::Succeeded)
        .unwrap();

    let (result, out) = invoke_once(&config, Action::Status { json: true }).await;
    assert_eq!(result.unwrap(), Exit::Success);

    let report: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert!(report["progress"].is_null());
    let rows = report["rows"].as_array().unwrap();
    assert_eq!(rows[0]["state"], "pending");
    assert_eq!(rows[0]["eta"]["kind"], "unknown");
    assert_eq!(rows[3]["state"], "done");
    assert_eq!(rows[3]["outcome"]["status"], "succeeded");
    assert_eq!(rows[4]["eta"]["kind"], "due");
}

#[tokio::test]
async fn status_text_shows_failed_markers() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "");
    markers(&dir)
        .mark_complete(
            &target_id("node1-el"),
            MarkerOutcome::Failed {
                reason: "start refused".into(),
            },
        )
        .unwrap();

    let (result, out) = invoke_once(&config, Action::Status { json: false }).await;
    assert_eq!(result.unwrap(), Exit::Success);
    assert!(out.contains("progress: unavailable"));
    assert!(out.contains("complete: 1/5"));
    assert!(out.contains("FAILED (start refused)"));
}

#[tokio::test]
async fn reset_named_and_all() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "");
    let store = markers(&dir);
    for id in ["node1-el", "node2-el", "refresh"] {
        store.mark_complete(&target_id(id), MarkerOutcome::Succeeded).unwrap();
    }

    let (result, out) = invoke_once(
        &config,
        Action::Reset {
            targets: vec!["node1-el".into(), "node1-cl".into()],
            all: false,
        },
    )
    .await;
    assert_eq!(result.unwrap(), Exit::Success);
    assert_eq!(out, "node1-el: marker removed\nnode1-cl: no marker\n");
    assert!(!store.is_complete(&target_id("node1-el")).unwrap());

    let (result, out) = invoke_once(
        &config,
        Action::Reset {
            targets: Vec::new(),
            all: true,
        },
    )
    .await;
    assert_eq!(result.unwrap(), Exit::Success);
    assert_eq!(out, "removed 2 marker(s)\n");
}

#[tokio::test]
async fn reset_rejects_unknown_targets() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "");
    let (result, _) = invoke_once(
        &config,
        Action::Reset {
            targets: vec!["node9-el".into()],
            all: false,
        },
    )
    .await;
    assert!(result.unwrap_err().to_string().contains("node9-el"));
}

#[cfg(unix)]
#[tokio::test]
async fn manual_swap_marks_then_skips() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, DEAD_SOURCE);
    let action = || Action::Swap {
        targets: vec!["node1-el".into(), "refresh".into()],
    };

    let (result, out) = invoke_once(&config, action()).await;
    assert_eq!(result.unwrap(), Exit::Success);
    let lines: Vec<&str> = out.lines().collect();
    assert!(lines[0].starts_with("node1-el: swapped in "), "{out}");
    assert!(lines[1].starts_with("refresh: swapped in "), "{out}");
    assert!(markers(&dir).is_complete(&target_id("refresh")).unwrap());

    let (result, out) = invoke_once(&config, action()).await;
    assert_eq!(result.unwrap(), Exit::Success);
    assert_eq!(
        out,
        "node1-el: already complete, skipped\nrefresh: already complete, skipped\n"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn failed_manual_swap_is_an_error_without_marker() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("forkswap.toml");
    let raw = format!(
        r#"
[forks]
electra = 4

[progress]
sources = ["http://127.0.0.1:1"]

[markers]
dir = {:?}

[lifecycle.execution-layer]
stop = ["true"]
start = ["sh", "-c", "echo 'image not found' >&2; exit 4"]

[[target]]
id = "node1-el"
kind = "execution-layer"
version = "geth:v2"
schedule = "epoch"
epoch = "electra"
"#,
        dir.path().join("markers").display().to_string()
    );
    std::fs::write(&config, raw).unwrap();

    let (result, out) = invoke_once(
        &config,
        Action::Swap {
            targets: vec!["node1-el".into()],
        },
    )
    .await;
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("image not found"), "{message}");
    assert!(out.is_empty());
    assert!(!markers(&dir).is_complete(&target_id("node1-el")).unwrap());
}

#[tokio::test]
async fn missing_prerequisite_fails_before_any_target() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("forkswap.toml");
    let raw = format!(
        "prerequisites = [\"/nonexistent/forkswap/genesis.ssz\"]\n{SAMPLE_CONFIG}\n[markers]\ndir = {:?}\n{DEAD_SOURCE}",
        dir.path().join("markers").display().to_string()
    );
    std::fs::write(&config, raw).unwrap();

    let deployment = Deployment::load(&config).unwrap();
    let err = deployment.orchestrator().unwrap_err();
    assert!(format!("{err:#}").contains("genesis.ssz"), "{err:#}");
    assert!(!dir.path().join("markers").exists());
}

#[tokio::test]
async fn missing_sources_fail_daemon_setup() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "");
    let (result, _) = invoke_once(&config, Action::Daemon).await;
    assert!(format!("{:#}", result.unwrap_err()).contains("progress"));
}

#[tokio::test]
async fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (result, _) = invoke_once(&dir.path().join("absent.toml"), Action::Plan { json: false }).await;
    assert!(format!("{:#}", result.unwrap_err()).contains("absent.toml"));
}

#[tokio::test]
async fn daemon_interrupted_before_completion_exits_130() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, DEAD_SOURCE);
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let (result, _) = invoke(&config, Action::Daemon, rx).await;
    let exit = result.unwrap();
    assert_eq!(exit, Exit::Interrupted);
    assert_eq!(exit.code(), 130);
}

#[tokio::test]
async fn daemon_with_every_marker_present_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, DEAD_SOURCE);
    let store = markers(&dir);
    for id in ALL_TARGETS {
        store.mark_complete(&target_id(id), MarkerOutcome::Succeeded).unwrap();
    }

    let (result, _) = invoke_once(&config, Action::Daemon).await;
    assert_eq!(result.unwrap(), Exit::Success);
}

#[tokio::test]
async fn simulation_over_sample_config_passes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "");
    let (result, out) = invoke_once(
        &config,
        Action::Simulate {
            seed: 7,
            fail_rate: 0.0,
            start_slot: 120,
        },
    )
    .await;
    assert_eq!(result.unwrap(), Exit::Success);
    assert!(out.contains("Seed: 7"));
    assert!(out.contains("=== Result: PASS ==="), "{out}");
    for id in ALL_TARGETS {
        assert!(out.contains(id), "{id} missing from trigger log");
    }
}

#[tokio::test]
async fn deployment_exposes_planned_registry() {
    let dir = tempfile::tempdir().unwrap();
    let deployment = Deployment::load(&write_config(&dir, "")).unwrap();
    assert_eq!(deployment.registry().len(), 5);
    assert_eq!(deployment.config().forks["fulu"], 7);

    let mut out = Vec::new();
    assert_eq!(app::plan(&deployment, false, &mut out).unwrap(), Exit::Success);
    assert!(!out.is_empty());
}

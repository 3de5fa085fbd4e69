use forgeflow::config::{EngineConfig, TriggerConfig};
use forgeflow::runtime::{FailurePolicy, FlowEngine, HandlerRegistry, JoinPolicy};
use forgeflow::triggers::capture::{ClipboardContent, MemoryClipboard, MemoryHotkeyCapture};
use forgeflow::triggers::{StartupReport, TriggerManager};
use forgeflow::workflow::{Flow, FlowStore, MemoryFlowStore, WatchFilter};
use forgeflow::FlowError;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};

struct Harness {
    store: Arc<MemoryFlowStore>,
    engine: Arc<FlowEngine>,
}

impl Harness {
    fn new() -> Self {
        let engine = FlowEngine::new(
            Arc::new(HandlerRegistry::with_builtins()),
            EngineConfig {
                run_timeout_secs: 30,
                failure_policy: FailurePolicy::Continue,
                join_policy: JoinPolicy::All,
            },
        );
        Self {
            store: Arc::new(MemoryFlowStore::new()),
            engine: Arc::new(engine),
        }
    }

    fn manager(&self) -> TriggerManager {
        TriggerManager::new(self.store.clone(), Arc::clone(&self.engine), trigger_config())
    }

    async fn save(&self, id: &str, triggers: Vec<Value>) {
        let mut nodes = triggers;
        nodes.push(json!({ "id": "log", "data": { "category": "action", "nodeType": "log" } }));
        let flow: Flow = serde_json::from_value(json!({ "id": id, "name": id, "nodes": nodes })).unwrap();
        self.store.save(flow).await.unwrap();
    }

    async fn runs_of(&self, flow_id: &str) -> usize {
        self.engine
            .list()
            .await
            .iter()
            .filter(|execution| execution.flow_id == flow_id)
            .count()
    }

    async fn wait_for_runs(&self, flow_id: &str, at_least: usize) -> bool {
        for _ in 0..100 {
            if self.runs_of(flow_id).await >= at_least {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

fn trigger_config() -> TriggerConfig {
    TriggerConfig {
        webhook_host: "127.0.0.1".into(),
        webhook_port: 0,
        webhook_grace_secs: 1,
        clipboard_poll_ms: 10,
        shutdown_deadline_secs: 5,
    }
}

fn trigger_node(id: &str, node_type: &str, config: Value) -> Value {
    json!({ "id": id, "data": { "category": "trigger", "nodeType": node_type, "config": config } })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_webhook_dispatches_by_method_and_path() {
    let harness = Harness::new();
    harness.save("flow-1", vec![]).await;
    harness.save("flow-2", vec![]).await;
    let manager = harness.manager();

    assert!(manager.webhook_addr().await.is_none());
    manager.register_webhook("flow-1", "/hook1", "POST").await.unwrap();
    manager.register_webhook("flow-2", "/hook2", "post").await.unwrap();
    let addr = manager.webhook_addr().await.unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/hook1", addr))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Workflow triggered");
    assert_eq!(body["flowId"], "flow-1");

    assert!(harness.wait_for_runs("flow-1", 1).await);
    assert_eq!(harness.runs_of("flow-2").await, 0);

    // wrong method and unknown path are both 404
    let response = client.get(format!("http://{}/hook1", addr)).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let response = client.post(format!("http://{}/nope", addr)).send().await.unwrap();
    assert_eq!(response.status(), 404);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_webhook_for_missing_flow_is_500() {
    let harness = Harness::new();
    let manager = harness.manager();
    manager.register_webhook("flow-ghost", "/ghost", "POST").await.unwrap();
    let addr = manager.webhook_addr().await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://{}/ghost", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["flowId"], "flow-ghost");

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unregister_twice_is_not_found() {
    let harness = Harness::new();
    let manager = harness.manager();
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_str().unwrap().to_string();

    manager.register_schedule("f", "0 0 * * *").await.unwrap();
    manager.register_webhook("f", "/f", "POST").await.unwrap();
    manager.register_file_watch("f", &dir_path, WatchFilter::All).await.unwrap();
    manager.register_clipboard("f", true).await.unwrap();
    manager.register_hotkey("f", "Ctrl+Alt+F").await.unwrap();
    assert_eq!(manager.active_triggers().await.len(), 5);

    manager.unregister_schedule("f").await.unwrap();
    manager.unregister_webhook("f", "/f", "POST").await.unwrap();
    manager.unregister_file_watch("f", &dir_path).await.unwrap();
    manager.unregister_clipboard("f").await.unwrap();
    manager.unregister_hotkey("f").await.unwrap();
    assert!(manager.active_triggers().await.is_empty());

    assert!(manager.unregister_schedule("f").await.unwrap_err().is_not_found());
    assert!(manager.unregister_webhook("f", "/f", "POST").await.unwrap_err().is_not_found());
    assert!(manager.unregister_file_watch("f", &dir_path).await.unwrap_err().is_not_found());
    assert!(manager.unregister_clipboard("f").await.unwrap_err().is_not_found());
    assert!(manager.unregister_hotkey("f").await.unwrap_err().is_not_found());

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unregistered_triggers_stop_dispatching() {
    let harness = Harness::new();
    harness.save("kept", vec![]).await;
    harness.save("gone", vec![]).await;
    let manager = harness.manager();
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_str().unwrap().to_string();

    manager.register_webhook("kept", "/kept", "POST").await.unwrap();
    manager.register_webhook("gone", "/gone", "POST").await.unwrap();
    manager.register_file_watch("gone", &dir_path, WatchFilter::All).await.unwrap();
    let addr = manager.webhook_addr().await.unwrap();

    manager.unregister_webhook("gone", "/gone", "POST").await.unwrap();
    manager.unregister_file_watch("gone", &dir_path).await.unwrap();

    // the shared listener keeps serving the remaining route
    let client = reqwest::Client::new();
    let response = client.post(format!("http://{}/gone", addr)).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let response = client.post(format!("http://{}/kept", addr)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(manager.webhook_addr().await, Some(addr));

    std::fs::write(dir.path().join("ignored.txt"), "x").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.runs_of("gone").await, 0);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_webhook_unregister_checks_owner() {
    let harness = Harness::new();
    let manager = harness.manager();
    manager.register_webhook("owner", "/shared", "POST").await.unwrap();

    let err = manager.unregister_webhook("intruder", "/shared", "POST").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(manager.active_triggers().await.webhooks.len(), 1);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_schedule_round_trip_empties_the_table() {
    let harness = Harness::new();
    let manager = harness.manager();

    manager.register_schedule("nightly", "*/5 * * * *").await.unwrap();
    // registering again replaces rather than duplicates
    manager.register_schedule("nightly", "0 3 * * *").await.unwrap();
    let active = manager.active_triggers().await;
    assert_eq!(active.schedules.len(), 1);
    assert_eq!(active.schedules[0].cron, "0 3 * * *");

    manager.unregister_schedule("nightly").await.unwrap();
    assert!(manager.active_triggers().await.schedules.is_empty());

    let err = manager.register_schedule("nightly", "every tuesday").await.unwrap_err();
    assert!(matches!(err, FlowError::InvalidTrigger { kind: "schedule", .. }));
    assert!(manager.active_triggers().await.schedules.is_empty());

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_schedule_fires_the_flow() {
    let harness = Harness::new();
    harness.save("ticker", vec![]).await;
    let manager = harness.manager();

    manager.register_schedule("ticker", "* * * * * *").await.unwrap();
    assert!(harness.wait_for_runs("ticker", 1).await);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unregistered_schedule_stops_firing() {
    let harness = Harness::new();
    harness.save("ticker", vec![]).await;
    let manager = harness.manager();

    manager.register_schedule("ticker", "* * * * * *").await.unwrap();
    assert!(harness.wait_for_runs("ticker", 1).await);
    manager.unregister_schedule("ticker").await.unwrap();

    // let a tick that was already firing land before counting
    tokio::time::sleep(Duration::from_millis(200)).await;
    let fired = harness.runs_of("ticker").await;
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(harness.runs_of("ticker").await, fired);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_watch_fires_on_matching_events() {
    let harness = Harness::new();
    harness.save("inbox", vec![]).await;
    let manager = harness.manager();
    let dir = tempfile::tempdir().unwrap();

    manager
        .register_file_watch("inbox", dir.path().to_str().unwrap(), WatchFilter::Create)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(dir.path().join("report.csv"), "a,b\n").unwrap();

    assert!(harness.wait_for_runs("inbox", 1).await);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_watch_survives_a_failed_activation() {
    let harness = Harness::new();
    let manager = harness.manager();
    let dir = tempfile::tempdir().unwrap();

    // the flow does not exist yet, so the first event cannot start a run
    manager
        .register_file_watch("late", dir.path().to_str().unwrap(), WatchFilter::Create)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(dir.path().join("first.txt"), "1").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.runs_of("late").await, 0);
    assert_eq!(manager.active_triggers().await.file_watchers.len(), 1);

    harness.save("late", vec![]).await;
    std::fs::write(dir.path().join("second.txt"), "2").unwrap();
    assert!(harness.wait_for_runs("late", 1).await);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_watch_on_missing_path_leaves_nothing_registered() {
    let harness = Harness::new();
    let manager = harness.manager();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let err = manager
        .register_file_watch("inbox", missing.to_str().unwrap(), WatchFilter::All)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::ResourceAcquisition { .. }));
    assert!(manager.active_triggers().await.file_watchers.is_empty());

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clipboard_fires_on_change_after_baseline() {
    let harness = Harness::new();
    harness.save("clip", vec![]).await;
    harness.save("other", vec![]).await;
    let clipboard = Arc::new(MemoryClipboard::new());
    let manager = harness.manager().with_clipboard(clipboard.clone());

    clipboard.set_text("first").await;
    manager.register_clipboard("clip", true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.runs_of("clip").await, 0);

    clipboard.set_text("second").await;
    assert!(harness.wait_for_runs("clip", 1).await);

    // non-text content is ignored by a text-only monitor
    clipboard.set(ClipboardContent::Other("image/png".into())).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.runs_of("clip").await, 1);

    // a new registration replaces the global monitor
    manager.register_clipboard("other", false).await.unwrap();
    let active = manager.active_triggers().await;
    assert_eq!(active.clipboard.unwrap().flow_id, "other");
    assert!(manager.unregister_clipboard("clip").await.unwrap_err().is_not_found());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_hotkey_register_fire_and_release() {
    let harness = Harness::new();
    harness.save("keys", vec![]).await;
    let capture = Arc::new(MemoryHotkeyCapture::new());
    let manager = harness.manager().with_hotkey_capture(capture.clone());

    manager.register_hotkey("keys", "ctrl+shift+k").await.unwrap();
    assert_eq!(capture.registered().await, vec!["Ctrl+Shift+K".to_string()]);

    let run_id = manager.fire_hotkey("Shift+Control+K").await.unwrap();
    assert_eq!(harness.engine.get(&run_id).await.unwrap().flow_id, "keys");

    assert!(manager.fire_hotkey("Ctrl+J").await.unwrap_err().is_not_found());
    assert!(matches!(
        manager.register_hotkey("keys", "Ctrl+").await,
        Err(FlowError::InvalidTrigger { .. })
    ));

    // a new combination for the same flow releases the old one
    manager.register_hotkey("keys", "Alt+Space").await.unwrap();
    assert_eq!(capture.registered().await, vec!["Alt+Space".to_string()]);

    manager.unregister_hotkey("keys").await.unwrap();
    assert!(capture.registered().await.is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_hotkey_capture_failure_is_resource_acquisition() {
    let harness = Harness::new();
    let capture = Arc::new(MemoryHotkeyCapture::new());
    capture.mark_taken("Alt+F4".parse().unwrap()).await;
    let manager = harness.manager().with_hotkey_capture(capture.clone());

    let err = manager.register_hotkey("closer", "alt+f4").await.unwrap_err();
    assert!(matches!(err, FlowError::ResourceAcquisition { .. }));
    assert!(manager.active_triggers().await.hotkeys.is_empty());

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_all_triggers_registers_enabled_nodes() {
    let harness = Harness::new();
    harness
        .save(
            "flow-a",
            vec![
                trigger_node("wh", "trigger_webhook", json!({ "path": "/a" })),
                trigger_node("cron", "trigger_schedule", json!({ "cron": "0 9 * * 1-5" })),
            ],
        )
        .await;
    harness
        .save(
            "flow-b",
            vec![
                trigger_node("off", "trigger_schedule", json!({ "cron": "0 * * * *", "enabled": false })),
                trigger_node("manual", "trigger_manual", json!({})),
            ],
        )
        .await;
    harness
        .save(
            "flow-c",
            vec![trigger_node("bad", "trigger_schedule", json!({ "cron": "every day" }))],
        )
        .await;
    let manager = harness.manager();

    let report = manager.start_all_triggers().await.unwrap();
    assert_eq!(
        report,
        StartupReport {
            flows: 3,
            registered: 2,
            skipped: 2,
            failed: 1
        }
    );

    let active = manager.active_triggers().await;
    assert_eq!(active.len(), 2);
    assert_eq!(active.webhooks[0].flow_id, "flow-a");
    assert_eq!(active.webhooks[0].method, "POST");
    assert_eq!(active.schedules[0].flow_id, "flow-a");

    let json = serde_json::to_value(&active).unwrap();
    assert_eq!(json["webhooks"][0]["path"], "/a");
    assert!(json["clipboard"].is_null());

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flow_triggers_register_and_release_together() {
    let harness = Harness::new();
    let manager = harness.manager();
    let flow: Flow = serde_json::from_value(json!({
        "id": "editor",
        "nodes": [
            trigger_node("wh", "trigger_webhook", json!({ "path": "/editor", "method": "PUT" })),
            trigger_node("key", "trigger_hotkey", json!({ "hotkey": "Meta+E" })),
            { "id": "log", "data": { "category": "action", "nodeType": "log" } }
        ]
    }))
    .unwrap();

    let report = manager.register_flow_triggers(&flow).await;
    assert_eq!(report.registered, 2);
    assert_eq!(manager.active_triggers().await.len(), 2);

    assert_eq!(manager.unregister_flow_triggers(&flow).await, 2);
    assert!(manager.active_triggers().await.is_empty());
    assert_eq!(manager.unregister_flow_triggers(&flow).await, 0);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_releases_everything_and_is_idempotent() {
    let harness = Harness::new();
    let manager = harness.manager();
    let dir = tempfile::tempdir().unwrap();

    manager.register_webhook("f", "/f", "POST").await.unwrap();
    manager.register_schedule("f", "0 0 * * *").await.unwrap();
    manager
        .register_file_watch("f", dir.path().to_str().unwrap(), WatchFilter::All)
        .await
        .unwrap();
    manager.register_clipboard("f", true).await.unwrap();
    let addr = manager.webhook_addr().await.unwrap();

    manager.shutdown().await;
    assert!(manager.is_shut_down());
    assert!(manager.active_triggers().await.is_empty());
    assert!(manager.webhook_addr().await.is_none());
    assert!(reqwest::get(format!("http://{}/f", addr)).await.is_err());

    let err = manager.register_webhook("f", "/f", "POST").await.unwrap_err();
    assert!(matches!(err, FlowError::ResourceAcquisition { .. }));
    let err = manager.register_schedule("f", "0 0 * * *").await.unwrap_err();
    assert!(matches!(err, FlowError::ResourceAcquisition { .. }));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_without_any_registration() {
    let harness = Harness::new();
    let manager = harness.manager();
    manager.shutdown().await;
    assert!(manager.active_triggers().await.is_empty());
}

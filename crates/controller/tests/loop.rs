#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use stagehand_controller::{spawn_controller, ControllerConfig};
use stagehand_core::{load_stages, Delta, DeltaKind, ResourceKind};
use stagehand_lifecycle::{Action, Event, Lifecycle, Resource, ResourcePatch, Sink, SinkError, SinkFactory};

type Log = Arc<Mutex<Vec<(String, Action)>>>;

/// Records every call with the object name.
struct LogSink {
    name: String,
    log: Log,
}

#[async_trait::async_trait]
impl Sink for LogSink {
    async fn send_event(&self, event: &Event) -> Result<(), SinkError> {
        self.log.lock().unwrap().push((self.name.clone(), Action::Event(event.clone())));
        Ok(())
    }

    async fn delete_resource(&self) -> Result<(), SinkError> {
        self.log.lock().unwrap().push((self.name.clone(), Action::Delete));
        Ok(())
    }

    async fn patch_resource(&self, patch: &ResourcePatch) -> Result<(), SinkError> {
        self.log.lock().unwrap().push((self.name.clone(), Action::Patch(patch.clone())));
        Ok(())
    }
}

struct LogFactory(Log);

impl SinkFactory for LogFactory {
    fn sink_for(&self, resource: &Resource) -> Box<dyn Sink> {
        Box::new(LogSink { name: resource.name().to_string(), log: self.0.clone() })
    }
}

fn uid(n: u8) -> [u8; 16] { let mut u = [0u8; 16]; u[0] = n; u }

fn pod(name: &str, status: serde_json::Value) -> serde_json::Value {
    json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": name, "namespace": "default", "labels": {"env": "test"}}, "status": status})
}

fn lifecycle(yaml: &str) -> Lifecycle { Lifecycle::new(&load_stages(yaml).unwrap()).unwrap() }

const CHAIN: &str = r#"
- name: pod-pending
  selector:
    matchExpressions:
      - {key: .status.phase, operator: DoesNotExist}
  next:
    statusTemplate: "phase: Pending"
  immediateNextStage: true
- name: pod-running
  selector:
    matchExpressions:
      - {key: .status.phase, operator: In, values: [Pending]}
  next:
    statusTemplate: "phase: Running"
  immediateNextStage: true
"#;

fn phases(log: &Log) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|(_, a)| match a {
            Action::Patch(p) => p.data["status"]["phase"].as_str().map(str::to_string),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn immediate_stages_chain() {
    let log = Log::default();
    let (tx, _handle) =
        spawn_controller(ResourceKind::Pod, lifecycle(CHAIN), Arc::new(LogFactory(log.clone())), ControllerConfig::default());
    tx.send(Delta::new(uid(1), DeltaKind::Applied, pod("web-0", json!({})))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // the second stage's output matches nothing, so the chain ends there
    assert_eq!(phases(&log), vec!["Pending", "Running"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chain_respects_limit() {
    let log = Log::default();
    let config = ControllerConfig { max_immediate: 0, ..ControllerConfig::default() };
    let (tx, _handle) = spawn_controller(ResourceKind::Pod, lifecycle(CHAIN), Arc::new(LogFactory(log.clone())), config);
    tx.send(Delta::new(uid(1), DeltaKind::Applied, pod("web-0", json!({})))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(phases(&log), vec!["Pending"]);
}

const DELAYED: &str = r#"
- name: slow-delete
  selector: {matchLabels: {env: test}}
  delay: {durationMilliseconds: 150}
  next: {delete: true}
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleted_cancels_pending_delay() {
    let log = Log::default();
    let (tx, _handle) =
        spawn_controller(ResourceKind::Pod, lifecycle(DELAYED), Arc::new(LogFactory(log.clone())), ControllerConfig::default());
    tx.send(Delta::new(uid(1), DeltaKind::Applied, pod("a", json!({})))).await.unwrap();
    tx.send(Delta::new(uid(2), DeltaKind::Applied, pod("b", json!({})))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    tx.send(Delta::new(uid(1), DeltaKind::Deleted, pod("a", json!({})))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let names: Vec<String> = log.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(names, vec!["b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn newer_delta_supersedes() {
    let log = Log::default();
    let (tx, _handle) =
        spawn_controller(ResourceKind::Pod, lifecycle(DELAYED), Arc::new(LogFactory(log.clone())), ControllerConfig::default());
    tx.send(Delta::new(uid(1), DeltaKind::Applied, pod("a", json!({})))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    tx.send(Delta::new(uid(1), DeltaKind::Applied, pod("a", json!({"phase": "Pending"})))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reload_swaps_stages() {
    let log = Log::default();
    let (tx, handle) =
        spawn_controller(ResourceKind::Pod, Lifecycle::default(), Arc::new(LogFactory(log.clone())), ControllerConfig::default());
    tx.send(Delta::new(uid(1), DeltaKind::Applied, pod("a", json!({})))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(log.lock().unwrap().is_empty());

    handle.reload(lifecycle(CHAIN));
    assert_eq!(handle.current().len(), 2);
    tx.send(Delta::new(uid(1), DeltaKind::Applied, pod("a", json!({})))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(phases(&log), vec!["Pending", "Running"]);
}

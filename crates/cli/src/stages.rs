use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use stagehand_core::{load_stages, ConfigError, StageConfig};
use stagehand_lifecycle::Lifecycle;

const POD_FAST: &str = include_str!("../stages/pod-fast.yaml");
const NODE_FAST: &str = include_str!("../stages/node-fast.yaml");

/// Stages shipped with the binary for pods and nodes.
pub fn builtin() -> Result<Vec<StageConfig>, ConfigError> {
    let mut stages = load_stages(POD_FAST)?;
    stages.extend(load_stages(NODE_FAST)?);
    Ok(stages)
}

pub fn read_file(path: &Path) -> Result<Vec<StageConfig>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    load_stages(&text).with_context(|| format!("loading {}", path.display()))
}

/// Read every file (plus the builtin set when asked). Stage names must be
/// unique across all sources.
pub fn read_all(paths: &[PathBuf], with_builtin: bool) -> Result<Vec<StageConfig>> {
    let mut out: Vec<(String, StageConfig)> = Vec::new();
    if with_builtin {
        out.extend(builtin().context("loading builtin stages")?.into_iter().map(|s| ("<builtin>".to_string(), s)));
    }
    for path in paths {
        let origin = path.display().to_string();
        out.extend(read_file(path)?.into_iter().map(|s| (origin.clone(), s)));
    }
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for (origin, stage) in &out {
        if let Some(first) = seen.insert(stage.name.as_str(), origin.as_str()) {
            bail!("duplicate stage name {:?} in {} (first defined in {})", stage.name, origin, first);
        }
    }
    Ok(out.into_iter().map(|(_, s)| s).collect())
}

pub fn build(paths: &[PathBuf], with_builtin: bool) -> Result<Lifecycle> {
    let configs = read_all(paths, with_builtin)?;
    Ok(Lifecycle::new(&configs)?)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use stagehand_core::config::PatchType;
    use stagehand_core::ResourceKind;
    use stagehand_lifecycle::{execute, Outcome, RecordingSink, Resource};

    use super::*;

    fn scheduled_pod() -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-0", "namespace": "default"},
            "spec": {"nodeName": "n0", "containers": [{"name": "app", "image": "nginx"}, {"name": "side", "image": "envoy"}]},
            "status": {"phase": "Pending"}
        })
    }

    #[test]
    fn builtin_stages_build() {
        let configs = builtin().unwrap();
        let lifecycle = Lifecycle::new(&configs).unwrap();
        assert_eq!(lifecycle.len(), configs.len());
        assert_eq!(lifecycle.for_kind("", "Pod").len(), 3);
        assert_eq!(lifecycle.for_kind("", "Node").len(), 2);
    }

    #[tokio::test]
    async fn builtin_pod_ready_renders_container_statuses() {
        let lifecycle = Lifecycle::new(&builtin().unwrap()).unwrap().for_kind("", "Pod");
        let seen = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let resource = Resource::from_document(ResourceKind::Pod, scheduled_pod()).observed_at(seen);
        let names: Vec<_> = lifecycle.matches(&resource).iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, ["pod-ready"]);

        let stage = lifecycle.get("pod-ready").unwrap();
        let sink = RecordingSink::new();
        assert_eq!(execute(stage, &resource, &sink).await.unwrap(), Outcome::Completed);
        let patches = sink.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].wire_type, PatchType::Strategic);
        assert_eq!(patches[0].subresource.as_deref(), Some("status"));
        let status = &patches[0].data["status"];
        assert_eq!(status["phase"], "Running");
        assert_eq!(status["containerStatuses"][1]["name"], "side");
        assert_eq!(status["containerStatuses"][0]["state"]["running"]["startedAt"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn builtin_pod_complete_only_for_job_pods() {
        let lifecycle = Lifecycle::new(&builtin().unwrap()).unwrap().for_kind("", "Pod");
        let mut doc = scheduled_pod();
        doc["status"] = json!({"phase": "Running", "podIP": "10.0.0.2"});
        let plain = Resource::from_document(ResourceKind::Pod, doc.clone());
        assert!(lifecycle.matches(&plain).is_empty());

        doc["metadata"]["ownerReferences"] = json!([{"kind": "Job", "name": "batch"}]);
        let owned = Resource::from_document(ResourceKind::Pod, doc);
        let names: Vec<_> = lifecycle.matches(&owned).iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, ["pod-complete"]);
    }

    #[test]
    fn builtin_node_stages() {
        let lifecycle = Lifecycle::new(&builtin().unwrap()).unwrap().for_kind("", "Node");
        let fresh = Resource::from_document(ResourceKind::Node, json!({"metadata": {"name": "n0"}}));
        let names: Vec<_> = lifecycle.matches(&fresh).iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, ["node-initialize"]);

        let ready = Resource::from_document(
            ResourceKind::Node,
            json!({"metadata": {"name": "n0"}, "status": {"conditions": [{"type": "Ready", "status": "True"}]}}),
        );
        assert!(lifecycle.matches(&ready).is_empty());

        let leaving = Resource::from_document(
            ResourceKind::Node,
            json!({"metadata": {"name": "n0", "deletionTimestamp": "2024-05-01T12:00:00Z"}, "status": {"conditions": [{"type": "Ready", "status": "True"}]}}),
        );
        let names: Vec<_> = lifecycle.matches(&leaving).iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, ["node-delete"]);
    }

    #[test]
    fn duplicate_names_across_files_rejected() {
        let dir = std::env::temp_dir().join(format!("stagehandctl-dup-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let a = dir.join("a.yaml");
        let b = dir.join("b.yaml");
        std::fs::write(&a, "name: shared\nselector:\n  matchLabels: {app: a}\n").unwrap();
        std::fs::write(&b, "name: shared\nselector:\n  matchLabels: {app: b}\n").unwrap();

        let err = read_all(&[a.clone(), b.clone()], false).unwrap_err().to_string();
        assert!(err.contains("duplicate stage name \"shared\""), "{}", err);
        assert_eq!(read_all(&[a], false).unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn user_stage_may_not_shadow_builtin() {
        let dir = std::env::temp_dir().join(format!("stagehandctl-shadow-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("stages.yaml");
        std::fs::write(&file, "name: pod-delete\nselector:\n  matchLabels: {app: a}\n").unwrap();
        assert!(read_all(&[file], true).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}

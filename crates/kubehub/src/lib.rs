//! Stagehand kubehub: discovery, list+watch into deltas, and a kube-rs sink.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client,
};
use stagehand_core::{Delta, DeltaKind, ResourceKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

mod sink;

pub use sink::{KubeSink, KubeSinkFactory};

/// A resolved watch target.
#[derive(Debug, Clone)]
pub struct Target {
    pub gvk: GroupVersionKind,
    pub api_resource: ApiResource,
    pub namespaced: bool,
}

impl Target {
    pub fn kind(&self) -> ResourceKind { ResourceKind::from_kind(&self.gvk.kind) }

    /// Api for the namespace, or cluster-wide when unset or cluster scoped.
    pub fn api(&self, client: Client, namespace: Option<&str>) -> Api<DynamicObject> {
        match (self.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(client, ns, &self.api_resource),
            _ => Api::all_with(client, &self.api_resource),
        }
    }
}

/// `v1/Pod` or `group/v1/Kind`.
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk(group, version, kind)),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// Find the served resource for a gvk key.
pub async fn resolve(client: Client, gvk_key: &str) -> Result<Target> {
    let gvk = parse_gvk_key(gvk_key)?;
    let discovery = Discovery::new(client).run().await.context("running discovery")?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok(Target { gvk, api_resource: ar, namespaced });
            }
        }
    }
    Err(anyhow!("GVK not found: {}", gvk_key))
}

fn to_uid(uid_str: &str) -> Result<stagehand_core::Uid> {
    let u = Uuid::parse_str(uid_str).context("parsing metadata.uid as uuid")?;
    Ok(*u.as_bytes())
}

fn delta_from(obj: &DynamicObject, kind: DeltaKind) -> Result<Delta> {
    let uid_str = obj.metadata.uid.as_deref().ok_or_else(|| anyhow!("object missing metadata.uid"))?;
    let uid = to_uid(uid_str)?;
    let raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    Ok(Delta::new(uid, kind, raw))
}

/// List+watch the target and forward deltas until the receiver goes away.
/// Watch errors are logged and retried with backoff.
pub async fn start_watcher(client: Client, target: &Target, namespace: Option<&str>, delta_tx: mpsc::Sender<Delta>) -> Result<()> {
    let api = target.api(client, namespace);
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    info!(gvk = ?target.gvk, ns = ?namespace, "watcher started");
    while let Some(ev) = stream.next().await {
        let deltas = match ev {
            Ok(Event::Applied(o)) => vec![(o, DeltaKind::Applied)],
            Ok(Event::Deleted(o)) => vec![(o, DeltaKind::Deleted)],
            Ok(Event::Restarted(list)) => {
                debug!(count = list.len(), "watch restart");
                list.into_iter().map(|o| (o, DeltaKind::Applied)).collect()
            }
            Err(e) => {
                warn!(error = %e, "watch error");
                continue;
            }
        };
        for (obj, kind) in deltas {
            let d = match delta_from(&obj, kind) {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, name = ?obj.metadata.name, "skipping object");
                    continue;
                }
            };
            if delta_tx.send(d).await.is_err() {
                info!("delta receiver closed; stopping watcher");
                return Ok(());
            }
        }
    }
    warn!("watcher stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvk_keys() {
        let core = parse_gvk_key("v1/Pod").unwrap();
        assert_eq!((core.group.as_str(), core.version.as_str(), core.kind.as_str()), ("", "v1", "Pod"));
        let crd = parse_gvk_key("example.com/v1alpha1/Widget").unwrap();
        assert_eq!(crd.group, "example.com");
        assert!(parse_gvk_key("Pod").is_err());
        assert!(parse_gvk_key("a/b/c/d").is_err());
        assert!(parse_gvk_key("v1/").is_err());
    }

    #[test]
    fn deltas_carry_uuid_bytes() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p", "uid": "8c1f6a4e-0b1c-4a55-9d3e-5b7f0e8d2a11", "managedFields": [{"manager": "kubelet"}]}
        }))
        .unwrap();
        let d = delta_from(&obj, DeltaKind::Applied).unwrap();
        assert_eq!(d.uid[0], 0x8c);
        assert!(d.raw["metadata"].get("managedFields").is_none());
        let mut bad = obj.clone();
        bad.metadata.uid = Some("not-a-uuid".into());
        assert!(delta_from(&bad, DeltaKind::Applied).is_err());
    }
}

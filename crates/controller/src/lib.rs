//! Stagehand controller: turns watch deltas into stage executions.
//!
//! Deltas are coalesced per uid; each resource has at most one pending
//! action. A newer delta supersedes the pending delay, `Deleted` only
//! cancels. The lifecycle lives behind an `ArcSwap` and can be reloaded
//! while running.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use metrics::counter;
use rustc_hash::FxHashMap;
use stagehand_core::{Delta, DeltaKind, ResourceKind, Uid};
use stagehand_lifecycle::{Lifecycle, SinkFactory};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

mod drive;

pub use drive::apply_local;

/// Runtime knobs. `from_env` reads `STAGEHAND_QUEUE_CAP` and
/// `STAGEHAND_MAX_IMMEDIATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub queue_cap: usize,
    /// Immediate-next stages chained per notification.
    pub max_immediate: usize,
    pub tick: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self { Self { queue_cap: 2048, max_immediate: 16, tick: Duration::from_millis(8) } }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let num = |key: &str, default: usize| std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default);
        Self {
            queue_cap: num("STAGEHAND_QUEUE_CAP", d.queue_cap).max(1),
            max_immediate: num("STAGEHAND_MAX_IMMEDIATE", d.max_immediate),
            tick: d.tick,
        }
    }
}

/// Latest delta per uid in arrival order, bounded. When full, the oldest
/// `Applied` uid is dropped; `Deleted` deltas are never dropped so pending
/// actions always get cancelled.
pub struct Coalescer {
    map: FxHashMap<Uid, Delta>,
    order: VecDeque<Uid>,
    cap: usize,
    dropped: u64,
}

impl Coalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap, dropped: 0 }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn dropped(&self) -> u64 { self.dropped }

    pub fn push(&mut self, d: Delta) {
        let uid = d.uid;
        if !self.map.contains_key(&uid) {
            if self.order.len() >= self.cap {
                let victim = self.order.iter().position(|u| self.map.get(u).is_some_and(|q| q.kind == DeltaKind::Applied));
                match victim {
                    Some(i) => {
                        if let Some(old) = self.order.remove(i) {
                            self.map.remove(&old);
                        }
                    }
                    // queue holds only deletions; an update waits for the next event
                    None if d.kind == DeltaKind::Applied => {
                        self.record_drop();
                        return;
                    }
                    None => {}
                }
                if victim.is_some() {
                    self.record_drop();
                }
            }
            self.order.push_back(uid);
        }
        self.map.insert(uid, d);
    }

    fn record_drop(&mut self) {
        self.dropped += 1;
        counter!("controller_queue_dropped", 1u64);
    }

    pub fn drain_ready(&mut self) -> Vec<Delta> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(uid) = self.order.pop_front() {
            if let Some(d) = self.map.remove(&uid) {
                out.push(d);
            }
        }
        out
    }
}

/// Reader/reload side of a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    lifecycle: Arc<ArcSwap<Lifecycle>>,
}

impl ControllerHandle {
    pub fn current(&self) -> Arc<Lifecycle> { self.lifecycle.load_full() }

    /// Swap the stage set. Pending delays keep the stage they picked.
    pub fn reload(&self, lifecycle: Lifecycle) {
        info!(stages = lifecycle.len(), "lifecycle reloaded");
        self.lifecycle.store(Arc::new(lifecycle));
    }
}

struct Pending {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub(crate) struct Shared {
    pub(crate) kind: ResourceKind,
    pub(crate) lifecycle: Arc<ArcSwap<Lifecycle>>,
    pub(crate) factory: Arc<dyn SinkFactory>,
    pub(crate) max_immediate: usize,
}

/// Spawn the controller loop for one resource kind. Returns the delta sender
/// (bounded by `queue_cap`) and a handle. The loop exits once every sender
/// is dropped; pending delays are cancelled then.
pub fn spawn_controller(
    kind: ResourceKind,
    lifecycle: Lifecycle,
    factory: Arc<dyn SinkFactory>,
    config: ControllerConfig,
) -> (mpsc::Sender<Delta>, ControllerHandle) {
    let (tx, mut rx) = mpsc::channel::<Delta>(config.queue_cap.max(1));
    let lifecycle = Arc::new(ArcSwap::from_pointee(lifecycle));
    let shared = Arc::new(Shared { kind, lifecycle: Arc::clone(&lifecycle), factory, max_immediate: config.max_immediate });

    tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(config.queue_cap);
        let mut pending: FxHashMap<Uid, Pending> = FxHashMap::default();
        let mut ticker = tokio::time::interval(config.tick);
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(d) => coalescer.push(d),
                        None => {
                            debug!("delta channel closed; stopping controller loop");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    for d in coalescer.drain_ready() {
                        dispatch(&shared, &mut pending, d);
                    }
                    pending.retain(|_, p| !p.task.is_finished());
                }
            }
        }
        for (_, p) in pending.drain() {
            let _ = p.cancel.send(());
        }
        info!(dropped = coalescer.dropped(), "controller loop stopped");
    });

    (tx, ControllerHandle { lifecycle })
}

fn dispatch(shared: &Arc<Shared>, pending: &mut FxHashMap<Uid, Pending>, d: Delta) {
    let prev = pending.remove(&d.uid).map(|p| {
        let _ = p.cancel.send(());
        p.task
    });
    match d.kind {
        DeltaKind::Deleted => debug!(resource = %d.display_name(), "deleted; pending action cancelled"),
        DeltaKind::Applied => {
            let (cancel, cancelled) = oneshot::channel();
            let task = tokio::spawn(drive::drive(Arc::clone(shared), d.raw, cancelled, prev));
            pending.insert(d.uid, Pending { cancel, task });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(n: u8, kind: DeltaKind, rev: u64) -> Delta {
        let mut uid = [0u8; 16];
        uid[0] = n;
        Delta::new(uid, kind, json!({"metadata": {"name": format!("p{}", n), "resourceVersion": rev.to_string()}}))
    }

    #[test]
    fn latest_delta_wins() {
        let mut c = Coalescer::with_capacity(8);
        c.push(delta(1, DeltaKind::Applied, 1));
        c.push(delta(2, DeltaKind::Applied, 1));
        c.push(delta(1, DeltaKind::Deleted, 2));
        let out = c.drain_ready();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].uid[0], 1);
        assert_eq!(out[0].kind, DeltaKind::Deleted);
        assert!(c.is_empty());
    }

    #[test]
    fn capacity_drops_oldest() {
        let mut c = Coalescer::with_capacity(2);
        for n in 1..=3 {
            c.push(delta(n, DeltaKind::Applied, 1));
        }
        assert_eq!(c.dropped(), 1);
        assert_eq!(c.drain_ready().iter().map(|d| d.uid[0]).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn capacity_keeps_deletions() {
        let mut c = Coalescer::with_capacity(2);
        c.push(delta(1, DeltaKind::Deleted, 2));
        c.push(delta(2, DeltaKind::Applied, 1));
        c.push(delta(3, DeltaKind::Applied, 1));
        assert_eq!(c.dropped(), 1);
        let out = c.drain_ready();
        assert_eq!(out.iter().map(|d| (d.uid[0], d.kind)).collect::<Vec<_>>(), vec![(1, DeltaKind::Deleted), (3, DeltaKind::Applied)]);

        c.push(delta(4, DeltaKind::Deleted, 2));
        c.push(delta(5, DeltaKind::Deleted, 2));
        c.push(delta(6, DeltaKind::Applied, 1));
        c.push(delta(7, DeltaKind::Deleted, 2));
        assert_eq!(c.dropped(), 2);
        assert_eq!(c.drain_ready().iter().map(|d| d.uid[0]).collect::<Vec<_>>(), vec![4, 5, 7]);
    }

    #[test]
    fn config_defaults() {
        let d = ControllerConfig::default();
        assert_eq!((d.queue_cap, d.max_immediate), (2048, 16));
    }
}

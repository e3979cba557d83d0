use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use stagehand_core::config::PatchType;
use stagehand_lifecycle::{execute, EvalError, Event, Lifecycle, Outcome, Resource, ResourcePatch, Sink, SinkError, Stage};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Shared;

/// Forwards to the real sink and keeps the patches for local replay.
struct Tee {
    inner: Box<dyn Sink>,
    patches: Mutex<Vec<ResourcePatch>>,
}

impl Tee {
    fn new(inner: Box<dyn Sink>) -> Self { Self { inner, patches: Mutex::default() } }

    fn patches(&self) -> Vec<ResourcePatch> { self.patches.lock().unwrap_or_else(PoisonError::into_inner).clone() }
}

#[async_trait::async_trait]
impl Sink for Tee {
    async fn send_event(&self, event: &Event) -> Result<(), SinkError> { self.inner.send_event(event).await }

    async fn delete_resource(&self) -> Result<(), SinkError> { self.inner.delete_resource().await }

    async fn patch_resource(&self, patch: &ResourcePatch) -> Result<(), SinkError> {
        self.inner.patch_resource(patch).await?;
        self.patches.lock().unwrap_or_else(PoisonError::into_inner).push(patch.clone());
        Ok(())
    }
}

/// Apply emitted patches to a local copy of the object. Merge and
/// strategic patches use merge semantics; `None` when a JSON Patch does not
/// apply.
pub fn apply_local(mut doc: Value, patches: &[ResourcePatch]) -> Option<Value> {
    for p in patches {
        match p.wire_type {
            PatchType::Merge | PatchType::Strategic => json_patch::merge(&mut doc, &p.data),
            PatchType::Json => {
                let ops: json_patch::Patch = serde_json::from_value(p.data.clone()).ok()?;
                json_patch::patch(&mut doc, &ops).ok()?;
            }
        }
    }
    Some(doc)
}

fn decide<R: Rng + ?Sized>(
    lifecycle: &Lifecycle,
    resource: &Resource,
    rng: &mut R,
) -> Result<Option<(Arc<Stage>, Duration)>, EvalError> {
    let Some(stage) = lifecycle.pick(resource, rng)? else { return Ok(None) };
    let delay = stage.delay(resource, resource.now(), rng)?.unwrap_or_default();
    Ok(Some((Arc::clone(stage), delay)))
}

/// One resource notification: pick, wait, execute, and chain immediate
/// stages. Waits for the previous task of the same uid first.
pub(crate) async fn drive(
    shared: Arc<Shared>,
    mut body: Value,
    mut cancelled: oneshot::Receiver<()>,
    prev: Option<JoinHandle<()>>,
) {
    if let Some(prev) = prev {
        let _ = prev.await;
    }
    for round in 0..=shared.max_immediate {
        if !matches!(cancelled.try_recv(), Err(TryRecvError::Empty)) {
            return;
        }
        let resource = Resource::from_document(shared.kind.clone(), body);
        let lifecycle = shared.lifecycle.load_full();
        let decided = {
            let mut rng = rand::thread_rng();
            decide(&lifecycle, &resource, &mut rng)
        };
        let (stage, delay) = match decided {
            Ok(Some(picked)) => picked,
            Ok(None) => {
                debug!(resource = %resource.display_name(), "no stage matched");
                return;
            }
            Err(e) => {
                warn!(resource = %resource.display_name(), error = %e, "stage evaluation failed");
                return;
            }
        };
        debug!(resource = %resource.display_name(), stage = %stage.name(), ?delay, round, "stage scheduled");
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut cancelled => {
                    debug!(resource = %resource.display_name(), stage = %stage.name(), "superseded before firing");
                    return;
                }
            }
        }
        let sink = Tee::new(shared.factory.sink_for(&resource));
        match execute(&stage, &resource, &sink).await {
            Ok(Outcome::Completed) if stage.immediate_next_stage() => match apply_local(resource.body().clone(), &sink.patches()) {
                Some(next) => body = next,
                None => {
                    debug!(resource = %resource.display_name(), stage = %stage.name(), "patches do not apply locally; chain stopped");
                    return;
                }
            },
            Ok(_) => return,
            Err(failure) => {
                warn!(resource = %resource.display_name(), stage = %stage.name(), step = failure.index, error = %failure.error, "stage failed");
                return;
            }
        }
    }
    debug!(max = shared.max_immediate, "immediate stage chain limit reached");
}

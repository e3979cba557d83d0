//! Runs a picked stage's steps against a side-effect sink.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use stagehand_core::config::PatchType;
use tracing::{debug, warn};

use crate::error::{ExecError, SinkError, StepFailure};
use crate::patch::{infer, wrap, ResourcePatch};
use crate::resource::Resource;
use crate::stage::{NextStep, Stage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub type_: String,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Deleted,
}

/// Side effects for one resource. Implementations own retries and timeouts.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn send_event(&self, event: &Event) -> Result<(), SinkError>;
    async fn delete_resource(&self) -> Result<(), SinkError>;
    async fn patch_resource(&self, patch: &ResourcePatch) -> Result<(), SinkError>;
}

/// Creates the sink for one resource.
pub trait SinkFactory: Send + Sync + 'static {
    fn sink_for(&self, resource: &Resource) -> Box<dyn Sink>;
}

/// Walk the steps in order. Events are sent even after a delete; finalizer
/// edits, deletes and patches are not. Stops at the first failing step.
pub async fn execute<S: Sink + ?Sized>(stage: &Stage, resource: &Resource, sink: &S) -> Result<Outcome, StepFailure> {
    let started = Instant::now();
    let mut finalizers = resource.finalizers();
    let mut deleted = false;
    for (index, step) in stage.next().iter().enumerate() {
        if let Err(error) = run_step(stage, resource, step, sink, &mut finalizers, &mut deleted).await {
            counter!("stage_step_failed_total", 1u64, "stage" => stage.name().to_string());
            warn!(stage = %stage.name(), resource = %resource.display_name(), step = index, error = %error, "stage step failed");
            return Err(StepFailure { index, error });
        }
    }
    histogram!("stage_exec_ms", started.elapsed().as_secs_f64() * 1000.0);
    let outcome = if deleted { Outcome::Deleted } else { Outcome::Completed };
    debug!(stage = %stage.name(), resource = %resource.display_name(), ?outcome, "stage executed");
    Ok(outcome)
}

async fn run_step<S: Sink + ?Sized>(
    stage: &Stage,
    resource: &Resource,
    step: &NextStep,
    sink: &S,
    finalizers: &mut Vec<String>,
    deleted: &mut bool,
) -> Result<(), ExecError> {
    if let Some(event) = &step.event {
        let message = stage.templates().render_text(&event.message, resource.body(), resource.now())?;
        sink.send_event(&Event { type_: event.type_.clone(), reason: event.reason.clone(), message }).await?;
    }
    if *deleted {
        return Ok(());
    }
    if let Some(edit) = &step.finalizers {
        let plan = edit.plan(finalizers);
        if !plan.is_noop() {
            sink.patch_resource(&ResourcePatch::new(serde_json::Value::Array(plan.ops), PatchType::Json)).await?;
        }
        *finalizers = plan.result;
    }
    if step.delete {
        sink.delete_resource().await?;
        *deleted = true;
        return Ok(());
    }
    for p in &step.patches {
        let Some(data) = stage.templates().render(&p.template, resource.body(), resource.now())? else {
            debug!(stage = %stage.name(), template = %p.template, "template rendered nothing; patch skipped");
            continue;
        };
        let wire_type = infer(resource.kind(), p.type_);
        let data = wrap(wire_type, &p.root, data)?;
        let patch = ResourcePatch { data, wire_type, subresource: p.subresource.clone(), impersonation: p.impersonation.clone() };
        sink.patch_resource(&patch).await?;
    }
    Ok(())
}

/// One call a sink received.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    Event(Event),
    Delete,
    Patch(ResourcePatch),
}

/// Sink that records calls instead of performing them. Used for dry runs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    actions: Mutex<Vec<Action>>,
    fail_on: Option<&'static str>,
}

impl RecordingSink {
    pub fn new() -> Self { Self::default() }

    /// Fail every call of one kind: `"event"`, `"delete"` or `"patch"`.
    pub fn failing_on(action: &'static str) -> Self { Self { actions: Mutex::default(), fail_on: Some(action) } }

    pub fn actions(&self) -> Vec<Action> { self.actions.lock().unwrap_or_else(PoisonError::into_inner).clone() }

    pub fn patches(&self) -> Vec<ResourcePatch> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Patch(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn record(&self, name: &'static str, action: Action) -> Result<(), SinkError> {
        if self.fail_on == Some(name) {
            return Err(SinkError::new(name, "injected failure"));
        }
        self.actions.lock().unwrap_or_else(PoisonError::into_inner).push(action);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink for RecordingSink {
    async fn send_event(&self, event: &Event) -> Result<(), SinkError> { self.record("event", Action::Event(event.clone())) }

    async fn delete_resource(&self) -> Result<(), SinkError> { self.record("delete", Action::Delete) }

    async fn patch_resource(&self, patch: &ResourcePatch) -> Result<(), SinkError> {
        self.record("patch", Action::Patch(patch.clone()))
    }
}

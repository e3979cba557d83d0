use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use stagehand_core::config::{EventSpec, ImpersonationSpec, NextSpec, PatchType, ResourceRefSpec};
use stagehand_core::{ResourceKind, StageConfig};
use stagehand_expr::Value;
use tracing::debug;

use crate::delay::DelayResolver;
use crate::error::{EvalError, EvalErrorKind, SpecError, StageError};
use crate::expression::{with_draw, CompiledExpr};
use crate::finalizer::FinalizerEdit;
use crate::patch::TemplateSet;
use crate::resource::Resource;
use crate::selector::Selector;

/// Event emitted by a step. `message` names a template in the stage's set.
#[derive(Debug, Clone)]
pub struct EventStep {
    pub type_: String,
    pub reason: String,
    pub(crate) message: String,
}

#[derive(Debug, Clone)]
pub struct PatchStep {
    pub(crate) template: String,
    pub subresource: Option<String>,
    pub root: String,
    pub type_: Option<PatchType>,
    pub impersonation: Option<ImpersonationSpec>,
}

/// One entry of a stage's ordered action list.
#[derive(Debug, Clone, Default)]
pub struct NextStep {
    pub event: Option<EventStep>,
    pub finalizers: Option<FinalizerEdit>,
    pub delete: bool,
    pub patches: Vec<PatchStep>,
}

/// A compiled lifecycle rule. Read-only after construction.
#[derive(Debug)]
pub struct Stage {
    name: String,
    resource_ref: ResourceRefSpec,
    kind: ResourceKind,
    selector: Option<Selector>,
    weight: i64,
    weight_from: Option<CompiledExpr>,
    delay: DelayResolver,
    next: Vec<NextStep>,
    immediate_next_stage: bool,
    templates: TemplateSet,
}

impl Stage {
    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        Self::build(config).map_err(|kind| StageError { stage: config.name.clone(), kind })
    }

    fn build(config: &StageConfig) -> Result<Self, SpecError> {
        let spec = &config.spec;
        if spec.weight < 0 {
            return Err(SpecError::NegativeWeight(spec.weight));
        }
        let selector = spec.selector.as_ref().map(Selector::new).transpose()?;
        if selector.is_none() {
            debug!(stage = %config.name, "stage has no selector and will never match");
        }
        let weight_from = CompiledExpr::from_spec("weightFrom", spec.weight_from.as_ref())?;
        let delay = DelayResolver::new(spec.delay.as_ref())?;
        let mut templates = TemplateSet::new();
        let next = spec
            .next
            .iter()
            .enumerate()
            .map(|(i, n)| next_step(i, n, &mut templates))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: config.name.clone(),
            kind: ResourceKind::from_kind(&spec.resource_ref.kind),
            resource_ref: spec.resource_ref.clone(),
            selector,
            weight: spec.weight,
            weight_from,
            delay,
            next,
            immediate_next_stage: spec.immediate_next_stage,
            templates,
        })
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn resource_ref(&self) -> &ResourceRefSpec { &self.resource_ref }
    pub fn kind(&self) -> &ResourceKind { &self.kind }
    pub fn selector(&self) -> Option<&Selector> { self.selector.as_ref() }
    pub fn next(&self) -> &[NextStep] { &self.next }
    pub fn immediate_next_stage(&self) -> bool { self.immediate_next_stage }
    pub fn templates(&self) -> &TemplateSet { &self.templates }

    /// Without a selector the stage never matches.
    pub fn is_inert(&self) -> bool { self.selector.is_none() }

    /// `apiGroup` compares empty to empty; `kind` exactly.
    pub fn targets(&self, api_group: &str, kind: &str) -> bool {
        self.resource_ref.api_group == api_group && self.resource_ref.kind == kind
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        self.selector.as_ref().map_or(false, |s| s.matches(resource))
    }

    pub fn delay<R: Rng + ?Sized>(
        &self,
        resource: &Resource,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Option<Duration>, EvalError> {
        self.delay.resolve(resource, now, rng).map_err(|(field, kind)| self.eval_error(field, kind))
    }

    /// The weight expression's numeric result, or the literal weight when
    /// it yields nothing. `Rand()` draws from `rng`.
    pub fn weight<R: Rng + ?Sized>(&self, resource: &Resource, rng: &mut R) -> Result<i64, EvalError> {
        let Some(expr) = &self.weight_from else { return Ok(self.weight) };
        let first = with_draw(rng, |draw| expr.first(&resource.scope().with_rand(draw)))
            .map_err(|e| self.eval_error("weightFrom", e.into()))?;
        match first {
            None | Some(Value::Null) => Ok(self.weight),
            Some(Value::Int(i)) => Ok(i),
            Some(Value::Float(f)) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
            Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| {
                self.eval_error("weightFrom", EvalErrorKind::Unexpected(format!("{:?} is not an integer", s)))
            }),
            Some(other) => Err(self.eval_error(
                "weightFrom",
                EvalErrorKind::Unexpected(format!("expected an integer, got {}", other.kind_name())),
            )),
        }
    }

    fn eval_error(&self, field: &'static str, kind: EvalErrorKind) -> EvalError {
        EvalError { stage: self.name.clone(), field, kind }
    }
}

fn next_step(i: usize, spec: &NextSpec, templates: &mut TemplateSet) -> Result<NextStep, SpecError> {
    let event = match &spec.event {
        Some(EventSpec { type_, reason, message }) => {
            let name = format!("next[{}].event", i);
            templates.add(name.clone(), message.clone())?;
            Some(EventStep { type_: type_.clone(), reason: reason.clone(), message: name })
        }
        None => None,
    };
    let patches = spec
        .all_patches()
        .into_iter()
        .enumerate()
        .map(|(j, p)| {
            let name = format!("next[{}].patches[{}]", i, j);
            templates.add(name.clone(), p.template)?;
            Ok(PatchStep {
                template: name,
                subresource: p.subresource.filter(|s| !s.is_empty()),
                root: p.root,
                type_: p.type_,
                impersonation: p.impersonation,
            })
        })
        .collect::<Result<Vec<_>, SpecError>>()?;
    Ok(NextStep { event, finalizers: spec.finalizers.as_ref().map(FinalizerEdit::new), delete: spec.delete, patches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use serde_json::json;
    use stagehand_core::load_stages;

    fn stage(yaml: &str) -> Result<Stage, StageError> {
        let configs = load_stages(yaml).unwrap();
        Stage::new(&configs[0])
    }

    fn pod(body: serde_json::Value) -> Resource { Resource::from_document(ResourceKind::Pod, body) }

    #[test]
    fn missing_selector_is_inert() {
        let s = stage("name: a\nnext: {delete: true}\n").unwrap();
        assert!(s.is_inert());
        assert!(!s.matches(&pod(json!({}))));
        let empty = stage("name: b\nselector: {}\n").unwrap();
        assert!(empty.matches(&pod(json!({}))));
    }

    #[test]
    fn builds_steps_in_order() {
        let s = stage(
            r#"
name: pod-ready
selector: {matchLabels: {app: web}}
next:
  - event: {type: Normal, reason: Started, message: "started {{ metadata.name }}"}
  - finalizers: {add: [a]}
    statusTemplate: "phase: Running"
    patches:
      - {root: metadata, template: "labels: {x: y}", type: merge, subresource: ""}
  - delete: true
immediateNextStage: true
"#,
        )
        .unwrap();
        assert_eq!(s.next().len(), 3);
        assert_eq!(s.next()[0].event.as_ref().map(|e| e.reason.as_str()), Some("Started"));
        let patches = &s.next()[1].patches;
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].root, "status");
        assert_eq!(patches[0].subresource.as_deref(), Some("status"));
        assert_eq!(patches[1].subresource, None);
        assert!(s.next()[2].delete);
        assert!(s.immediate_next_stage());
        assert!(s.targets("", "Pod"));
        assert_eq!(s.templates().names().len(), 3);
    }

    #[test]
    fn construction_errors() {
        let err = stage("name: w\nselector: {}\nweight: -1\n").unwrap_err();
        assert_eq!(err.stage, "w");
        assert!(matches!(err.kind, SpecError::NegativeWeight(-1)));
        let err = stage("name: t\nselector: {}\nnext: {statusTemplate: '{{ a '}\n").unwrap_err();
        assert!(matches!(err.kind, SpecError::Template { ref name, .. } if name == "next[0].patches[0]"));
        let err = stage("name: e\nselector: {}\nweightFrom: {cel: 'a +'}\n").unwrap_err();
        assert!(matches!(err.kind, SpecError::Expression { .. }));
        assert!(err.to_string().starts_with("stage \"e\": weightFrom"));
    }

    #[test]
    fn weight_from_expression() {
        let s = stage("name: w\nselector: {}\nweight: 4\nweightFrom: {jq: .metadata.annotations.weight}\n").unwrap();
        let with = |w: serde_json::Value| pod(json!({"metadata": {"annotations": {"weight": w}}}));
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(s.weight(&with(json!("12")), &mut rng).unwrap(), 12);
        assert_eq!(s.weight(&pod(json!({"metadata": {}})), &mut rng).unwrap(), 4);
        assert!(s.weight(&with(json!("heavy")), &mut rng).is_err());
        let cel = stage("name: c\nselector: {}\nweightFrom: {cel: 'self.spec.replicas * 2'}\n").unwrap();
        assert_eq!(cel.weight(&pod(json!({"spec": {"replicas": 3}})), &mut rng).unwrap(), 6);
        let err = cel.weight(&pod(json!({"spec": {}})), &mut rng).unwrap_err();
        assert_eq!(err.stage, "c");
        assert_eq!(err.field, "weightFrom");
    }

    #[test]
    fn weight_rand_follows_the_seed() {
        let s = stage("name: r\nselector: {}\nweightFrom: {cel: 'int(Rand() * 1000.0) + 2'}\n").unwrap();
        let r = pod(json!({}));
        let draw = |seed| s.weight(&r, &mut StdRng::seed_from_u64(seed)).unwrap();
        assert_eq!(draw(9), draw(9));
        assert!((2..1002).contains(&draw(9)));
    }

    #[test]
    fn delay_uses_now() {
        let s = stage("name: d\nselector: {}\ndelay: {durationFrom: {cel: \"timestamp(self.metadata.deletionTimestamp) - Now()\"}}\n")
            .unwrap();
        let r = pod(json!({"metadata": {"deletionTimestamp": "2024-01-01T00:01:00Z"}}));
        let now = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let got = s.delay(&r, now, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(got, Some(Duration::from_secs(60)));
    }
}

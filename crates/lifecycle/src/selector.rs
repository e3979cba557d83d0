//! Label, annotation and expression selectors.

use std::collections::{BTreeMap, BTreeSet};

use stagehand_core::config::{ExprSource, Operator, RequirementSpec, SelectorSpec};
use stagehand_expr::{ExprError, Scope};
use tracing::debug;

use crate::error::SpecError;
use crate::expression::CompiledExpr;
use crate::resource::Resource;

/// One expression condition. Results are compared as match strings.
#[derive(Debug, Clone)]
pub struct Requirement {
    expr: CompiledExpr,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    pub fn new(index: usize, spec: &RequirementSpec) -> Result<Self, SpecError> {
        let source = spec.source()?;
        let expr = CompiledExpr::compile(&format!("matchExpressions[{}]", index), &source)?;
        let (operator, values) = match (spec.operator, &source) {
            (Some(op), _) => (op, spec.values.clone()),
            // bare `{cel: expr}` is a boolean condition
            (None, ExprSource::Cel(_)) if spec.values.is_empty() => (Operator::In, vec!["true".to_string()]),
            (None, ExprSource::Cel(_)) => (Operator::In, spec.values.clone()),
            (None, ExprSource::Jq(_)) => {
                return Err(SpecError::Requirement { index, reason: "operator is required for jq requirements".into() })
            }
        };
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                Err(SpecError::Requirement { index, reason: format!("{:?} requires at least one value", operator) })
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                Err(SpecError::Requirement { index, reason: format!("{:?} takes no values", operator) })
            }
            _ => Ok(Self { expr, operator, values: values.into_iter().collect() }),
        }
    }

    pub fn operator(&self) -> Operator { self.operator }
    pub fn source(&self) -> &str { self.expr.source() }

    pub fn matches(&self, scope: &Scope<'_>) -> Result<bool, ExprError> {
        let results = self.expr.evaluate(scope)?;
        let found = || results.iter().any(|v| self.values.contains(&v.to_match_string()));
        let exists = || results.iter().any(|v| !v.is_null());
        Ok(match self.operator {
            Operator::In => found(),
            Operator::NotIn => !found(),
            Operator::Exists => exists(),
            Operator::DoesNotExist => !exists(),
        })
    }
}

/// AND of label equality, annotation equality and every requirement.
/// An empty selector matches everything.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    match_labels: BTreeMap<String, String>,
    match_annotations: BTreeMap<String, String>,
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn new(spec: &SelectorSpec) -> Result<Self, SpecError> {
        let requirements =
            spec.match_expressions.iter().enumerate().map(|(i, r)| Requirement::new(i, r)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { match_labels: spec.match_labels.clone(), match_annotations: spec.match_annotations.clone(), requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_annotations.is_empty() && self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] { &self.requirements }

    /// Requirement evaluation errors count as "no match".
    pub fn matches(&self, resource: &Resource) -> bool {
        if !subset(&self.match_labels, resource.labels()) || !subset(&self.match_annotations, resource.annotations()) {
            return false;
        }
        let scope = resource.scope();
        self.requirements.iter().enumerate().all(|(i, req)| match req.matches(&scope) {
            Ok(hit) => hit,
            Err(e) => {
                debug!(resource = %resource.display_name(), requirement = i, query = req.source(), error = %e, "requirement failed closed");
                false
            }
        })
    }
}

fn subset(want: &BTreeMap<String, String>, have: &BTreeMap<String, String>) -> bool {
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagehand_core::ResourceKind;

    fn req(yaml: &str) -> Result<Requirement, SpecError> {
        let spec: RequirementSpec = serde_yaml::from_str(yaml).unwrap();
        Requirement::new(0, &spec)
    }

    fn pod(body: serde_json::Value) -> Resource { Resource::from_document(ResourceKind::Pod, body) }

    #[test]
    fn operators() {
        let r = pod(json!({"metadata": {"name": "a"}, "spec": {"nodeName": "n1", "ready": true, "replicas": 3}}));
        let scope = r.scope();
        assert!(req("{key: .spec.nodeName, operator: In, values: [n1, n2]}").unwrap().matches(&scope).unwrap());
        assert!(req("{key: .spec.nodeName, operator: NotIn, values: [n2]}").unwrap().matches(&scope).unwrap());
        assert!(req("{key: .spec.ready, operator: In, values: [\"true\"]}").unwrap().matches(&scope).unwrap());
        assert!(req("{key: .spec.replicas, operator: In, values: [\"3\"]}").unwrap().matches(&scope).unwrap());
        assert!(req("{jq: .spec.nodeName, operator: Exists}").unwrap().matches(&scope).unwrap());
        assert!(req("{key: .spec.missing, operator: DoesNotExist}").unwrap().matches(&scope).unwrap());
        assert!(!req("{key: .spec.missing, operator: Exists}").unwrap().matches(&scope).unwrap());
    }

    #[test]
    fn bare_cel_is_boolean() {
        let r = pod(json!({"spec": {"replicas": 3}}));
        assert!(req("{cel: \"pod.spec.replicas > 2\"}").unwrap().matches(&r.scope()).unwrap());
        assert!(!req("{cel: \"self.spec.replicas > 5\"}").unwrap().matches(&r.scope()).unwrap());
    }

    #[test]
    fn invalid_requirements() {
        assert!(matches!(req("{key: .a, operator: In}"), Err(SpecError::Requirement { .. })));
        assert!(matches!(req("{key: .a, operator: Exists, values: [x]}"), Err(SpecError::Requirement { .. })));
        assert!(matches!(req("{key: .a}"), Err(SpecError::Requirement { .. })));
        assert!(matches!(req("{key: \".a |\", operator: Exists}"), Err(SpecError::Expression { .. })));
    }

    #[test]
    fn errors_fail_closed() {
        let spec: SelectorSpec = serde_yaml::from_str("matchExpressions: [{key: .spec.name.first, operator: Exists}]").unwrap();
        let sel = Selector::new(&spec).unwrap();
        // indexing a string raises in jq
        assert!(!sel.matches(&pod(json!({"spec": {"name": "x"}}))));
    }
}

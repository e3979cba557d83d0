use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use stagehand_core::ResourceKind;
use stagehand_expr::{Scope, Value};

/// The object under evaluation: an explicit kind tag, its label and
/// annotation sets, and the JSON body. Treated as an immutable snapshot.
#[derive(Debug, Clone)]
pub struct Resource {
    kind: ResourceKind,
    var_name: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    body: serde_json::Value,
    value: OnceCell<Value>,
    observed_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(
        kind: ResourceKind,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
        body: serde_json::Value,
    ) -> Self {
        let var_name = kind.var_name();
        Self { kind, var_name, labels, annotations, body, value: OnceCell::new(), observed_at: Utc::now() }
    }

    /// Labels and annotations are read from the body's `metadata`.
    pub fn from_document(kind: ResourceKind, body: serde_json::Value) -> Self {
        let labels = string_map(&body, "labels");
        let annotations = string_map(&body, "annotations");
        Self::new(kind, labels, annotations, body)
    }

    /// Pin the evaluation clock (CEL `Now()`, timestamp arithmetic).
    pub fn observed_at(mut self, now: DateTime<Utc>) -> Self {
        self.observed_at = now;
        self
    }

    pub fn kind(&self) -> &ResourceKind { &self.kind }
    pub fn labels(&self) -> &BTreeMap<String, String> { &self.labels }
    pub fn annotations(&self) -> &BTreeMap<String, String> { &self.annotations }
    pub fn body(&self) -> &serde_json::Value { &self.body }
    pub fn now(&self) -> DateTime<Utc> { self.observed_at }

    /// Body converted to the expression value model, once.
    pub fn value(&self) -> &Value { self.value.get_or_init(|| Value::from_json(&self.body)) }

    pub fn scope(&self) -> Scope<'_> { self.scope_at(self.observed_at) }

    pub fn scope_at(&self, now: DateTime<Utc>) -> Scope<'_> {
        Scope::new(self.value()).with_kind(&self.var_name).at(now)
    }

    pub fn name(&self) -> &str { self.meta_str("name").unwrap_or("") }
    pub fn namespace(&self) -> Option<&str> { self.meta_str("namespace") }

    pub fn display_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name()),
            None => self.name().to_string(),
        }
    }

    /// `metadata.finalizers`, empty when absent.
    pub fn finalizers(&self) -> Vec<String> {
        self.body
            .pointer("/metadata/finalizers")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.body.get("metadata").and_then(|m| m.get(key)).and_then(|v| v.as_str())
    }
}

fn string_map(body: &serde_json::Value, key: &str) -> BTreeMap<String, String> {
    body.get("metadata")
        .and_then(|m| m.get(key))
        .and_then(|v| v.as_object())
        .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
        .unwrap_or_default()
}

//! Serde model of stage documents.
//!
//! Field names follow the YAML surface (`camelCase`). Validation that needs
//! compiled expressions or templates happens when the lifecycle is built;
//! this module only checks shape.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};

use crate::ConfigError;

/// A named stage as read from a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageConfig {
    pub name: String,
    pub spec: StageSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    #[serde(default)]
    pub resource_ref: ResourceRefSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorSpec>,
    #[serde(default)]
    pub weight: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_from: Option<ExpressionFrom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelaySpec>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub next: Vec<NextSpec>,
    #[serde(default)]
    pub immediate_next_stage: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRefSpec {
    #[serde(default)]
    pub api_group: String,
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String { "Pod".to_string() }

impl Default for ResourceRefSpec {
    fn default() -> Self { Self { api_group: String::new(), kind: default_kind() } }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<RequirementSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One expression requirement. `key` (alias `jq`) holds a jq query; `cel`
/// holds a CEL expression. Exactly one must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementSpec {
    #[serde(default, alias = "jq", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl RequirementSpec {
    pub fn source(&self) -> Result<ExprSource, ConfigError> {
        match (&self.key, &self.cel) {
            (Some(q), None) => Ok(ExprSource::Jq(q.clone())),
            (None, Some(c)) => Ok(ExprSource::Cel(c.clone())),
            (Some(_), Some(_)) => Err(ConfigError::Expression {
                field: "matchExpressions",
                reason: "key and cel are mutually exclusive".into(),
            }),
            (None, None) => Err(ConfigError::Expression { field: "matchExpressions", reason: "one of key or cel is required".into() }),
        }
    }
}

/// Query source in one of the two dialects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExprSource {
    Jq(String),
    Cel(String),
}

impl ExprSource {
    pub fn text(&self) -> &str {
        match self {
            ExprSource::Jq(s) | ExprSource::Cel(s) => s,
        }
    }
}

/// `{cel: ..}`, `{jq: ..}` or `{expressionFrom: ..}` (a jq query).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionFrom {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_from: Option<String>,
}

impl ExpressionFrom {
    pub fn cel(src: impl Into<String>) -> Self { Self { cel: Some(src.into()), ..Self::default() } }

    pub fn jq(src: impl Into<String>) -> Self { Self { jq: Some(src.into()), ..Self::default() } }

    /// The configured query. `None` when the block is empty.
    pub fn source(&self, field: &'static str) -> Result<Option<ExprSource>, ConfigError> {
        let mut found = Vec::with_capacity(1);
        if let Some(c) = &self.cel { found.push(ExprSource::Cel(c.clone())); }
        if let Some(q) = &self.jq { found.push(ExprSource::Jq(q.clone())); }
        if let Some(q) = &self.expression_from { found.push(ExprSource::Jq(q.clone())); }
        match found.len() {
            0 | 1 => Ok(found.pop()),
            _ => Err(ConfigError::Expression { field, reason: "only one of cel, jq or expressionFrom may be set".into() }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelaySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_milliseconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_from: Option<ExpressionFrom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_duration_milliseconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_duration_from: Option<ExpressionFrom>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalizers: Option<FinalizersSpec>,
    #[serde(default)]
    pub delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_subresource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_patch_as: Option<ImpersonationSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchSpec>,
}

impl NextSpec {
    /// `statusTemplate` expanded into a patch, followed by `patches`.
    pub fn all_patches(&self) -> Vec<PatchSpec> {
        let mut out = Vec::with_capacity(self.patches.len() + 1);
        if let Some(t) = &self.status_template {
            out.push(PatchSpec {
                subresource: Some(self.status_subresource.clone().unwrap_or_else(|| "status".to_string())),
                root: "status".to_string(),
                template: t.clone(),
                type_: None,
                impersonation: self.status_patch_as.clone(),
            });
        }
        out.extend(self.patches.iter().cloned());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizersSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<FinalizerItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<FinalizerItem>,
    #[serde(default)]
    pub empty: bool,
}

/// A finalizer name, written either bare or as `{value: name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FinalizerItem {
    Name(String),
    Value { value: String },
}

impl FinalizerItem {
    pub fn value(&self) -> &str {
        match self {
            FinalizerItem::Name(v) | FinalizerItem::Value { value: v } => v,
        }
    }
}

impl From<&str> for FinalizerItem {
    fn from(s: &str) -> Self { FinalizerItem::Name(s.to_string()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchType {
    Json,
    Merge,
    Strategic,
}

impl PatchType {
    /// HTTP content type of the wire format.
    pub fn content_type(self) -> &'static str {
        match self {
            PatchType::Json => "application/json-patch+json",
            PatchType::Merge => "application/merge-patch+json",
            PatchType::Strategic => "application/strategic-merge-patch+json",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subresource: Option<String>,
    #[serde(default)]
    pub root: String,
    pub template: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<PatchType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonation: Option<ImpersonationSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImpersonationSpec {
    pub username: String,
}

fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<NextSpec>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<NextSpec>),
        One(Box<NextSpec>),
    }
    Ok(match Option::<OneOrMany>::deserialize(d)? {
        None => Vec::new(),
        Some(OneOrMany::Many(v)) => v,
        Some(OneOrMany::One(n)) => vec![*n],
    })
}

fn stage_from(index: usize, value: serde_yaml::Value) -> Result<StageConfig, ConfigError> {
    let serde_yaml::Value::Mapping(mut map) = value else {
        return Err(ConfigError::InvalidDocument { index, reason: "expected a mapping".into() });
    };
    let kind = map.get("kind").and_then(|v| v.as_str()).map(str::to_string);
    match kind.as_deref() {
        Some("Stage") => {
            let name = map
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(|v| v.as_str())
                .ok_or(ConfigError::MissingName { index })?
                .to_string();
            let spec = map.remove("spec").unwrap_or_else(|| serde_yaml::Value::Mapping(Default::default()));
            let spec = serde_yaml::from_value(spec).map_err(|source| ConfigError::Yaml { index, source })?;
            Ok(StageConfig { name, spec })
        }
        Some(other) => Err(ConfigError::InvalidDocument { index, reason: format!("unsupported kind {:?}", other) }),
        None => {
            let name = map
                .remove("name")
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or(ConfigError::MissingName { index })?;
            let spec = serde_yaml::from_value(serde_yaml::Value::Mapping(map)).map_err(|source| ConfigError::Yaml { index, source })?;
            Ok(StageConfig { name, spec })
        }
    }
}

/// Parse stage documents: one or more YAML documents, each a stage, a
/// `kind: Stage` object or a list of either. Empty documents are skipped.
pub fn load_stages(yaml: &str) -> Result<Vec<StageConfig>, ConfigError> {
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(doc).map_err(|source| ConfigError::Yaml { index: out.len(), source })?;
        match value {
            serde_yaml::Value::Null => {}
            serde_yaml::Value::Sequence(items) => {
                for item in items {
                    let stage = stage_from(out.len(), item)?;
                    out.push(stage);
                }
            }
            other => {
                let stage = stage_from(out.len(), other)?;
                out.push(stage);
            }
        }
    }
    let mut seen = HashSet::new();
    for s in &out {
        if !seen.insert(s.name.as_str()) {
            return Err(ConfigError::DuplicateName(s.name.clone()));
        }
    }
    Ok(out)
}

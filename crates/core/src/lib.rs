//! Stagehand core types: stage documents, resource kinds and watch deltas.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod config;
mod error;
mod kind;

pub use config::{load_stages, StageConfig};
pub use error::ConfigError;
pub use kind::ResourceKind;

pub type Uid = [u8; 16];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeltaKind {
    Applied,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub uid: Uid,
    pub kind: DeltaKind,
    /// Raw object (managedFields stripped under the default feature)
    pub raw: serde_json::Value,
}

impl Delta {
    pub fn new(uid: Uid, kind: DeltaKind, mut raw: serde_json::Value) -> Self {
        if cfg!(feature = "strip-managed-fields") {
            strip_managed_fields(&mut raw);
        }
        Self { uid, kind, raw }
    }

    /// `<namespace>/<name>` or `<name>` for log fields.
    pub fn display_name(&self) -> String {
        let meta = self.raw.get("metadata");
        let name = meta.and_then(|m| m.get("name")).and_then(|v| v.as_str()).unwrap_or("");
        match meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str()) {
            Some(ns) => format!("{}/{}", ns, name),
            None => name.to_string(),
        }
    }
}

pub fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

pub mod prelude {
    pub use super::config::{
        DelaySpec, EventSpec, ExprSource, ExpressionFrom, FinalizerItem, FinalizersSpec, ImpersonationSpec, NextSpec,
        Operator, PatchSpec, PatchType, RequirementSpec, ResourceRefSpec, SelectorSpec, StageSpec,
    };
    pub use super::{load_stages, ConfigError, Delta, DeltaKind, ResourceKind, StageConfig, Uid};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_strips_managed_fields() {
        let raw = serde_json::json!({"metadata": {"name": "a", "namespace": "ns", "managedFields": [{"manager": "x"}]}});
        let d = Delta::new([0; 16], DeltaKind::Applied, raw);
        assert!(d.raw["metadata"].get("managedFields").is_none());
        assert_eq!(d.display_name(), "ns/a");
    }
}

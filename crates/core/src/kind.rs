use std::fmt;

/// Kind of the resource under evaluation. Pods and nodes get
/// strategic-merge patches by default; everything else gets merge patches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    Node,
    Other(String),
}

impl ResourceKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Pod" => ResourceKind::Pod,
            "Node" => ResourceKind::Node,
            other => ResourceKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Node => "Node",
            ResourceKind::Other(k) => k,
        }
    }

    /// Variable name CEL expressions use for the document (`pod`, `node`, ...).
    pub fn var_name(&self) -> String { self.as_str().to_ascii_lowercase() }

    pub fn prefers_strategic_merge(&self) -> bool { matches!(self, ResourceKind::Pod | ResourceKind::Node) }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_kinds() {
        assert_eq!(ResourceKind::from_kind("Pod"), ResourceKind::Pod);
        assert!(ResourceKind::from_kind("Node").prefers_strategic_merge());
        let crd = ResourceKind::from_kind("Widget");
        assert!(!crd.prefers_strategic_merge());
        assert_eq!(crd.var_name(), "widget");
    }
}

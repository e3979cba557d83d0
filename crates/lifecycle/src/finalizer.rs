use serde_json::{json, Value};
use stagehand_core::config::{FinalizerItem, FinalizersSpec};

const PATH: &str = "/metadata/finalizers";

/// Add/remove/empty instructions for `metadata.finalizers`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizerEdit {
    add: Vec<String>,
    remove: Vec<String>,
    empty: bool,
}

/// JSON Patch operations and the finalizer list they produce.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizerPlan {
    pub ops: Vec<Value>,
    pub result: Vec<String>,
}

impl FinalizerPlan {
    pub fn is_noop(&self) -> bool { self.ops.is_empty() }
}

impl FinalizerEdit {
    pub fn new(spec: &FinalizersSpec) -> Self {
        let names = |items: &[FinalizerItem]| items.iter().map(|i| i.value().to_string()).collect();
        Self { add: names(&spec.add), remove: names(&spec.remove), empty: spec.empty }
    }

    /// Operations against `current`. `empty` clears first and re-adds `add`
    /// against an empty base; `remove` is ignored then.
    pub fn plan(&self, current: &[String]) -> FinalizerPlan {
        if self.empty {
            let mut desired: Vec<String> = Vec::with_capacity(self.add.len());
            for name in &self.add {
                if !desired.contains(name) {
                    desired.push(name.clone());
                }
            }
            let ops = if desired == current {
                Vec::new()
            } else if desired.is_empty() {
                vec![json!({"op": "remove", "path": PATH})]
            } else {
                vec![json!({"op": "add", "path": PATH, "value": desired})]
            };
            return FinalizerPlan { ops, result: desired };
        }

        let mut ops = Vec::new();
        let mut doomed: Vec<usize> =
            current.iter().enumerate().filter(|(_, f)| self.remove.contains(f)).map(|(i, _)| i).collect();
        doomed.reverse();
        let mut result = current.to_vec();
        for i in doomed {
            ops.push(json!({"op": "remove", "path": format!("{}/{}", PATH, i)}));
            result.remove(i);
        }

        let mut added = Vec::new();
        for name in &self.add {
            if !result.contains(name) && !added.contains(name) {
                added.push(name.clone());
            }
        }
        if !added.is_empty() {
            if current.is_empty() {
                // the field may be absent; `/-` needs an existing array
                ops.push(json!({"op": "add", "path": PATH, "value": added}));
            } else {
                ops.extend(added.iter().map(|name| json!({"op": "add", "path": format!("{}/-", PATH), "value": name})));
            }
            result.extend(added);
        }
        FinalizerPlan { ops, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(yaml: &str) -> FinalizerEdit { FinalizerEdit::new(&serde_yaml::from_str(yaml).unwrap()) }

    fn names(list: &[&str]) -> Vec<String> { list.iter().map(|s| s.to_string()).collect() }

    /// Apply the plan to a document and read back the list.
    fn apply(current: Option<&[&str]>, plan: &FinalizerPlan) -> Vec<String> {
        let mut doc = match current {
            Some(list) => json!({"metadata": {"finalizers": list}}),
            None => json!({"metadata": {}}),
        };
        let patch: json_patch::Patch = serde_json::from_value(Value::Array(plan.ops.clone())).unwrap();
        json_patch::patch(&mut doc, &patch).unwrap();
        doc.pointer(PATH)
            .and_then(Value::as_array)
            .map(|a| a.iter().map(|v| v.as_str().unwrap().to_string()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn add_is_idempotent() {
        let plan = edit("add: [a]").plan(&names(&["a", "b"]));
        assert!(plan.is_noop());
        assert_eq!(plan.result, names(&["a", "b"]));
    }

    #[test]
    fn empty_then_add() {
        let plan = edit("{empty: true, add: [a]}").plan(&names(&["a", "b"]));
        assert_eq!(plan.result, names(&["a"]));
        assert_eq!(apply(Some(&["a", "b"]), &plan), names(&["a"]));

        let clear = edit("empty: true").plan(&names(&["a"]));
        assert_eq!(apply(Some(&["a"]), &clear), Vec::<String>::new());
        assert!(edit("empty: true").plan(&[]).is_noop());
        assert!(edit("{empty: true, add: [a, a]}").plan(&names(&["a"])).is_noop());
    }

    #[test]
    fn remove_and_append() {
        let plan = edit("{remove: [a, c], add: [d, {value: e}]}").plan(&names(&["a", "b", "c"]));
        assert_eq!(plan.result, names(&["b", "d", "e"]));
        assert_eq!(apply(Some(&["a", "b", "c"]), &plan), plan.result);
        assert!(edit("remove: [x]").plan(&names(&["a"])).is_noop());
    }

    #[test]
    fn add_to_missing_field() {
        let plan = edit("add: [kwok.x-k8s.io/fake]").plan(&[]);
        assert_eq!(plan.ops.len(), 1);
        assert_eq!(apply(None, &plan), names(&["kwok.x-k8s.io/fake"]));
    }
}

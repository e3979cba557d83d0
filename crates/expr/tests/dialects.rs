#![forbid(unsafe_code)]

use chrono::{TimeZone, Utc};
use stagehand_expr::prelude::*;

fn node() -> Value {
    Value::from_json(&serde_json::json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {
            "name": "kwok-node-0",
            "creationTimestamp": "2024-03-01T10:00:00Z",
            "annotations": {"kwok.x-k8s.io/node": "fake"}
        },
        "status": {
            "allocatable": {"cpu": "32", "memory": "256Gi", "pods": "110"},
            "conditions": [
                {"type": "Ready", "status": "True"},
                {"type": "MemoryPressure", "status": "False"}
            ]
        }
    }))
}

#[test]
fn both_dialects_read_the_same_document() {
    let doc = node();
    let scope = Scope::new(&doc).with_kind("node");

    let jq = compile(Dialect::Jq, ".status.conditions[] | select(.type == \"Ready\") | .status").unwrap();
    assert_eq!(jq.evaluate(&scope).unwrap(), vec![Value::from("True")]);

    let cel = compile(Dialect::Cel, "node.status.conditions.exists(c, c.type == 'Ready' && c.status == 'True')").unwrap();
    assert_eq!(cel.evaluate(&scope).unwrap(), vec![Value::Bool(true)]);
}

#[test]
fn quantities_from_documents() {
    let doc = node();
    let scope = Scope::new(&doc).with_kind("node");
    let p = compile(Dialect::Cel, "Quantity(self.status.allocatable.memory) > Quantity('128Gi')").unwrap();
    assert_eq!(p.evaluate(&scope).unwrap(), vec![Value::Bool(true)]);
    let p = compile(Dialect::Cel, "Quantity(self.status.allocatable.pods).Value() + 1").unwrap();
    assert_eq!(p.evaluate(&scope).unwrap(), vec![Value::Int(111)]);
}

#[test]
fn jq_yields_many_or_none() {
    let doc = node();
    let scope = Scope::new(&doc);
    let many = compile(Dialect::Jq, ".status.conditions[].type").unwrap();
    assert_eq!(many.evaluate(&scope).unwrap().len(), 2);
    let none = compile(Dialect::Jq, ".status.conditions[] | select(.type == \"DiskPressure\")").unwrap();
    assert!(none.evaluate(&scope).unwrap().is_empty());
    let key = compile(Dialect::Jq, ".metadata.annotations[\"kwok.x-k8s.io/node\"]").unwrap();
    assert_eq!(key.evaluate(&scope).unwrap(), vec![Value::from("fake")]);
}

#[test]
fn time_is_taken_from_the_scope() {
    let doc = node();
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap();
    let scope = Scope::new(&doc).with_kind("node").at(now);
    let p = compile(Dialect::Cel, "SinceSecond(node) >= 300").unwrap();
    assert_eq!(p.evaluate(&scope).unwrap(), vec![Value::Bool(true)]);
    let p = compile(Dialect::Cel, "Now() - duration('5m') == timestamp(self.metadata.creationTimestamp)").unwrap();
    assert_eq!(p.evaluate(&scope).unwrap(), vec![Value::Bool(true)]);
    let p = compile(Dialect::Jq, "now").unwrap();
    assert_eq!(p.evaluate(&scope).unwrap(), vec![Value::Float(now.timestamp() as f64)]);
}

#[test]
fn global_cache_dedupes_sources() {
    let cache = ProgramCache::global();
    let a = cache.get_or_compile(Dialect::Jq, ".metadata.name // \"anon\"").unwrap();
    let b = cache.get_or_compile(Dialect::Jq, ".metadata.name // \"anon\"").unwrap();
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert_eq!(a.source(), ".metadata.name // \"anon\"");
}

#[test]
fn parse_errors_carry_position() {
    let err = compile(Dialect::Cel, "self.metadata.name == ").unwrap_err();
    match err {
        ExprError::Parse { dialect, offset, .. } => {
            assert_eq!(dialect, Dialect::Cel);
            assert_eq!(offset, 22);
        }
        other => panic!("unexpected {other:?}"),
    }
}

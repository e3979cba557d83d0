//! Patch synthesis: template rendering, type inference and root wrapping.

use chrono::{DateTime, SecondsFormat, Utc};
use minijinja::{Environment, Error, ErrorKind, State, UndefinedBehavior};
use serde::Serialize;
use serde_json::Value;
use stagehand_core::config::{ImpersonationSpec, PatchType};
use stagehand_core::ResourceKind;

use crate::error::{PatchError, RenderError, SpecError};

/// One mutation handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePatch {
    pub data: Value,
    pub wire_type: PatchType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subresource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonation: Option<ImpersonationSpec>,
}

impl ResourcePatch {
    pub fn new(data: Value, wire_type: PatchType) -> Self {
        Self { data, wire_type, subresource: None, impersonation: None }
    }
}

/// Explicit type wins; pods and nodes default to strategic merge, the rest to merge.
pub fn infer(kind: &ResourceKind, explicit: Option<PatchType>) -> PatchType {
    explicit.unwrap_or(if kind.prefers_strategic_merge() { PatchType::Strategic } else { PatchType::Merge })
}

/// Place rendered data under `root`.
///
/// Merge-style patches are wrapped as `{root: data}`; JSON Patch operations
/// get `/<root>` prefixed to their `path`. `from` is left untouched.
pub fn wrap(patch_type: PatchType, root: &str, data: Value) -> Result<Value, PatchError> {
    match patch_type {
        PatchType::Merge | PatchType::Strategic => {
            if root.is_empty() {
                return Ok(data);
            }
            let mut wrapped = serde_json::Map::with_capacity(1);
            wrapped.insert(root.to_string(), data);
            Ok(Value::Object(wrapped))
        }
        PatchType::Json => {
            let mut ops = match data {
                Value::Array(ops) => ops,
                other => return Err(PatchError::NotAnArray(json_type(&other))),
            };
            for (index, op) in ops.iter_mut().enumerate() {
                let obj = op.as_object_mut().ok_or(PatchError::Operation { index, reason: "not an object" })?;
                if !obj.get("op").map_or(false, Value::is_string) {
                    return Err(PatchError::Operation { index, reason: "missing string \"op\"" });
                }
                let path = match obj.get("path") {
                    Some(Value::String(p)) => p.clone(),
                    _ => return Err(PatchError::Operation { index, reason: "missing string \"path\"" }),
                };
                if !root.is_empty() {
                    obj.insert("path".to_string(), Value::String(format!("/{}{}", root, path)));
                }
            }
            Ok(Value::Array(ops))
        }
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Context key carrying the evaluation clock to the helpers.
const CLOCK: &str = "__stagehand_now";

/// Named Jinja templates of one stage, syntax-checked when added.
///
/// Undefined references are errors. Helpers: `now()`, `unix_second()` and
/// the `since_second` filter, all reading the clock passed to render.
pub struct TemplateSet {
    env: Environment<'static>,
    names: Vec<String>,
}

impl Default for TemplateSet {
    fn default() -> Self { Self::new() }
}

impl TemplateSet {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_function("now", now);
        env.add_function("unix_second", unix_second);
        env.add_filter("since_second", since_second);
        Self { env, names: Vec::new() }
    }

    pub fn add(&mut self, name: String, source: String) -> Result<(), SpecError> {
        self.env
            .add_template_owned(name.clone(), source)
            .map_err(|e| SpecError::Template { name: name.clone(), message: e.to_string() })?;
        self.names.push(name);
        Ok(())
    }

    pub fn names(&self) -> &[String] { &self.names }

    pub fn render_text(&self, name: &str, context: &Value, now: DateTime<Utc>) -> Result<String, RenderError> {
        let failed = |e: Error| RenderError::Template { name: name.to_string(), message: e.to_string() };
        self.env.get_template(name).map_err(failed)?.render(with_clock(context, now)).map_err(failed)
    }

    /// Render and parse the output as YAML (JSON included). Blank or null
    /// output yields `None`.
    pub fn render(&self, name: &str, context: &Value, now: DateTime<Utc>) -> Result<Option<Value>, RenderError> {
        let text = self.render_text(name, context, now)?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let value: Value = serde_yaml::from_str(&text)
            .map_err(|e| RenderError::Output { name: name.to_string(), message: e.to_string() })?;
        Ok(if value.is_null() { None } else { Some(value) })
    }
}

impl std::fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSet").field("names", &self.names).finish()
    }
}

/// Render a single template against `document` at `now`.
pub fn render(template: &str, document: &Value, now: DateTime<Utc>) -> Result<Option<Value>, RenderError> {
    const NAME: &str = "template";
    let mut set = TemplateSet::new();
    set.add(NAME.to_string(), template.to_string())
        .map_err(|e| RenderError::Template { name: NAME.to_string(), message: e.to_string() })?;
    set.render(NAME, document, now)
}

fn with_clock(context: &Value, now: DateTime<Utc>) -> Value {
    let mut ctx = context.clone();
    if let Value::Object(map) = &mut ctx {
        map.insert(CLOCK.to_string(), Value::String(now.to_rfc3339_opts(SecondsFormat::Nanos, true)));
    }
    ctx
}

fn clock(state: &State) -> DateTime<Utc> {
    state
        .lookup(CLOCK)
        .and_then(|v| v.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()))
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn now(state: &State) -> String { clock(state).to_rfc3339_opts(SecondsFormat::Secs, true) }

fn unix_second(state: &State) -> i64 { clock(state).timestamp() }

fn since_second(state: &State, ts: &str) -> Result<i64, Error> {
    let t = DateTime::parse_from_rfc3339(ts)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("since_second: {:?}: {}", ts, e)))?;
    Ok(clock(state).signed_duration_since(t).num_seconds())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() }

    #[test]
    fn inference() {
        assert_eq!(infer(&ResourceKind::Pod, None), PatchType::Strategic);
        assert_eq!(infer(&ResourceKind::Node, None), PatchType::Strategic);
        assert_eq!(infer(&ResourceKind::from_kind("Widget"), None), PatchType::Merge);
        assert_eq!(infer(&ResourceKind::Pod, Some(PatchType::Json)), PatchType::Json);
    }

    #[test]
    fn merge_wrapping() {
        assert_eq!(wrap(PatchType::Merge, "status", json!({"x": 1})).unwrap(), json!({"status": {"x": 1}}));
        assert_eq!(wrap(PatchType::Strategic, "", json!({"x": 1})).unwrap(), json!({"x": 1}));
    }

    #[test]
    fn json_patch_paths() {
        let ops = json!([{"op": "replace", "path": "/x", "value": 1}, {"op": "move", "from": "/a", "path": "/b"}]);
        let out = wrap(PatchType::Json, "status", ops).unwrap();
        assert_eq!(
            out,
            json!([{"op": "replace", "path": "/status/x", "value": 1}, {"op": "move", "from": "/a", "path": "/status/b"}])
        );
        let same = json!([{"op": "remove", "path": "/y"}]);
        assert_eq!(wrap(PatchType::Json, "", same.clone()).unwrap(), same);
    }

    #[test]
    fn json_patch_must_be_operations() {
        assert!(matches!(wrap(PatchType::Json, "", json!({"op": "add"})), Err(PatchError::NotAnArray("object"))));
        assert!(matches!(wrap(PatchType::Json, "", json!([1])), Err(PatchError::Operation { index: 0, .. })));
        assert!(matches!(wrap(PatchType::Json, "", json!([{"path": "/a"}])), Err(PatchError::Operation { .. })));
        assert!(matches!(wrap(PatchType::Json, "s", json!([{"op": "add"}])), Err(PatchError::Operation { .. })));
    }

    #[test]
    fn render_yaml_and_json() {
        let doc = json!({"metadata": {"name": "web-0"}, "spec": {"nodeName": "n1"}});
        assert_eq!(render(r#"{"phase":"Running"}"#, &doc, at()).unwrap(), Some(json!({"phase": "Running"})));
        let yaml = "podIP: 10.0.0.1\nhostIP: {{ spec.nodeName }}\nconditions:\n- type: Ready\n  status: \"True\"\n";
        assert_eq!(
            render(yaml, &doc, at()).unwrap(),
            Some(json!({"podIP": "10.0.0.1", "hostIP": "n1", "conditions": [{"type": "Ready", "status": "True"}]}))
        );
        assert_eq!(render("{% if false %}x: 1{% endif %}", &doc, at()).unwrap(), None);
    }

    #[test]
    fn render_errors() {
        let doc = json!({"metadata": {"name": "a"}});
        assert!(matches!(render("{{ status.phase }}", &doc, at()), Err(RenderError::Template { .. })));
        assert!(matches!(render("a: [1", &doc, at()), Err(RenderError::Output { .. })));
        let mut set = TemplateSet::new();
        assert!(matches!(set.add("bad".into(), "{{ a ".into()), Err(SpecError::Template { .. })));
        assert!(set.names().is_empty());
    }

    #[test]
    fn helpers_read_the_given_clock() {
        let doc = json!({"metadata": {"creationTimestamp": "2000-01-01T00:00:00Z"}});
        let out = render("age: {{ metadata.creationTimestamp | since_second }}\nat: \"{{ now() }}\"\nunix: {{ unix_second() }}", &doc, at())
            .unwrap()
            .unwrap();
        assert_eq!(out, json!({"age": 767_880_000, "at": "2024-05-01T12:00:00Z", "unix": 1_714_564_800}));
    }

    #[test]
    fn template_set_renders_each_name_at_its_clock() {
        let mut set = TemplateSet::new();
        set.add("at".to_string(), "{{ unix_second() }}".to_string()).unwrap();
        let doc = json!({});
        let later = at() + chrono::Duration::seconds(90);
        assert_eq!(set.render_text("at", &doc, at()).unwrap(), "1714564800");
        assert_eq!(set.render_text("at", &doc, later).unwrap(), "1714564890");
    }
}

use stagehand_core::ConfigError;
use stagehand_expr::ExprError;

/// A stage that cannot be built. Rejects the whole configuration.
#[derive(Debug, thiserror::Error)]
#[error("stage {stage:?}: {kind}")]
pub struct StageError {
    pub stage: String,
    pub kind: SpecError,
}

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{field}: {source}")]
    Expression { field: String, source: ExprError },
    #[error("matchExpressions[{index}]: {reason}")]
    Requirement { index: usize, reason: String },
    #[error("weight must not be negative (got {0})")]
    NegativeWeight(i64),
    #[error("{field} must not be negative (got {value})")]
    NegativeDuration { field: &'static str, value: i64 },
    #[error("template {name}: {message}")]
    Template { name: String, message: String },
}

/// Delay or weight extraction failed for a matched stage.
#[derive(Debug, thiserror::Error)]
#[error("stage {stage:?}: {field}: {kind}")]
pub struct EvalError {
    pub stage: String,
    pub field: &'static str,
    pub kind: EvalErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum EvalErrorKind {
    #[error(transparent)]
    Expression(#[from] ExprError),
    #[error("{0}")]
    Unexpected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template {name}: {message}")]
    Template { name: String, message: String },
    #[error("template {name} rendered invalid YAML/JSON: {message}")]
    Output { name: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("json patch must be an array of operations, got {0}")]
    NotAnArray(&'static str),
    #[error("json patch operation #{index}: {reason}")]
    Operation { index: usize, reason: &'static str },
}

/// Failure reported by a side-effect sink, passed through unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{action}: {message}")]
pub struct SinkError {
    pub action: &'static str,
    pub message: String,
}

impl SinkError {
    pub fn new(action: &'static str, message: impl std::fmt::Display) -> Self {
        Self { action, message: message.to_string() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Step execution stopped at `index`. Earlier steps are not rolled back.
#[derive(Debug, thiserror::Error)]
#[error("step {index}: {error}")]
pub struct StepFailure {
    pub index: usize,
    pub error: ExecError,
}

use crate::Dialect;

/// Compile and evaluation failures for both dialects.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("{dialect} parse error at offset {offset} in {input:?}: {message}")]
    Parse {
        dialect: Dialect,
        input: String,
        offset: usize,
        message: String,
    },
    #[error("{0}")]
    Eval(String),
}

impl ExprError {
    pub(crate) fn parse(dialect: Dialect, source: &str, offset: usize, message: impl Into<String>) -> Self {
        ExprError::Parse { dialect, input: source.to_string(), offset, message: message.into() }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        ExprError::Eval(message.into())
    }
}

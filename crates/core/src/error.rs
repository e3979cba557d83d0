/// Failures while reading stage documents.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("stage #{index}: {source}")]
    Yaml {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("stage #{index}: missing name")]
    MissingName { index: usize },
    #[error("stage #{index}: {reason}")]
    InvalidDocument { index: usize, reason: String },
    #[error("duplicate stage name {0:?}")]
    DuplicateName(String),
    #[error("{field}: {reason}")]
    Expression { field: &'static str, reason: String },
}

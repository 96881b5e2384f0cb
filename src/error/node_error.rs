use thiserror::Error;

/// Node-level errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("missing path {0:?}")]
    MissingPath(String),
    #[error("expression error: {0}")]
    Expression(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("sandbox error: {0}")]
    Sandbox(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("node execution timed out")]
    Timeout,
    #[error("node execution cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(e: reqwest::Error) -> Self {
        NodeError::Http(e.to_string())
    }
}

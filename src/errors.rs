use thiserror::Error;

/// Failures of the built-in tool set used when no executor is running.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(&'static str),
    #[error("Failed to fetch content: {0}")]
    Fetch(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

/// Failures while handing a request to the tool executor.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("no tool executor is running")]
    Unavailable,
    #[error("failed to encode forwarded request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write to tool executor: {0}")]
    Write(#[from] std::io::Error),
    #[error("tool executor did not accept the request in time")]
    Stalled,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn tool executor `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("tool executor {0} stream was not captured")]
    MissingStream(&'static str),
}

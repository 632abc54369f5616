/// Shared error type used across all roundtable crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("LLM call timed out: {0}")]
    LlmTimeout(String),

    #[error("LLM transport: {0}")]
    LlmTransport(String),

    /// Raised only when content, tool calls, and reasoning are all empty.
    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("expression: {0}")]
    Evaluator(String),

    #[error("profile inheritance cycle: {0}")]
    ProfileCycle(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("tool parameters: {0}")]
    ToolSchema(String),

    #[error("tool handler: {0}")]
    ToolHandler(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

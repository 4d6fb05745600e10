use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoryforgeError {
    // Model errors
    #[error("Model request failed: {0}")]
    ModelRequest(String),

    #[error("Model response parse error: {0}")]
    ModelResponse(String),

    #[error("Model provider not supported: {0}")]
    UnsupportedProvider(String),

    // Research errors
    #[error("Research request failed: {0}")]
    Research(String),

    // Workflow errors
    #[error("Node failed: {node}: {message}")]
    Node { node: String, message: String },

    #[error("Resume rejected for run {run_id}: {reason}")]
    ResumeRejected { run_id: String, reason: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoryforgeError {
    /// Shorthand for a node-level failure.
    pub fn node(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Node {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a rejected resume.
    pub fn resume_rejected(run_id: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::ResumeRejected {
            run_id: run_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a graph configuration defect.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::ConfigNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoryforgeError>;

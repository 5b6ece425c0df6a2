use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("Config error: {0}")]
    Config(String),

    /// The LLM could not be reached, timed out, or sent something unparseable.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Tool error: {0}")]
    ToolInvocation(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScoutError {
    /// Short machine-readable kind, used in logs and internal error events.
    pub fn kind(&self) -> &'static str {
        match self {
            ScoutError::Config(_) => "config_error",
            ScoutError::ModelUnavailable(_) => "model_unavailable",
            ScoutError::ToolInvocation(_) => "tool_error",
            ScoutError::ToolNotFound(_) => "tool_not_found",
            ScoutError::Gateway(_) => "gateway_error",
            ScoutError::Io(_) => "io_error",
            ScoutError::Json(_) => "json_error",
            ScoutError::Other(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ScoutError::ModelUnavailable("down".into()).kind(),
            "model_unavailable"
        );
        assert_eq!(ScoutError::ToolNotFound("x".into()).kind(), "tool_not_found");
    }

    #[test]
    fn test_error_display() {
        let err = ScoutError::ToolNotFound("calculator".into());
        assert_eq!(err.to_string(), "Tool not found: calculator");
    }
}

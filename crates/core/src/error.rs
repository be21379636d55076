#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),
}

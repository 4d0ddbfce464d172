use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhoneClawError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Decision error: {0}")]
    Decision(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Session cancelled")]
    Cancelled,
}

impl PhoneClawError {
    /// Failures of the surrounding environment (capture tool, input device,
    /// filesystem). Recovery from these usually needs an operator.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            PhoneClawError::Capture(_) | PhoneClawError::Executor(_) | PhoneClawError::Io(_)
        )
    }
}

impl serde::Serialize for PhoneClawError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PhoneClawResult<T> = Result<T, PhoneClawError>;

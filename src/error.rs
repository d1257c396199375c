use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkcodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} is not supported")]
    UnsupportedCodec(String),

    #[error("{0} is not supported")]
    UnsupportedContainer(String),

    #[error("Video codec {codec} is not supported by container {container}")]
    VideoCodecNotSupportedByContainer { codec: String, container: String },

    #[error("Audio codec {codec} is not supported by container {container}")]
    AudioCodecNotSupportedByContainer { codec: String, container: String },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Unsupported codec type: {0}")]
    UnsupportedCodecType(String),

    #[error("Task build error: {0}")]
    TaskBuild(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Output already exists: {0}")]
    OutputExists(String),

    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Sandbox execution failed: {0}")]
    Sandbox(String),

    #[error("{description} timed out after {seconds}s")]
    Timeout { description: String, seconds: u64 },
}

impl ChunkcodeError {
    /// Errors raised while validating a task, before any sandboxed work starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ChunkcodeError::UnsupportedCodec(_)
                | ChunkcodeError::UnsupportedContainer(_)
                | ChunkcodeError::VideoCodecNotSupportedByContainer { .. }
                | ChunkcodeError::AudioCodecNotSupportedByContainer { .. }
                | ChunkcodeError::InvalidCommand(_)
                | ChunkcodeError::UnsupportedCodecType(_)
                | ChunkcodeError::TaskBuild(_)
                | ChunkcodeError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChunkcodeError>;

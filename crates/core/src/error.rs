use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoryforgeError {
    #[error("API key is missing. Configure one with `storyforge key set`")]
    MissingCredential,

    #[error("Generation failed: {reason}")]
    GenerationFailure { reason: String },

    #[error("Service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Video job {operation} still pending after {attempts} status checks")]
    PollExhausted { operation: String, attempts: u32 },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Scene index {index} is out of range for a storyboard of {len} scenes")]
    SceneOutOfRange { index: usize, len: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Base64 decode error: {0}")]
    DecodeError(#[from] base64::DecodeError),
}

impl StoryforgeError {
    pub fn generation(reason: impl Into<String>) -> Self {
        StoryforgeError::GenerationFailure {
            reason: reason.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        StoryforgeError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Text shown to the user in place of a panel or a per-scene marker.
    pub fn user_message(&self) -> String {
        match self {
            StoryforgeError::GenerationFailure { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoryforgeError>;

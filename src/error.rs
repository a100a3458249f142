/// Client-level errors
///
/// A training poll that runs out of attempts is not an error; see
/// `TrainingState::TimedOut`.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Service returned status {status}: {body}")]
    Service { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response format: {0}")]
    Decode(String),
}

impl ClientError {
    /// HTTP status of a service rejection, if this is one
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink transport error: {0}")]
    Transport(String),

    #[error("Sink rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Sink rejected {failed} row(s): {message}")]
    RowsRejected { failed: usize, message: String },

    #[error("Sink encode error: {0}")]
    Encode(String),

    #[error("Sink configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Transport(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Sink failure: {0}")]
    SinkFailure(#[from] SinkError),
}

impl IngestError {
    /// HTTP status class the boundary reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            IngestError::InvalidRequest(_) => 400,
            IngestError::SinkFailure(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, IngestError::InvalidRequest(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

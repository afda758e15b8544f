use thiserror::Error;

pub type Result<T> = std::result::Result<T, OsmError>;

#[derive(Debug, Error)]
pub enum OsmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for OsmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            OsmError::Decode(err.to_string())
        } else {
            OsmError::Network(err.to_string())
        }
    }
}

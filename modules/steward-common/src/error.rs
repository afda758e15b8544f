use thiserror::Error;

#[derive(Error, Debug)]
pub enum StewardError {
    #[error("No map feature matched near the coordinate")]
    ResolutionEmpty,

    #[error("No domain could be derived for {0:?}")]
    DomainUnknown(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("No candidate address survived inference")]
    NoCandidates,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("There was an error in constructing your query: {0}")]
    QueryConstruction(String),

    #[error("API error: {status}: {reason}")]
    Api { status: u16, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("The credentials have been revoked or expired, please re-run the application to re-authorize: {0}")]
    Reauthorize(String),

    #[error("Page at offset {offset} carries rows but no column headers were available")]
    MissingHeaders { offset: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ExtractError {
    /// Whether this error ends the whole run instead of just the current property.
    pub fn aborts_run(&self) -> bool {
        matches!(self, ExtractError::Reauthorize(_))
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("another download is already in progress")]
    Busy,
    #[error("item not found: {0}")]
    ItemNotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("server returned status code {0}")]
    Server(u16),
    #[error("invalid archive: {0}")]
    InvalidArchive(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
}

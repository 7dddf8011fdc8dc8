use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExhibitionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid metric schema: {0}")]
    Schema(String),
}

pub type Result<T> = std::result::Result<T, ExhibitionError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error(transparent)]
    Mcp(#[from] mcp::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

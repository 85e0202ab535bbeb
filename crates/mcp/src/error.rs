//! Provider session error types.

use std::time::Duration;

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to launch provider: {0}")]
    Launch(#[source] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[source] Box<Error>),

    #[error("provider is not running")]
    NotRunning,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Rpc(#[from] JsonRpcError),

    #[error("response too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },
}

impl Error {
    /// Whether the connection can no longer be trusted after this error.
    ///
    /// A provider that hit one of these is torn down: the stream may hold a
    /// late or partial response that would desynchronize the next exchange.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Decode(_)
                | Error::Timeout(_)
                | Error::OutputTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_fatal() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed");
        assert!(Error::Transport(eof).is_fatal());
        assert!(Error::Decode("garbage".into()).is_fatal());
        assert!(Error::Timeout(Duration::from_secs(1)).is_fatal());
    }

    #[test]
    fn provider_errors_are_not_fatal() {
        let rpc = JsonRpcError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert!(!Error::Rpc(rpc).is_fatal());
        assert!(!Error::NotRunning.is_fatal());
    }
}

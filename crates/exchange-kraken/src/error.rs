//! Error types for the Kraken gateway.

use thiserror::Error;

/// Errors that can occur when talking to Kraken over REST or WebSocket.
#[derive(Debug, Error)]
pub enum KrakenError {
    /// Network or socket failure. Retried at the REST layer; triggers
    /// reconnect-and-resubscribe at the WS layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-empty `error` array in an API response.
    #[error("exchange error: {0}")]
    Exchange(String),

    /// Malformed JSON or an unexpected payload shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// Missing or invalid credentials / configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// WebSocket token fetch or refresh failure.
    #[error("token error: {0}")]
    Token(String),

    /// Subscribe/unsubscribe failure reported by the server.
    #[error("subscription error: {0}")]
    Subscription(String),
}

impl KrakenError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn exchange(message: impl Into<String>) -> Self {
        Self::Exchange(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// True for failures worth a blind linear-backoff retry.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// True when the exchange error text indicates a nonce collision or a
    /// server-side timeout, the two exchange errors the `OpenOrders`
    /// endpoint retries through.
    #[must_use]
    pub fn is_nonce_or_timeout(&self) -> bool {
        match self {
            Self::Exchange(message) => {
                message.contains("Invalid nonce") || message.contains("timeout")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for KrakenError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for KrakenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, KrakenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_retryable() {
        assert!(KrakenError::transport("connection reset").is_transport());
        assert!(!KrakenError::exchange("EGeneral:Invalid arguments").is_transport());
    }

    #[test]
    fn nonce_and_timeout_texts_are_recognised() {
        assert!(KrakenError::exchange("EAPI:Invalid nonce").is_nonce_or_timeout());
        assert!(KrakenError::exchange("EService:timeout").is_nonce_or_timeout());
        assert!(!KrakenError::exchange("EOrder:Insufficient funds").is_nonce_or_timeout());
        assert!(!KrakenError::transport("timeout").is_nonce_or_timeout());
    }

    #[test]
    fn display_carries_the_message() {
        let err = KrakenError::exchange("EOrder:Insufficient funds");
        assert!(err.to_string().contains("EOrder:Insufficient funds"));
    }
}

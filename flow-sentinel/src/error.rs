use crate::types::Symbol;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors produced when loading or mutating configuration. State is never modified when one of
/// these is returned.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum ConfigError {
    #[error("unknown instrument: {0}")]
    UnknownSymbol(Symbol),

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("unknown parameter '{param}' for {target}")]
    UnknownParam { target: String, param: String },

    #[error("invalid value for {param}: '{value}' is not {expected}")]
    InvalidValue {
        param: String,
        value: String,
        expected: String,
    },

    #[error("{param} out of range: {value} (expected {range})")]
    OutOfRange {
        param: String,
        value: f64,
        range: String,
    },

    #[error("duplicate instrument: {0}")]
    DuplicateSymbol(Symbol),

    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl ConfigError {
    pub(crate) fn invalid(param: &str, value: &str, expected: &str) -> Self {
        Self::InvalidValue {
            param: param.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }

    pub(crate) fn out_of_range(param: &str, value: f64, range: &str) -> Self {
        Self::OutOfRange {
            param: param.to_string(),
            value,
            range: range.to_string(),
        }
    }

    pub(crate) fn unknown_param(target: &str, param: &str) -> Self {
        Self::UnknownParam {
            target: target.to_string(),
            param: param.to_string(),
        }
    }
}

/// Errors generated by an instrument trade feed.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum FeedError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("stream closed by server")]
    Closed,

    #[error("read timeout: no data received for {0:?}")]
    ReadTimeout(Duration),

    #[error("failed to decode trade message: {0}")]
    Decode(String),

    #[error("invalid trade: {0}")]
    InvalidTrade(String),
}

impl FeedError {
    /// Determine if an error requires the connection to be re-established. Message level errors
    /// drop a single message and leave the connection open.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            FeedError::Decode(_) | FeedError::InvalidTrade(_) => false,
            _ => true,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

/// Errors delivering a notification to an [`AlertSink`](crate::alert::AlertSink).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum SinkError {
    #[error("invalid sink endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("delivery failed: {0}")]
    Transport(String),

    #[error("sink rejected notification with status {0}")]
    Rejected(u16),
}

/// Errors fetching a reference price.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum ReferenceError {
    #[error("reference price request failed ({symbol}): {reason}")]
    Request { symbol: String, reason: String },

    #[error("reference price response invalid ({symbol}): {reason}")]
    Decode { symbol: String, reason: String },

    #[error("reference price for {symbol} is not positive: {price}")]
    InvalidPrice { symbol: String, price: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_error_is_terminal() {
        struct TestCase {
            input: FeedError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: malformed message only drops the message
                input: FeedError::Decode("expected value at line 1".to_string()),
                expected: false,
            },
            TestCase {
                // TC1: non-positive price only drops the message
                input: FeedError::InvalidTrade("price 0".to_string()),
                expected: false,
            },
            TestCase {
                // TC2: server close requires reconnection
                input: FeedError::Closed,
                expected: true,
            },
            TestCase {
                // TC3: silent stream death requires reconnection
                input: FeedError::ReadTimeout(Duration::from_secs(120)),
                expected: true,
            },
            TestCase {
                // TC4: socket errors require reconnection
                input: FeedError::Socket("Io(Kind(UnexpectedEof))".to_string()),
                expected: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_terminal();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_config_error_names_field() {
        let error = ConfigError::invalid("min_volume", "abc", "a number");
        assert_eq!(
            error.to_string(),
            "invalid value for min_volume: 'abc' is not a number"
        );
    }
}

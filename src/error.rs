use thiserror::Error;
use url::ParseError;

pub type Result<T, E = ReadClientError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ReadClientError {
    #[error("Configuration Error: {0}")]
    ConfigurationError(String),

    #[error("Already connected. Use the force flag to replace the connection")]
    AlreadyConnectedError,

    #[error("Not connected")]
    NotConnected,

    #[error("Not subscribed")]
    NotSubscribed,

    #[error("Invalid Argument: check your arguments{}", field_suffix(.0))]
    InvalidArgument(Option<String>),

    #[error("Listener Limit Error: listener size must be at most {limit}")]
    ListenerLimitError { limit: usize },

    #[error("Connect Aborted: the pending connection was cancelled")]
    ConnectAborted,

    #[error("WebSocket Error: {0}")]
    WebsocketError(String),

    #[error("JSON Serialization/Deserialization Error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL Parsing Error: {0}")]
    UrlParseError(#[from] ParseError),
}

impl ReadClientError {
    /// Shorthand for an [`ReadClientError::InvalidArgument`] naming the offending field.
    pub fn invalid_argument(field: impl Into<String>) -> Self {
        ReadClientError::InvalidArgument(Some(field.into()))
    }
}

fn field_suffix(field: &Option<String>) -> String {
    match field {
        Some(name) => format!(" ({})", name),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_names_field() {
        let err = ReadClientError::invalid_argument("addrs");
        assert_eq!(
            err.to_string(),
            "Invalid Argument: check your arguments (addrs)"
        );

        let err = ReadClientError::InvalidArgument(None);
        assert_eq!(err.to_string(), "Invalid Argument: check your arguments");
    }
}

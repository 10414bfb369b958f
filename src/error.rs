use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Transient transport failures are recovered locally (reconnect, resync,
/// retry with backoff); configuration and authentication problems surface to
/// the caller; venue business rejections are values, never aborts.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    TransportTimeout(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("book checksum mismatch: computed {computed}, venue sent {expected}")]
    ChecksumMismatch { computed: u32, expected: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("venue rejected the request: {0}")]
    VenueBusiness(String),

    #[error("order {0} not found in registry")]
    MissingOrder(String),

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether retrying the same request can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_) | GatewayError::TransportTimeout(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "config",
            GatewayError::Transport(_) => "transport",
            GatewayError::TransportTimeout(_) => "timeout",
            GatewayError::Protocol(_) => "protocol",
            GatewayError::SequenceGap { .. } => "sequence_gap",
            GatewayError::ChecksumMismatch { .. } => "checksum",
            GatewayError::Auth(_) => "auth",
            GatewayError::VenueBusiness(_) => "venue_business",
            GatewayError::MissingOrder(_) => "missing_order",
            GatewayError::Json(_) => "json",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return GatewayError::TransportTimeout(err.to_string());
        }
        if err.is_connect() {
            return GatewayError::Transport(format!("connect failed: {}", err));
        }
        if let Some(status) = err.status() {
            return match status.as_u16() {
                401 | 403 => GatewayError::Auth(format!("HTTP {}", status)),
                429 => GatewayError::Transport("rate limited (HTTP 429)".to_string()),
                500..=599 => GatewayError::Transport(format!("venue error (HTTP {})", status)),
                _ => GatewayError::Protocol(format!("unexpected HTTP {}", status)),
            };
        }
        GatewayError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        GatewayError::Transport(format!("websocket: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(GatewayError::Transport("boom".into()).is_retryable());
        assert!(GatewayError::TransportTimeout("slow".into()).is_retryable());
        assert!(!GatewayError::Auth("bad key".into()).is_retryable());
        assert!(!GatewayError::Config("missing".into()).is_retryable());
        assert!(!GatewayError::SequenceGap { expected: 101, got: 105 }.is_retryable());
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(GatewayError::Config("x".into()).kind(), "config");
        assert_eq!(
            GatewayError::ChecksumMismatch { computed: 1, expected: "2".into() }.kind(),
            "checksum"
        );
        assert_eq!(GatewayError::MissingOrder("abc".into()).kind(), "missing_order");
    }
}

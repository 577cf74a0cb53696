use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),

    /// The telephony leg negotiated audio the transcriber was not opened for.
    #[error("Unsupported media format for call {call_sid}: {encoding} @ {sample_rate} Hz")]
    UnsupportedMediaFormat {
        call_sid: String,
        encoding: String,
        sample_rate: u32,
    },

    #[error("No session registered for call {0}")]
    SessionNotFound(String),

    #[error("Transcriber error: {0}")]
    Transcriber(String),

    #[error("Media stream error: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Call identifier the error is scoped to, when there is one.
    pub fn call_sid(&self) -> Option<&str> {
        match self {
            Self::UnsupportedMediaFormat { call_sid, .. } => Some(call_sid),
            Self::SessionNotFound(call_sid) => Some(call_sid),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::UnsupportedMediaFormat { .. } => "media_format",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Transcriber(_) => "transcriber",
            Self::Stream(_) => "stream",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_sid_scoping() {
        let err = RelayError::SessionNotFound("CA1".into());
        assert_eq!(err.call_sid(), Some("CA1"));
        assert_eq!(err.kind(), "session_not_found");
        assert_eq!(err.to_string(), "No session registered for call CA1");

        let err = RelayError::Transcriber("Connect failed".into());
        assert_eq!(err.call_sid(), None);
        assert_eq!(err.kind(), "transcriber");
    }
}

use std::{fmt, time::Duration};

use thiserror::Error;

use crate::{
    client::{GenerationError, TransportError},
    extractor::ExtractionError,
    store::StoreError,
};

/// Error returned by the simulator's public operations.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The model produced no text.
    #[error("model returned an empty response")]
    EmptyResponse,
    /// The model text contains no JSON object.
    #[error(transparent)]
    MalformedOutput(ExtractionError),
    /// The JSON region could not be parsed.
    #[error(transparent)]
    InvalidJson(ExtractionError),
    /// The generation backend failed after every permitted attempt.
    #[error("generation transport failed after {attempts} attempt(s): {source}")]
    Transport {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        source: TransportError,
    },
    /// One attempt exceeded the timeout.
    #[error("generation timed out after {after:?}")]
    Timeout {
        /// Configured limit.
        after: Duration,
    },
    /// The company key is unknown.
    #[error("company `{0}` not found")]
    NotFound(String),
    /// The company key is already taken.
    #[error("company key `{0}` already exists")]
    DuplicateKey(String),
    /// The store failed to read or write.
    #[error(transparent)]
    Storage(StoreError),
}

/// Discriminant of [`SimulationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`SimulationError::EmptyResponse`].
    EmptyResponse,
    /// See [`SimulationError::MalformedOutput`].
    MalformedOutput,
    /// See [`SimulationError::InvalidJson`].
    InvalidJson,
    /// See [`SimulationError::Transport`].
    Transport,
    /// See [`SimulationError::Timeout`].
    Timeout,
    /// See [`SimulationError::NotFound`].
    NotFound,
    /// See [`SimulationError::DuplicateKey`].
    DuplicateKey,
    /// See [`SimulationError::Storage`].
    Storage,
}

impl ErrorKind {
    /// Stable snake-case label used in logs and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyResponse => "empty_response",
            Self::MalformedOutput => "malformed_output",
            Self::InvalidJson => "invalid_json",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::DuplicateKey => "duplicate_key",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SimulationError {
    /// Error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyResponse => ErrorKind::EmptyResponse,
            Self::MalformedOutput(_) => ErrorKind::MalformedOutput,
            Self::InvalidJson(_) => ErrorKind::InvalidJson,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DuplicateKey(_) => ErrorKind::DuplicateKey,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether repeating the same request could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Message suitable for end users, without internal detail.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::EmptyResponse => "The model returned no answer. Please try again.",
            ErrorKind::MalformedOutput | ErrorKind::InvalidJson => {
                "The model's answer could not be understood. Please try again or rephrase the decision."
            }
            ErrorKind::Transport => {
                "The simulation service is unreachable right now. Please try again later."
            }
            ErrorKind::Timeout => "The simulation took too long and was stopped. Please try again.",
            ErrorKind::NotFound => "Company not found.",
            ErrorKind::DuplicateKey => "Company key already exists.",
            ErrorKind::Storage => "The decision could not be saved. Please contact an administrator.",
        }
    }
}

impl From<ExtractionError> for SimulationError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::EmptyResponse => Self::EmptyResponse,
            err @ ExtractionError::MalformedOutput { .. } => Self::MalformedOutput(err),
            err @ ExtractionError::InvalidJson { .. } => Self::InvalidJson(err),
        }
    }
}

impl From<GenerationError> for SimulationError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Transport { attempts, source } => Self::Transport { attempts, source },
            GenerationError::Timeout { after } => Self::Timeout { after },
            GenerationError::EmptyResponse => Self::EmptyResponse,
        }
    }
}

impl From<StoreError> for SimulationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Self::NotFound(key),
            StoreError::DuplicateKey(key) => Self::DuplicateKey(key),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::extract_assessment;

    #[test]
    fn extraction_kinds_are_preserved() {
        let kinds: Vec<ErrorKind> = ["", "no json here", "{nope}"]
            .into_iter()
            .map(|raw| SimulationError::from(extract_assessment(raw).unwrap_err()).kind())
            .collect();
        assert_eq!(
            kinds,
            [
                ErrorKind::EmptyResponse,
                ErrorKind::MalformedOutput,
                ErrorKind::InvalidJson
            ]
        );
    }

    #[test]
    fn only_transport_is_retryable() {
        let transport = SimulationError::from(GenerationError::Transport {
            attempts: 3,
            source: TransportError::new("reset"),
        });
        let timeout = SimulationError::from(GenerationError::Timeout {
            after: Duration::from_secs(1),
        });
        assert!(transport.is_retryable());
        assert!(!timeout.is_retryable());
        assert!(!SimulationError::EmptyResponse.is_retryable());
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(transport.kind().to_string(), "transport");
    }

    #[test]
    fn store_errors_map_to_lookup_kinds() {
        assert_eq!(
            SimulationError::from(StoreError::NotFound("acme".into())).kind(),
            ErrorKind::NotFound
        );
        let duplicate = SimulationError::from(StoreError::DuplicateKey("acme".into()));
        assert_eq!(duplicate.user_message(), "Company key already exists.");
        let io = SimulationError::from(StoreError::Io {
            path: "x".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        });
        assert_eq!(io.kind(), ErrorKind::Storage);
    }

    #[test]
    fn user_messages_hide_details() {
        let err = SimulationError::from(extract_assessment("secret prompt leak").unwrap_err());
        assert!(!err.user_message().contains("secret"));
        assert!(err.to_string().contains("secret"));
    }
}

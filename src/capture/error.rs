use std::fmt;

use thiserror::Error;

use crate::{channel::ChannelError, codec::CodecError};

/// Failure category reported by the card service or the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Incompatible client version
    BadVersion,
    /// Connection failure
    BadConnection,
    /// Service failure or unusable reply
    BadResponse,
    /// The operation was aborted
    Aborted,
    /// No activity for longer than the inactivity timeout
    Timeout,
    /// Any other message reported by the platform
    Platform(String),
}

impl ApiErrorKind {
    pub fn from_message(message: &str) -> Self {
        match message {
            "BadVersion" => ApiErrorKind::BadVersion,
            "BadConnection" => ApiErrorKind::BadConnection,
            "BadResponse" => ApiErrorKind::BadResponse,
            "Aborted" => ApiErrorKind::Aborted,
            "Timeout" => ApiErrorKind::Timeout,
            other => ApiErrorKind::Platform(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ApiErrorKind::BadVersion => "BadVersion",
            ApiErrorKind::BadConnection => "BadConnection",
            ApiErrorKind::BadResponse => "BadResponse",
            ApiErrorKind::Aborted => "Aborted",
            ApiErrorKind::Timeout => "Timeout",
            ApiErrorKind::Platform(message) => message,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure of a capture.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}{}", .code.map(|code| format!(" (0x{code:08X})")).unwrap_or_default())]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// Raw platform status
    pub code: Option<u32>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind) -> Self {
        Self { kind, code: None }
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn aborted() -> Self {
        Self::new(ApiErrorKind::Aborted)
    }

    pub fn timeout() -> Self {
        Self::new(ApiErrorKind::Timeout)
    }

    pub fn bad_connection() -> Self {
        Self::new(ApiErrorKind::BadConnection)
    }

    pub fn bad_response() -> Self {
        Self::new(ApiErrorKind::BadResponse)
    }
}

/// Error returned by [`capture`](super::capture).
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("dp.card.capture.purpose.empty")]
    EmptyPurpose,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CodecError> for CaptureError {
    fn from(err: CodecError) -> Self {
        CaptureError::Internal(format!("Codec error: {}", err))
    }
}

impl CaptureError {
    /// The typed API error, if this is one.
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            CaptureError::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_kind(&self, kind: &ApiErrorKind) -> bool {
        self.api().is_some_and(|err| &err.kind == kind)
    }
}

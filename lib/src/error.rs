use std::backtrace::Backtrace;
use std::fmt::{Display, Formatter};

use http::StatusCode;

use crate::PhotoId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub backtrace: Backtrace,
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Human readable status message, distinct for each failure class.
    ///
    /// Meant to be shown to the end user as-is. Infrastructure failures all
    /// collapse into a generic message, details stay in the logs.
    pub fn user_message(&self) -> String {
        match &self.kind {
            ErrorKind::Validation(e) => e.to_string(),
            ErrorKind::Unauthenticated => "User not authenticated. Please log in.".to_string(),
            ErrorKind::Transport(e) => e.user_message(),
            ErrorKind::Busy => "An upload is already in progress.".to_string(),
            ErrorKind::Cancelled => "Operation cancelled.".to_string(),
            ErrorKind::PhotoNotFound(_) => "Photo not found.".to_string(),
            ErrorKind::ImageError(_) => {
                "Could not process the image. Please try a different file.".to_string()
            }
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }

    /// Returns the transport classification if this is a transport failure.
    pub fn transport(&self) -> Option<&TransportError> {
        match &self.kind {
            ErrorKind::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            write!(f, ", {}", self.backtrace)?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ErrorKind {
    #[error("io error: {0}")]
    StdIoError(#[from] std::io::Error),

    #[error("config error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("validation failed: {0}")]
    Validation(ValidationError),

    /// No usable credential was available, nothing was sent.
    #[error("missing bearer credential")]
    Unauthenticated,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("another upload is already in flight")]
    Busy,

    #[error("operation abandoned")]
    Cancelled,

    #[error("photo not found: {0}")]
    PhotoNotFound(PhotoId),

    #[error("image error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("unsupported image type: {0}")]
    UnsupportedImageType(String),

    #[error("json decode error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("url parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("other error: {0}")]
    Other(String),
}

/// Classified failure of a call to the remote API.
///
/// Classification happens at the call site, raw `reqwest` errors never leave
/// the client.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("malformed request")]
    MalformedRequest,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("not found")]
    NotFound,
    #[error("timed out")]
    Timeout,
    #[error("network failure: {0}")]
    Network(String),
    #[error("server responded with status {0}")]
    Server(u16),
    /// Server answered 2xx but reported failure in the body (`errMessage`).
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("unexpected response body: {0}")]
    Body(String),
}

impl TransportError {
    /// Maps a non-success status to its class.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::PAYLOAD_TOO_LARGE => Self::PayloadTooLarge,
            StatusCode::BAD_REQUEST => Self::MalformedRequest,
            StatusCode::UNAUTHORIZED => Self::Unauthenticated,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Self::Timeout,
            s => Self::Server(s.as_u16()),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::PayloadTooLarge => {
                "Files too large! Please reduce file sizes or upload fewer files.".to_string()
            }
            Self::MalformedRequest => "Invalid files. Please check file types and sizes.".to_string(),
            Self::Unauthenticated => "Authentication failed. Please log in again.".to_string(),
            Self::NotFound => "Property not found. Please check the property ID.".to_string(),
            Self::Timeout => "Request timed out. Please try again with smaller files.".to_string(),
            Self::Network(_) => "Network error. Please check your connection.".to_string(),
            Self::Server(status) => format!("Server error ({status}). Please try again later."),
            Self::Rejected(msg) => msg.clone(),
            Self::Body(_) => "Unexpected response from server.".to_string(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::from_status(status)
        } else if e.is_decode() {
            Self::Body(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Reason a local file (or batch) was refused before reaching the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationReason {
    UnsupportedType(String),
    TooLarge { size: u64, max: u64 },
    Empty,
    CapacityExceeded { max: usize },
    EmptyBatch,
    MissingTarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Name of the offending file, `None` for batch level failures.
    pub file: Option<String>,
    pub reason: ValidationReason,
}

impl ValidationError {
    pub fn file(name: impl Into<String>, reason: ValidationReason) -> Self {
        Self {
            file: Some(name.into()),
            reason,
        }
    }

    pub fn batch(reason: ValidationReason) -> Self {
        Self { file: None, reason }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}: ", file)?;
        }
        match &self.reason {
            ValidationReason::UnsupportedType(t) => write!(
                f,
                "Invalid file type ({t}). Only JPEG, PNG, and WebP are allowed."
            ),
            ValidationReason::TooLarge { max, .. } => write!(
                f,
                "File too large. Maximum size is {}.",
                crate::util::format_file_size(*max)
            ),
            ValidationReason::Empty => write!(f, "File is empty."),
            ValidationReason::CapacityExceeded { max } => {
                write!(f, "Maximum {max} files allowed.")
            }
            ValidationReason::EmptyBatch => {
                write!(f, "Please select at least one file to upload.")
            }
            ValidationReason::MissingTarget => write!(f, "Property ID is required for upload."),
        }
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Self::new(ErrorKind::Validation(e))
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::new(ErrorKind::Transport(e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::new(ErrorKind::Transport(e.into()))
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Self::new(ErrorKind::ImageError(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::JsonError(e))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Self::new(ErrorKind::Base64Error(e))
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::new(ErrorKind::UrlParseError(e))
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::new(ErrorKind::ConfigError(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::StdIoError(e))
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Self::new(ErrorKind::Other(e))
    }
}

impl From<ErrorKind> for Error {
    fn from(k: ErrorKind) -> Self {
        Self::new(k)
    }
}

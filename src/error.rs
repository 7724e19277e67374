//! Error types for capture runs

use crate::TabId;
use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing or stitching a page
#[derive(Error, Debug)]
pub enum Error {
    /// The tab shows a restricted/internal URL that cannot be captured
    #[error("Cannot capture browser internal pages: {0}")]
    Unsupported(String),

    /// The tab no longer exists
    #[error("Tab not found: {0}")]
    NotFound(TabId),

    /// A request/response round trip exceeded its budget
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Every segment capture failed
    #[error("No segments were captured successfully")]
    CaptureEmpty,

    /// The page agent did not answer the metrics request twice in a row
    #[error("Page agent unresponsive: {0}")]
    AgentUnresponsive(String),

    /// Injecting the page agent failed
    #[error("Agent injection failed: {0}")]
    Injection(String),

    /// The message could not be delivered to the tab's agent
    #[error("Messaging failed: {0}")]
    Messaging(String),

    /// The agent answered with something other than what was asked for
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Tab or window control failed (focus, activation, visible capture)
    #[error("Platform error: {0}")]
    Platform(String),

    /// Decoding, scaling or encoding an image failed
    #[error("Rendering failed: {0}")]
    Render(String),

    /// Reading or writing persisted results failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`Error`], used by the capture policy and in
/// assertions where the payload does not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unsupported,
    NotFound,
    Timeout,
    CaptureEmpty,
    AgentUnresponsive,
    Injection,
    Messaging,
    Protocol,
    Platform,
    Render,
    Storage,
    Config,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::CaptureEmpty => ErrorKind::CaptureEmpty,
            Error::AgentUnresponsive(_) => ErrorKind::AgentUnresponsive,
            Error::Injection(_) => ErrorKind::Injection,
            Error::Messaging(_) => ErrorKind::Messaging,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Platform(_) => ErrorKind::Platform,
            Error::Render(_) => ErrorKind::Render,
            Error::Storage(_) => ErrorKind::Storage,
            Error::ConfigError(_) => ErrorKind::Config,
            #[cfg(feature = "cdp")]
            Error::CdpError(_) => ErrorKind::Platform,
            Error::Other(_) => ErrorKind::Other,
        }
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

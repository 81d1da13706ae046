//! Error types for the remote layer, and their mapping to user-facing categories

use thiserror::Error;
use url::Url;

/// Anything that can go wrong while talking to a CardDAV server
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The server answered with a non-success status
    #[error("HTTP {status} on {url}")]
    Http { status: reqwest::StatusCode, url: Url },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response did not have the WebDAV shape we expected
    #[error("invalid DAV response: {0}")]
    Dav(String),

    #[error("malformed vCard data: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

impl From<minidom::Error> for RemoteError {
    fn from(err: minidom::Error) -> Self {
        RemoteError::Dav(err.to_string())
    }
}

impl From<url::ParseError> for RemoteError {
    fn from(err: url::ParseError) -> Self {
        RemoteError::Dav(format!("invalid href in response: {}", err))
    }
}

impl RemoteError {
    /// Whether retrying this error makes sense at all.
    ///
    /// This is the default predicate of [`crate::retry::with_retry`]: HTTP 5xx
    /// and 429 are transient, so are transport-level failures and anything
    /// whose message smells like a network hiccup.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Http { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            RemoteError::Network(err) => {
                err.is_timeout() || err.is_connect() || message_looks_transient(&err.to_string())
            }
            RemoteError::Dav(_) | RemoteError::Malformed(_) => false,
            RemoteError::Other(msg) => message_looks_transient(msg),
        }
    }
}

fn message_looks_transient(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    [
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "connection closed",
        "broken pipe",
        "dns",
        "unreachable",
        "temporarily unavailable",
    ]
    .iter()
    .any(|pattern| msg.contains(pattern))
}

fn message_looks_malformed(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    ["parse", "malformed", "invalid", "unexpected", "syntax"]
        .iter()
        .any(|pattern| msg.contains(pattern))
}

/// A coarse, user-displayable classification of a sync failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Auth,
    RateLimited,
    Server,
    NotFound,
    Network,
    Malformed,
    Unknown,
}

impl ErrorCategory {
    /// The stable message shown to users (and persisted on the connection).
    /// Raw error contents never leak into these.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCategory::Auth => "Authentication failed. Check the username and password for this connection.",
            ErrorCategory::RateLimited => "The server is rate-limiting requests. Synchronization will be retried later.",
            ErrorCategory::Server => "The server reported an internal error. Synchronization will be retried later.",
            ErrorCategory::NotFound => "The address book was not found on the server. It may have been moved or deleted.",
            ErrorCategory::Network => "Could not reach the server. Check the network connection and the server URL.",
            ErrorCategory::Malformed => "The server sent data that could not be understood.",
            ErrorCategory::Unknown => "Synchronization failed due to an unexpected error.",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        let name = match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimited => "rate-limited",
            ErrorCategory::Server => "server",
            ErrorCategory::NotFound => "not-found",
            ErrorCategory::Network => "network",
            ErrorCategory::Malformed => "malformed",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Classify a remote error. Status rules always win over message rules.
pub fn categorize(err: &RemoteError) -> ErrorCategory {
    match err {
        RemoteError::Http { status, .. } => match status.as_u16() {
            401 | 403 => ErrorCategory::Auth,
            429 => ErrorCategory::RateLimited,
            404 => ErrorCategory::NotFound,
            500..=599 => ErrorCategory::Server,
            _ => ErrorCategory::Unknown,
        },
        RemoteError::Network(_) => ErrorCategory::Network,
        RemoteError::Dav(_) | RemoteError::Malformed(_) => ErrorCategory::Malformed,
        RemoteError::Other(msg) => categorize_message(msg),
    }
}

/// Classify any boxed error: a [`RemoteError`] keeps its precise rules,
/// everything else falls back to message patterns.
pub fn categorize_dyn(err: &(dyn std::error::Error + Send + Sync + 'static)) -> ErrorCategory {
    match err.downcast_ref::<RemoteError>() {
        Some(remote) => categorize(remote),
        None => categorize_message(&err.to_string()),
    }
}

fn categorize_message(msg: &str) -> ErrorCategory {
    if message_looks_transient(msg) {
        ErrorCategory::Network
    } else if message_looks_malformed(msg) {
        ErrorCategory::Malformed
    } else {
        ErrorCategory::Unknown
    }
}

//! Failure classification for login iterations.
//!
//! Failures never abort a run. Each one ends the current iteration, bumps the
//! matching counters and is logged with a stable label so that runs can be
//! compared by failure kind.

use std::fmt;

/// Why an iteration (or its logout step) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Login page GET returned a non-200 status, an empty body, or no response.
    PageUnavailable,

    /// Login page did not contain the anti-forgery token.
    TokenMissing,

    /// Credential POST returned something other than 200/302.
    AuthRejected,

    /// Logout GET returned something other than 200/302.
    LogoutRejected,
}

impl FailureKind {
    /// Stable label for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::PageUnavailable => "page_unavailable",
            FailureKind::TokenMissing => "token_missing",
            FailureKind::AuthRejected => "auth_rejected",
            FailureKind::LogoutRejected => "logout_rejected",
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::PageUnavailable => "Login page unavailable",
            FailureKind::TokenMissing => "Anti-forgery token missing",
            FailureKind::AuthRejected => "Credential submission rejected",
            FailureKind::LogoutRejected => "Logout rejected",
        }
    }

    pub fn all() -> [FailureKind; 4] {
        [
            FailureKind::PageUnavailable,
            FailureKind::TokenMissing,
            FailureKind::AuthRejected,
            FailureKind::LogoutRejected,
        ]
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Coarse classification of a transport-level reqwest error, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Connect,
    Redirect,
    Body,
    Other,
}

impl TransportError {
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout
        } else if error.is_connect() {
            TransportError::Connect
        } else if error.is_redirect() {
            TransportError::Redirect
        } else if error.is_body() || error.is_decode() {
            TransportError::Body
        } else {
            TransportError::Other
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransportError::Timeout => "timeout_error",
            TransportError::Connect => "network_error",
            TransportError::Redirect => "redirect_error",
            TransportError::Body => "body_error",
            TransportError::Other => "other_error",
        }
    }
}

/// True for the statuses the login and logout endpoints answer on success.
pub fn is_accepted_status(status: u16) -> bool {
    status == 200 || status == 302
}

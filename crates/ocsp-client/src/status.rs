//! Revocation status codes

use std::fmt;

use crate::error::OcspError;

/// Outcome of a single revocation-status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Good,
    Revoked,
    Unknown,
    /// Nothing cached for the CertID
    MissedCache,
    /// Cached entry is older than the cache expiry
    CacheExpired,
    /// producedAt/thisUpdate/nextUpdate out of tolerance
    InvalidValidity,
    FailedSubmit,
    FailedResponse,
    FailedExtractResponse,
    FailedParseResponse,
    FailedDecomposeRequest,
    FailedDecodeResponse,
    /// Remote cache server disabled or not configured
    NoServer,
}

impl StatusCode {
    /// `Good`, `Revoked` and `Unknown` end OCSP work for a certificate
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Good | Self::Revoked | Self::Unknown)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A status code with an optional diagnostic
#[derive(Debug, Clone)]
pub struct Status {
    pub code: StatusCode,
    pub error: Option<OcspError>,
}

impl Status {
    pub fn good() -> Self {
        Self {
            code: StatusCode::Good,
            error: None,
        }
    }

    pub fn with_error(code: StatusCode, error: impl Into<OcspError>) -> Self {
        Self {
            code,
            error: Some(error.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.code.is_terminal()
    }

    /// The diagnostic, or a generic one naming the code
    pub fn into_error(self) -> OcspError {
        let code = self.code;
        self.error
            .unwrap_or_else(|| OcspError::Responder(format!("OCSP status {code}")))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "{}: {}", self.code, err),
            None => write!(f, "{}", self.code),
        }
    }
}

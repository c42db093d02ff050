//! Error types for OCSP revocation checking
//!
//! [`TransportError`] is produced by the HTTP seam and classified by the retry
//! engine. [`OcspError`] is what callers of the client see. Both are `Clone`
//! so they can ride along inside a [`Status`](crate::Status).

use ocsp_proto::ProtoError;

/// Classified HTTP transport failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Deadline exceeded while waiting for the responder
    #[error("request timed out")]
    Timeout,

    /// Caller cancelled the operation
    #[error("request cancelled")]
    Cancelled,

    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// The responder's own TLS certificate was reported revoked
    #[error("OCSP status revoked: {0}")]
    Revoked(String),

    /// The responder's TLS certificate is invalid
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The responder's TLS certificate chains to an unknown authority
    #[error("certificate signed by unknown authority: {0}")]
    UnknownAuthority(String),

    /// The responder's TLS certificate has expired
    #[error("certificate has expired: {0}")]
    Expired(String),

    /// Responder answered with an unexpected HTTP status
    #[error("HTTP code is not OK: {0}")]
    Http(u16),

    /// The response body could not be read to the end
    #[error("failed to read response body: {0}")]
    Body(String),

    /// The response body exceeds the configured limit
    #[error("response too large (max: {max} bytes)")]
    TooLarge { max: usize },

    /// Any other transport failure
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the retry engine should try again after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Timeout
                | Self::Cancelled
                | Self::Revoked(_)
                | Self::InvalidCertificate(_)
                | Self::UnknownAuthority(_)
                | Self::Expired(_)
                | Self::TooLarge { .. }
        )
    }

    /// Whether the exchange succeeded but its body was unusable
    pub fn is_body_failure(&self) -> bool {
        matches!(self, Self::Body(_) | Self::TooLarge { .. })
    }
}

/// Errors surfaced by the OCSP client
#[derive(Debug, Clone, thiserror::Error)]
pub enum OcspError {
    /// The certificate has been revoked
    #[error("certificate with serial number {serial} has been revoked")]
    Revoked { serial: String },

    /// The responder does not know the certificate
    #[error("unknown OCSP status for cert with serial number {serial}")]
    UnknownStatus { serial: String },

    /// Neither an override list nor the certificate's AIA names a responder
    #[error("no OCSP responder URL: subject {subject}")]
    NoResponder { subject: String },

    /// The chain does not end in a self-signed root and no trust anchor matches
    #[error("failed to look up root CA for issuer of {subject}")]
    RootCaLookup { subject: String },

    /// Response is outside its validity window
    #[error("invalid validity: {0}")]
    InvalidValidity(String),

    /// Responder answered with something other than a usable status
    #[error("OCSP responder failure: {0}")]
    Responder(String),

    /// HTTP transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed request or response DER
    #[error("OCSP protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// The response signature does not chain to the issuer
    #[error("OCSP response verification failed: {0}")]
    Verification(ProtoError),

    /// Cache snapshot could not be encoded or decoded
    #[error("cache error: {0}")]
    Cache(String),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl OcspError {
    pub fn is_revoked(&self) -> bool {
        matches!(self, Self::Revoked { .. })
    }

    /// Errors that reject a chain in both failure modes
    ///
    /// A forged or mis-signed response, a chain with no trust anchor and a
    /// certificate with no responder are never waved through by fail-open.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            Self::Verification(_) | Self::RootCaLookup { .. } | Self::NoResponder { .. } | Self::Config(_)
        )
    }
}

impl From<crate::storage::StorageError> for OcspError {
    fn from(err: crate::storage::StorageError) -> Self {
        OcspError::Storage(err.to_string())
    }
}

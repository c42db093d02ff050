//! Wire-layer error types
//!
//! Errors raised while encoding requests, decoding CertIDs, or parsing and
//! verifying OCSP responses.

/// Errors that can occur in the OCSP wire layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    /// DER structure did not match the expected ASN.1 shape
    #[error("malformed {0}")]
    Malformed(String),

    /// CertID hash algorithm OID is not one of SHA-1/256/384/512
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),

    /// Signature algorithm (or key/curve pairing) is not supported
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedSignatureAlgorithm(String),

    /// Signature did not verify
    #[error("signature verification failed: {0}")]
    BadSignature(String),

    /// Certificate could not be parsed
    #[error("certificate parsing error: {0}")]
    Certificate(String),

    /// Cache key string is not valid base64 or carries a bad serial
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// The response does not contain a status for the requested certificate
    #[error("response does not cover serial number {0}")]
    SerialMismatch(String),

    /// The responder did not answer with `successful`
    #[error("OCSP responder returned status {0}")]
    ResponderStatus(String),
}

//! OCSP (Online Certificate Status Protocol) wire layer - RFC 6960
//!
//! This crate implements the synchronous, I/O-free half of an OCSP client:
//!
//! - **CertID codec**: the four-tuple naming a certificate, in a hashable
//!   cache-key form that round-trips to DER ([`CertId`])
//! - **Request building**: unsigned single-certificate `OCSPRequest`s
//!   ([`OcspRequestBuilder`])
//! - **Response parsing**: `OCSPResponse` / `BasicOCSPResponse` decoding and
//!   signature verification, including delegated responders ([`OcspResponse`])
//! - **Certificates**: an owned view over `x509-parser` output exposing the
//!   fields OCSP needs ([`Certificate`])
//!
//! Transport, caching, retry and policy live in `ocsp-client`.
//!
//! # Request/Response Flow
//!
//! 1. **Build Request**: CertID from the subject serial and issuer name/key hashes
//! 2. **HTTP POST**: DER request to the responder URL from the subject's AIA extension
//! 3. **Parse Response**: decode the DER `OCSPResponse`
//! 4. **Verify**: check the signature against the issuer (or a delegated responder)
//! 5. **Find**: select the `SingleResponse` matching the requested CertID
//!
//! # Example
//!
//! ```no_run
//! use ocsp_proto::{Certificate, OcspRequestBuilder, OcspResponse};
//!
//! # fn example(leaf_der: &[u8], issuer_der: &[u8], response_der: &[u8])
//! #     -> Result<(), ocsp_proto::ProtoError> {
//! let leaf = Certificate::from_der(leaf_der)?;
//! let issuer = Certificate::from_der(issuer_der)?;
//!
//! let builder = OcspRequestBuilder::new(&leaf, &issuer);
//! let request = builder.build();
//! let cert_id = builder.cert_id();
//! # let _ = request;
//!
//! let response = OcspResponse::parse(response_der)?;
//! let basic = response.basic()?;
//! basic.verify(&issuer, chrono::Utc::now())?;
//! println!("{:?}", basic.find(&cert_id)?.status);
//! # Ok(())
//! # }
//! ```

pub mod cert_id;
pub mod certificate;
mod der;
pub mod error;
pub mod request;
pub mod response;
mod signature;

pub use cert_id::{CertId, HashAlgorithm};
pub use certificate::Certificate;
pub use error::ProtoError;
pub use request::OcspRequestBuilder;
pub use response::{
    BasicResponse, CertificateStatus, OcspResponse, OcspResponseStatus, SingleResponse,
};

//! OCSP request building
//!
//! ```asn1
//! OCSPRequest ::= SEQUENCE {
//!     tbsRequest      TBSRequest,
//!     optionalSignature   [0] EXPLICIT Signature OPTIONAL
//! }
//!
//! TBSRequest ::= SEQUENCE {
//!     version             [0] EXPLICIT Version DEFAULT v1,
//!     requestorName       [1] EXPLICIT GeneralName OPTIONAL,
//!     requestList         SEQUENCE OF Request,
//!     requestExtensions   [2] EXPLICIT Extensions OPTIONAL
//! }
//!
//! Request ::= SEQUENCE {
//!     reqCert             CertID,
//!     singleRequestExtensions [0] EXPLICIT Extensions OPTIONAL
//! }
//! ```
//!
//! Requests are unsigned and carry a single certificate.

use num_bigint::BigInt;

use crate::cert_id::{encode_cert_id, CertId, HashAlgorithm};
use crate::certificate::Certificate;
use crate::der;

/// OCSP nonce extension (1.3.6.1.5.5.7.48.1.2)
const NONCE_OID: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1, 2];

/// OCSP request builder
///
/// Builds a minimal unsigned OCSP request for one subject/issuer pair.
#[derive(Debug, Clone)]
pub struct OcspRequestBuilder {
    /// Subject serial, two's complement
    serial_number: Vec<u8>,
    /// Issuer subject DN (raw DER), hashed into issuerNameHash
    issuer_name: Vec<u8>,
    /// Issuer subjectPublicKey bits, hashed into issuerKeyHash
    issuer_key: Vec<u8>,
    hash_algorithm: HashAlgorithm,
    nonce: Option<Vec<u8>>,
}

impl OcspRequestBuilder {
    /// Create a request builder for `subject` issued by `issuer`
    ///
    /// The hash algorithm defaults to SHA-1.
    pub fn new(subject: &Certificate, issuer: &Certificate) -> Self {
        Self {
            serial_number: subject.serial().to_signed_bytes_be(),
            issuer_name: issuer.raw_subject().to_vec(),
            issuer_key: issuer.public_key_bits().to_vec(),
            hash_algorithm: HashAlgorithm::default(),
            nonce: None,
        }
    }

    pub fn with_hash(mut self, hash_algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = hash_algorithm;
        self
    }

    /// Add a nonce for replay protection
    pub fn with_nonce(mut self, nonce: Vec<u8>) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// The CertID this request asks about
    pub fn cert_id(&self) -> CertId {
        CertId::new(
            self.hash_algorithm,
            &self.hash_algorithm.digest(&self.issuer_name),
            &self.hash_algorithm.digest(&self.issuer_key),
            &BigInt::from_signed_bytes_be(&self.serial_number),
        )
    }

    /// Build the DER-encoded OCSPRequest
    pub fn build(&self) -> Vec<u8> {
        let cert_id = encode_cert_id(
            self.hash_algorithm,
            &self.hash_algorithm.digest(&self.issuer_name),
            &self.hash_algorithm.digest(&self.issuer_key),
            &self.serial_number,
        );

        // Request ::= SEQUENCE { reqCert }
        let request = der::sequence(&cert_id);

        // TBSRequest: version and requestorName omitted
        let mut tbs = der::sequence(&request);
        if let Some(ref nonce) = self.nonce {
            tbs.extend_from_slice(&der::explicit_context(2, &nonce_extension(nonce)));
        }

        der::sequence(&der::sequence(&tbs))
    }
}

/// `Extensions` holding a single nonce extension
///
/// The extnValue OCTET STRING wraps the nonce as its own OCTET STRING.
fn nonce_extension(nonce: &[u8]) -> Vec<u8> {
    let mut ext = der::oid(NONCE_OID);
    ext.extend_from_slice(&der::octet_string(&der::octet_string(nonce)));
    der::sequence(&der::sequence(&ext))
}

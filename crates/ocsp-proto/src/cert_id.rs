//! CertID codec
//!
//! A [`CertId`] names a certificate inside OCSP requests and responses:
//!
//! ```asn1
//! CertID ::= SEQUENCE {
//!     hashAlgorithm       AlgorithmIdentifier,
//!     issuerNameHash      OCTET STRING,
//!     issuerKeyHash       OCTET STRING,
//!     serialNumber        INTEGER
//! }
//! ```
//!
//! The in-memory form is value-typed and hashable so it can key the response
//! cache directly: both hashes are kept as base64 strings and the serial as
//! its exact decimal rendering.
//!
//! | Operation | Direction |
//! |-----------|-----------|
//! | [`CertId::extract_from_request`] | OCSPRequest DER → CertId |
//! | [`CertId::encode_key`] | CertId → CertID DER |
//! | [`CertId::decode_key`] | base64 CertID DER → CertId |

use asn1_rs::Tag;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use num_bigint::BigInt;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::der::{self, Reader};
use crate::error::ProtoError;

/// Hash algorithm used for the issuer name and key hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-1 (RFC 6960 default for requests)
    #[default]
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// OID arcs for the AlgorithmIdentifier
    pub fn oid_components(self) -> &'static [u64] {
        match self {
            Self::Sha1 => &[1, 3, 14, 3, 2, 26],
            Self::Sha256 => &[2, 16, 840, 1, 101, 3, 4, 2, 1],
            Self::Sha384 => &[2, 16, 840, 1, 101, 3, 4, 2, 2],
            Self::Sha512 => &[2, 16, 840, 1, 101, 3, 4, 2, 3],
        }
    }

    /// Dotted OID
    pub fn oid(self) -> &'static str {
        match self {
            Self::Sha1 => "1.3.14.3.2.26",
            Self::Sha256 => "2.16.840.1.101.3.4.2.1",
            Self::Sha384 => "2.16.840.1.101.3.4.2.2",
            Self::Sha512 => "2.16.840.1.101.3.4.2.3",
        }
    }

    pub fn from_oid(oid: &str) -> Option<Self> {
        [Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == oid)
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// The OCSP four-tuple identifying a certificate, in cache-key form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertId {
    pub hash_algorithm: HashAlgorithm,
    /// base64 of issuerNameHash
    pub issuer_name_hash: String,
    /// base64 of issuerKeyHash
    pub issuer_key_hash: String,
    /// serialNumber in decimal
    pub serial_number: String,
}

impl CertId {
    pub fn new(
        hash_algorithm: HashAlgorithm,
        issuer_name_hash: &[u8],
        issuer_key_hash: &[u8],
        serial: &BigInt,
    ) -> Self {
        Self {
            hash_algorithm,
            issuer_name_hash: BASE64.encode(issuer_name_hash),
            issuer_key_hash: BASE64.encode(issuer_key_hash),
            serial_number: serial.to_string(),
        }
    }

    /// Pull the first CertID out of a DER-encoded OCSPRequest
    ///
    /// ```asn1
    /// OCSPRequest ::= SEQUENCE { tbsRequest TBSRequest, ... }
    /// TBSRequest  ::= SEQUENCE { [0] version OPTIONAL, [1] requestorName OPTIONAL,
    ///                            requestList SEQUENCE OF Request, ... }
    /// Request     ::= SEQUENCE { reqCert CertID, ... }
    /// ```
    pub fn extract_from_request(request: &[u8]) -> Result<Self, ProtoError> {
        let mut ocsp_request = Reader::sequence_of(request, "OCSPRequest")?;
        let tbs = ocsp_request.expect(Tag::Sequence, "TBSRequest")?;

        let mut tbs = Reader::new(tbs.data);
        tbs.optional_context(0, "TBSRequest.version")?;
        tbs.optional_context(1, "TBSRequest.requestorName")?;

        let list = tbs.expect(Tag::Sequence, "requestList")?;
        let mut list = Reader::new(list.data);
        let first = list.expect(Tag::Sequence, "Request")?;

        let mut single = Reader::new(first.data);
        let (_, raw) = single.next_raw("reqCert")?;
        Self::parse(raw)
    }

    /// Parse a DER-encoded CertID structure
    pub fn parse(der: &[u8]) -> Result<Self, ProtoError> {
        let mut fields = Reader::sequence_of(der, "CertID")?;

        let alg = fields.expect(Tag::Sequence, "CertID.hashAlgorithm")?;
        let mut alg = Reader::new(alg.data);
        let oid = der::oid_string(&alg.expect(Tag::Oid, "hashAlgorithm.algorithm")?);
        let hash_algorithm = HashAlgorithm::from_oid(&oid)
            .ok_or(ProtoError::UnsupportedHashAlgorithm(oid))?;

        let name_hash = fields.expect(Tag::OctetString, "CertID.issuerNameHash")?;
        let key_hash = fields.expect(Tag::OctetString, "CertID.issuerKeyHash")?;
        let serial = fields.expect(Tag::Integer, "CertID.serialNumber")?;
        if serial.data.is_empty() {
            return Err(ProtoError::Malformed("CertID.serialNumber: empty".into()));
        }

        Ok(Self::new(
            hash_algorithm,
            name_hash.data,
            key_hash.data,
            &BigInt::from_signed_bytes_be(serial.data),
        ))
    }

    /// Rebuild the CertID DER
    ///
    /// `AlgorithmIdentifier.parameters` is written as an explicit NULL.
    pub fn encode_key(&self) -> Result<Vec<u8>, ProtoError> {
        let name_hash = BASE64
            .decode(&self.issuer_name_hash)
            .map_err(|e| ProtoError::InvalidKey(format!("issuer name hash: {e}")))?;
        let key_hash = BASE64
            .decode(&self.issuer_key_hash)
            .map_err(|e| ProtoError::InvalidKey(format!("issuer key hash: {e}")))?;
        let serial = self.serial()?;

        Ok(encode_cert_id(
            self.hash_algorithm,
            &name_hash,
            &key_hash,
            &serial.to_signed_bytes_be(),
        ))
    }

    /// Parse the base64 CertID DER used as the persisted cache key
    pub fn decode_key(key: &str) -> Result<Self, ProtoError> {
        let der = BASE64
            .decode(key)
            .map_err(|e| ProtoError::InvalidKey(format!("key is not base64: {e}")))?;
        Self::parse(&der)
    }

    /// base64 of [`encode_key`](Self::encode_key)
    pub fn to_key_string(&self) -> Result<String, ProtoError> {
        self.encode_key().map(|der| BASE64.encode(der))
    }

    pub fn serial(&self) -> Result<BigInt, ProtoError> {
        self.serial_number
            .parse::<BigInt>()
            .map_err(|e| ProtoError::InvalidKey(format!("serial number: {e}")))
    }

    /// Serial as colon-separated hex, falling back to the decimal form
    pub fn serial_hex(&self) -> String {
        match self.serial() {
            Ok(serial) => crate::certificate::format_serial_hex(&serial),
            Err(_) => self.serial_number.clone(),
        }
    }
}

/// Encode a CertID from raw components
pub(crate) fn encode_cert_id(
    hash_algorithm: HashAlgorithm,
    issuer_name_hash: &[u8],
    issuer_key_hash: &[u8],
    serial_twos_complement: &[u8],
) -> Vec<u8> {
    let mut alg = der::oid(hash_algorithm.oid_components());
    alg.extend_from_slice(&der::null());

    let mut cert_id = der::sequence(&alg);
    cert_id.extend_from_slice(&der::octet_string(issuer_name_hash));
    cert_id.extend_from_slice(&der::octet_string(issuer_key_hash));
    cert_id.extend_from_slice(&der::integer(serial_twos_complement));

    der::sequence(&cert_id)
}

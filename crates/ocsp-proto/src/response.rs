//! OCSP response parsing and verification
//!
//! ```asn1
//! OCSPResponse ::= SEQUENCE {
//!     responseStatus      OCSPResponseStatus,
//!     responseBytes       [0] EXPLICIT ResponseBytes OPTIONAL
//! }
//!
//! BasicOCSPResponse ::= SEQUENCE {
//!     tbsResponseData     ResponseData,
//!     signatureAlgorithm  AlgorithmIdentifier,
//!     signature           BIT STRING,
//!     certs               [0] EXPLICIT SEQUENCE OF Certificate OPTIONAL
//! }
//!
//! ResponseData ::= SEQUENCE {
//!     version             [0] EXPLICIT Version DEFAULT v1,
//!     responderID         ResponderID,
//!     producedAt          GeneralizedTime,
//!     responses           SEQUENCE OF SingleResponse,
//!     responseExtensions  [1] EXPLICIT Extensions OPTIONAL
//! }
//!
//! SingleResponse ::= SEQUENCE {
//!     certID              CertID,
//!     certStatus          CertStatus,
//!     thisUpdate          GeneralizedTime,
//!     nextUpdate          [0] EXPLICIT GeneralizedTime OPTIONAL,
//!     singleExtensions    [1] EXPLICIT Extensions OPTIONAL
//! }
//!
//! CertStatus ::= CHOICE {
//!     good                [0] IMPLICIT NULL,
//!     revoked             [1] IMPLICIT RevokedInfo,
//!     unknown             [2] IMPLICIT UnknownInfo
//! }
//! ```

use asn1_rs::{Class, Tag};
use chrono::{DateTime, Utc};

use crate::cert_id::CertId;
use crate::certificate::Certificate;
use crate::der::{self, Reader};
use crate::error::ProtoError;
use crate::signature;

const BASIC_RESPONSE_OID: &str = "1.3.6.1.5.5.7.48.1.1";
const NONCE_OID: &str = "1.3.6.1.5.5.7.48.1.2";

/// OCSP response status (RFC 6960 Section 2.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspResponseStatus {
    /// Response has valid confirmations
    Successful = 0,
    /// Illegal confirmation request
    MalformedRequest = 1,
    /// Internal error in issuer
    InternalError = 2,
    /// Try again later
    TryLater = 3,
    /// Must sign the request
    SigRequired = 5,
    /// Request unauthorized
    Unauthorized = 6,
}

impl OcspResponseStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Successful),
            1 => Some(Self::MalformedRequest),
            2 => Some(Self::InternalError),
            3 => Some(Self::TryLater),
            5 => Some(Self::SigRequired),
            6 => Some(Self::Unauthorized),
            _ => None,
        }
    }
}

/// Certificate status in a SingleResponse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    /// Certificate is not revoked
    Good,
    /// Certificate has been revoked
    Revoked {
        revocation_time: DateTime<Utc>,
        /// CRLReason code, if present
        reason: Option<u8>,
    },
    /// Responder does not know the certificate
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub status: CertificateStatus,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
}

/// Decoded BasicOCSPResponse
#[derive(Debug, Clone)]
pub struct BasicResponse {
    tbs_raw: Vec<u8>,
    signature_algorithm: String,
    signature: Vec<u8>,
    pub produced_at: DateTime<Utc>,
    pub responses: Vec<SingleResponse>,
    pub nonce: Option<Vec<u8>>,
    /// Certificates embedded by a delegated responder
    pub certificates: Vec<Certificate>,
}

/// Parsed OCSP response
#[derive(Debug, Clone)]
pub struct OcspResponse {
    pub status: OcspResponseStatus,
    /// Present when `status` is `Successful`
    pub basic: Option<BasicResponse>,
}

impl OcspResponse {
    /// Parse an OCSP response from DER-encoded bytes
    pub fn parse(der_bytes: &[u8]) -> Result<Self, ProtoError> {
        let mut outer = Reader::sequence_of(der_bytes, "OCSPResponse")?;

        let status_field = outer.expect(Tag::Enumerated, "responseStatus")?;
        let status = match status_field.data {
            [value] => OcspResponseStatus::from_u8(*value),
            _ => None,
        }
        .ok_or_else(|| ProtoError::Malformed("responseStatus: unknown value".to_string()))?;

        if status != OcspResponseStatus::Successful {
            return Ok(Self { status, basic: None });
        }

        let response_bytes = outer
            .optional_context(0, "responseBytes")?
            .ok_or_else(|| ProtoError::Malformed("OCSP response missing responseBytes".into()))?;
        let mut response_bytes = Reader::sequence_of(response_bytes.data, "ResponseBytes")?;

        let response_type = der::oid_string(&response_bytes.expect(Tag::Oid, "responseType")?);
        if response_type != BASIC_RESPONSE_OID {
            return Err(ProtoError::Malformed(format!(
                "unsupported OCSP response type: {response_type}"
            )));
        }

        let basic = response_bytes.expect(Tag::OctetString, "response")?;
        Ok(Self {
            status,
            basic: Some(BasicResponse::parse(basic.data)?),
        })
    }

    /// The basic response, or an error naming the responder status
    pub fn basic(&self) -> Result<&BasicResponse, ProtoError> {
        self.basic
            .as_ref()
            .ok_or_else(|| ProtoError::ResponderStatus(format!("{:?}", self.status)))
    }
}

impl BasicResponse {
    fn parse(der_bytes: &[u8]) -> Result<Self, ProtoError> {
        let mut basic = Reader::sequence_of(der_bytes, "BasicOCSPResponse")?;

        let (tbs, tbs_raw) = basic.next_raw("tbsResponseData")?;
        if tbs.header.tag() != Tag::Sequence {
            return Err(ProtoError::Malformed("tbsResponseData is not a SEQUENCE".into()));
        }

        let alg = basic.expect(Tag::Sequence, "signatureAlgorithm")?;
        let signature_algorithm =
            der::oid_string(&Reader::new(alg.data).expect(Tag::Oid, "signatureAlgorithm")?);
        let signature = der::bit_string(&basic.expect(Tag::BitString, "signature")?, "signature")?;

        let mut certificates = Vec::new();
        if let Some(certs) = basic.optional_context(0, "certs")? {
            let mut list = Reader::sequence_of(certs.data, "certs")?;
            while !list.is_empty() {
                let (_, raw) = list.next_raw("certs.Certificate")?;
                certificates.push(Certificate::from_der(raw)?);
            }
        }

        let mut data = Reader::new(tbs.data);
        data.optional_context(0, "ResponseData.version")?;
        let responder_id = data.next("responderID")?;
        if responder_id.header.class() != Class::ContextSpecific {
            return Err(ProtoError::Malformed("responderID: expected [1] or [2]".into()));
        }
        let produced_at = der::generalized_time(
            &data.expect(Tag::GeneralizedTime, "producedAt")?,
            "producedAt",
        )?;

        let list = data.expect(Tag::Sequence, "responses")?;
        let mut list = Reader::new(list.data);
        let mut responses = Vec::new();
        while !list.is_empty() {
            let (_, raw) = list.next_raw("SingleResponse")?;
            responses.push(parse_single_response(raw)?);
        }
        if responses.is_empty() {
            return Err(ProtoError::Malformed("no SingleResponse in OCSP response".into()));
        }

        let nonce = match data.optional_context(1, "responseExtensions")? {
            Some(exts) => extract_nonce(exts.data)?,
            None => None,
        };

        Ok(Self {
            tbs_raw: tbs_raw.to_vec(),
            signature_algorithm,
            signature,
            produced_at,
            responses,
            nonce,
            certificates,
        })
    }

    /// Verify the response signature
    ///
    /// The signer is either `issuer` itself or an embedded delegated responder
    /// certificate that `issuer` signed, that is valid at `now`, and that
    /// carries the OCSP Signing extended key usage.
    pub fn verify(&self, issuer: &Certificate, now: DateTime<Utc>) -> Result<(), ProtoError> {
        let by_issuer = signature::verify(
            issuer.public_key(),
            &self.signature_algorithm,
            &self.tbs_raw,
            &self.signature,
        );
        if by_issuer.is_ok() || self.certificates.is_empty() {
            return by_issuer;
        }

        for responder in &self.certificates {
            if responder.verify_signed_by(issuer).is_err() {
                continue;
            }
            if !responder.is_valid_at(now) {
                return Err(ProtoError::BadSignature(format!(
                    "delegated responder certificate {} is expired",
                    responder.subject()
                )));
            }
            if !responder.has_ocsp_signing() {
                return Err(ProtoError::BadSignature(format!(
                    "delegated responder certificate {} lacks OCSP signing usage",
                    responder.subject()
                )));
            }
            return signature::verify(
                responder.public_key(),
                &self.signature_algorithm,
                &self.tbs_raw,
                &self.signature,
            );
        }

        Err(ProtoError::BadSignature(
            "no embedded responder certificate is signed by the issuer".to_string(),
        ))
    }

    /// The SingleResponse for `cert_id`
    ///
    /// Falls back to a matching serial number when the responder answered
    /// with a different hash algorithm.
    pub fn find(&self, cert_id: &CertId) -> Result<&SingleResponse, ProtoError> {
        self.responses
            .iter()
            .find(|single| &single.cert_id == cert_id)
            .or_else(|| {
                self.responses.iter().find(|single| {
                    single.cert_id.hash_algorithm != cert_id.hash_algorithm
                        && single.cert_id.serial_number == cert_id.serial_number
                })
            })
            .ok_or_else(|| ProtoError::SerialMismatch(cert_id.serial_number.clone()))
    }
}

fn parse_single_response(der_bytes: &[u8]) -> Result<SingleResponse, ProtoError> {
    let mut single = Reader::sequence_of(der_bytes, "SingleResponse")?;

    let (_, cert_id_raw) = single.next_raw("certID")?;
    let cert_id = CertId::parse(cert_id_raw)?;

    let status = parse_cert_status(&single.next("certStatus")?)?;
    let this_update = der::generalized_time(
        &single.expect(Tag::GeneralizedTime, "thisUpdate")?,
        "thisUpdate",
    )?;

    let next_update = match single.optional_context(0, "nextUpdate")? {
        Some(wrapped) => {
            let time = Reader::new(wrapped.data).expect(Tag::GeneralizedTime, "nextUpdate")?;
            Some(der::generalized_time(&time, "nextUpdate")?)
        }
        None => None,
    };

    Ok(SingleResponse {
        cert_id,
        status,
        this_update,
        next_update,
    })
}

fn parse_cert_status(field: &asn1_rs::Any<'_>) -> Result<CertificateStatus, ProtoError> {
    if field.header.class() != Class::ContextSpecific {
        return Err(ProtoError::Malformed("certStatus: not context-specific".into()));
    }

    match field.header.tag().0 {
        0 => Ok(CertificateStatus::Good),
        1 => {
            // RevokedInfo ::= SEQUENCE {
            //     revocationTime  GeneralizedTime,
            //     revocationReason [0] EXPLICIT CRLReason OPTIONAL
            // }
            let mut info = Reader::new(field.data);
            let revocation_time = der::generalized_time(
                &info.expect(Tag::GeneralizedTime, "revocationTime")?,
                "revocationTime",
            )?;
            let reason = match info.optional_context(0, "revocationReason")? {
                Some(wrapped) => {
                    let code = Reader::new(wrapped.data).expect(Tag::Enumerated, "CRLReason")?;
                    code.data.last().copied()
                }
                None => None,
            };
            Ok(CertificateStatus::Revoked {
                revocation_time,
                reason,
            })
        }
        2 => Ok(CertificateStatus::Unknown),
        other => Err(ProtoError::Malformed(format!("certStatus: unknown tag [{other}]"))),
    }
}

/// Nonce value from `Extensions`, if the nonce extension is present
fn extract_nonce(extensions: &[u8]) -> Result<Option<Vec<u8>>, ProtoError> {
    let mut list = Reader::sequence_of(extensions, "responseExtensions")?;
    while !list.is_empty() {
        let ext = list.expect(Tag::Sequence, "Extension")?;
        let mut ext = Reader::new(ext.data);
        let extn_id = der::oid_string(&ext.expect(Tag::Oid, "extnID")?);

        let mut value = ext.next("extnValue")?;
        if value.header.tag() == Tag::Boolean {
            value = ext.next("extnValue")?;
        }
        if extn_id != NONCE_OID {
            continue;
        }

        // The nonce is itself an OCTET STRING inside extnValue
        let mut inner = Reader::new(value.data);
        let nonce = match inner.expect(Tag::OctetString, "nonce") {
            Ok(octets) => octets.data.to_vec(),
            Err(_) => value.data.to_vec(),
        };
        return Ok(Some(nonce));
    }
    Ok(None)
}

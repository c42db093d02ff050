//! Owned X.509 certificate view
//!
//! Parses a certificate once with `x509-parser` and keeps the fields the OCSP
//! client needs: raw names for chain linkage and CertID hashing, the serial
//! number, AIA OCSP responder URLs, and validity bounds. Signature checks
//! re-parse the DER on demand.

use std::borrow::Cow;
use std::fmt;

use asn1_rs::Oid;
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::oid_registry::asn1_rs::oid;
use x509_parser::prelude::*;

use crate::error::ProtoError;
use crate::signature::PublicKey;

/// A parsed certificate with owned fields
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    raw_subject: Vec<u8>,
    raw_issuer: Vec<u8>,
    subject: String,
    serial: BigInt,
    ocsp_urls: Vec<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key: PublicKey,
    ocsp_signing: bool,
}

impl Certificate {
    /// Parse a DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self, ProtoError> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| ProtoError::Certificate(format!("Failed to parse certificate: {e}")))?;

        let mut ocsp_urls = Vec::new();
        let mut ocsp_signing = false;
        let ocsp_method = oid!(1.3.6.1.5.5.7.48.1);

        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::AuthorityInfoAccess(aia) => {
                    for access_desc in aia.accessdescs.iter() {
                        if access_desc.access_method != ocsp_method {
                            continue;
                        }
                        if let GeneralName::URI(uri) = &access_desc.access_location {
                            ocsp_urls.push(uri.to_string());
                        }
                    }
                }
                ParsedExtension::ExtendedKeyUsage(eku) => ocsp_signing = eku.ocsp_signing,
                _ => {}
            }
        }

        let spki = cert.public_key();
        let curve = spki
            .algorithm
            .parameters
            .as_ref()
            .filter(|params| params.header.tag() == asn1_rs::Tag::Oid)
            .map(|params| Oid::new(Cow::Borrowed(params.data)).to_id_string());
        let public_key = PublicKey {
            algorithm: spki.algorithm.algorithm.to_id_string(),
            curve,
            bits: spki.subject_public_key.data.to_vec(),
        };

        Ok(Self {
            der: der.to_vec(),
            raw_subject: cert.subject().as_raw().to_vec(),
            raw_issuer: cert.issuer().as_raw().to_vec(),
            subject: cert.subject().to_string(),
            serial: BigInt::from_signed_bytes_be(cert.raw_serial()),
            ocsp_urls,
            not_before: timestamp(cert.validity().not_before.timestamp()),
            not_after: timestamp(cert.validity().not_after.timestamp()),
            public_key,
            ocsp_signing,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn raw_subject(&self) -> &[u8] {
        &self.raw_subject
    }

    pub fn raw_issuer(&self) -> &[u8] {
        &self.raw_issuer
    }

    /// RFC 4514 rendering of the subject, for logs
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn serial(&self) -> &BigInt {
        &self.serial
    }

    /// Serial as colon-separated lowercase hex (`01:ab:ff`)
    pub fn serial_hex(&self) -> String {
        format_serial_hex(&self.serial)
    }

    /// OCSP responder URLs from the Authority Information Access extension
    pub fn ocsp_urls(&self) -> &[String] {
        &self.ocsp_urls
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Carries the OCSP Signing extended key usage
    pub fn has_ocsp_signing(&self) -> bool {
        self.ocsp_signing
    }

    pub(crate) fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The subjectPublicKey BIT STRING contents, as hashed into issuerKeyHash
    pub(crate) fn public_key_bits(&self) -> &[u8] {
        &self.public_key.bits
    }

    /// Verify this certificate's signature with `issuer`'s public key
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), ProtoError> {
        let (_, cert) = parse_x509_certificate(&self.der)
            .map_err(|e| ProtoError::Certificate(e.to_string()))?;
        let (_, issuer_cert) = parse_x509_certificate(&issuer.der)
            .map_err(|e| ProtoError::Certificate(e.to_string()))?;

        cert.verify_signature(Some(issuer_cert.public_key()))
            .map_err(|e| ProtoError::BadSignature(format!("{}: {e}", self.subject)))
    }

    /// Issuer equals subject and the certificate verifies under its own key
    pub fn is_self_signed(&self) -> bool {
        self.raw_issuer == self.raw_subject && self.verify_signed_by(self).is_ok()
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("serial", &self.serial_hex())
            .field("ocsp_urls", &self.ocsp_urls)
            .finish()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Colon-separated lowercase hex of a serial's magnitude (`01:ab:ff`)
pub fn format_serial_hex(serial: &BigInt) -> String {
    let (_, magnitude) = serial.to_bytes_be();
    magnitude
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

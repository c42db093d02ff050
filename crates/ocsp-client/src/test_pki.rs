//! Test fixtures: an rcgen PKI, signed OCSP responses and a scripted HTTP client

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use ocsp_proto::{CertId, Certificate, CertificateStatus, OcspRequestBuilder};
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, SerialNumber,
};
use ring::rand::SystemRandom;
use reqwest::Method;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use url::Url;

use crate::error::TransportError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};

pub(crate) const LEAF_OCSP_URL: &str = "http://ocsp.intermediate.test/";
pub(crate) const INTERMEDIATE_OCSP_URL: &str = "http://ocsp.root.test/";

/// ecdsa-with-SHA256
const ECDSA_SHA256_OID: &[u8] = &[0x06, 0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02];
/// id-pkix-ocsp-basic
const BASIC_RESPONSE_OID: &[u8] = &[
    0x06, 0x09, 0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01,
];

fn tlv(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = body.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes: Vec<u8> = len
            .to_be_bytes()
            .iter()
            .copied()
            .skip_while(|b| *b == 0)
            .collect();
        out.push(0x80 | bytes.len() as u8);
        out.extend_from_slice(&bytes);
    }
    out.extend_from_slice(body);
    out
}

fn seq(parts: &[&[u8]]) -> Vec<u8> {
    tlv(0x30, &parts.concat())
}

fn generalized_time(t: DateTime<Utc>) -> Vec<u8> {
    tlv(0x18, t.format("%Y%m%d%H%M%SZ").to_string().as_bytes())
}

fn aia_extension(url: &str) -> CustomExtension {
    let ocsp_method = [0x06, 0x08, 0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01];
    let mut desc = ocsp_method.to_vec();
    desc.extend_from_slice(&tlv(0x86, url.as_bytes()));
    CustomExtension::from_oid_content(&[1, 3, 6, 1, 5, 5, 7, 1, 1], seq(&[&seq(&[&desc])]))
}

/// An rcgen key with its PKCS#8 document, for signing with ring
pub(crate) struct TestKey {
    pub key: KeyPair,
    pkcs8: Vec<u8>,
}

impl TestKey {
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let doc = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        let pkcs8 = doc.as_ref().to_vec();
        let key = KeyPair::try_from(pkcs8.as_slice()).unwrap();
        Self { key, pkcs8 }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let rng = SystemRandom::new();
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &self.pkcs8, &rng)
            .unwrap();
        pair.sign(&rng, message).unwrap().as_ref().to_vec()
    }
}

fn params(cn: &str, serial: u8, ca: bool) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from(vec![serial, 0x5A]));
    if ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }
    params
}

/// Root → intermediate → leaf, plus a delegated responder under the intermediate
pub(crate) struct TestPki {
    pub root: Certificate,
    pub intermediate: Certificate,
    pub leaf: Certificate,
    pub responder: Certificate,
    pub root_key: TestKey,
    pub intermediate_key: TestKey,
    pub responder_key: TestKey,
}

impl TestPki {
    pub fn new() -> Self {
        let root_key = TestKey::generate();
        let root_params = params("Test Root CA", 0x01, true);
        let root = root_params.self_signed(&root_key.key).unwrap();

        let intermediate_key = TestKey::generate();
        let mut intermediate_params = params("Test Intermediate CA", 0x02, true);
        intermediate_params.custom_extensions = vec![aia_extension(INTERMEDIATE_OCSP_URL)];
        let root_issuer = Issuer::from_params(&root_params, &root_key.key);
        let intermediate = intermediate_params
            .signed_by(&intermediate_key.key, &root_issuer)
            .unwrap();

        let intermediate_issuer = Issuer::from_params(&intermediate_params, &intermediate_key.key);

        let leaf_key = TestKey::generate();
        let mut leaf_params = params("leaf.test", 0x03, false);
        leaf_params.custom_extensions = vec![aia_extension(LEAF_OCSP_URL)];
        let leaf = leaf_params
            .signed_by(&leaf_key.key, &intermediate_issuer)
            .unwrap();

        let responder_key = TestKey::generate();
        let mut responder_params = params("Test OCSP Responder", 0x04, false);
        responder_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::OcspSigning];
        let responder = responder_params
            .signed_by(&responder_key.key, &intermediate_issuer)
            .unwrap();

        Self {
            root: Certificate::from_der(root.der()).unwrap(),
            intermediate: Certificate::from_der(intermediate.der()).unwrap(),
            leaf: Certificate::from_der(leaf.der()).unwrap(),
            responder: Certificate::from_der(responder.der()).unwrap(),
            root_key,
            intermediate_key,
            responder_key,
        }
    }

    /// [leaf, intermediate, root]
    pub fn chain(&self) -> Vec<Certificate> {
        vec![self.leaf.clone(), self.intermediate.clone(), self.root.clone()]
    }

    pub fn issuer_of(&self, subject: &Certificate) -> (&Certificate, &TestKey) {
        if subject == &self.leaf || subject == &self.responder {
            (&self.intermediate, &self.intermediate_key)
        } else {
            (&self.root, &self.root_key)
        }
    }

    pub fn cert_id_for(&self, subject: &Certificate) -> CertId {
        let (issuer, _) = self.issuer_of(subject);
        OcspRequestBuilder::new(subject, issuer).cert_id()
    }

    /// A response signed by the subject's issuer
    pub fn response_for(
        &self,
        subject: &Certificate,
        status: &CertificateStatus,
        this_update: DateTime<Utc>,
        next_update: Option<DateTime<Utc>>,
    ) -> Vec<u8> {
        let (_, key) = self.issuer_of(subject);
        sign_response(&self.cert_id_for(subject), status, this_update, next_update, key, &[])
    }

    /// A Good response valid from an hour ago for another 23 hours
    pub fn good_response(&self, subject: &Certificate) -> Vec<u8> {
        let (this, next) = fresh_window();
        self.response_for(subject, &CertificateStatus::Good, this, next)
    }

    /// Answer an OCSP POST for any certificate in this PKI
    pub fn respond<F>(&self, request: &HttpRequest, status_for: F) -> Result<HttpResponse, TransportError>
    where
        F: Fn(&Certificate) -> CertificateStatus,
    {
        let der = match request.method {
            Method::GET => get_request_der(&request.url)?,
            _ => request.body.clone().unwrap_or_default(),
        };
        let cert_id = CertId::extract_from_request(&der)
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let subject = [&self.leaf, &self.intermediate, &self.responder]
            .into_iter()
            .find(|cert| cert.serial().to_string() == cert_id.serial_number)
            .ok_or_else(|| TransportError::Other("unknown serial".to_string()))?;
        let (this, next) = fresh_window();
        let (_, key) = self.issuer_of(subject);
        Ok(ok(sign_response(
            &cert_id,
            &status_for(subject),
            this,
            next,
            key,
            &[],
        )))
    }
}

/// DER request carried in the last path segment of a GET URL
pub(crate) fn get_request_der(url: &Url) -> Result<Vec<u8>, TransportError> {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    BASE64
        .decode(segment.replace("%2F", "/"))
        .map_err(|e| TransportError::Other(format!("bad GET request path: {e}")))
}

pub(crate) fn fresh_window() -> (DateTime<Utc>, Option<DateTime<Utc>>) {
    let now = Utc::now();
    (now - Duration::hours(1), Some(now + Duration::hours(23)))
}

/// DER OCSPResponse for one SingleResponse, signed ECDSA P-256/SHA-256
pub(crate) fn sign_response(
    cert_id: &CertId,
    status: &CertificateStatus,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    key: &TestKey,
    embedded: &[&Certificate],
) -> Vec<u8> {
    let cert_status = match status {
        CertificateStatus::Good => vec![0x80, 0x00],
        CertificateStatus::Revoked {
            revocation_time, ..
        } => tlv(0xA1, &generalized_time(*revocation_time)),
        CertificateStatus::Unknown => vec![0x82, 0x00],
    };
    let next = next_update
        .map(|t| tlv(0xA0, &generalized_time(t)))
        .unwrap_or_default();
    let single = seq(&[
        &cert_id.encode_key().unwrap(),
        &cert_status,
        &generalized_time(this_update),
        &next,
    ]);

    let responder_id = tlv(0xA2, &tlv(0x04, &[0x11; 20]));
    let tbs = seq(&[&responder_id, &generalized_time(Utc::now()), &seq(&[&single])]);

    let mut signature = vec![0x00];
    signature.extend_from_slice(&key.sign(&tbs));

    let certs = if embedded.is_empty() {
        Vec::new()
    } else {
        let ders: Vec<&[u8]> = embedded.iter().map(|c| c.der()).collect();
        tlv(0xA0, &seq(&ders))
    };
    let basic = seq(&[
        &tbs,
        &seq(&[ECDSA_SHA256_OID]),
        &tlv(0x03, &signature),
        &certs,
    ]);

    let bytes = seq(&[BASIC_RESPONSE_OID, &tlv(0x04, &basic)]);
    seq(&[&[0x0A, 0x01, 0x00], &tlv(0xA0, &bytes)])
}

/// DER OCSPResponse carrying only a non-successful status
pub(crate) fn error_response(status: u8) -> Vec<u8> {
    seq(&[&[0x0A, 0x01, status]])
}

pub(crate) fn ok(body: Vec<u8>) -> HttpResponse {
    HttpResponse {
        status: 200,
        body,
    }
}

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

/// Scripted [`HttpClient`] that records every request
pub(crate) struct MockHttpClient {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: TransportError) -> Arc<Self> {
        Self::new(move |_| Err(error.clone()))
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let result = (self.handler)(&request);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        result
    }
}

//! Revocation-checking TLS transport
//!
//! [`OcspServerCertVerifier`] is a rustls `ServerCertVerifier` that wraps
//! `WebPkiServerVerifier` and adds OCSP checking of the verified chain:
//!
//! 1. **Standard validation**: webpki checks the chain, expiry and hostname
//! 2. **Chain ordering**: the presented certificates are ordered leaf first
//!    by issuer/subject linkage, completed from the configured CAs
//! 3. **Revocation**: [`OcspClient::verify_peer_certificate`] applies the
//!    fail-open/fail-closed policy
//!
//! The rustls callback is synchronous, so the async check runs on the
//! current multi-thread runtime through `block_in_place`, or otherwise on a
//! private current-thread runtime driven from a scoped thread. The private
//! runtime is built on first use and kept by the verifier, so pooled
//! responder connections survive from one handshake to the next.
//!
//! # Example
//!
//! ```no_run
//! use ocsp_client::{new_transport, ClientConfig, OcspClient, VerifyConfig};
//! use std::sync::Arc;
//!
//! # fn example(root: ocsp_proto::Certificate) -> Result<(), ocsp_client::OcspError> {
//! let client = Arc::new(OcspClient::new(ClientConfig::default())?);
//! let conf = VerifyConfig::fail_closed().with_extra_cas(vec![root]);
//! let http = new_transport(client, conf)?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::{Arc, OnceLock};

use ocsp_proto::Certificate;
use pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{CertificateError, DigitallySignedStruct, Error as RustlsError, RootCertStore, SignatureScheme};
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::OcspClient;
use crate::config::VerifyConfig;
use crate::error::OcspError;

/// Server certificate verifier with OCSP revocation checking
#[derive(Debug)]
pub struct OcspServerCertVerifier {
    /// Underlying WebPki verifier for standard validation
    webpki_verifier: Arc<dyn ServerCertVerifier>,

    client: Arc<OcspClient>,
    conf: VerifyConfig,

    /// Cancels in-flight revocation checks
    cancel: CancellationToken,

    /// Drives checks made outside a multi-thread runtime
    runtime: OnceLock<Runtime>,
}

impl OcspServerCertVerifier {
    /// Create a verifier trusting `conf.extra_cas`
    ///
    /// # Errors
    ///
    /// Returns `OcspError::Config` when no CA is configured or webpki rejects
    /// one of them.
    pub fn new(client: Arc<OcspClient>, conf: VerifyConfig) -> Result<Self, OcspError> {
        let mut roots = RootCertStore::empty();
        for ca in &conf.extra_cas {
            roots
                .add(CertificateDer::from(ca.der().to_vec()))
                .map_err(|e| OcspError::Config(format!("Invalid trust anchor {}: {e}", ca.subject())))?;
        }

        let webpki_verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider())
            .build()
            .map_err(|e| OcspError::Config(format!("Failed to create WebPki verifier: {e}")))?;

        Ok(Self::with_webpki_verifier(client, conf, webpki_verifier))
    }

    /// Create verifier with custom WebPki verifier (for testing/advanced use)
    pub fn with_webpki_verifier(
        client: Arc<OcspClient>,
        conf: VerifyConfig,
        webpki_verifier: Arc<dyn ServerCertVerifier>,
    ) -> Self {
        Self {
            webpki_verifier,
            client,
            conf,
            cancel: CancellationToken::new(),
            runtime: OnceLock::new(),
        }
    }

    /// Use `cancel` to abort revocation checks, e.g. on shutdown
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_revocation(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> Result<(), RustlsError> {
        let leaf = parse(end_entity)?;
        let mut pool = intermediates.iter().map(parse).collect::<Result<Vec<_>, _>>()?;
        pool.extend(self.conf.extra_cas.iter().cloned());

        let chain = order_chain(leaf, &pool);
        debug!(
            subject = chain[0].subject(),
            depth = chain.len(),
            "checking OCSP revocation status"
        );

        let chains = [chain];
        let verdict = self
            .block_on(self.client.verify_peer_certificate(&chains, &self.conf, &self.cancel))
            .and_then(|result| result);
        verdict.map_err(to_rustls_error)
    }

    /// Drive `future` to completion from synchronous code
    fn block_on<F>(&self, future: F) -> Result<F::Output, OcspError>
    where
        F: Future + Send,
        F::Output: Send,
    {
        if let Ok(handle) = Handle::try_current() {
            if handle.runtime_flavor() == RuntimeFlavor::MultiThread {
                return Ok(tokio::task::block_in_place(|| handle.block_on(future)));
            }
        }

        std::thread::scope(|scope| {
            scope
                .spawn(|| -> Result<F::Output, OcspError> { Ok(self.runtime()?.block_on(future)) })
                .join()
                .unwrap_or_else(|_| Err(OcspError::Config("revocation check panicked".to_string())))
        })
    }

    fn runtime(&self) -> Result<&Runtime, OcspError> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime);
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| OcspError::Config(format!("Failed to start runtime: {e}")))?;
        // a concurrent first check may have installed one already
        let _ = self.runtime.set(runtime);
        self.runtime
            .get()
            .ok_or_else(|| OcspError::Config("revocation runtime unavailable".to_string()))
    }
}

impl Drop for OcspServerCertVerifier {
    fn drop(&mut self) {
        // the verifier is often dropped from async code, where a plain
        // runtime drop panics
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl ServerCertVerifier for OcspServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        let verified = self.webpki_verifier.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;
        self.check_revocation(end_entity, intermediates)?;
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        self.webpki_verifier.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        self.webpki_verifier.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki_verifier.supported_verify_schemes()
    }
}

/// rustls client configuration using `verifier`
pub fn tls_config(verifier: Arc<dyn ServerCertVerifier>) -> Result<rustls::ClientConfig, OcspError> {
    let config = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| OcspError::Config(format!("Failed to select TLS versions: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}

/// HTTP client whose TLS handshakes check server chains with `client`
pub fn new_transport(client: Arc<OcspClient>, conf: VerifyConfig) -> Result<reqwest::Client, OcspError> {
    let verifier = Arc::new(OcspServerCertVerifier::new(client, conf)?);
    reqwest::Client::builder()
        .use_preconfigured_tls(tls_config(verifier)?)
        .build()
        .map_err(|e| OcspError::Config(format!("Failed to create HTTP client: {e}")))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn parse(der: &CertificateDer<'_>) -> Result<Certificate, RustlsError> {
    Certificate::from_der(der.as_ref())
        .map_err(|_| RustlsError::InvalidCertificate(CertificateError::BadEncoding))
}

/// Order `leaf` and `pool` into a chain, leaf first
///
/// Follows issuer → subject links and stops at a self-signed certificate or
/// when no issuer is found.
pub(crate) fn order_chain(leaf: Certificate, pool: &[Certificate]) -> Vec<Certificate> {
    let mut chain = vec![leaf];
    while chain.len() <= pool.len() {
        let last = &chain[chain.len() - 1];
        if last.is_self_signed() {
            break;
        }
        let next = pool
            .iter()
            .find(|c| c.raw_subject() == last.raw_issuer() && !chain.contains(c))
            .cloned();
        match next {
            Some(next) => chain.push(next),
            None => break,
        }
    }
    chain
}

fn to_rustls_error(err: OcspError) -> RustlsError {
    match err {
        OcspError::Revoked { .. } => RustlsError::InvalidCertificate(CertificateError::Revoked),
        other => RustlsError::General(other.to_string()),
    }
}

//! HTTP seam for OCSP and cache-server traffic
//!
//! [`HttpClient`] is the single method the rest of the crate needs from an
//! HTTP stack. [`ReqwestHttpClient`] is the production implementation and
//! classifies failures into [`TransportError`] so the retry engine can decide
//! whether to try again.

use std::error::Error as StdError;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use rustls::CertificateError;
use tracing::debug;
use url::Url;

use crate::error::{OcspError, TransportError};

/// An outgoing HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// A fully-read HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Executes one HTTP exchange
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpClient`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    /// HTTP client (reused for connection pooling)
    client: reqwest::Client,
    max_response_size: usize,
}

impl ReqwestHttpClient {
    pub fn new(max_response_size: usize) -> Result<Self, OcspError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| OcspError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, max_response_size))
    }

    /// Wrap an already-configured client
    pub fn with_client(client: reqwest::Client, max_response_size: usize) -> Self {
        Self {
            client,
            max_response_size,
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let mut response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status().as_u16();

        let too_large = TransportError::TooLarge {
            max: self.max_response_size,
        };
        if let Some(len) = response.content_length() {
            if len > self.max_response_size as u64 {
                debug!(status, len, "response exceeds size limit");
                return Err(too_large);
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| classify_body(&e))? {
            if body.len() + chunk.len() > self.max_response_size {
                return Err(too_large);
            }
            body.extend_from_slice(&chunk);
        }

        debug!(status, bytes = body.len(), "HTTP response received");
        Ok(HttpResponse { status, body })
    }
}

/// Classify a reqwest failure
fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }
    if let Some(tls) = find_rustls_error(err) {
        return from_rustls(tls);
    }
    if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// Classify a failure while streaming the body
fn classify_body(err: &reqwest::Error) -> TransportError {
    if err.is_body() || err.is_decode() {
        TransportError::Body(err.to_string())
    } else {
        classify(err)
    }
}

/// Walk the source chain for a rustls error, looking inside `io::Error`s
fn find_rustls_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a rustls::Error> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            return Some(tls);
        }
        if let Some(inner) = e
            .downcast_ref::<std::io::Error>()
            .and_then(|io| io.get_ref())
        {
            if let Some(tls) = inner.downcast_ref::<rustls::Error>() {
                return Some(tls);
            }
        }
        current = e.source();
    }
    None
}

pub(crate) fn from_rustls(err: &rustls::Error) -> TransportError {
    match err {
        rustls::Error::InvalidCertificate(CertificateError::Revoked) => {
            TransportError::Revoked(err.to_string())
        }
        rustls::Error::InvalidCertificate(CertificateError::Expired) => {
            TransportError::Expired(err.to_string())
        }
        rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer) => {
            TransportError::UnknownAuthority(err.to_string())
        }
        rustls::Error::InvalidCertificate(_) => TransportError::InvalidCertificate(err.to_string()),
        _ => TransportError::Other(err.to_string()),
    }
}

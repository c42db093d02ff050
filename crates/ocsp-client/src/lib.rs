//! OCSP revocation client
//!
//! Runtime half of the OCSP stack, built on `ocsp-proto`:
//!
//! - **Client**: per-certificate status lookup and fail-open/fail-closed
//!   chain verification ([`OcspClient`])
//! - **Cache**: bounded CertID → response cache with expiry, a dirty flag,
//!   persistence through [`Storage`] and an optional remote cache server
//! - **Retry**: decorrelated-jitter backoff under a total timeout, with
//!   cancellation ([`retry`])
//! - **Transport**: a rustls verifier and `reqwest` client that check server
//!   chains during the handshake ([`transport`])
//!
//! # Example
//!
//! ```no_run
//! use ocsp_client::{ClientConfig, OcspClient, VerifyConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(chain: Vec<ocsp_proto::Certificate>) -> Result<(), ocsp_client::OcspError> {
//! let client = OcspClient::new(ClientConfig::default())?;
//! client
//!     .verify_peer_certificate(&[chain], &VerifyConfig::fail_closed(), &CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod http;
pub mod retry;
pub mod status;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod test_pki;

pub use cache::{CachedResponse, ResponseCache, CACHE_STORAGE_KEY};
pub use client::OcspClient;
pub use config::{ClientConfig, EnvOverrides, FailureMode, RequestHash, TestHooks, VerifyConfig};
pub use error::{OcspError, TransportError};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use status::{Status, StatusCode};
pub use storage::{MemoryStorage, Storage, StorageError};
pub use transport::{new_transport, tls_config, OcspServerCertVerifier};

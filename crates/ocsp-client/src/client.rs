//! OCSP client and chain verifier
//!
//! [`OcspClient`] answers "is this certificate revoked?" for a subject/issuer
//! pair and applies fail-open or fail-closed policy across whole chains.
//!
//! # Per-certificate procedure
//!
//! 1. Build the request and extract its CertID
//! 2. Consult the cache; a terminal cached status is returned as is
//! 3. Pick responders: per-call override, else the certificate's AIA URLs
//! 4. Query each responder through the retry engine, GET first and POST
//!    when the GET answer is not definitive
//! 5. Parse, verify against the issuer, select the CertID and evaluate
//! 6. Cache terminal responses that carry a nextUpdate
//!
//! # Chain policy
//!
//! - **Fail-open**: any chain whose pairs are all `Good` passes. Otherwise
//!   a chain with a definite `Revoked` fails the call, as does a hard
//!   failure (bad response signature, missing trust anchor, no responder,
//!   bad configuration). Everything else that could not be checked is
//!   summarized in one warning.
//! - **Fail-closed**: any error in any chain fails the call; a revocation is
//!   reported in preference to other errors.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use dashmap::DashMap;
use ocsp_proto::{CertId, Certificate, OcspRequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{decode_snapshot, ResponseCache};
use crate::config::{ClientConfig, EnvOverrides, FailureMode, VerifyConfig};
use crate::error::{OcspError, TransportError};
use crate::evaluator::{unix_seconds, Evaluator};
use crate::http::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::retry::{execute_with_retry, Backoff, RetryRequest};
use crate::status::{Status, StatusCode};
use crate::storage::Storage;

const OCSP_REQUEST_CONTENT_TYPE: &str = "application/ocsp-request";
const OCSP_RESPONSE_CONTENT_TYPE: &str = "application/ocsp-response";

/// Outcome of one chain
enum ChainVerdict {
    /// No revocation found; `all_good` when every pair answered `Good`
    Allowed {
        all_good: bool,
        diagnostics: Vec<String>,
    },
    Revoked(OcspError),
    /// Rejected in both failure modes
    Fatal(OcspError),
    Failed(OcspError),
}

/// OCSP revocation client
///
/// Holds the response cache, backoff PRNG and root-CA index; share it with
/// an `Arc`.
pub struct OcspClient {
    config: ClientConfig,
    http: Arc<dyn HttpClient>,
    cache: ResponseCache,
    evaluator: Evaluator,
    backoff: Backoff,
    /// Trust anchors by raw subject DN
    root_cas: DashMap<Vec<u8>, Certificate>,
}

impl fmt::Debug for OcspClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcspClient")
            .field("config", &self.config)
            .field("root_cas", &self.root_cas.len())
            .finish_non_exhaustive()
    }
}

impl OcspClient {
    /// Create a client over `reqwest`, applying environment overrides
    pub fn new(config: ClientConfig) -> Result<Self, OcspError> {
        let config = config.with_env(&EnvOverrides::from_env());
        let http = Arc::new(ReqwestHttpClient::new(config.max_response_size_bytes)?);
        Ok(Self::with_http_client(config, http))
    }

    /// Create a client over a caller-supplied HTTP stack
    ///
    /// The environment is not consulted.
    pub fn with_http_client(config: ClientConfig, http: Arc<dyn HttpClient>) -> Self {
        info!(
            responder_timeout_ms = config.responder_timeout_ms,
            cache_server = config.cache_server_url.is_some() && config.cache_server_enabled,
            "OCSP client initialized"
        );
        Self {
            cache: ResponseCache::new(config.cache_capacity()),
            evaluator: Evaluator::new(&config),
            backoff: Backoff::from_config(&config),
            root_cas: DashMap::new(),
            http,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Register a trust anchor for chains that stop below the root
    pub fn add_root_ca(&self, ca: Certificate) {
        self.root_cas.entry(ca.raw_subject().to_vec()).or_insert(ca);
    }

    /// Revocation status of `subject` as issued by `issuer`
    ///
    /// `Err` is returned for configuration problems (no responder URL) and
    /// for responses whose signature does not verify. Everything else is
    /// reported through the returned [`Status`].
    pub async fn get_revocation_status(
        &self,
        subject: &Certificate,
        issuer: &Certificate,
        conf: &VerifyConfig,
        cancel: &CancellationToken,
    ) -> Result<Status, OcspError> {
        let builder = OcspRequestBuilder::new(subject, issuer).with_hash(self.config.request_hash.into());
        let request = builder.build();
        let cert_id = match CertId::extract_from_request(&request) {
            Ok(cert_id) => cert_id,
            Err(e) => return Ok(Status::with_error(StatusCode::FailedDecomposeRequest, e)),
        };

        let cached = self
            .cache
            .lookup(&cert_id, issuer, &self.evaluator, Utc::now(), conf.this_update_max_age)
            .await;
        if cached.is_terminal() {
            debug!(subject = subject.subject(), code = %cached.code, "OCSP cache hit");
            return Ok(cached);
        }
        debug!(subject = subject.subject(), code = %cached.code, "OCSP cache miss");

        let urls = self.responder_urls(subject, conf)?;
        let timeout = self.config.responder_timeout() * conf.failure_mode.timeout_multiplier();

        let mut results: Vec<(Status, Option<Vec<u8>>)> = Vec::new();
        for url in &urls {
            let (status, cacheable) = self
                .query_responder(url, &request, &cert_id, issuer, conf, timeout, cancel)
                .await?;
            if !conf.query_all_servers && status.is_terminal() {
                results = vec![(status, cacheable)];
                break;
            }
            results.push((status, cacheable));
        }

        let (status, cacheable) = reduce(results);
        if let Some(response) = cacheable {
            self.cache
                .insert(cert_id, response, unix_seconds(Utc::now()))
                .await;
        }
        Ok(status)
    }

    fn responder_urls(&self, subject: &Certificate, conf: &VerifyConfig) -> Result<Vec<String>, OcspError> {
        let urls = if conf.servers_override.is_empty() {
            subject.ocsp_urls().to_vec()
        } else {
            conf.servers_override.clone()
        };
        if urls.is_empty() || self.config.test_hooks.no_responder_url {
            return Err(OcspError::NoResponder {
                subject: subject.subject().to_string(),
            });
        }
        Ok(match self.config.responder_url_override {
            Some(ref forced) => vec![forced.clone()],
            None => urls,
        })
    }

    /// One responder, retries included
    ///
    /// GET with the request in the URL path first, then POST when the GET
    /// answer is neither `Good` nor `Revoked`. Returns the status and, when it
    /// may be cached, the raw response.
    #[allow(clippy::too_many_arguments)]
    async fn query_responder(
        &self,
        url: &str,
        request: &[u8],
        cert_id: &CertId,
        issuer: &Certificate,
        conf: &VerifyConfig,
        timeout: std::time::Duration,
        cancel: &CancellationToken,
    ) -> Result<(Status, Option<Vec<u8>>), OcspError> {
        let target = match Url::parse(url) {
            Ok(target) => target,
            Err(e) => {
                let err = OcspError::Config(format!("invalid OCSP responder URL {url}: {e}"));
                return Ok((Status::with_error(StatusCode::FailedSubmit, err), None));
            }
        };
        debug!(url = %target, serial = %cert_id.serial_hex(), "querying OCSP responder");

        let first = match get_url(&target, request) {
            Some(get) => {
                let retry = self.retry_request(Method::GET, get, None, &target, request, conf, timeout);
                let first = self.exchange(retry, cert_id, issuer, conf, cancel).await?;
                if is_definitive(&first.0) {
                    return Ok(first);
                }
                debug!(url = %target, code = %first.0.code, "no definitive GET answer, retrying with POST");
                Some(first)
            }
            None => None,
        };

        let retry = self.retry_request(
            Method::POST,
            target.clone(),
            Some(request.to_vec()),
            &target,
            request,
            conf,
            timeout,
        );
        let second = self.exchange(retry, cert_id, issuer, conf, cancel).await?;
        Ok(match first {
            // a parsed GET answer outranks a POST that produced nothing
            Some(first) if first.0.is_terminal() && !second.0.is_terminal() => first,
            _ => second,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn retry_request(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        target: &Url,
        request: &[u8],
        conf: &VerifyConfig,
        timeout: std::time::Duration,
    ) -> RetryRequest {
        RetryRequest {
            request: HttpRequest {
                headers: self.request_headers(target, request, body.is_some()),
                method,
                url,
                body,
            },
            total_timeout: timeout,
            raise_4xx: false,
            max_retries: conf.max_retries,
        }
    }

    /// Run one method through the retry engine and evaluate the body
    async fn exchange(
        &self,
        retry: RetryRequest,
        cert_id: &CertId,
        issuer: &Certificate,
        conf: &VerifyConfig,
        cancel: &CancellationToken,
    ) -> Result<(Status, Option<Vec<u8>>), OcspError> {
        let response = match execute_with_retry(self.http.as_ref(), &self.backoff, retry, cancel).await {
            Ok(response) => response,
            Err(TransportError::Http(code)) => {
                let err = OcspError::Responder(format!("HTTP code is not OK: {code}"));
                return Ok((Status::with_error(StatusCode::FailedResponse, err), None));
            }
            Err(e) if e.is_body_failure() => {
                return Ok((Status::with_error(StatusCode::FailedDecodeResponse, e), None))
            }
            Err(e) => return Ok((Status::with_error(StatusCode::FailedSubmit, e), None)),
        };

        if response.body.is_empty() {
            let err = OcspError::Responder("empty OCSP response body".to_string());
            return Ok((Status::with_error(StatusCode::FailedExtractResponse, err), None));
        }

        let evaluation = self.evaluator.evaluate_response(
            &response.body,
            cert_id,
            issuer,
            Utc::now(),
            conf.this_update_max_age,
        );
        if matches!(evaluation.status.error, Some(OcspError::Verification(_))) {
            return Err(evaluation.status.into_error());
        }
        let cacheable = evaluation.cacheable.then_some(response.body);
        Ok((evaluation.status, cacheable))
    }

    fn request_headers(&self, target: &Url, request: &[u8], with_body: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(OCSP_RESPONSE_CONTENT_TYPE));
        if with_body {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(OCSP_REQUEST_CONTENT_TYPE));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(request.len()));
        }

        let hostname = target.host_str().unwrap_or_default();
        let host = match self.config.retry_url_template {
            Some(ref template) => fill_template(template, hostname, &BASE64.encode(request)),
            None => hostname.to_string(),
        };
        match HeaderValue::from_str(&host) {
            Ok(value) if !host.is_empty() => {
                headers.insert(HOST, value);
            }
            _ => debug!(host, "skipping Host header"),
        }
        headers
    }

    /// Check a single leaf against its issuer
    pub async fn verify_leaf_certificate(
        &self,
        leaf: &Certificate,
        issuer: &Certificate,
        conf: &VerifyConfig,
        cancel: &CancellationToken,
    ) -> Result<(), OcspError> {
        self.register_extra_cas(conf);
        let status = self.get_revocation_status(leaf, issuer, conf, cancel).await?;
        match (status.code, conf.failure_mode) {
            (StatusCode::Good, _) => Ok(()),
            (StatusCode::Revoked, _) => Err(OcspError::Revoked {
                serial: leaf.serial_hex(),
            }),
            (_, FailureMode::FailOpen) if status.error.as_ref().is_some_and(OcspError::is_hard_failure) => {
                Err(status.into_error())
            }
            (_, FailureMode::FailClosed) => Err(match status.code {
                StatusCode::Unknown => OcspError::UnknownStatus {
                    serial: leaf.serial_hex(),
                },
                _ => status.into_error(),
            }),
            (_, FailureMode::FailOpen) => {
                warn!(
                    serial = %leaf.serial_hex(),
                    status = %status,
                    "could not validate OCSP status, continuing in fail-open mode"
                );
                Ok(())
            }
        }
    }

    /// Apply revocation policy to every verified chain
    ///
    /// Each chain is ordered leaf first. A chain whose last certificate is not
    /// self-signed is completed from `conf.extra_cas` and the registered
    /// roots.
    pub async fn verify_peer_certificate(
        &self,
        chains: &[Vec<Certificate>],
        conf: &VerifyConfig,
        cancel: &CancellationToken,
    ) -> Result<(), OcspError> {
        self.register_extra_cas(conf);

        let mut any_all_good = false;
        let mut revoked: Option<OcspError> = None;
        let mut fatal: Option<OcspError> = None;
        let mut failure: Option<OcspError> = None;
        let mut diagnostics: Vec<String> = Vec::new();

        for chain in chains {
            match self.verify_chain(chain, conf, cancel).await {
                ChainVerdict::Allowed {
                    all_good,
                    diagnostics: found,
                } => {
                    any_all_good |= all_good;
                    diagnostics.extend(found);
                }
                ChainVerdict::Revoked(err) => {
                    revoked.get_or_insert(err);
                    if conf.failure_mode == FailureMode::FailClosed {
                        break;
                    }
                }
                ChainVerdict::Fatal(err) => {
                    fatal.get_or_insert(err);
                    if conf.failure_mode == FailureMode::FailClosed {
                        break;
                    }
                }
                ChainVerdict::Failed(err) => {
                    diagnostics.push(err.to_string());
                    failure.get_or_insert(err);
                }
            }
        }

        match conf.failure_mode {
            FailureMode::FailClosed => match revoked.or(fatal).or(failure) {
                Some(err) => Err(err),
                None => Ok(()),
            },
            FailureMode::FailOpen => {
                if !any_all_good {
                    if let Some(err) = revoked.or(fatal) {
                        return Err(err);
                    }
                }
                if !diagnostics.is_empty() {
                    warn!(
                        diagnostics = %diagnostics.join("; "),
                        "OCSP revocation status incomplete, connecting in fail-open mode"
                    );
                }
                Ok(())
            }
        }
    }

    async fn verify_chain(
        &self,
        chain: &[Certificate],
        conf: &VerifyConfig,
        cancel: &CancellationToken,
    ) -> ChainVerdict {
        let Some(last) = chain.last() else {
            return ChainVerdict::Fatal(OcspError::Config("empty certificate chain".to_string()));
        };

        let mut full = chain.to_vec();
        if !last.is_self_signed() {
            let root = self.root_cas.get(last.raw_issuer()).map(|r| r.value().clone());
            match root {
                Some(root) => full.push(root),
                None => {
                    return ChainVerdict::Fatal(OcspError::RootCaLookup {
                        subject: last.subject().to_string(),
                    })
                }
            }
        }

        let statuses = match self.get_all_revocation_status(&full, conf, cancel).await {
            Ok(statuses) => statuses,
            Err(err) if err.is_hard_failure() => return ChainVerdict::Fatal(err),
            Err(err) => return ChainVerdict::Failed(err),
        };
        if let Some(err) = statuses
            .iter()
            .filter_map(|s| s.error.as_ref())
            .find(|e| e.is_hard_failure())
        {
            return ChainVerdict::Fatal(err.clone());
        }
        let pairs = full.len() - 1;

        let complete = statuses.len() == pairs && statuses.iter().all(Status::is_terminal);
        match conf.failure_mode {
            FailureMode::FailClosed => {
                let mut errors: Vec<OcspError> = statuses.into_iter().filter_map(|s| s.error).collect();
                if let Some(pos) = errors.iter().position(OcspError::is_revoked) {
                    return ChainVerdict::Revoked(errors.swap_remove(pos));
                }
                match errors.into_iter().next() {
                    Some(err) => ChainVerdict::Failed(err),
                    None => ChainVerdict::Allowed {
                        all_good: complete,
                        diagnostics: Vec::new(),
                    },
                }
            }
            FailureMode::FailOpen => {
                if complete {
                    if let Some(err) = statuses
                        .iter()
                        .find(|s| s.code == StatusCode::Revoked)
                        .and_then(|s| s.error.clone())
                    {
                        return ChainVerdict::Revoked(err);
                    }
                }
                let all_good = complete && statuses.iter().all(|s| s.code == StatusCode::Good);
                let diagnostics = statuses
                    .iter()
                    .filter(|s| s.code != StatusCode::Good)
                    .filter_map(|s| s.error.as_ref().map(ToString::to_string))
                    .collect();
                ChainVerdict::Allowed {
                    all_good,
                    diagnostics,
                }
            }
        }
    }

    /// Query each (subject, issuer) pair, stopping at the first non-terminal status
    async fn get_all_revocation_status(
        &self,
        chain: &[Certificate],
        conf: &VerifyConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<Status>, OcspError> {
        let mut statuses = Vec::with_capacity(chain.len().saturating_sub(1));
        for pair in chain.windows(2) {
            let status = self.get_revocation_status(&pair[0], &pair[1], conf, cancel).await?;
            let terminal = status.is_terminal();
            statuses.push(status);
            if !terminal {
                break;
            }
        }
        Ok(statuses)
    }

    fn register_extra_cas(&self, conf: &VerifyConfig) {
        for ca in &conf.extra_cas {
            self.add_root_ca(ca.clone());
        }
    }

    /// Merge the persisted cache from `storage`
    pub async fn load_cache(&self, storage: &dyn Storage) -> Result<usize, OcspError> {
        self.cache.load(storage).await
    }

    /// Persist the cache to `storage` if it changed
    pub async fn persist_cache(&self, storage: &dyn Storage) -> Result<bool, OcspError> {
        self.cache.persist(storage).await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.len().await
    }

    /// Download and merge the remote cache-server snapshot
    ///
    /// Best effort. On success returns the number of merged entries; `Err`
    /// carries a non-terminal status that explains why nothing was merged.
    pub async fn download_cache_server(&self, cancel: &CancellationToken) -> Result<usize, Status> {
        let url = match self.config.cache_server_url {
            Some(ref url) if self.config.cache_server_enabled => url,
            _ => {
                return Err(Status::with_error(
                    StatusCode::NoServer,
                    OcspError::Config("OCSP cache server disabled".to_string()),
                ))
            }
        };
        let url = Url::parse(url).map_err(|e| {
            Status::with_error(
                StatusCode::FailedSubmit,
                OcspError::Config(format!("invalid cache server URL: {e}")),
            )
        })?;

        let request = HttpRequest {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        };
        let exchange = tokio::time::timeout(self.config.cache_server_timeout(), self.http.execute(request));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = exchange => result.unwrap_or(Err(TransportError::Timeout)),
        };

        let response = result.map_err(|e| {
            debug!(error = %e, "OCSP cache server unreachable");
            Status::with_error(StatusCode::FailedSubmit, e)
        })?;
        if response.status != 200 {
            debug!(status = response.status, "OCSP cache server returned an error");
            return Err(Status::with_error(
                StatusCode::FailedResponse,
                TransportError::Http(response.status),
            ));
        }

        let entries = decode_snapshot(&response.body).map_err(|e| {
            debug!(error = %e, "OCSP cache server snapshot unreadable");
            Status::with_error(StatusCode::FailedExtractResponse, e)
        })?;

        let now = Utc::now();
        let accepted: Vec<_> = entries
            .into_iter()
            .filter(|(cert_id, entry)| self.evaluator.accepts_snapshot_entry(cert_id, entry, now))
            .collect();
        let merged = self.cache.merge(accepted, true).await;
        debug!(merged, "merged OCSP cache server snapshot");
        Ok(merged)
    }
}

/// Pick one answer from several responders
///
/// `Revoked` wins over `Good`, which wins over `Unknown`; otherwise the
/// first answer stands.
fn reduce(results: Vec<(Status, Option<Vec<u8>>)>) -> (Status, Option<Vec<u8>>) {
    let first = |code: StatusCode| results.iter().position(|(s, _)| s.code == code);
    let pick = first(StatusCode::Revoked)
        .or_else(|| first(StatusCode::Good))
        .or_else(|| first(StatusCode::Unknown))
        .unwrap_or(0);
    results.into_iter().nth(pick).unwrap_or_else(|| {
        (
            Status::with_error(
                StatusCode::FailedSubmit,
                OcspError::Responder("no OCSP responder answered".to_string()),
            ),
            None,
        )
    })
}

/// Responder URL with the base64 request appended as a path segment
///
/// `None` for URLs that cannot carry a path.
fn get_url(target: &Url, request: &[u8]) -> Option<Url> {
    let mut url = target.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .push(&BASE64.encode(request));
    Some(url)
}

/// `Good`, `Revoked` or a cancellation end the method fallback
fn is_definitive(status: &Status) -> bool {
    matches!(status.code, StatusCode::Good | StatusCode::Revoked)
        || matches!(status.error, Some(OcspError::Transport(TransportError::Cancelled)))
}

/// Substitute `%s` placeholders in order
fn fill_template(template: &str, hostname: &str, request_b64: &str) -> String {
    let replaced = template.replacen("%s", hostname, 1);
    replaced.replacen("%s", request_b64, 1)
}

//! HTTP retry engine
//!
//! Retries a request with decorrelated-jitter backoff until it succeeds, a
//! non-retryable error occurs, the caller cancels, the retry count runs out
//! or the next sleep would exhaust the total timeout. Each HTTP exchange and each sleep races the
//! cancellation token.
//!
//! # Backoff
//!
//! With base `b`, cap `c` and previous sleep `s` (initially zero), the next
//! sleep is
//!
//! ```text
//! t = 3s - b
//! t > 0:  min(c, b + U[0, t))
//! t < 0:  min(c, 3s + U[0, -t))
//! t == 0: b
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};

/// Query parameter rotated to a fresh UUID on every retry
pub const REQUEST_GUID_KEY: &str = "request_guid";
/// Query parameter carrying the attempt number on query-request URLs
pub const RETRY_COUNTER_KEY: &str = "retryCounter";
pub const QUERY_REQUEST_PATH: &str = "/queries/v1/query-request";

/// Decorrelated-jitter sleep generator
///
/// The PRNG is owned here, never process-global.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    rng: Mutex<StdRng>,
}

impl Backoff {
    /// `seed` makes the sequence reproducible; `None` seeds from OS entropy
    pub fn new(base: Duration, cap: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            base,
            cap,
            rng: Mutex::new(rng),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.backoff_base(), config.backoff_cap(), config.backoff_seed)
    }

    pub fn next_sleep(&self, previous: Duration) -> Duration {
        let base = self.base.as_millis() as i128;
        let tripled = 3 * previous.as_millis() as i128;
        let spread = tripled - base;

        let next = if spread > 0 {
            base + self.sample(spread)
        } else if spread < 0 {
            tripled + self.sample(-spread)
        } else {
            base
        };

        Duration::from_millis(u64::try_from(next).unwrap_or(u64::MAX)).min(self.cap)
    }

    /// Uniform integer in `[0, upper)`
    fn sample(&self, upper: i128) -> i128 {
        let upper = u64::try_from(upper).unwrap_or(u64::MAX);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        i128::from(rng.gen_range(0..upper))
    }
}

/// A request plus its retry policy
#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub request: HttpRequest,
    /// Budget shared by all attempts and sleeps
    pub total_timeout: Duration,
    /// Whether a 4xx response ends the loop instead of being retried
    pub raise_4xx: bool,
    /// Retries allowed after the first attempt; `None` is unbounded
    pub max_retries: Option<u32>,
}

/// Run `retry` against `http`
///
/// Returns the first 200 response (or 4xx when `raise_4xx` is set). When the
/// budget runs out, returns the last failure.
pub async fn execute_with_retry(
    http: &dyn HttpClient,
    backoff: &Backoff,
    retry: RetryRequest,
    cancel: &CancellationToken,
) -> Result<HttpResponse, TransportError> {
    let RetryRequest {
        mut request,
        total_timeout,
        raise_4xx,
        max_retries,
    } = retry;
    let mut remaining = total_timeout;
    let mut sleep = Duration::ZERO;
    let mut attempt: u32 = 0;

    loop {
        let last_error = match attempt_once(http, request.clone(), total_timeout, cancel).await {
            Ok(response) if response.status == 200 => return Ok(response),
            Ok(response) if raise_4xx && (400..500).contains(&response.status) => {
                return Ok(response)
            }
            Ok(response) => {
                debug!(url = %request.url, status = response.status, attempt, "HTTP status not OK");
                TransportError::Http(response.status)
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                warn!(url = %request.url, attempt, error = %err, "retryable HTTP error");
                err
            }
        };

        if max_retries.is_some_and(|max| attempt >= max) {
            debug!(url = %request.url, attempts = attempt + 1, "retry count exhausted");
            return Err(last_error);
        }
        sleep = backoff.next_sleep(sleep);
        if sleep >= remaining {
            debug!(url = %request.url, attempts = attempt + 1, "retry budget exhausted");
            return Err(last_error);
        }
        remaining -= sleep;
        attempt += 1;
        request.url = retry_url(&request.url, attempt);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            _ = tokio::time::sleep(sleep) => {}
        }
    }
}

async fn attempt_once(
    http: &dyn HttpClient,
    request: HttpRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<HttpResponse, TransportError> {
    let exchange = async {
        if timeout.is_zero() {
            http.execute(request).await
        } else {
            tokio::time::timeout(timeout, http.execute(request))
                .await
                .unwrap_or(Err(TransportError::Timeout))
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = exchange => result,
    }
}

/// URL for retry number `attempt`
///
/// A `request_guid` parameter gets a fresh UUID. Query-request URLs carry
/// `retryCounter=<attempt>`. Other URLs are unchanged.
pub fn retry_url(url: &Url, attempt: u32) -> Url {
    let is_query = url.path().contains(QUERY_REQUEST_PATH);
    let has_guid = url.query_pairs().any(|(k, _)| k == REQUEST_GUID_KEY);
    if !is_query && !has_guid {
        return url.clone();
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !(is_query && k == RETRY_COUNTER_KEY))
        .map(|(k, v)| {
            if k == REQUEST_GUID_KEY {
                (k.into_owned(), Uuid::new_v4().to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    if is_query {
        pairs.push((RETRY_COUNTER_KEY.to_string(), attempt.to_string()));
    }

    let mut next = url.clone();
    next.query_pairs_mut().clear().extend_pairs(pairs);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pki::{ok, MockHttpClient};
    use reqwest::header::HeaderMap;
    use reqwest::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(5), Duration::from_secs(160), Some(7))
    }

    fn request(total_timeout: Duration) -> RetryRequest {
        RetryRequest {
            request: HttpRequest {
                method: Method::POST,
                url: Url::parse("http://ocsp.test/").unwrap(),
                headers: HeaderMap::new(),
                body: Some(vec![0x30, 0x00]),
            },
            total_timeout,
            raise_4xx: false,
            max_retries: None,
        }
    }

    fn refused() -> TransportError {
        TransportError::Connect("connection refused".to_string())
    }

    #[test]
    fn test_first_sleep_below_base() {
        for seed in 0..20 {
            let b = Backoff::new(Duration::from_secs(5), Duration::from_secs(160), Some(seed));
            assert!(b.next_sleep(Duration::ZERO) < Duration::from_secs(5));
        }
    }

    #[test]
    fn test_sleeps_bounded_by_cap() {
        let b = backoff();
        let mut sleep = Duration::ZERO;
        for _ in 0..100 {
            sleep = b.next_sleep(sleep);
            assert!(sleep <= Duration::from_secs(160));
        }
    }

    #[test]
    fn test_growth_stays_in_decorrelated_range() {
        let b = backoff();
        // 3s - b = 25s > 0: next in [b, 3s)
        let next = b.next_sleep(Duration::from_secs(10));
        assert!(next >= Duration::from_secs(5) && next < Duration::from_secs(30));
        // 3s == b
        let b = Backoff::new(Duration::from_secs(3), Duration::from_secs(160), Some(1));
        assert_eq!(b.next_sleep(Duration::from_secs(1)), Duration::from_secs(3));
    }

    #[test]
    fn test_seeded_sequences_repeat() {
        let (a, b) = (backoff(), backoff());
        let mut sa = Duration::ZERO;
        let mut sb = Duration::ZERO;
        for _ in 0..10 {
            sa = a.next_sleep(sa);
            sb = b.next_sleep(sb);
            assert_eq!(sa, sb);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_single_attempt() {
        let http = MockHttpClient::failing(refused());
        let result =
            execute_with_retry(http.as_ref(), &backoff(), request(Duration::ZERO), &CancellationToken::new())
                .await;
        assert_eq!(result.unwrap_err(), refused());
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let http = MockHttpClient::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::Connect("refused".into()))
            } else {
                Ok(ok(b"done".to_vec()))
            }
        });

        let response = execute_with_retry(
            http.as_ref(),
            &backoff(),
            request(Duration::from_secs(600)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(response.body, b"done");
        assert_eq!(http.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let http = MockHttpClient::failing(TransportError::Expired("x509: certificate has expired".into()));
        let err = execute_with_retry(
            http.as_ref(),
            &backoff(),
            request(Duration::from_secs(600)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::Expired(_)));
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raise_4xx_ends_loop() {
        let http = MockHttpClient::new(|_| Ok(crate::http::HttpResponse { status: 404, body: vec![] }));
        let mut retry = request(Duration::from_secs(600));
        retry.raise_4xx = true;
        let response = execute_with_retry(http.as_ref(), &backoff(), retry, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_4xx_retried_without_raise() {
        let http = MockHttpClient::new(|_| Ok(crate::http::HttpResponse { status: 429, body: vec![] }));
        let err = execute_with_retry(
            http.as_ref(),
            &backoff(),
            request(Duration::from_secs(20)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, TransportError::Http(429));
        assert!(http.calls() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retries_bounds_attempts() {
        let http = MockHttpClient::failing(refused());
        let mut retry = request(Duration::from_secs(3600));
        retry.max_retries = Some(2);

        let started = Instant::now();
        let err = execute_with_retry(http.as_ref(), &backoff(), retry, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, refused());
        assert_eq!(http.calls(), 3);
        // two sleeps, well inside the hour
        assert!(started.elapsed() < Duration::from_secs(600));

        let none = MockHttpClient::failing(refused());
        let mut retry = request(Duration::from_secs(3600));
        retry.max_retries = Some(0);
        execute_with_retry(none.as_ref(), &backoff(), retry, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(none.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_fit_total_timeout() {
        let total = Duration::from_secs(60);
        let started = Instant::now();
        let last_call = Arc::new(Mutex::new(started));
        let seen = last_call.clone();
        let http = MockHttpClient::new(move |_| {
            *seen.lock().unwrap() = Instant::now();
            Err(TransportError::Connect("refused".into()))
        });

        execute_with_retry(http.as_ref(), &backoff(), request(total), &CancellationToken::new())
            .await
            .unwrap_err();

        let elapsed = *last_call.lock().unwrap() - started;
        assert!(elapsed <= total, "slept {elapsed:?} with a {total:?} budget");
        assert!(http.calls() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let http = MockHttpClient::new(move |_| {
            trigger.cancel();
            Err(TransportError::Connect("refused".into()))
        });

        let err = execute_with_retry(http.as_ref(), &backoff(), request(Duration::from_secs(600)), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Cancelled);
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let http = MockHttpClient::new(|_| Ok(ok(vec![])));
        let err = execute_with_retry(http.as_ref(), &backoff(), request(Duration::from_secs(1)), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_rotates_request_guid() {
        let http = MockHttpClient::failing(refused());
        let mut retry = request(Duration::from_secs(30));
        retry.request.url = Url::parse("http://ocsp.test/path?request_guid=first&x=1").unwrap();

        execute_with_retry(http.as_ref(), &backoff(), retry, &CancellationToken::new())
            .await
            .unwrap_err();

        let urls: Vec<Url> = http.requests().into_iter().map(|r| r.url).collect();
        assert!(urls.len() >= 2);
        assert!(urls[0].as_str().contains("request_guid=first"));
        assert!(!urls[1].as_str().contains("request_guid=first"));
        assert!(urls[1].as_str().contains("x=1"));
    }

    #[test]
    fn test_retry_url_query_request_counter() {
        let url = Url::parse("https://acct.test/queries/v1/query-request?request_guid=abc&retryCounter=1").unwrap();
        let next = retry_url(&url, 2);

        let pairs: Vec<(String, String)> = next.query_pairs().into_owned().collect();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], ("retryCounter".to_string(), "2".to_string()));
        assert_eq!(pairs[0].0, "request_guid");
        assert!(Uuid::parse_str(&pairs[0].1).is_ok());
        assert_eq!(next.host_str(), Some("acct.test"));
    }

    #[test]
    fn test_retry_url_plain_unchanged() {
        let url = Url::parse("http://ocsp.test/?a=b").unwrap();
        assert_eq!(retry_url(&url, 3), url);
    }
}

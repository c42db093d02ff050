//! Validity evaluation of OCSP responses
//!
//! A response is within tolerance when
//!
//! ```text
//! thisUpdate - clockSkew <= now <= nextUpdate + max(clockSkew, (nextUpdate - thisUpdate) / ratio)
//! ```
//!
//! Responses without nextUpdate are checked against the lower bound only.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use ocsp_proto::{CertId, Certificate, CertificateStatus, OcspResponse, SingleResponse};

use crate::cache::CachedResponse;
use crate::config::{ClientConfig, TestHooks};
use crate::error::OcspError;
use crate::status::{Status, StatusCode};

/// Result of evaluating a fresh response
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub status: Status,
    /// Terminal and carrying a nextUpdate
    pub cacheable: bool,
}

impl Evaluation {
    fn rejected(status: Status) -> Self {
        Self {
            status,
            cacheable: false,
        }
    }
}

/// Applies clock-skew and validity-ratio policy to responses
#[derive(Debug, Clone)]
pub struct Evaluator {
    clock_skew: Duration,
    ratio: i32,
    cache_expiry_secs: f64,
    hooks: TestHooks,
}

impl Evaluator {
    pub fn new(config: &ClientConfig) -> Self {
        let skew_secs = i64::try_from(config.clock_skew_secs).unwrap_or(i64::MAX / 1000);
        Self {
            clock_skew: Duration::seconds(skew_secs),
            ratio: i32::try_from(config.tolerable_validity_ratio.max(1)).unwrap_or(i32::MAX),
            cache_expiry_secs: config.cache_expiry_secs as f64,
            hooks: config.test_hooks.clone(),
        }
    }

    /// Slack allowed past nextUpdate
    pub fn tolerable_validity(&self, this_update: DateTime<Utc>, next_update: DateTime<Utc>) -> Duration {
        let scaled = (next_update - this_update) / self.ratio;
        scaled.max(self.clock_skew)
    }

    pub fn is_in_validity_range(
        &self,
        now: DateTime<Utc>,
        this_update: DateTime<Utc>,
        next_update: Option<DateTime<Utc>>,
    ) -> bool {
        if now < this_update - self.clock_skew {
            return false;
        }
        match next_update {
            Some(next) => now <= next + self.tolerable_validity(this_update, next),
            None => true,
        }
    }

    /// Validate a selected SingleResponse and map its status
    pub fn validate(
        &self,
        single: &SingleResponse,
        produced_at: DateTime<Utc>,
        now: DateTime<Utc>,
        max_age: Option<StdDuration>,
    ) -> Status {
        if self.hooks.inject_validity_error
            || !self.is_in_validity_range(now, single.this_update, single.next_update)
        {
            let next = single
                .next_update
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "none".to_string());
            return Status::with_error(
                StatusCode::InvalidValidity,
                OcspError::InvalidValidity(format!(
                    "producedAt: {}, thisUpdate: {}, nextUpdate: {}",
                    produced_at.to_rfc3339(),
                    single.this_update.to_rfc3339(),
                    next
                )),
            );
        }

        if let Some(max_age) = max_age.and_then(|age| Duration::from_std(age).ok()) {
            if now - single.this_update > max_age {
                return Status::with_error(
                    StatusCode::InvalidValidity,
                    OcspError::InvalidValidity(format!(
                        "thisUpdate {} is older than {}s",
                        single.this_update.to_rfc3339(),
                        max_age.num_seconds()
                    )),
                );
            }
        }

        let serial = single.cert_id.serial_hex();
        let status = if self.hooks.inject_unknown_status {
            &CertificateStatus::Unknown
        } else {
            &single.status
        };
        match status {
            CertificateStatus::Good => Status::good(),
            CertificateStatus::Revoked { .. } => {
                Status::with_error(StatusCode::Revoked, OcspError::Revoked { serial })
            }
            CertificateStatus::Unknown => {
                Status::with_error(StatusCode::Unknown, OcspError::UnknownStatus { serial })
            }
        }
    }

    /// Parse, verify against `issuer`, select `cert_id` and validate
    pub fn evaluate_response(
        &self,
        der: &[u8],
        cert_id: &CertId,
        issuer: &Certificate,
        now: DateTime<Utc>,
        max_age: Option<StdDuration>,
    ) -> Evaluation {
        let response = match OcspResponse::parse(der) {
            Ok(response) => response,
            Err(e) => return Evaluation::rejected(Status::with_error(StatusCode::FailedParseResponse, e)),
        };
        let basic = match response.basic() {
            Ok(basic) => basic,
            Err(e) => return Evaluation::rejected(Status::with_error(StatusCode::FailedResponse, e)),
        };
        if let Err(e) = basic.verify(issuer, now) {
            return Evaluation::rejected(Status::with_error(
                StatusCode::FailedParseResponse,
                OcspError::Verification(e),
            ));
        }
        let single = match basic.find(cert_id) {
            Ok(single) => single,
            Err(e) => return Evaluation::rejected(Status::with_error(StatusCode::FailedParseResponse, e)),
        };

        let status = self.validate(single, basic.produced_at, now, max_age);
        Evaluation {
            cacheable: status.is_terminal() && single.next_update.is_some(),
            status,
        }
    }

    /// Evaluate a cached entry
    pub fn evaluate_cached(
        &self,
        entry: &CachedResponse,
        cert_id: &CertId,
        issuer: &Certificate,
        now: DateTime<Utc>,
        max_age: Option<StdDuration>,
    ) -> Status {
        if self.is_expired(entry.timestamp, now) {
            return Status::with_error(
                StatusCode::CacheExpired,
                OcspError::Cache(format!(
                    "cache entry for serial {} expired",
                    cert_id.serial_hex()
                )),
            );
        }
        self.evaluate_response(&entry.response, cert_id, issuer, now, max_age)
            .status
    }

    pub fn is_expired(&self, timestamp: f64, now: DateTime<Utc>) -> bool {
        unix_seconds(now) - timestamp >= self.cache_expiry_secs
    }

    /// Whether a remote cache-server entry may be merged
    ///
    /// The issuer is not known at download time, so only age, structure and
    /// validity window are checked. The signature is verified when the entry
    /// is looked up.
    pub fn accepts_snapshot_entry(
        &self,
        cert_id: &CertId,
        entry: &CachedResponse,
        now: DateTime<Utc>,
    ) -> bool {
        if self.is_expired(entry.timestamp, now) {
            return false;
        }
        let Ok(response) = OcspResponse::parse(&entry.response) else {
            return false;
        };
        let Ok(basic) = response.basic() else {
            return false;
        };
        match basic.find(cert_id) {
            Ok(single) => self.is_in_validity_range(now, single.this_update, single.next_update),
            Err(_) => false,
        }
    }
}

/// Unix time in fractional seconds
pub(crate) fn unix_seconds(now: DateTime<Utc>) -> f64 {
    now.timestamp_millis() as f64 / 1000.0
}

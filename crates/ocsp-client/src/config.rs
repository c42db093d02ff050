//! Configuration types for OCSP revocation checking
//!
//! [`ClientConfig`] holds process-level settings and is serde-friendly.
//! [`VerifyConfig`] is passed on every verification call. [`EnvOverrides`]
//! captures the environment variables the client honours, read once.

use std::time::Duration;

use ocsp_proto::{Certificate, HashAlgorithm};
use serde::{Deserialize, Serialize};

/// Behavior when a certificate's revocation status cannot be determined
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Allow the connection unless a certificate is known to be revoked
    ///
    /// **Security Note**: Transport failures and `Unknown` answers are
    /// tolerated. A single warning summarizes what could not be checked.
    #[default]
    FailOpen,

    /// Reject the connection on any revocation check failure
    ///
    /// Responder timeouts are tripled in this mode.
    FailClosed,
}

impl FailureMode {
    pub(crate) fn timeout_multiplier(self) -> u32 {
        match self {
            FailureMode::FailOpen => 1,
            FailureMode::FailClosed => 3,
        }
    }
}

/// Hash algorithm used to build request CertIDs
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestHash {
    #[default]
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl From<RequestHash> for HashAlgorithm {
    fn from(hash: RequestHash) -> Self {
        match hash {
            RequestHash::Sha1 => HashAlgorithm::Sha1,
            RequestHash::Sha256 => HashAlgorithm::Sha256,
            RequestHash::Sha384 => HashAlgorithm::Sha384,
            RequestHash::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

/// Per-call verification settings
#[derive(Debug, Clone, Default)]
pub struct VerifyConfig {
    pub failure_mode: FailureMode,

    /// Responder URLs that replace the certificate's AIA list
    pub servers_override: Vec<String>,

    /// Extra trust anchors for chains that do not end in a self-signed root
    pub extra_cas: Vec<Certificate>,

    /// Query every responder and reduce the answers instead of stopping at
    /// the first terminal one
    pub query_all_servers: bool,

    /// Reject responses whose thisUpdate is older than this
    pub this_update_max_age: Option<Duration>,

    /// Retries per responder exchange on top of the first attempt; `None`
    /// leaves only the time budget
    pub max_retries: Option<u32>,
}

impl VerifyConfig {
    pub fn fail_open() -> Self {
        Self::default()
    }

    pub fn fail_closed() -> Self {
        Self {
            failure_mode: FailureMode::FailClosed,
            ..Self::default()
        }
    }

    pub fn with_servers(mut self, servers: Vec<String>) -> Self {
        self.servers_override = servers;
        self
    }

    pub fn with_extra_cas(mut self, cas: Vec<Certificate>) -> Self {
        self.extra_cas = cas;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Test hooks, normally enabled only through the environment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestHooks {
    /// Treat every subject as listing no responder URL
    #[serde(default)]
    pub no_responder_url: bool,

    /// Force `InvalidValidity` in the evaluator
    #[serde(default)]
    pub inject_validity_error: bool,

    /// Force `Unknown` in the evaluator
    #[serde(default)]
    pub inject_unknown_status: bool,
}

/// Process-level OCSP client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Total timeout per responder, retries included
    #[serde(default = "default_responder_timeout")]
    pub responder_timeout_ms: u64,

    /// Total timeout for the remote cache-server download
    #[serde(default = "default_cache_server_timeout")]
    pub cache_server_timeout_ms: u64,

    /// Age in seconds after which a cached response is discarded
    #[serde(default = "default_cache_expiry")]
    pub cache_expiry_secs: u64,

    /// Maximum number of cached responses (oldest evicted first)
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,

    /// Tolerated clock skew in seconds
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,

    /// Fraction (1/ratio) of the thisUpdate..nextUpdate window tolerated
    /// past nextUpdate
    #[serde(default = "default_tolerable_validity_ratio")]
    pub tolerable_validity_ratio: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,

    /// Seed for the backoff jitter; `None` seeds from OS entropy
    #[serde(default)]
    pub backoff_seed: Option<u64>,

    /// Remote cache-server URL; `None` disables the remote cache
    #[serde(default)]
    pub cache_server_url: Option<String>,

    #[serde(default = "default_true")]
    pub cache_server_enabled: bool,

    /// `Host` header template: first `%s` is the responder hostname, second
    /// is the base64 request
    #[serde(default)]
    pub retry_url_template: Option<String>,

    /// Replaces the target URL of every OCSP call
    #[serde(default)]
    pub responder_url_override: Option<String>,

    #[serde(default)]
    pub request_hash: RequestHash,

    /// Maximum OCSP response size in bytes (default 10 MiB)
    #[serde(default = "default_max_response_size")]
    pub max_response_size_bytes: usize,

    #[serde(default)]
    pub test_hooks: TestHooks,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responder_timeout(&self) -> Duration {
        Duration::from_millis(self.responder_timeout_ms)
    }

    pub fn cache_server_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_server_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    /// Cache capacity, never below [`MIN_CACHE_ENTRIES`]
    pub fn cache_capacity(&self) -> usize {
        self.max_cache_entries.max(MIN_CACHE_ENTRIES)
    }

    /// Apply environment overrides on top of this configuration
    pub fn with_env(mut self, env: &EnvOverrides) -> Self {
        env.apply(&mut self);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            responder_timeout_ms: default_responder_timeout(),
            cache_server_timeout_ms: default_cache_server_timeout(),
            cache_expiry_secs: default_cache_expiry(),
            max_cache_entries: default_max_cache_entries(),
            clock_skew_secs: default_clock_skew(),
            tolerable_validity_ratio: default_tolerable_validity_ratio(),
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
            backoff_seed: None,
            cache_server_url: None,
            cache_server_enabled: true,
            retry_url_template: None,
            responder_url_override: None,
            request_hash: RequestHash::default(),
            max_response_size_bytes: default_max_response_size(),
            test_hooks: TestHooks::default(),
        }
    }
}

pub const MIN_CACHE_ENTRIES: usize = 100;

// Default value functions for serde

fn default_true() -> bool {
    true
}

fn default_responder_timeout() -> u64 {
    10_000
}

fn default_cache_server_timeout() -> u64 {
    5_000
}

fn default_cache_expiry() -> u64 {
    86_400 // 24 hours
}

fn default_max_cache_entries() -> usize {
    10_000
}

fn default_clock_skew() -> u64 {
    900 // 15 minutes
}

fn default_tolerable_validity_ratio() -> u32 {
    100
}

fn default_backoff_base() -> u64 {
    5_000
}

fn default_backoff_cap() -> u64 {
    160_000
}

fn default_max_response_size() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

pub const ENV_CACHE_SERVER_ENABLED: &str = "OCSP_RESPONSE_CACHE_SERVER_ENABLED";
pub const ENV_CACHE_SERVER_URL: &str = "OCSP_RESPONSE_CACHE_SERVER_URL";
pub const ENV_RETRY_URL: &str = "OCSP_RESPONSE_RETRY_URL";
pub const ENV_TEST_RESPONDER_URL: &str = "OCSP_TEST_RESPONDER_URL";
pub const ENV_TEST_RESPONDER_TIMEOUT: &str = "OCSP_TEST_RESPONDER_TIMEOUT";
pub const ENV_TEST_CACHE_SERVER_TIMEOUT: &str = "OCSP_TEST_CACHE_SERVER_TIMEOUT";
pub const ENV_TEST_NO_OCSP_RESPONDER_URL: &str = "OCSP_TEST_NO_OCSP_RESPONDER_URL";
pub const ENV_TEST_INJECT_VALIDITY_ERROR: &str = "OCSP_TEST_INJECT_VALIDITY_ERROR";
pub const ENV_TEST_INJECT_UNKNOWN_STATUS: &str = "OCSP_TEST_INJECT_UNKNOWN_STATUS";

/// Environment overrides, captured once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub cache_server_enabled: Option<bool>,
    pub cache_server_url: Option<String>,
    pub retry_url_template: Option<String>,
    pub responder_url: Option<String>,
    pub responder_timeout_ms: Option<u64>,
    pub cache_server_timeout_ms: Option<u64>,
    pub no_responder_url: bool,
    pub inject_validity_error: bool,
    pub inject_unknown_status: bool,
}

impl EnvOverrides {
    /// Read overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let is_true = |name: &str| non_empty(name).is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let millis = |name: &str| non_empty(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            cache_server_enabled: non_empty(ENV_CACHE_SERVER_ENABLED).and_then(|v| {
                if v.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if v.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    None
                }
            }),
            cache_server_url: non_empty(ENV_CACHE_SERVER_URL),
            retry_url_template: non_empty(ENV_RETRY_URL),
            responder_url: non_empty(ENV_TEST_RESPONDER_URL),
            responder_timeout_ms: millis(ENV_TEST_RESPONDER_TIMEOUT),
            cache_server_timeout_ms: millis(ENV_TEST_CACHE_SERVER_TIMEOUT),
            no_responder_url: is_true(ENV_TEST_NO_OCSP_RESPONDER_URL),
            inject_validity_error: is_true(ENV_TEST_INJECT_VALIDITY_ERROR),
            inject_unknown_status: is_true(ENV_TEST_INJECT_UNKNOWN_STATUS),
        }
    }

    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(enabled) = self.cache_server_enabled {
            config.cache_server_enabled = enabled;
        }
        if let Some(ref url) = self.cache_server_url {
            config.cache_server_url = Some(url.clone());
        }
        if let Some(ref template) = self.retry_url_template {
            config.retry_url_template = Some(template.clone());
        }
        if let Some(ref url) = self.responder_url {
            config.responder_url_override = Some(url.clone());
        }
        if let Some(ms) = self.responder_timeout_ms {
            config.responder_timeout_ms = ms;
        }
        if let Some(ms) = self.cache_server_timeout_ms {
            config.cache_server_timeout_ms = ms;
        }
        config.test_hooks.no_responder_url |= self.no_responder_url;
        config.test_hooks.inject_validity_error |= self.inject_validity_error;
        config.test_hooks.inject_unknown_status |= self.inject_unknown_status;
    }
}

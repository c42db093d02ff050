//! OCSP response cache
//!
//! Maps a [`CertId`] to the raw DER response and the Unix time it was
//! stored. Entries are re-evaluated on every lookup. An entry whose
//! evaluation is not terminal (expired, stale, unparsable) is removed.
//!
//! # Locking
//!
//! A single `tokio::sync::RwLock` guards the map and its dirty flag.
//! Lookups copy the entry under the read lock and evaluate it after the lock
//! is released. Only [`ResponseCache::persist`] holds the lock across I/O.
//!
//! # Snapshot format
//!
//! Persisted and downloaded snapshots are a JSON object mapping the CertID
//! key string to `[unix_seconds, base64_der]`:
//!
//! ```json
//! {"MEQwQjAHBgUrDgMCGgQU...": [1700000000.0, "MIIB..."]}
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ocsp_proto::{CertId, Certificate};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::OcspError;
use crate::evaluator::Evaluator;
use crate::status::{Status, StatusCode};
use crate::storage::Storage;

/// Storage key for the persisted cache
pub const CACHE_STORAGE_KEY: &str = "ocsp_cache";

/// A cached DER response and when it was stored
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    /// Unix seconds
    pub timestamp: f64,
    pub response: Vec<u8>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CertId, CachedResponse>,
    /// Map changed since the last persist
    dirty: bool,
}

impl CacheState {
    /// Remove the entry with the smallest timestamp
    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by(|a, b| a.1.timestamp.total_cmp(&b.1.timestamp))
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            self.entries.remove(&id);
        }
    }

    fn insert(&mut self, cert_id: CertId, entry: CachedResponse, max_entries: usize) {
        if !self.entries.contains_key(&cert_id) && self.entries.len() >= max_entries {
            self.evict_oldest();
        }
        self.entries.insert(cert_id, entry);
    }
}

/// In-memory OCSP response cache with dirty tracking
#[derive(Debug)]
pub struct ResponseCache {
    state: RwLock<CacheState>,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Copy of the entry for `cert_id`
    pub async fn get(&self, cert_id: &CertId) -> Option<CachedResponse> {
        self.state.read().await.entries.get(cert_id).cloned()
    }

    /// Evaluate the cached entry for `cert_id`
    ///
    /// Returns `MissedCache` when nothing is stored. A non-terminal result
    /// deletes the entry, unless it was replaced in the meantime.
    pub async fn lookup(
        &self,
        cert_id: &CertId,
        issuer: &Certificate,
        evaluator: &Evaluator,
        now: DateTime<Utc>,
        max_age: Option<Duration>,
    ) -> Status {
        let Some(entry) = self.get(cert_id).await else {
            return Status::with_error(
                StatusCode::MissedCache,
                OcspError::Cache(format!("no cache entry for serial {}", cert_id.serial_hex())),
            );
        };

        let status = evaluator.evaluate_cached(&entry, cert_id, issuer, now, max_age);
        if !status.is_terminal() {
            debug!(serial = %cert_id.serial_hex(), code = %status.code, "dropping cache entry");
            let mut state = self.state.write().await;
            if state.entries.get(cert_id) == Some(&entry) {
                state.entries.remove(cert_id);
                state.dirty = true;
            }
        }
        status
    }

    pub async fn insert(&self, cert_id: CertId, response: Vec<u8>, timestamp: f64) {
        let mut state = self.state.write().await;
        state.insert(cert_id, CachedResponse { timestamp, response }, self.max_entries);
        state.dirty = true;
    }

    pub async fn delete(&self, cert_id: &CertId) -> bool {
        let mut state = self.state.write().await;
        let removed = state.entries.remove(cert_id).is_some();
        state.dirty |= removed;
        removed
    }

    /// Remove every entry
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.dirty = true;
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.read().await.dirty
    }

    /// Merge entries, keeping whichever copy is newer
    ///
    /// Returns the number of entries taken.
    pub async fn merge(&self, entries: Vec<(CertId, CachedResponse)>, mark_dirty: bool) -> usize {
        let mut state = self.state.write().await;
        let mut merged = 0;
        for (cert_id, entry) in entries {
            let newer = state
                .entries
                .get(&cert_id)
                .map_or(true, |existing| existing.timestamp < entry.timestamp);
            if newer {
                state.insert(cert_id, entry, self.max_entries);
                merged += 1;
            }
        }
        if mark_dirty && merged > 0 {
            state.dirty = true;
        }
        merged
    }

    /// Write the snapshot to `storage` if the map changed
    ///
    /// Returns whether anything was written. The dirty flag is cleared only
    /// after the write succeeds.
    pub async fn persist(&self, storage: &dyn Storage) -> Result<bool, OcspError> {
        let mut state = self.state.write().await;
        if !state.dirty {
            return Ok(false);
        }
        let snapshot = encode_snapshot(&state.entries)?;
        storage.put(CACHE_STORAGE_KEY, &snapshot).await?;
        state.dirty = false;
        debug!(entries = state.entries.len(), "persisted OCSP cache");
        Ok(true)
    }

    /// Merge the snapshot stored in `storage`
    ///
    /// Loaded entries do not mark the cache dirty. They are validated when
    /// first looked up.
    pub async fn load(&self, storage: &dyn Storage) -> Result<usize, OcspError> {
        let Some(bytes) = storage.get(CACHE_STORAGE_KEY).await? else {
            return Ok(0);
        };
        let entries = decode_snapshot(&bytes)?;
        let merged = self.merge(entries, false).await;
        debug!(merged, "loaded OCSP cache");
        Ok(merged)
    }

    /// Snapshot of every entry
    pub async fn entries(&self) -> HashMap<CertId, CachedResponse> {
        self.state.read().await.entries.clone()
    }
}

/// Serialize entries to the JSON snapshot format
pub fn encode_snapshot(entries: &HashMap<CertId, CachedResponse>) -> Result<Vec<u8>, OcspError> {
    let mut snapshot: BTreeMap<String, (f64, String)> = BTreeMap::new();
    for (cert_id, entry) in entries {
        let key = cert_id.to_key_string()?;
        snapshot.insert(key, (entry.timestamp, BASE64.encode(&entry.response)));
    }
    serde_json::to_vec(&snapshot).map_err(|e| OcspError::Cache(format!("encode snapshot: {e}")))
}

/// Parse a JSON snapshot, skipping entries that do not decode
pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<(CertId, CachedResponse)>, OcspError> {
    let snapshot: HashMap<String, (f64, String)> = serde_json::from_slice(bytes)
        .map_err(|e| OcspError::Cache(format!("decode snapshot: {e}")))?;

    let mut entries = Vec::with_capacity(snapshot.len());
    for (key, (timestamp, encoded)) in snapshot {
        let cert_id = match CertId::decode_key(&key) {
            Ok(cert_id) => cert_id,
            Err(e) => {
                debug!(error = %e, "skipping cache entry with bad key");
                continue;
            }
        };
        let response = match BASE64.decode(encoded.as_bytes()) {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "skipping cache entry with bad response encoding");
                continue;
            }
        };
        entries.push((cert_id, CachedResponse { timestamp, response }));
    }
    Ok(entries)
}

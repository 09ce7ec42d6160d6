//! Thin client for the Pexels API.
//!
//! Calls are blocking; async callers hop onto `spawn_blocking`. Payloads are
//! handed back untouched so the HTTP proxy can pass them straight through.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{DEFAULT_CACHE_TTL_SECS, DEFAULT_PEXELS_API_BASE, RuntimeSettings};

pub const CURATED_PAGE_SIZE: u32 = 5;
pub const POPULAR_PAGE_SIZE: u32 = 5;
pub const SEARCH_PAGE_SIZE: u32 = 10;
/// Upper bound on memoised bodies; search queries are caller-controlled.
pub const CACHE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream responded with status {0}")]
    Status(u16),
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream payload was not valid JSON: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub base_url: String,
    pub cache_ttl: Duration,
}

impl UpstreamConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_PEXELS_API_BASE.to_string(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }

    pub fn from_settings(settings: &RuntimeSettings) -> anyhow::Result<Self> {
        Ok(Self {
            api_key: settings.require_api_key()?.to_string(),
            base_url: settings.api_base.clone(),
            cache_ttl: settings.cache_ttl,
        })
    }
}

/// Memoises successful upstream bodies per request for the freshness window.
/// A hit may be up to `ttl` old. Holds at most `capacity` bodies; the oldest
/// goes first.
struct FreshnessCache {
    ttl: Duration,
    capacity: usize,
    entries: RwLock<HashMap<String, CachedBody>>,
}

struct CachedBody {
    stored_at: Instant,
    body: Value,
}

impl FreshnessCache {
    fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read();
        let cached = entries.get(key)?;
        if cached.stored_at.elapsed() < self.ttl {
            Some(cached.body.clone())
        } else {
            None
        }
    }

    fn insert(&self, key: String, body: Value) {
        if self.ttl.is_zero() || self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.write();
        entries.retain(|_, cached| cached.stored_at.elapsed() < self.ttl);
        while entries.len() >= self.capacity && !entries.contains_key(&key) {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, cached)| cached.stored_at)
                .map(|(stale, _)| stale.clone())
            else {
                break;
            };
            debug!(%oldest, "evicting upstream response from full cache");
            entries.remove(&oldest);
        }
        entries.insert(
            key,
            CachedBody {
                stored_at: Instant::now(),
                body,
            },
        );
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

pub struct UpstreamClient {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
    cache: FreshnessCache,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(concat!("reelfront/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            api_key: config.api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cache: FreshnessCache::new(config.cache_ttl, CACHE_CAPACITY),
        }
    }

    /// Freshness window advertised to downstream caches.
    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl
    }

    /// Curated photo feed.
    pub fn fetch_curated(&self, per_page: u32) -> Result<Value, UpstreamError> {
        self.get_json("/v1/curated", &[("per_page", per_page.to_string())])
    }

    pub fn fetch_popular_videos(&self, per_page: u32) -> Result<Value, UpstreamError> {
        self.get_json("/videos/popular", &[("per_page", per_page.to_string())])
    }

    /// Keyword search. An empty query is forwarded as-is; upstream answers it
    /// with its default selection.
    pub fn search_videos(&self, query: &str, per_page: u32) -> Result<Value, UpstreamError> {
        self.get_json(
            "/videos/search",
            &[
                ("query", query.to_string()),
                ("per_page", per_page.to_string()),
            ],
        )
    }

    pub fn fetch_video(&self, id: u64) -> Result<Value, UpstreamError> {
        self.get_json(&format!("/videos/videos/{id}"), &[])
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        let cache_key = cache_key(&url, params);
        if let Some(body) = self.cache.get(&cache_key) {
            debug!(%cache_key, "serving upstream response from cache");
            return Ok(body);
        }

        let mut request = self.agent.get(&url).set("Authorization", &self.api_key);
        for (name, value) in params {
            request = request.query(name, value);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                warn!(%url, status = code, "upstream rejected request");
                return Err(UpstreamError::Status(code));
            }
            Err(ureq::Error::Transport(err)) => {
                warn!(%url, error = %err, "upstream transport failure");
                return Err(UpstreamError::Transport(err.to_string()));
            }
        };

        let body: Value = response
            .into_json()
            .map_err(|err| UpstreamError::Decode(err.to_string()))?;
        self.cache.insert(cache_key, body.clone());
        Ok(body)
    }
}

fn cache_key(url: &str, params: &[(&str, String)]) -> String {
    let mut key = url.to_string();
    for (index, (name, value)) in params.iter().enumerate() {
        key.push(if index == 0 { '?' } else { '&' });
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}

//! Cache stores and the cache storage seam.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use salma_net::{NetError, Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::ServiceWorkerError;

// ==================== Keys ====================

/// Normalized request identity: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    /// Build a key from a method and URL.
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(format!("{} {}", method, url))
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Key for a request.
    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ==================== Entries ====================

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers in arrival order. Values are raw bytes; they need
    /// not be valid UTF-8.
    #[serde(with = "header_values_base64")]
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// `basic`, `cors`, `opaque` or `default`.
    pub response_type: String,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for `request`, consuming the response.
    ///
    /// Pass a copy obtained from [`Response::duplicate`] when the original
    /// still has to be returned to the caller.
    pub async fn from_response(request: &Request, response: Response) -> Result<Self, NetError> {
        let status = response.status.as_u16();
        let response_type = response.response_type.as_str().to_string();
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(Self {
            url: request.url.to_string(),
            method: request.method.to_string(),
            status,
            headers,
            body,
            response_type,
            cached_at: crate::now_millis(),
        })
    }

    /// Rebuild a response from this snapshot.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.append(n, v);
                }
                _ => trace!(header = %name, "Skipping unrepresentable cached header"),
            }
        }

        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = Response::new(status, headers, Bytes::from(self.body.clone()))
            .with_type(ResponseType::from_name(&self.response_type));
        if let Ok(url) = Url::parse(&self.url) {
            response = response.with_url(url);
        }
        response.from_cache = true;
        response
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod header_values_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        headers: &[(String, Vec<u8>)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            headers
                .iter()
                .map(|(name, value)| (name, STANDARD.encode(value))),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, Vec<u8>)>, D::Error> {
        let encoded = Vec::<(String, String)>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(name, value)| {
                STANDARD
                    .decode(value)
                    .map(|value| (name, value))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

// ==================== Cache ====================

/// A single named store.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add or replace an entry.
    pub fn put(&mut self, key: RequestKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Named cache stores (the platform's `caches` global).
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a store, creating it if absent.
    async fn open(&self, name: &str) -> Result<(), ServiceWorkerError>;

    /// Check if a store exists.
    async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// Write an entry, creating the store if absent. Replaces any entry under `key`.
    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        entry: CacheEntry,
    ) -> Result<(), ServiceWorkerError>;

    /// Look up an entry in one store.
    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError>;

    /// Delete a whole store. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// Names of all stores, sorted.
    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError>;
}

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a store, if it exists.
    pub async fn entry_count(&self, name: &str) -> Option<usize> {
        self.caches.read().await.get(name).map(Cache::len)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), ServiceWorkerError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        entry: CacheEntry,
    ) -> Result<(), ServiceWorkerError> {
        debug!(store = name, key = %key, "Cache put");
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
            .put(key, entry);
        Ok(())
    }

    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header;

    fn entry(url: &str, body: &str) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: vec![("content-type".to_string(), b"text/css".to_vec())],
            body: body.as_bytes().to_vec(),
            response_type: "basic".to_string(),
            cached_at: 0,
        }
    }

    fn key(url: &str) -> RequestKey {
        RequestKey::get(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_request_key_normalization() {
        assert_eq!(
            key("HTTPS://Salma.Example:443/app.css#top"),
            key("https://salma.example/app.css")
        );
        assert_ne!(key("https://salma.example/a?x=1"), key("https://salma.example/a?x=2"));

        let url = Url::parse("https://salma.example/api").unwrap();
        assert_ne!(RequestKey::new(&Method::POST, &url), RequestKey::get(&url));
        assert_eq!(RequestKey::get(&url).as_str(), "GET https://salma.example/api");
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("v1");
        cache.put(key("https://salma.example/style.css"), entry("https://salma.example/style.css", "a"));

        assert!(cache.match_request(&key("https://salma.example/style.css")).is_some());
        assert!(cache.match_request(&key("https://salma.example/other.css")).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_put_replaces() {
        let mut cache = Cache::new("v1");
        let k = key("https://salma.example/style.css");
        cache.put(k.clone(), entry("https://salma.example/style.css", "old"));
        cache.put(k.clone(), entry("https://salma.example/style.css", "new"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.match_request(&k).unwrap().body, b"new".to_vec());
    }

    #[tokio::test]
    async fn test_entry_round_trips_response() {
        let request = Request::get(Url::parse("https://salma.example/app.css").unwrap());
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/css"));
        headers.append(header::VARY, HeaderValue::from_static("accept"));
        headers.append(header::VARY, HeaderValue::from_static("origin"));
        let response = Response::new(StatusCode::OK, headers.clone(), "body{}")
            .with_type(ResponseType::Basic);

        let entry = CacheEntry::from_response(&request, response).await.unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.response_type, "basic");

        let restored = entry.to_response();
        assert!(restored.from_cache);
        assert_eq!(restored.headers, headers);
        assert_eq!(restored.response_type, ResponseType::Basic);
        assert_eq!(restored.text().await.unwrap(), "body{}");
    }

    #[tokio::test]
    async fn test_entry_keeps_non_utf8_header_values() {
        let request = Request::get(Url::parse("https://salma.example/files/tasks.pdf").unwrap());
        let disposition = HeaderValue::from_bytes("inline; filename=\"مهام.pdf\"".as_bytes()).unwrap();
        assert!(disposition.to_str().is_err());

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
        headers.insert(header::CONTENT_DISPOSITION, disposition.clone());
        let response = Response::new(StatusCode::OK, headers.clone(), "%PDF")
            .with_type(ResponseType::Basic);

        let entry = CacheEntry::from_response(&request, response).await.unwrap();
        assert_eq!(entry.headers.len(), 2);

        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);

        let restored = back.to_response();
        assert_eq!(restored.headers, headers);
        assert_eq!(restored.headers[header::CONTENT_DISPOSITION].as_bytes(), disposition.as_bytes());
    }

    #[test]
    fn test_entry_serializes_body_as_base64() {
        let json = serde_json::to_value(entry("https://salma.example/a", "hi")).unwrap();
        assert_eq!(json["body"], "aGk=");

        let back: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.body, b"hi".to_vec());
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryCacheStorage::new();
        assert!(!storage.has("v1").await.unwrap());

        storage.open("v1").await.unwrap();
        assert!(storage.has("v1").await.unwrap());
        assert_eq!(storage.entry_count("v1").await, Some(0));

        let k = key("https://salma.example/a.js");
        storage
            .put("v1", k.clone(), entry("https://salma.example/a.js", "js"))
            .await
            .unwrap();
        assert!(storage.match_request("v1", &k).await.unwrap().is_some());
        assert!(storage.match_request("v2", &k).await.unwrap().is_none());

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_storage_put_creates_store() {
        let storage = MemoryCacheStorage::new();
        storage
            .put("v2", key("https://salma.example/"), entry("https://salma.example/", "<html>"))
            .await
            .unwrap();
        storage.open("v1").await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["v1".to_string(), "v2".to_string()]);
    }
}

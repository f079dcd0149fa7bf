//! Request classification and caching strategies.

use http::StatusCode;
use salma_net::{Destination, Fetcher, Request, Response, ResponseType};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage, RequestKey};
use crate::event::ExtendableEvent;
use crate::fallback;

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// Client that issued the request, if known.
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }
}

/// Strategy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Not intercepted; the platform handles it.
    PassThrough,
    /// Store first, network on miss.
    CacheFirst,
    /// Network first, store and offline page on failure.
    NetworkFirst,
    /// Network, store on failure, possibly nothing.
    NetworkWithCacheFallback,
}

impl Strategy {
    /// Classify a request. First match wins.
    pub fn classify(request: &Request) -> Self {
        if !request.is_http() {
            Self::PassThrough
        } else if request.destination.is_static_asset() {
            Self::CacheFirst
        } else if request.is_navigation() {
            Self::NetworkFirst
        } else {
            Self::NetworkWithCacheFallback
        }
    }
}

/// Result of routing a fetch event.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The router did not intercept; default network behavior applies.
    PassThrough,
    /// Answer for the request. `None` when neither network nor store had one.
    Respond(Option<Response>),
}

impl FetchOutcome {
    /// The response, if the router produced one.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::PassThrough => None,
            Self::Respond(response) => response,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }
}

/// Routes intercepted requests through the active store and the network.
pub struct CacheRouter {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    store_name: String,
    root_url: Url,
    app_name: String,
}

impl CacheRouter {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        store_name: impl Into<String>,
        root_url: Url,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            fetcher,
            store_name: store_name.into(),
            root_url,
            app_name: app_name.into(),
        }
    }

    /// Name of the store reads and writes go to.
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Handle one intercepted request. Store writes are registered on `lifetime`.
    pub async fn handle_fetch(
        &self,
        event: &FetchEvent,
        lifetime: &ExtendableEvent,
    ) -> FetchOutcome {
        let request = &event.request;
        let strategy = Strategy::classify(request);
        trace!(url = %request.url, ?strategy, "Routing request");

        match strategy {
            Strategy::PassThrough => FetchOutcome::PassThrough,
            Strategy::CacheFirst => {
                FetchOutcome::Respond(Some(self.cache_first(request, lifetime).await))
            }
            Strategy::NetworkFirst => {
                FetchOutcome::Respond(Some(self.network_first(request, lifetime).await))
            }
            Strategy::NetworkWithCacheFallback => {
                FetchOutcome::Respond(self.network_with_cache_fallback(request).await)
            }
        }
    }

    async fn cache_first(&self, request: &Request, lifetime: &ExtendableEvent) -> Response {
        let key = RequestKey::for_request(request);
        if let Some(cached) = self.lookup(&key).await {
            trace!(key = %key, "Cache hit");
            return cached;
        }

        let fetched = match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Asset fetch failed; serving fallback");
                return asset_fallback(request.destination);
            }
        };

        if fetched.status != StatusCode::OK || fetched.response_type != ResponseType::Basic {
            return fetched;
        }

        self.store_in_background(request, key, fetched, lifetime)
    }

    async fn network_first(&self, request: &Request, lifetime: &ExtendableEvent) -> Response {
        let key = RequestKey::for_request(request);

        match self.fetcher.fetch(request).await {
            Ok(fetched) if fetched.status == StatusCode::OK => {
                return self.store_in_background(request, key, fetched, lifetime);
            }
            Ok(fetched) => return fetched,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Navigation fetch failed; trying store")
            }
        }

        if let Some(cached) = self.lookup(&key).await {
            return cached;
        }
        if let Some(root) = self.lookup(&RequestKey::get(&self.root_url)).await {
            debug!(url = %request.url, "Serving cached root document");
            return root;
        }
        fallback::offline_page(&self.app_name)
    }

    async fn network_with_cache_fallback(&self, request: &Request) -> Option<Response> {
        match self.fetcher.fetch(request).await {
            Ok(fetched) => Some(fetched),
            Err(e) => {
                debug!(url = %request.url, error = %e, "Fetch failed; trying store");
                self.lookup(&RequestKey::for_request(request)).await
            }
        }
    }

    /// Read from the active store. Storage failures count as a miss.
    async fn lookup(&self, key: &RequestKey) -> Option<Response> {
        match self.storage.match_request(&self.store_name, key).await {
            Ok(entry) => entry.map(|e| e.to_response()),
            Err(e) => {
                warn!(store = %self.store_name, key = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    /// Split `response`, register the store write of the copy on `lifetime`,
    /// and return the original. The copy is read inside the background task.
    fn store_in_background(
        &self,
        request: &Request,
        key: RequestKey,
        mut response: Response,
        lifetime: &ExtendableEvent,
    ) -> Response {
        let copy = response.duplicate();
        let storage = Arc::clone(&self.storage);
        let store = self.store_name.clone();
        let request = request.clone();
        lifetime.wait_until(async move {
            let entry = CacheEntry::from_response(&request, copy).await?;
            storage.put(&store, key, entry).await
        });

        response
    }
}

fn asset_fallback(destination: Destination) -> Response {
    if destination == Destination::Image {
        fallback::placeholder_image()
    } else {
        fallback::asset_unavailable()
    }
}

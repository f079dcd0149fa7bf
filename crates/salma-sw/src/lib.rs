//! # Salma Offline Worker
//!
//! Request-interception and caching layer for the Salma organizer PWA.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache manifest), activate (evict stale stores, claim clients)
//! - **Strategy router**: cache-first for static assets, network-first for
//!   navigations, network-with-cache-fallback for everything else
//! - **Fallbacks**: offline HTML page, SVG placeholder image, empty 408 response
//! - **Cache storage**: in-memory and JSON-on-disk stores keyed by method + URL
//! - **Messaging & notifications**: `SKIP_WAITING`, `GET_VERSION`, push display,
//!   notification click routing
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker::dispatch (EventKind → handler)
//!     │
//!     ├── CacheLifecycle ──── install / activate / skip waiting
//!     │       └── ServiceWorkerRegistration (installing, waiting, active)
//!     │
//!     ├── CacheRouter ─────── fetch events
//!     │       ├── Fetcher (network)
//!     │       ├── CacheStorage (stores by name)
//!     │       └── fallback (synthesized responses)
//!     │
//!     └── Clients / Notifier ── push, notification clicks
//! ```

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod disk;
pub mod event;
pub mod fallback;
pub mod lifecycle;
pub mod messaging;
pub mod notification;
pub mod registration;
pub mod router;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, MemoryCacheStorage, RequestKey};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use disk::DiskCacheStorage;
pub use event::{ExtendableEvent, SettleReport};
pub use lifecycle::{ActivationReport, CacheLifecycle, InstallReport};
pub use messaging::{ClientMessage, MessageEvent, VersionReply};
pub use notification::{
    LogNotifier, Notification, NotificationAction, NotificationClickEvent, NotificationOptions,
    Notifier, PushEvent,
};
pub use registration::{ServiceWorker, ServiceWorkerRegistration, ServiceWorkerState};
pub use router::{CacheRouter, FetchEvent, FetchOutcome, Strategy};
pub use worker::{ClickOutcome, Dispatched, EventKind, EventOutcome, OfflineWorker, WorkerEvent};

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<salma_common::ConfigError> for ServiceWorkerError {
    fn from(e: salma_common::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<salma_net::NetError> for ServiceWorkerError {
    fn from(e: salma_net::NetError) -> Self {
        Self::NetworkError(e.to_string())
    }
}

impl From<std::io::Error> for ServiceWorkerError {
    fn from(e: std::io::Error) -> Self {
        Self::CacheError(e.to_string())
    }
}

/// Milliseconds since the Unix epoch, zero if the clock is before it.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

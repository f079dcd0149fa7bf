//! # Salma Net
//!
//! Request/response model and network access for the Salma offline worker.
//!
//! ## Design Goals
//!
//! 1. **Single-read bodies**: a [`Response`] body can be consumed once; storing and
//!    returning the same response requires an explicit [`Response::duplicate`]
//! 2. **Request classification inputs**: destination, mode and credentials travel
//!    with every [`Request`]
//! 3. **Pluggable network**: everything goes through the [`Fetcher`] trait so the
//!    worker can run against `reqwest` or a scripted network in tests

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod loader;
pub mod response;

pub use loader::{HttpFetcher, LoaderConfig};
pub use response::{Response, ResponseType};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Network unavailable")]
    Offline,

    #[error("Body error: {0}")]
    Body(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of resource the request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Script,
    Style,
    Font,
    Image,
    Document,
    #[default]
    Other,
}

impl Destination {
    /// Whether this destination is a static asset (script, style, font, image).
    pub fn is_static_asset(self) -> bool {
        matches!(self, Self::Script | Self::Style | Self::Font | Self::Image)
    }

    /// Guess a destination from the URL path's file extension.
    pub fn guess(url: &Url) -> Self {
        let Some(mime) = mime_guess::from_path(url.path()).first() else {
            return Self::Other;
        };

        match (mime.type_().as_str(), mime.subtype().as_str()) {
            ("text", "css") => Self::Style,
            ("text", "javascript") | ("application", "javascript") => Self::Script,
            ("font", _) | ("application", "font-woff") | ("application", "vnd.ms-fontobject") => {
                Self::Font
            }
            ("image", _) => Self::Image,
            ("text", "html") => Self::Document,
            _ => Self::Other,
        }
    }
}

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document navigation.
    Navigate,
    /// Same-origin only.
    SameOrigin,
    /// Cross-origin with CORS.
    #[default]
    Cors,
    /// Cross-origin without CORS (opaque response).
    NoCors,
}

/// Credentials mode for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    /// Never send cookies.
    Omit,
    /// Send cookies only for same-origin requests.
    #[default]
    SameOrigin,
    /// Always send cookies.
    Include,
}

/// An outbound request from the application.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub destination: Destination,
    pub mode: RequestMode,
    pub credentials: CredentialsMode,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            destination: Destination::Other,
            mode: RequestMode::Cors,
            credentials: CredentialsMode::SameOrigin,
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            mode: RequestMode::Navigate,
            credentials: CredentialsMode::Include,
            ..Self::get(url)
        }
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the credentials mode.
    pub fn credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether the URL scheme is http or https.
    pub fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }

    /// Whether this is a top-level document load.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate || self.destination == Destination::Document
    }

    /// Whether the request targets the given origin.
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }

    /// Whether cookies should accompany this request.
    pub fn sends_credentials(&self, origin: &Url) -> bool {
        match self.credentials {
            CredentialsMode::Omit => false,
            CredentialsMode::SameOrigin => self.is_same_origin(origin),
            CredentialsMode::Include => true,
        }
    }
}

/// Network access used by the worker.
///
/// An `Err` means the fetch itself failed (offline, DNS, connection reset);
/// HTTP error statuses come back as `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

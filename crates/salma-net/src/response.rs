//! Responses with single-read bodies.

use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderValue, StatusCode};
use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

use crate::NetError;

/// How the response relates to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin network response.
    Basic,
    /// Cross-origin response fetched with CORS.
    Cors,
    /// Cross-origin response fetched without CORS.
    Opaque,
    /// Built locally (fallbacks, cache snapshots of synthesized content).
    #[default]
    Default,
}

impl ResponseType {
    /// Stable name used when persisting snapshots.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Cors => "cors",
            Self::Opaque => "opaque",
            Self::Default => "default",
        }
    }

    /// Inverse of [`ResponseType::as_str`]; unknown names map to `Default`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "basic" => Self::Basic,
            "cors" => Self::Cors,
            "opaque" => Self::Opaque,
            _ => Self::Default,
        }
    }
}

/// Response body variants.
#[derive(Debug)]
enum ResponseBody {
    /// Full body already loaded.
    Full(Bytes),
    /// Streaming body; can be drained exactly once.
    Stream(Chunks),
    /// Empty.
    Empty,
}

impl ResponseBody {
    fn from_bytes(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Self::Empty
        } else {
            Self::Full(bytes)
        }
    }
}

/// An HTTP response whose body can be read once.
///
/// `Response` is deliberately not `Clone`. Reading the body consumes the
/// response; a second consumer needs a copy made up front with
/// [`Response::duplicate`].
#[derive(Debug)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    /// Served from a cache store rather than the network.
    pub from_cache: bool,
    body: ResponseBody,
}

impl Response {
    /// Create a response with a fully loaded body.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            url: None,
            status,
            headers,
            response_type: ResponseType::Default,
            from_cache: false,
            body: ResponseBody::from_bytes(body),
        }
    }

    /// Create a response whose body arrives as a stream of chunks.
    pub fn streaming(
        status: StatusCode,
        headers: HeaderMap,
        chunks: Chunks,
    ) -> Self {
        Self {
            url: None,
            status,
            headers,
            response_type: ResponseType::Default,
            from_cache: false,
            body: ResponseBody::Stream(chunks),
        }
    }

    /// Create a bodyless response with the given status.
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::new())
    }

    /// Create a locally generated response with a content type.
    pub fn synthesized(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self::new(status, headers, body)
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Content-Type header value, if present and valid UTF-8.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Whether the body is still an unread stream.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Make an independent copy of this response.
    ///
    /// A streaming body is split: a background task forwards every chunk to
    /// both copies as it arrives, so neither copy waits for the other to be
    /// read in full. Must be called from within a tokio runtime.
    pub fn duplicate(&mut self) -> Response {
        let body = match std::mem::replace(&mut self.body, ResponseBody::Empty) {
            ResponseBody::Stream(source) => {
                let (own, copy) = tee(source);
                self.body = ResponseBody::Stream(own);
                ResponseBody::Stream(copy)
            }
            ResponseBody::Full(bytes) => {
                self.body = ResponseBody::Full(bytes.clone());
                ResponseBody::Full(bytes)
            }
            ResponseBody::Empty => ResponseBody::Empty,
        };

        Response {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            response_type: self.response_type,
            from_cache: self.from_cache,
            body,
        }
    }

    /// Consume the response and return its body.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        match self.body {
            ResponseBody::Full(b) => Ok(b),
            ResponseBody::Stream(mut rx) => drain(&mut rx).await,
            ResponseBody::Empty => Ok(Bytes::new()),
        }
    }

    /// Consume the response and return its body as text.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| NetError::Body(e.to_string()))
    }
}

type Chunks = mpsc::Receiver<Result<Bytes, NetError>>;
type ChunkSender = mpsc::Sender<Result<Bytes, NetError>>;

/// Chunks buffered per side of a split stream.
const TEE_CAPACITY: usize = 16;

/// Split a chunk stream into two. A side whose receiver is dropped stops
/// receiving; the task ends when the source ends or both sides are gone.
fn tee(mut source: Chunks) -> (Chunks, Chunks) {
    let (first_tx, first_rx) = mpsc::channel(TEE_CAPACITY);
    let (second_tx, second_rx) = mpsc::channel(TEE_CAPACITY);

    tokio::spawn(async move {
        let mut first = Some(first_tx);
        let mut second = Some(second_tx);

        while let Some(chunk) = source.recv().await {
            let (a, b) = match chunk {
                Ok(bytes) => (Ok(bytes.clone()), Ok(bytes)),
                Err(e) => {
                    let reason = e.to_string();
                    (Err(e), Err(NetError::Body(reason)))
                }
            };
            forward(&mut first, a).await;
            forward(&mut second, b).await;

            if first.is_none() && second.is_none() {
                trace!("Both copies of a split body dropped");
                break;
            }
        }
    });

    (first_rx, second_rx)
}

async fn forward(side: &mut Option<ChunkSender>, chunk: Result<Bytes, NetError>) {
    let closed = match side {
        Some(tx) => tx.send(chunk).await.is_err(),
        None => false,
    };
    if closed {
        *side = None;
    }
}

async fn drain(rx: &mut Chunks) -> Result<Bytes, NetError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = rx.recv().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

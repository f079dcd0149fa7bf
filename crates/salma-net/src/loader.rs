//! Network fetcher backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use url::Url;

use crate::{Fetcher, NetError, Request, RequestMode, Response, ResponseType};

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Origin the application runs on; decides same-origin vs cross-origin.
    pub origin: Url,
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Optional connect timeout. Requests themselves are never timed out here.
    pub connect_timeout: Option<Duration>,
}

impl LoaderConfig {
    /// Default settings for the given application origin.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            user_agent: concat!("salma-offline/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_language: "ar,en;q=0.8".to_string(),
            max_redirects: 10,
            connect_timeout: None,
        }
    }
}

/// `reqwest`-backed [`Fetcher`].
///
/// Holds two clients: a credentialed one with a cookie store, and an anonymous
/// one used whenever the request must not carry credentials (cross-origin
/// requests in particular).
pub struct HttpFetcher {
    credentialed: Client,
    anonymous: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let credentialed = Self::build_client(&config, true)?;
        let anonymous = Self::build_client(&config, false)?;

        info!(origin = %config.origin, "HttpFetcher initialized");

        Ok(Self {
            credentialed,
            anonymous,
            config,
        })
    }

    fn build_client(config: &LoaderConfig, cookies: bool) -> Result<Client, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .cookie_store(cookies);

        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// The application origin.
    pub fn origin(&self) -> &Url {
        &self.config.origin
    }

    fn response_type_for(&self, request: &Request) -> ResponseType {
        if request.is_same_origin(&self.config.origin) {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if !request.is_http() {
            return Err(NetError::UnsupportedScheme(request.url.scheme().to_string()));
        }

        let with_credentials = request.sends_credentials(&self.config.origin);
        debug!(
            url = %request.url,
            method = %request.method,
            credentials = with_credentials,
            "Fetching resource"
        );

        let client = if with_credentials {
            &self.credentialed
        } else {
            &self.anonymous
        };

        let mut req_builder = client.request(request.method.clone(), request.url.clone());
        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }
        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        let response = req_builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();

        trace!(url = %url, status = %status, "Response headers received");

        // Pump the body through a channel so the response stays single-read.
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                if tx.send(chunk.map_err(NetError::from)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::streaming(status, headers, rx)
            .with_url(url)
            .with_type(self.response_type_for(request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CredentialsMode, Destination};
    use http::StatusCode;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher_for(server: &MockServer) -> HttpFetcher {
        let origin = Url::parse(&server.uri()).unwrap();
        HttpFetcher::new(LoaderConfig::new(origin)).unwrap()
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::new(Url::parse("https://salma.example/").unwrap());
        assert!(config.user_agent.starts_with("salma-offline/"));
        assert_eq!(config.max_redirects, 10);
        assert!(config.connect_timeout.is_none());
    }

    #[tokio::test]
    async fn test_fetch_same_origin_is_basic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.css"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/css")
                    .set_body_string("body{margin:0}"),
            )
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server);
        let url = Url::parse(&format!("{}/app.css", server.uri())).unwrap();
        let request = Request::get(url).destination(Destination::Style);

        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.response_type, ResponseType::Basic);
        assert_eq!(response.content_type(), Some("text/css"));
        assert_eq!(response.text().await.unwrap(), "body{margin:0}");
    }

    #[tokio::test]
    async fn test_fetch_cross_origin_is_cors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/react.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("react"))
            .mount(&server)
            .await;

        let fetcher =
            HttpFetcher::new(LoaderConfig::new(Url::parse("https://salma.example/").unwrap()))
                .unwrap();
        let url = Url::parse(&format!("{}/react.js", server.uri())).unwrap();
        let request = Request::get(url).credentials(CredentialsMode::Omit);

        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Cors);
        assert_eq!(response.text().await.unwrap(), "react");
    }

    #[tokio::test]
    async fn test_fetch_sends_accept_language() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("accept-language", "ar,en;q=0.8"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server);
        let url = Url::parse(&format!("{}/", server.uri())).unwrap();
        let response = fetcher.fetch(&Request::navigate(url)).await.unwrap();
        assert!(response.ok());
    }

    #[tokio::test]
    async fn test_http_error_status_is_ok_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server);
        let url = Url::parse(&format!("{}/missing.png", server.uri())).unwrap();
        let response = fetcher.fetch(&Request::get(url)).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let fetcher =
            HttpFetcher::new(LoaderConfig::new(Url::parse("http://127.0.0.1:1/").unwrap()))
                .unwrap();
        let request = Request::get(Url::parse("http://127.0.0.1:1/index.html").unwrap());
        assert!(fetcher.fetch(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let fetcher =
            HttpFetcher::new(LoaderConfig::new(Url::parse("https://salma.example/").unwrap()))
                .unwrap();
        let request = Request::get(Url::parse("chrome-extension://abc/inject.js").unwrap());
        assert!(matches!(
            fetcher.fetch(&request).await,
            Err(NetError::UnsupportedScheme(s)) if s == "chrome-extension"
        ));
    }
}

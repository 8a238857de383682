//! The extraction backend that admitted requests are handed to.
//!
//! The gateway only needs a small contract from it: fetch a target,
//! optionally through a proxy, and report what was found.
//! [`HttpExtractor`] is a minimal implementation on top of `reqwest`.

use async_trait::async_trait;
use log::debug;
use regex::Regex;
use reqwest::{Client, Proxy, header, redirect};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use typed_builder::TypedBuilder;
use url::Url;

use crate::{ErrorKind, Result};

/// Default user agent, `warpgate/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("warpgate/", env!("CARGO_PKG_VERSION"));
/// Default timeout of a single extraction, 30 seconds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default maximum number of redirects to follow, 10.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

static TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(?P<title>.*?)</title>").expect("title regex is valid")
});

/// Why an extraction failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// The target answered with a non-success status
    #[error("target responded with status {0}")]
    Status(u16),
    /// The request did not complete in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The request failed before a response arrived
    #[error("request failed: {0}")]
    Request(String),
    /// The response body could not be read
    #[error("cannot read response body: {0}")]
    Body(String),
    /// The given proxy address is unusable
    #[error("invalid proxy `{0}`")]
    InvalidProxy(String),
}

/// What an extraction found out about a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoInfo {
    /// The requested URL
    pub target: Url,
    /// The URL after following redirects
    pub final_url: Url,
    /// HTTP status of the final response
    pub status: u16,
    /// Content type of the final response
    pub content_type: Option<String>,
    /// Page title, if the response was an HTML page carrying one
    pub title: Option<String>,
    /// Proxy the request went through
    pub proxy: Option<String>,
}

/// An extraction backend
#[async_trait]
pub trait Extractor: Send + Sync + Debug {
    /// Fetch `target`, through `proxy` if given (a proxy URL such as
    /// `socks5://127.0.0.1:40000`).
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractionError`] if the target cannot be fetched.
    async fn extract(
        &self,
        target: &Url,
        proxy: Option<&str>,
    ) -> std::result::Result<VideoInfo, ExtractionError>;
}

/// Builder for [`HttpExtractor`].
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `ExtractorBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `ExtractorBuilder`.
"))]
pub struct ExtractorBuilder {
    /// User-agent sent with every request.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,
    /// Timeout of a whole extraction, including connection setup.
    #[builder(default = DEFAULT_TIMEOUT)]
    timeout: Duration,
    /// Maximum number of redirects per request before returning an error.
    #[builder(default = DEFAULT_MAX_REDIRECTS)]
    max_redirects: usize,
    /// When `true`, accept invalid TLS certificates.
    allow_insecure: bool,
}

impl Default for ExtractorBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ExtractorBuilder {
    /// Instantiate an [`HttpExtractor`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the underlying request client cannot be created.
    pub fn extractor(self) -> Result<HttpExtractor> {
        let direct = self.client_builder().build().map_err(ErrorKind::BuildRequestClient)?;
        Ok(HttpExtractor {
            options: self,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_builder(&self) -> reqwest::ClientBuilder {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        );

        reqwest::ClientBuilder::new()
            .gzip(true)
            .user_agent(&self.user_agent)
            .default_headers(headers)
            .danger_accept_invalid_certs(self.allow_insecure)
            .redirect(redirect::Policy::limited(self.max_redirects))
            .timeout(self.timeout)
    }
}

/// Extract by fetching the target over HTTP(S).
///
/// One client is kept per proxy URL, so connections are reused across
/// requests through the same endpoint.
#[derive(Debug)]
pub struct HttpExtractor {
    options: ExtractorBuilder,
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl HttpExtractor {
    fn client_for(&self, proxy: Option<&str>) -> std::result::Result<Client, ExtractionError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut proxied = self.proxied.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = proxied.get(proxy) {
            return Ok(client.clone());
        }

        let client = Proxy::all(proxy)
            .and_then(|p| self.options.client_builder().proxy(p).build())
            .map_err(|_| ExtractionError::InvalidProxy(proxy.to_string()))?;
        debug!("Created request client for proxy {proxy}");
        proxied.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        target: &Url,
        proxy: Option<&str>,
    ) -> std::result::Result<VideoInfo, ExtractionError> {
        let client = self.client_for(proxy)?;
        let timeout = self.options.timeout;

        let response = client.get(target.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Timeout(timeout)
            } else {
                ExtractionError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Status(status.as_u16()));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);

        let title = if content_type.as_deref().is_some_and(|ct| ct.contains("html")) {
            let body = response
                .text()
                .await
                .map_err(|e| ExtractionError::Body(e.to_string()))?;
            extract_title(&body)
        } else {
            None
        };

        Ok(VideoInfo {
            target: target.clone(),
            final_url,
            status: status.as_u16(),
            content_type,
            title,
            proxy: proxy.map(ToString::to_string),
        })
    }
}

/// First `<title>` of an HTML document, with whitespace collapsed
fn extract_title(html: &str) -> Option<String> {
    let raw = TITLE.captures(html)?.name("title")?.as_str();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_utils::mock_server;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("<html><head><TITLE>\n  Never Gonna\n Give You Up </TITLE></head>"),
            Some("Never Gonna Give You Up".to_string())
        );
        assert_eq!(extract_title("<title></title>"), None);
        assert_eq!(extract_title("no markup"), None);
    }

    #[tokio::test]
    async fn test_extract_html_page() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/watch"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><title>A video</title></html>", "text/html; charset=utf-8"),
            )
            .mount(&mock_server)
            .await;

        let target = Url::parse(&format!("{}/watch", mock_server.uri())).unwrap();
        let extractor = ExtractorBuilder::default().extractor().unwrap();
        let info = extractor.extract(&target, None).await.unwrap();

        assert_eq!(info.status, 200);
        assert_eq!(info.final_url, target);
        assert_eq!(info.title.as_deref(), Some("A video"));
        assert_eq!(info.proxy, None);
    }

    #[tokio::test]
    async fn test_extract_error_status() {
        let mock_server = mock_server!(http::StatusCode::NOT_FOUND);
        let target = Url::parse(&mock_server.uri()).unwrap();
        let extractor = ExtractorBuilder::default().extractor().unwrap();

        assert_eq!(
            extractor.extract(&target, None).await,
            Err(ExtractionError::Status(404))
        );
    }

    #[tokio::test]
    async fn test_extract_timeout() {
        let mock_server =
            mock_server!(http::StatusCode::OK, set_delay(Duration::from_millis(500)));
        let target = Url::parse(&mock_server.uri()).unwrap();
        let extractor = ExtractorBuilder::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .extractor()
            .unwrap();

        assert_eq!(
            extractor.extract(&target, None).await,
            Err(ExtractionError::Timeout(Duration::from_millis(100)))
        );
    }

    #[tokio::test]
    async fn test_extract_through_http_proxy() {
        let proxy = mock_server!(http::StatusCode::OK);
        let proxy_url = format!("http://{}", proxy.address());
        let target = Url::parse("http://video.invalid/watch?v=1").unwrap();
        let extractor = ExtractorBuilder::default().extractor().unwrap();

        let info = extractor.extract(&target, Some(&proxy_url)).await.unwrap();
        assert_eq!(info.proxy.as_deref(), Some(proxy_url.as_str()));
        assert_eq!(info.title, None);
    }

    #[tokio::test]
    async fn test_invalid_proxy() {
        let extractor = ExtractorBuilder::default().extractor().unwrap();
        let target = Url::parse("http://video.invalid/").unwrap();
        assert_eq!(
            extractor.extract(&target, Some("not a proxy url")).await,
            Err(ExtractionError::InvalidProxy("not a proxy url".to_string()))
        );
    }
}

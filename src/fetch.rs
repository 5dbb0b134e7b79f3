//! HTTP fetch layer (spec §4.3 steps 1-3).
//!
//! Client configuration mirrors the teacher's `Crawler` (`crawly.rs`): one
//! shared `reqwest::Client`, a fixed user agent, bounded concurrency
//! enforced by the caller (see `worker.rs`), and a Cloudflare-style
//! mitigation check on suspicious responses.

use crate::config::{Config, USER_AGENT};
use crate::error::FetchError;

pub struct Fetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

pub struct FetchedResponse {
    pub final_url: url::Url,
    pub status: u16,
    pub body: String,
}

impl Fetcher {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.fetch_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .pool_max_idle_per_host(config.pool_max_per_host)
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Fetches `url`, enforcing the content-type and body-size contract from
    /// spec §4.3. Returns the final (post-redirect) URL, status code and
    /// decoded body.
    pub async fn fetch(&self, url: &url::Url) -> Result<FetchedResponse, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("html") {
            return Err(FetchError::Parse(format!("unsupported content-type: {content_type:?}")));
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_body_bytes {
                return Err(FetchError::Parse("response exceeds max body size".into()));
            }
        }

        let final_url = response.url().clone();
        let status_code = status.as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Connection(e.to_string()))?;
        if bytes.len() > self.max_body_bytes {
            return Err(FetchError::Parse("response exceeds max body size".into()));
        }

        let body = String::from_utf8_lossy(&bytes).into_owned();
        Ok(FetchedResponse {
            final_url,
            status: status_code,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_returns_body_and_final_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>").insert_header("content-type", "text/html"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let url = url::Url::parse(&server.uri()).unwrap();
        let resp = fetcher.fetch(&url).await.unwrap();
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("hi"));
    }

    #[tokio::test]
    async fn non_2xx_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let url = url::Url::parse(&server.uri()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn non_html_content_type_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "application/pdf").set_body_bytes(b"%PDF".to_vec()))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let url = url::Url::parse(&server.uri()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn missing_content_type_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let url = url::Url::parse(&server.uri()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn non_html_text_subtypes_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/plain").set_body_string("plain text"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let url = url::Url::parse(&server.uri()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }
}

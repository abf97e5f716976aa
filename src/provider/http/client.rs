//! HTTP client wrapper for provider requests.

use crate::provider::error::Error;
use bytes::Bytes;
use futures::Stream;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Streaming turns can run for minutes; the stale-stream guard lives above this.
const TIMEOUT: Duration = Duration::from_secs(600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Authentication configuration.
#[derive(Clone)]
pub enum AuthConfig {
    /// No credentials (local Ollama).
    None,
    /// Custom header authentication (e.g., x-goog-api-key: {key}).
    ApiKey { header: String, key: String },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("key", &"[REDACTED]")
                .finish(),
        }
    }
}

/// HTTP client bound to one provider base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    auth: AuthConfig,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, auth: AuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let AuthConfig::ApiKey { header, key } = &self.auth {
            let name = HeaderName::try_from(header.as_str())
                .map_err(|_| Error::Api("API key header name is invalid".into()))?;
            let value = HeaderValue::from_str(key)
                .map_err(|_| Error::Api("API key contains invalid header characters".into()))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }

    /// GET `path` and deserialize the JSON body, bounded by `timeout`.
    pub async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<R, Error> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .headers(self.build_headers()?)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Api(format!("HTTP {status}: {text}")));
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::Api(format!("Failed to parse response: {e}\nBody: {text}")))
    }

    /// POST a JSON body and return the raw response byte stream.
    pub async fn post_stream<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>>, Error> {
        let url = format!("{}{path}", self.base_url);
        let mut headers = self.build_headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("HTTP {status}: {text}")));
        }

        Ok(response.bytes_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_header() {
        let client = HttpClient::new(
            "https://generativelanguage.googleapis.com/v1beta/",
            AuthConfig::ApiKey {
                header: "x-goog-api-key".into(),
                key: "secret".into(),
            },
        );
        let headers = client.build_headers().unwrap();
        assert_eq!(headers.get("x-goog-api-key").unwrap(), "secret");
        assert_eq!(
            client.base_url(),
            "https://generativelanguage.googleapis.com/v1beta"
        );
    }

    #[test]
    fn test_no_auth_has_only_content_type() {
        let client = HttpClient::new("http://localhost:11434", AuthConfig::None);
        let headers = client.build_headers().unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_debug_redacts_key() {
        let auth = AuthConfig::ApiKey {
            header: "x-goog-api-key".into(),
            key: "secret".into(),
        };
        let shown = format!("{auth:?}");
        assert!(!shown.contains("secret"));
        assert!(shown.contains("REDACTED"));
    }
}

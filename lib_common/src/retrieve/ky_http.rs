//! # HTTP Retrieval Utilities
//!
//! This module provides a small asynchronous API client around `reqwest`
//! for the measurement server's plain GET endpoints: a status-only probe
//! and a typed JSON fetch.

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
}

/// An asynchronous HTTP client bound to one base URL.
pub struct ApiClient {
    /// The underlying client.
    inner: Client,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
}

impl ApiClient {
    /// Creates a new `ApiClient` instance.
    ///
    /// # Errors
    /// Returns an error if `base_url` is not a valid absolute URL.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        // Parse the base URL to ensure it is valid and absolute
        let url = Url::parse(base_url)?;
        Ok(Self {
            inner: Client::new(),
            base_url: url,
        })
    }

    /// The base URL all paths are joined to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a GET and returns only the status code, discarding the body.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if URL joining or network execution fails.
    pub async fn probe(&self, path: &str) -> anyhow::Result<u16> {
        let full_url = self.base_url.join(path)?;
        let response = self.inner.get(full_url).send().await?;
        Ok(response.status().as_u16())
    }

    /// Performs a GET and deserializes a successful JSON body into `T`.
    ///
    /// A non-2xx answer is not an error: it comes back with `success == false`
    /// and no data.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if URL joining, network execution or
    /// deserialization of a successful body fails.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<ApiResponse<T>> {
        // 1. Construct the full absolute URL
        let full_url = self.base_url.join(path)?;

        // 2. Execute the request and capture the status
        let response = self.inner.get(full_url).send().await?;
        let status = response.status();

        // 3. Only successful bodies are parsed
        if !status.is_success() {
            log::debug!("GET {} answered HTTP {}", path, status.as_u16());
            return Ok(ApiResponse {
                data: None,
                status: status.as_u16(),
                success: false,
            });
        }
        let bytes = response.bytes().await?;
        let data = serde_json::from_slice::<T>(&bytes)?;
        Ok(ApiResponse {
            data: Some(data),
            status: status.as_u16(),
            success: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Debug, Deserialize)]
    struct Body {
        value: u32,
    }

    /// Answers every connection with `status` and `body`.
    async fn mock_server(status: u16, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.flush().await;
            }
        });

        format!("http://127.0.0.1:{}/", port)
    }

    #[test]
    fn test_relative_base_url_is_rejected() {
        assert!(ApiClient::new("not/absolute").is_err());
    }

    #[test]
    fn test_paths_join_onto_base() {
        let client = ApiClient::new("http://127.0.0.1:8000/").unwrap();
        let joined = client.base_url().join("api/health-check").unwrap();
        assert_eq!(joined.as_str(), "http://127.0.0.1:8000/api/health-check");
    }

    #[tokio::test]
    async fn test_get_json_parses_successful_body() {
        let client = ApiClient::new(&mock_server(200, r#"{"value": 7}"#).await).unwrap();

        let response = client.get_json::<Body>("api/thing").await.unwrap();

        assert!(response.success);
        assert_eq!(response.status, 200);
        assert_eq!(response.data.unwrap().value, 7);
    }

    #[tokio::test]
    async fn test_get_json_reports_failure_status_without_data() {
        let client = ApiClient::new(&mock_server(500, "not json").await).unwrap();

        let response = client.get_json::<Body>("api/thing").await.unwrap();

        assert!(!response.success);
        assert_eq!(response.status, 500);
        assert!(response.data.is_none());
        assert_eq!(client.probe("api/thing").await.unwrap(), 500);
    }
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;

use crate::backend::{ArcBackend, Backend, ByteStream, StreamError};
use crate::config::{BackendConfig, user_agent};
use crate::models::{ChatBody, RateBody};
use async_trait::async_trait;
use eyre::{Context, Result};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time;

/// Chat backend speaking the NUL-delimited JSON frame protocol over HTTP.
pub struct HttpBackend {
    alias: String,
    endpoint: String,
    api_key: Option<String>,
    timeout: Option<time::Duration>,
    chat_path: String,
    rate_path: String,
    client: reqwest::Client,
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn chat(&self, body: ChatBody) -> Result<ByteStream, StreamError> {
        let mut req = self
            .client
            .post(self.url(&self.chat_path))
            .header("Content-Type", "application/json")
            .header("User-Agent", user_agent());

        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        if let Some(token) = &self.api_key {
            req = req.bearer_auth(token);
        }

        log::trace!("Sending chat request: {:?}", body);

        let res = req
            .json(&body)
            .send()
            .await
            .map_err(|e| StreamError::Client(format!("sending chat request: {e}")))?;

        if !res.status().is_success() {
            let http_code = res.status().as_u16();
            let resp = res.text().await.unwrap_or_default();
            log::error!("Error response ({}): {}", http_code, resp);
            let message = serde_json::from_str::<ErrorResponse>(&resp)
                .ok()
                .map(|err| err.message);
            return Err(StreamError::transport(Some(http_code), message));
        }

        let stream = res
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(|e| {
                log::warn!("Reading chat response failed: {}", e);
                StreamError::transport(None, None)
            });

        Ok(Box::pin(stream))
    }

    async fn rate(&self, body: RateBody) -> Result<()> {
        let mut req = self
            .client
            .post(self.url(&self.rate_path))
            .header("User-Agent", user_agent());

        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        if let Some(token) = &self.api_key {
            req = req.bearer_auth(token);
        }

        let res = req
            .json(&body)
            .send()
            .await
            .wrap_err("sending rate request")?;

        if !res.status().is_success() {
            let http_code = res.status().as_u16();
            let resp = res.text().await.wrap_err("reading error response")?;
            eyre::bail!("rating failed ({}): {}", http_code, resp);
        }
        Ok(())
    }
}

impl From<HttpBackend> for ArcBackend {
    fn from(value: HttpBackend) -> Self {
        Arc::new(value)
    }
}

impl From<&BackendConfig> for HttpBackend {
    fn from(value: &BackendConfig) -> Self {
        let mut backend = HttpBackend::default()
            .with_endpoint(&value.endpoint)
            .with_paths(&value.chat_path, &value.rate_path);

        if let Some(api_key) = value.api_key.as_deref() {
            backend = backend.with_api_key(api_key);
        }

        if let Some(timeout) = value.timeout() {
            backend = backend.with_timeout(timeout);
        }
        backend
    }
}

impl HttpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_paths(mut self, chat_path: &str, rate_path: &str) -> Self {
        self.chat_path = chat_path.to_string();
        self.rate_path = rate_path.to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn timeout(&self) -> Option<time::Duration> {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self {
            alias: "http".to_string(),
            endpoint: "http://localhost:3000".to_string(),
            api_key: None,
            timeout: None,
            chat_path: crate::config::constants::CHAT_PATH.to_string(),
            rate_path: crate::config::constants::RATE_PATH.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorResponse {
    message: String,
}

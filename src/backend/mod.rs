pub mod error;
pub mod http;

pub use error::StreamError;
pub use http::HttpBackend;

#[cfg(test)]
use mockall::{automock, predicate::*};

use crate::{
    config::{BackendConfig, verbose},
    models::{ChatBody, RateBody},
};
use async_trait::async_trait;
use eyre::{Result, bail};
use futures::stream::BoxStream;
use std::sync::Arc;

/// Raw body of a chat response, chunk by chunk as the transport delivers it
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StreamError>>;

#[async_trait]
#[cfg_attr(test, automock)]
pub trait Backend {
    fn name(&self) -> &str;
    /// Issue a chat request. Resolves once the response head is received,
    /// the body is consumed through the returned stream.
    async fn chat(&self, body: ChatBody) -> Result<ByteStream, StreamError>;
    async fn rate(&self, body: RateBody) -> Result<()>;
}

pub type ArcBackend = Arc<dyn Backend + Send + Sync>;

pub fn new_backend(config: &BackendConfig) -> Result<ArcBackend> {
    if config.endpoint.is_empty() {
        bail!("no backend endpoint configured");
    }

    let backend: HttpBackend = config.into();
    verbose!("  [+] Backend endpoint: {}", backend.endpoint());
    Ok(Arc::new(backend))
}

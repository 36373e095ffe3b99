use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use poly_protocol::{RelayCodec, RelayRequest, RelayResponse, BODY_CONTENT_TYPE};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{Connector, RelayTransport};

/// Relay reached over HTTP. Each request is a POST of the encoded
/// [`RelayRequest`] to the path for its kind.
#[derive(Debug, Clone)]
pub struct HttpRelayTransport {
    base_url: String,
    client: Client,
}

impl HttpRelayTransport {
    pub fn new(url: &str) -> Self {
        Self::with_client(url, Client::new())
    }

    pub fn with_client(url: &str, client: Client) -> Self {
        Self {
            base_url: url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl RelayTransport for HttpRelayTransport {
    fn url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, request: RelayRequest) -> SyncResult<RelayResponse> {
        let url = format!("{}{}", self.base_url, request.endpoint());
        let body = RelayCodec::encode_payload(&request)?;
        debug!(%url, kind = poly_protocol::Frame::type_name(&request), bytes = body.len(), "relay request");

        let resp = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, BODY_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SyncError::Network(format!(
                "{url} answered {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(RelayCodec::decode_payload(&bytes)?)
    }
}

/// Opens [`HttpRelayTransport`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Connector for HttpConnector {
    fn connect(&self, url: &str) -> SyncResult<Arc<dyn RelayTransport>> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SyncError::Network(format!("unsupported server url {url}")));
        }
        Ok(Arc::new(HttpRelayTransport::with_client(url, self.client.clone())))
    }
}

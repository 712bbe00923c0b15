//! Mint client for the NFT collection API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{MintError, MintRequest, MintResponse, Minter};

pub const DEFAULT_API_URL: &str = "https://api.apillon.io";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials and target collection for [`HttpMinter`].
#[derive(Clone)]
pub struct MintApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub collection_uuid: String,
    pub timeout: Duration,
}

impl MintApiConfig {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        collection_uuid: impl Into<String>,
    ) -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            collection_uuid: collection_uuid.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn mint_url(&self) -> String {
        format!(
            "{}/nfts/collections/{}/mint",
            self.base_url.trim_end_matches('/'),
            self.collection_uuid
        )
    }
}

impl std::fmt::Debug for MintApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("collection_uuid", &self.collection_uuid)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: MintResponse,
}

/// [`Minter`] over HTTPS with basic auth.
#[derive(Debug, Clone)]
pub struct HttpMinter {
    http: Client,
    config: MintApiConfig,
}

impl HttpMinter {
    pub fn new(config: MintApiConfig) -> Result<Self, MintError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()
            .map_err(|e| MintError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &MintApiConfig {
        &self.config
    }
}

#[async_trait]
impl Minter for HttpMinter {
    #[instrument(
        skip(self, request),
        fields(wallet = %request.receiving_address, quantity = request.quantity),
        err
    )]
    async fn mint(&self, request: MintRequest) -> Result<MintResponse, MintError> {
        let response = self
            .http
            .post(self.config.mint_url())
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .json(&request)
            .send()
            .await
            .map_err(|e| MintError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MintError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| MintError::Decode(e.to_string()))?;
        debug!(success = envelope.data.success, "mint response received");
        Ok(envelope.data)
    }
}

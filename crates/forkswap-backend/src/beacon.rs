//! Beacon API progress source
//!
//! Reads the head slot and finalized epoch from a beacon node's standard
//! REST API. Any non-2xx status, transport error or unexpected body makes
//! the source unavailable for that poll.

use std::sync::Arc;
use std::time::Duration;

use forkswap_core::error::{ConfigError, SourceError};
use forkswap_core::progress::ProgressSource;
use serde::de::DeserializeOwned;
use serde::Deserialize;

const HEAD_HEADER_PATH: &str = "/eth/v1/beacon/headers/head";
const FINALITY_PATH: &str = "/eth/v1/beacon/states/head/finality_checkpoints";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct HeaderData {
    header: SignedHeader,
}

#[derive(Debug, Deserialize)]
struct SignedHeader {
    message: HeaderMessage,
}

#[derive(Debug, Deserialize)]
struct HeaderMessage {
    slot: String,
}

#[derive(Debug, Deserialize)]
struct FinalityData {
    finalized: Checkpoint,
}

#[derive(Debug, Deserialize)]
struct Checkpoint {
    epoch: String,
}

/// Progress source backed by one beacon node
#[derive(Debug, Clone)]
pub struct BeaconSource {
    name: String,
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl BeaconSource {
    /// Create a source for `base_url` with a request timeout
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::invalid("progress.sources", e.to_string()))?;
        Ok(Self::with_client(base_url, client, timeout))
    }

    /// Create a source sharing an existing client
    ///
    /// `timeout` should match the one the client was built with; it is only
    /// used to report timeouts.
    #[must_use]
    pub fn with_client(base_url: &str, client: reqwest::Client, timeout: Duration) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            name: base_url.clone(),
            base_url,
            client,
            timeout,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unreachable {
                source_name: self.name.clone(),
                reason: format!("{path} returned {status}"),
            });
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(&e))?;
        let envelope: Envelope<T> = serde_json::from_slice(&body).map_err(|e| SourceError::Malformed {
            source_name: self.name.clone(),
            reason: format!("{path}: {e}"),
        })?;
        Ok(envelope.data)
    }

    fn transport_error(&self, error: &reqwest::Error) -> SourceError {
        if error.is_timeout() {
            SourceError::Timeout {
                source_name: self.name.clone(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            SourceError::Unreachable {
                source_name: self.name.clone(),
                reason: error.to_string(),
            }
        }
    }

    fn parse_quoted(&self, field: &str, raw: &str) -> Result<u64, SourceError> {
        raw.parse().map_err(|_| SourceError::Malformed {
            source_name: self.name.clone(),
            reason: format!("{field} is not a decimal integer: {raw:?}"),
        })
    }
}

#[async_trait::async_trait]
impl ProgressSource for BeaconSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head_slot(&self) -> Result<u64, SourceError> {
        let data: HeaderData = self.get(HEAD_HEADER_PATH).await?;
        self.parse_quoted("slot", &data.header.message.slot)
    }

    async fn finalized_epoch(&self) -> Result<u64, SourceError> {
        let data: FinalityData = self.get(FINALITY_PATH).await?;
        self.parse_quoted("finalized.epoch", &data.finalized.epoch)
    }
}

/// One source per URL, sharing a single HTTP client
///
/// # Errors
/// Returns `ConfigError` if no URL is given or the client cannot be built.
pub fn sources_from_urls(urls: &[String], timeout: Duration) -> Result<Vec<Arc<dyn ProgressSource>>, ConfigError> {
    if urls.is_empty() {
        return Err(ConfigError::invalid("progress.sources", "at least one source is required"));
    }
    let client = reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::invalid("progress.sources", e.to_string()))?;
    Ok(urls
        .iter()
        .map(|url| Arc::new(BeaconSource::with_client(url, client.clone(), timeout)) as Arc<dyn ProgressSource>)
        .collect())
}

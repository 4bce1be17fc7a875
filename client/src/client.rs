use crate::transport::RecordStore;
use crate::{ClientConfig, Error, Result};
use raffle_types::{ChannelName, ParticipantId, RaffleId, RaffleRecord, RecordPatch};
use serde::Deserialize;
use url::Url;

/// Backend connection: the record store over HTTP and the realtime bus over WebSocket.
#[derive(Clone)]
pub struct Client {
    pub(crate) base_url: Url,
    pub(crate) ws_url: Url,
    pub(crate) http_client: reqwest::Client,
    pub(crate) config: ClientConfig,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl Client {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_config(ClientConfig::new(base_url))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)?;
        let ws_scheme = match base_url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(Error::InvalidScheme(other.to_string())),
        };
        let mut ws_url = base_url.clone();
        ws_url
            .set_scheme(ws_scheme)
            .map_err(|_| Error::InvalidScheme(ws_scheme.to_string()))?;
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.dial_timeout())
            .build()?;
        Ok(Self {
            base_url,
            ws_url,
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn record_url(&self, id: RaffleId) -> Result<Url> {
        Ok(self.base_url.join(&format!("records/{id}"))?)
    }

    pub(crate) fn channel_url(
        &self,
        name: &ChannelName,
        presence_key: Option<&ParticipantId>,
    ) -> Result<Url> {
        let mut url = self.ws_url.join(&format!("channels/{name}"))?;
        if let Some(key) = presence_key {
            url.query_pairs_mut()
                .append_pair("presence_key", key.as_str());
        }
        Ok(url)
    }
}

impl RecordStore for Client {
    async fn fetch_one(&self, id: RaffleId) -> Result<RaffleRecord> {
        let response = self.http_client.get(self.record_url(id)?).send().await?;
        match response.status() {
            reqwest::StatusCode::OK => Ok(response.json().await?),
            reqwest::StatusCode::NOT_FOUND => Err(Error::RecordMissing(id)),
            status => Err(Error::Failed(status)),
        }
    }

    async fn update_where(&self, id: RaffleId, patch: &RecordPatch) -> Result<RaffleRecord> {
        let response = self
            .http_client
            .patch(self.record_url(id)?)
            .json(patch)
            .send()
            .await?;
        match response.status() {
            reqwest::StatusCode::OK => Ok(response.json().await?),
            reqwest::StatusCode::NOT_FOUND => Err(Error::RecordMissing(id)),
            reqwest::StatusCode::UNPROCESSABLE_ENTITY => {
                let reason = match response.json::<ErrorBody>().await {
                    Ok(body) => body.error,
                    Err(_) => "invalid patch".to_string(),
                };
                Err(Error::InvalidPatch(reason))
            }
            status => Err(Error::Failed(status)),
        }
    }
}

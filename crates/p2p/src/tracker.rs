//! Typed client for the tracker API.

use crate::address::normalize_base_url;
use crate::error::TrackerError;
use peershare_registry::SearchGroup;
use peershare_rpc::{
    AnnounceRequest, AnnounceResponse, ErrorResponse, HealthResponse, HeartbeatRequest,
    HeartbeatResponse, HolderLookupResponse,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TrackerClient {
    client: Client,
    base: String,
    credential: Option<String>,
}

impl TrackerClient {
    pub fn new(base_url: &str, credential: Option<String>) -> Result<Self, TrackerError> {
        let base = normalize_base_url(base_url).map_err(|source| TrackerError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base,
            credential: credential.filter(|c| !c.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub async fn announce(
        &self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TrackerError> {
        let builder = self.authorized(self.client.post(self.url("/announce")))?;
        decode(builder.json(request).send().await?).await
    }

    pub async fn heartbeat(
        &self,
        observed: Option<&HeartbeatRequest>,
    ) -> Result<HeartbeatResponse, TrackerError> {
        let mut builder = self.authorized(self.client.post(self.url("/heartbeat")))?;
        if let Some(observed) = observed {
            builder = builder.json(observed);
        }
        decode(builder.send().await?).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchGroup>, TrackerError> {
        let response = self
            .client
            .get(self.url("/search"))
            .query(&[("q", query)])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn lookup_holder(&self, label: &str) -> Result<HolderLookupResponse, TrackerError> {
        let segment: String = url::form_urlencoded::byte_serialize(label.as_bytes()).collect();
        decode(self.client.get(self.url(&format!("/holder/{segment}"))).send().await?).await
    }

    pub async fn health(&self) -> Result<HealthResponse, TrackerError> {
        decode(self.client.get(self.url("/health")).send().await?).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, TrackerError> {
        let credential = self
            .credential
            .as_deref()
            .ok_or(TrackerError::MissingCredential)?;
        Ok(builder.bearer_auth(credential))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TrackerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(TrackerError::Status {
        status: status.as_u16(),
        message,
    })
}

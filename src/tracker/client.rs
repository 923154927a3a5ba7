//! HTTP tracker client
//!
//! Talks to a remote tracker over its JSON API:
//!
//! - `POST /announce` with `{ip, port, files, file_hash}`
//! - `GET /peers?fileName=<name>` returning `{peers: [{ip, port}]}`
//! - `GET /peers_count` returning `{peer_count}`
//! - `GET /hash?file_name=<name>` returning `{hash}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use super::{Announcement, PeerDirectory};
use crate::config::TrackerConfig;
use crate::descriptor::ContentHash;
use crate::error::{NetworkErrorKind, ProtocolErrorKind, Result, SwarmError};
use crate::types::PeerEndpoint;

/// Client for an HTTP tracker
#[derive(Debug, Clone)]
pub struct TrackerClient {
    http_client: reqwest::Client,
    base_url: Url,
}

#[derive(Debug, Serialize)]
struct AnnounceBody<'a> {
    ip: &'a str,
    port: u16,
    files: Vec<&'a str>,
    file_hash: Vec<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct PeersResponse {
    peers: Vec<PeerEntry>,
}

#[derive(Debug, Deserialize)]
struct PeerEntry {
    ip: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    port: u16,
}

#[derive(Debug, Deserialize)]
struct PeerCountResponse {
    peer_count: usize,
}

#[derive(Debug, Deserialize)]
struct HashResponse {
    hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Trackers that rebuild endpoints from `ip:port` keys send the port as text
fn port_from_number_or_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(n) => Ok(n),
        Port::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl TrackerClient {
    /// Create a client for the tracker at `config.url`
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| {
                SwarmError::network(
                    NetworkErrorKind::Other,
                    format!("Failed to create HTTP client: {}", e),
                )
            })?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Read the tracker's `{error}` body, falling back to the status line
    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => format!("HTTP {}", status),
        }
    }

    fn tracker_error(status: StatusCode, message: String) -> SwarmError {
        SwarmError::protocol(
            ProtocolErrorKind::TrackerError,
            format!("Tracker returned {}: {}", status, message),
        )
    }
}

#[async_trait]
impl PeerDirectory for TrackerClient {
    async fn announce(&self, announcement: &Announcement) -> Result<()> {
        let body = AnnounceBody {
            ip: &announcement.ip,
            port: announcement.port,
            files: announcement.files.iter().map(|f| f.name.as_str()).collect(),
            file_hash: announcement
                .files
                .iter()
                .map(|f| f.content_hash.as_ref().map(|h| h.to_hex()))
                .collect(),
        };

        let response = self
            .http_client
            .post(self.endpoint("announce")?)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {
                tracing::debug!(
                    "Announced {} file(s) to {}",
                    announcement.files.len(),
                    self.base_url
                );
                Ok(())
            }
            StatusCode::BAD_REQUEST => Err(SwarmError::InvalidRegistration(
                Self::error_message(response).await,
            )),
            status => Err(Self::tracker_error(
                status,
                Self::error_message(response).await,
            )),
        }
    }

    async fn peers_for_file(&self, file_name: &str) -> Result<Vec<PeerEndpoint>> {
        if file_name.is_empty() {
            return Err(SwarmError::MissingParameter("fileName"));
        }

        let mut url = self.endpoint("peers")?;
        url.query_pairs_mut().append_pair("fileName", file_name);

        let response = self.http_client.get(url).send().await?;
        match response.status() {
            s if s.is_success() => {
                let body: PeersResponse = response.json().await?;
                Ok(body
                    .peers
                    .into_iter()
                    .map(|p| PeerEndpoint::new(p.ip, p.port))
                    .collect())
            }
            StatusCode::BAD_REQUEST => Err(SwarmError::MissingParameter("fileName")),
            status => Err(Self::tracker_error(
                status,
                Self::error_message(response).await,
            )),
        }
    }

    async fn peer_count(&self) -> Result<usize> {
        let response = self
            .http_client
            .get(self.endpoint("peers_count")?)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Self::tracker_error(
                status,
                Self::error_message(response).await,
            ));
        }

        let body: PeerCountResponse = response.json().await?;
        Ok(body.peer_count)
    }

    async fn content_hash(&self, file_name: &str) -> Result<Option<ContentHash>> {
        if file_name.is_empty() {
            return Err(SwarmError::MissingParameter("file_name"));
        }

        let mut url = self.endpoint("hash")?;
        url.query_pairs_mut().append_pair("file_name", file_name);

        let response = self.http_client.get(url).send().await?;
        match response.status() {
            s if s.is_success() => {
                let body: HashResponse = response.json().await?;
                body.hash
                    .filter(|h| !h.is_empty())
                    .map(|h| {
                        h.parse::<ContentHash>().map_err(|e| {
                            SwarmError::protocol(
                                ProtocolErrorKind::TrackerError,
                                format!("Tracker sent an unusable hash: {}", e),
                            )
                        })
                    })
                    .transpose()
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::BAD_REQUEST => Err(SwarmError::MissingParameter("file_name")),
            status => Err(Self::tracker_error(
                status,
                Self::error_message(response).await,
            )),
        }
    }
}

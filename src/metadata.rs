// src/metadata.rs

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Collection, MediaInfo, VideoInfo};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Serialize)]
struct InfoBody<'a> {
    url: &'a str,
}

/// Client for the `/info` endpoint, which describes a video or a playlist.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    client: Client,
    endpoint: String,
    playlist_url_base: String,
}

impl MetadataClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_client(config.http_client()?, config))
    }

    pub fn with_client(client: Client, config: &Config) -> Self {
        Self {
            client,
            endpoint: config.endpoint("info"),
            playlist_url_base: config.playlist_url_base.clone(),
        }
    }

    pub async fn fetch_info(&self, url: &str) -> Result<MediaInfo> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidUrl("empty url".to_string()));
        }
        debug!(url, "fetching metadata");
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&InfoBody { url })
            .send()
            .await
            .map_err(|e| Error::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::RequestFailed {
                url: url.to_string(),
                reason: format!("server returned {status}: {}", text.trim()),
            });
        }
        Ok(resp.json::<MediaInfo>().await?)
    }

    pub async fn fetch_video(&self, url: &str) -> Result<VideoInfo> {
        match self.fetch_info(url).await? {
            MediaInfo::Video { video } => Ok(video),
            MediaInfo::Playlist { .. } => Err(Error::NotASingleItem),
        }
    }

    /// Loads a playlist. A URL carrying a `list` parameter is first resolved
    /// through its canonical playlist URL, then as given if that fails.
    pub async fn fetch_collection(&self, url: &str) -> Result<Collection> {
        let target = playlist_url(url, &self.playlist_url_base);
        let info = match self.fetch_info(&target).await {
            Ok(info) => info,
            Err(e) if target != url => {
                warn!(%target, error = %e, "canonical playlist url failed, retrying original");
                self.fetch_info(url).await?
            }
            Err(e) => return Err(e),
        };

        match info {
            MediaInfo::Playlist { playlist } => {
                let collection = Collection::from(playlist);
                info!(title = %collection.title, items = collection.len(), "playlist loaded");
                Ok(collection)
            }
            MediaInfo::Video { .. } => Err(Error::NotACollection),
        }
    }
}

/// Rewrites a URL with a `list` query parameter to `playlist_url_base + list`.
/// Anything else, including unparseable input, is returned unchanged.
pub fn playlist_url(input: &str, playlist_url_base: &str) -> String {
    Url::parse(input)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, v)| k == "list" && !v.is_empty())
                .map(|(_, v)| format!("{playlist_url_base}{v}"))
        })
        .unwrap_or_else(|| input.to_string())
}

// src/config.rs

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by the metadata client, the transfer client and the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the service exposing `/info` and `/download` (default: "http://localhost:8081")
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Prefix that turns an item id back into its source URL
    #[serde(default = "default_watch_url_base")]
    pub watch_url_base: String,

    /// Prefix that turns a `list` id into a canonical playlist URL
    #[serde(default = "default_playlist_url_base")]
    pub playlist_url_base: String,

    /// Where artifacts are written (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout. None leaves a hung transfer waiting indefinitely.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            watch_url_base: default_watch_url_base(),
            playlist_url_base: default_playlist_url_base(),
            output_dir: default_output_dir(),
            user_agent: default_user_agent(),
            request_timeout_secs: None,
        }
    }
}

impl Config {
    /// Reads a JSON config file. Missing keys take their defaults.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.server_url)
            .map_err(|e| Error::config(format!("server_url '{}': {e}", self.server_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "server_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::config("output_dir must not be empty"));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(Error::config("request_timeout_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.server_url.trim_end_matches('/'), path)
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().user_agent(&self.user_agent);
        if let Some(timeout) = self.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

fn default_server_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_watch_url_base() -> String {
    "https://www.youtube.com/watch?v=".to_string()
}

fn default_playlist_url_base() -> String {
    "https://www.youtube.com/playlist?list=".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_user_agent() -> String {
    concat!("plgrab/", env!("CARGO_PKG_VERSION")).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"server_url":"http://10.0.0.2:9000/"}"#).unwrap();
        assert_eq!(config.server_url, "http://10.0.0.2:9000/");
        assert_eq!(config.output_dir, PathBuf::from("./downloads"));
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.endpoint("download"), "http://10.0.0.2:9000/download");
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_settings() {
        let mut config = Config {
            server_url: "not a url".into(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config { .. })));

        config.server_url = "ftp://host".into();
        assert!(config.validate().is_err());

        config = Config {
            request_timeout_secs: Some(0),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plgrab.json");
        tokio::fs::write(&path, r#"{"output_dir":"/tmp/music","request_timeout_secs":30}"#)
            .await
            .unwrap();

        let config = Config::from_file(&path).await.unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/music"));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.server_url, "http://localhost:8081");
    }
}

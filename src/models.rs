// src/models.rs

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One downloadable entry of a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub title: String,
}

impl Item {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }

    /// Rebuilds the canonical source URL of this item from its id.
    pub fn source_url(&self, watch_url_base: &str) -> String {
        format!("{}{}", watch_url_base, self.id)
    }
}

/// An ordered, named group of items. Download order is the order held here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Collection {
    pub title: String,
    pub author: String,
    items: Vec<Item>,
}

impl Collection {
    pub fn new(title: impl Into<String>, author: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            items,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }
}

/// Output container requested from the download endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MediaFormat {
    #[serde(rename = "mp3")]
    Audio,
    #[serde(rename = "mp4")]
    Video,
}

impl MediaFormat {
    /// Wire name, which doubles as the file extension.
    pub fn extension(self) -> &'static str {
        match self {
            MediaFormat::Audio => "mp3",
            MediaFormat::Video => "mp4",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for MediaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" | "audio" => Ok(MediaFormat::Audio),
            "mp4" | "video" => Ok(MediaFormat::Video),
            other => Err(format!("unknown format '{other}', expected mp3 or mp4")),
        }
    }
}

/// A single request against the download endpoint, built when an item is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub item: Item,
    pub url: String,
    pub format: MediaFormat,
    pub quality: Option<String>,
    /// Name used when the endpoint does not suggest one.
    pub fallback_filename: String,
}

impl TransferRequest {
    /// Request for an item of a collection.
    pub fn for_item(
        item: &Item,
        watch_url_base: &str,
        format: MediaFormat,
        quality: Option<&str>,
    ) -> Self {
        Self {
            url: item.source_url(watch_url_base),
            fallback_filename: format!("{}.{}", item.title, format.extension()),
            item: item.clone(),
            format,
            quality: normalize_quality(quality),
        }
    }

    /// Request for a one-off download of an arbitrary URL.
    pub fn single(url: impl Into<String>, format: MediaFormat, quality: Option<&str>) -> Self {
        let url = url.into();
        Self {
            item: Item::new(url.clone(), "video"),
            fallback_filename: format!("video.{}", format.extension()),
            url,
            format,
            quality: normalize_quality(quality),
        }
    }
}

fn normalize_quality(quality: Option<&str>) -> Option<String> {
    quality
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_owned)
}

/// A downloaded payload together with the name it should be saved under.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub payload: Vec<u8>,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("filename", &self.filename)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Per-item state within a batch run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Failed | ItemStatus::Skipped)
    }

    /// Statuses only move forward within a run; terminal states are final.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Pending, ItemStatus::InProgress)
                | (ItemStatus::Pending, ItemStatus::Skipped)
                | (ItemStatus::InProgress, ItemStatus::Done)
                | (ItemStatus::InProgress, ItemStatus::Failed)
        )
    }
}

/// Snapshot of the aggregate counters of a batch run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchState {
    pub completed: usize,
    pub total: usize,
    pub is_running: bool,
    pub cancel_requested: bool,
}

impl BatchState {
    /// Rounded completion percentage. An empty batch reports 0.
    pub fn percent(&self) -> u8 {
        percent(self.completed, self.total)
    }

    pub fn summary(&self) -> String {
        format!("{} / {} completed", self.completed, self.total)
    }
}

pub(crate) fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round() as u8
}

/// How a batch run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
    /// Every item was attempted.
    Completed,
    /// A stop was requested before the collection was exhausted.
    Stopped,
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOutcome::Completed => f.write_str("completed"),
            BatchOutcome::Stopped => f.write_str("stopped"),
        }
    }
}

/// Final result of a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub state: BatchState,
    pub statuses: Vec<ItemStatus>,
}

impl BatchReport {
    pub fn count(&self, status: ItemStatus) -> usize {
        self.statuses.iter().filter(|s| **s == status).count()
    }
}

// Descriptors returned by the metadata endpoint.

/// A selectable stream of a single video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoFormat {
    #[serde(default)]
    pub label: String,
    pub itag: i64,
    #[serde(rename = "type", default)]
    pub mime_type: String,
}

impl VideoFormat {
    /// e.g. `720p (video/mp4)`.
    pub fn display_label(&self) -> String {
        let label = if self.label.is_empty() { "Unknown" } else { &self.label };
        let mime = self.mime_type.split(';').next().unwrap_or_default().trim();
        format!("{label} ({mime})")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoInfo {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub formats: Vec<VideoFormat>,
}

impl VideoInfo {
    /// Quality preselected for a video download: the first listed format.
    pub fn default_quality(&self) -> Option<String> {
        self.formats.first().map(|f| f.itag.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistInfo {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub videos: Vec<VideoInfo>,
}

impl From<PlaylistInfo> for Collection {
    fn from(info: PlaylistInfo) -> Self {
        let items = info
            .videos
            .into_iter()
            .map(|v| Item::new(v.id, v.title))
            .collect();
        Collection::new(info.title, info.author, items)
    }
}

// The service encodes empty lists as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of an `/info` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaInfo {
    Video { video: VideoInfo },
    Playlist { playlist: PlaylistInfo },
}

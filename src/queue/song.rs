use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(String);

impl SongId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Index of a reusable on-disk file, always below the look-ahead size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SongStatus {
    /// Outside the look-ahead window, or waiting for its slot to be reclaimed.
    Queued,
    Fetching,
    Ready,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub code: String,
    pub title: Option<String>,
    pub length_secs: Option<u64>,
    pub slot: SlotId,
    pub status: SongStatus,
}

impl Song {
    pub fn new(code: &str, slot: SlotId) -> Self {
        Self { id: SongId::new(), code: code.to_string(), title: None, length_secs: None, slot, status: SongStatus::Queued }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SongStatus::Ready
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub paused: bool,
    pub now_playing: Option<SongId>,
    pub lookahead: usize,
    /// Requests waiting behind the fetch in progress.
    pub pending_fetches: usize,
    pub songs: Vec<Song>,
}

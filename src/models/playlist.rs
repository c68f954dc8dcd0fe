use crate::models::Track;
use serde::{Deserialize, Serialize};

/// Listing form of a playlist, as returned by the catalog's playlist index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub image_url: Option<String>,
    pub track_total: u32,
}

/// A selected playlist with its tracks in playlist order. Never mutated after
/// it is built.
#[derive(Debug, Clone, Serialize)]
pub struct Playlist {
    pub summary: PlaylistSummary,
    pub tracks: Vec<Track>,
}

impl Playlist {
    pub fn new(summary: PlaylistSummary, tracks: Vec<Track>) -> Self {
        Self { summary, tracks }
    }

    pub fn id(&self) -> &str {
        &self.summary.id
    }

    #[cfg(test)]
    pub fn contains(&self, track_id: &str) -> bool {
        self.tracks.iter().any(|t| t.id == track_id)
    }

    pub fn track(&self, track_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub fn playable_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_playable()).count()
    }
}

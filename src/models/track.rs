use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: String,
    pub uri: String,
    pub preview_url: Option<String>,
    pub duration_ms: u64,
    pub album_art: Option<String>,
}

impl Track {
    /// A round needs a snippet, so tracks without a preview never get drawn.
    pub fn is_playable(&self) -> bool {
        self.preview_url.is_some()
    }
}

/// What the player sees while a round is running. Name, artists, album and
/// art stay hidden until the guess is in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub track_id: String,
    pub preview_url: Option<String>,
    pub duration_ms: u64,
}

impl From<&Track> for Snippet {
    fn from(track: &Track) -> Self {
        Snippet {
            track_id: track.id.clone(),
            preview_url: track.preview_url.clone(),
            duration_ms: track.duration_ms,
        }
    }
}

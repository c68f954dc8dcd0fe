use crate::models::{Playlist, Track};
use rand::seq::SliceRandom;
use std::collections::HashSet;

/// Picks a random playable track from `playlist` that is not in `played`.
/// `None` means the playlist is used up for this game.
pub fn pick_unplayed<'a>(
    playlist: &'a Playlist,
    played: &HashSet<String>,
) -> Option<&'a Track> {
    let candidates: Vec<&Track> = playlist
        .tracks
        .iter()
        .filter(|t| t.is_playable())
        .filter(|t| !played.contains(&t.id))
        .collect();

    tracing::debug!(
        "Playlist '{}': {} of {} tracks left to draw from",
        playlist.summary.name,
        candidates.len(),
        playlist.tracks.len()
    );

    candidates.choose(&mut rand::thread_rng()).copied()
}

use crate::error::{AppError, Result};
use crate::models::{PlaylistSummary, Track};
use crate::services::catalog::{CatalogAuth, MusicCatalog, Readiness};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

const PLAYLIST_PAGE_SIZE: usize = 50;
const TRACK_PAGE_SIZE: usize = 100;
/// Stop following `next` links after this many playlist pages.
const MAX_PLAYLIST_PAGES: usize = 4;

/// Shared limiter for every call the process makes to the Web API.
pub fn rate_limiter(requests_per_second: u32) -> Arc<DefaultDirectRateLimiter> {
    let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(per_second)))
}

/// Spotify Web API client for one user. The access token comes from the
/// browser; once `/me` accepts it the readiness signal flips to `true`.
pub struct SpotifyClient {
    base_url: String,
    client: Client,
    limiter: Arc<DefaultDirectRateLimiter>,
    token: RwLock<Option<String>>,
    ready: watch::Sender<Readiness>,
    max_playlist_tracks: usize,
}

#[derive(Debug, Deserialize)]
pub struct SpotifyUser {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyOwner {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrackTotal {
    total: u32,
}

#[derive(Debug, Deserialize)]
struct SpotifyPlaylist {
    id: String,
    name: String,
    description: Option<String>,
    owner: Option<SpotifyOwner>,
    #[serde(default)]
    images: Option<Vec<SpotifyImage>>,
    tracks: Option<SpotifyTrackTotal>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    name: String,
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    // Local files have no id
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
    uri: String,
    preview_url: Option<String>,
    duration_ms: u64,
    #[serde(default)]
    is_local: bool,
}

#[derive(Debug, Deserialize)]
struct SpotifyPlaylistItem {
    // Null for removed or unavailable tracks
    track: Option<SpotifyTrack>,
}

impl From<SpotifyPlaylist> for PlaylistSummary {
    fn from(p: SpotifyPlaylist) -> Self {
        PlaylistSummary {
            id: p.id,
            name: p.name,
            description: p.description.filter(|d| !d.is_empty()),
            owner: p.owner.and_then(|o| o.display_name),
            image_url: p.images.and_then(|images| images.into_iter().next()).map(|i| i.url),
            track_total: p.tracks.map(|t| t.total).unwrap_or(0),
        }
    }
}

impl SpotifyTrack {
    fn into_track(self) -> Option<Track> {
        if self.is_local {
            return None;
        }
        let id = self.id?;
        let (album, album_art) = match self.album {
            Some(album) => {
                let art = album.images.into_iter().next().map(|i| i.url);
                (album.name, art)
            }
            None => (String::new(), None),
        };

        Some(Track {
            id,
            name: self.name,
            artists: self.artists.into_iter().map(|a| a.name).collect(),
            album,
            uri: self.uri,
            preview_url: self.preview_url,
            duration_ms: self.duration_ms,
            album_art,
        })
    }
}

impl SpotifyClient {
    pub fn new(
        base_url: String,
        client: Client,
        limiter: Arc<DefaultDirectRateLimiter>,
        max_playlist_tracks: usize,
    ) -> Self {
        let (ready, _) = watch::channel(Readiness::default());
        Self {
            base_url,
            client,
            limiter,
            token: RwLock::new(None),
            ready,
            max_playlist_tracks,
        }
    }

    /// Installs `access_token` and checks it against `/me`. Readiness drops
    /// while the check runs; a good token raises it again under a new epoch.
    pub async fn verify_token(&self, access_token: &str) -> Result<SpotifyUser> {
        self.ready.send_modify(|r| *r = r.down());
        *self.token.write().await = Some(access_token.trim().to_string());

        let url = format!("{}/me", self.base_url);
        let user: SpotifyUser = self.get_json(&url).await?;

        tracing::info!(
            "Authenticated streaming user {}",
            user.display_name.as_deref().unwrap_or(&user.id)
        );
        self.ready.send_modify(|r| *r = r.up());
        Ok(user)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self
            .token
            .read()
            .await
            .clone()
            .ok_or(AppError::Unauthorized)?;

        self.limiter.until_ready().await;
        tracing::debug!("Spotify GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Catalog(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("Spotify rejected the access token");
            self.ready.send_modify(|r| *r = r.down());
            return Err(AppError::Unauthorized);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("?")
                .to_string();
            tracing::warn!("Spotify rate limit hit, retry after {}s", retry_after);
            return Err(AppError::Catalog(format!(
                "Rate limited, retry after {}s",
                retry_after
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Spotify API error: {} - {}", status, body);
            return Err(AppError::Catalog(format!("API returned status: {}", status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| AppError::Catalog(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&text).map_err(|e| {
            AppError::Catalog(format!(
                "Failed to parse response: {} - Response: {}",
                e,
                text.chars().take(200).collect::<String>()
            ))
        })
    }
}

/// Spotify ids are base62; anything else never reaches a URL.
fn check_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::Validation(format!("Invalid {} id '{}'", kind, id)));
    }
    Ok(())
}

fn playlist_items_to_tracks(items: Vec<SpotifyPlaylistItem>) -> impl Iterator<Item = Track> {
    items
        .into_iter()
        .filter_map(|item| item.track)
        .filter_map(SpotifyTrack::into_track)
}

#[async_trait]
impl CatalogAuth for SpotifyClient {
    async fn authenticate(&self, access_token: &str) -> Result<()> {
        self.verify_token(access_token).await.map(|_| ())
    }

    fn readiness(&self) -> watch::Receiver<Readiness> {
        self.ready.subscribe()
    }
}

#[async_trait]
impl MusicCatalog for SpotifyClient {
    async fn fetch_playlists(&self) -> Result<Vec<PlaylistSummary>> {
        let mut url = Some(format!(
            "{}/me/playlists?limit={}",
            self.base_url, PLAYLIST_PAGE_SIZE
        ));
        let mut playlists = Vec::new();
        let mut pages = 0;

        while let Some(next) = url.take() {
            let page: Page<Option<SpotifyPlaylist>> = self.get_json(&next).await?;
            playlists.extend(page.items.into_iter().flatten().map(PlaylistSummary::from));
            pages += 1;
            if pages < MAX_PLAYLIST_PAGES {
                url = page.next;
            }
        }

        tracing::debug!("Fetched {} playlists in {} pages", playlists.len(), pages);
        Ok(playlists)
    }

    async fn fetch_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>> {
        check_id("playlist", playlist_id)?;

        let mut url = Some(format!(
            "{}/playlists/{}/tracks?limit={}&market=from_token",
            self.base_url, playlist_id, TRACK_PAGE_SIZE
        ));
        let mut tracks = Vec::new();

        while let Some(next) = url.take() {
            let page: Page<SpotifyPlaylistItem> = self.get_json(&next).await?;
            tracks.extend(playlist_items_to_tracks(page.items));
            if tracks.len() < self.max_playlist_tracks {
                url = page.next;
            }
        }

        tracing::debug!("Playlist {} has {} usable tracks", playlist_id, tracks.len());
        Ok(tracks)
    }

    async fn fetch_track(&self, track_id: &str) -> Result<Track> {
        check_id("track", track_id)?;

        let url = format!("{}/tracks/{}?market=from_token", self.base_url, track_id);
        let track: SpotifyTrack = self.get_json(&url).await?;
        track
            .into_track()
            .ok_or_else(|| AppError::NotFound(format!("Track {} is not playable", track_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_page_mapping() {
        let json = r#"{
            "items": [
                {
                    "id": "37i9dQZF1DXcBWIGoYBM5M",
                    "name": "Today's Top Hits",
                    "description": "",
                    "owner": {"display_name": "Spotify"},
                    "images": [{"url": "https://i.scdn.co/image/abc", "height": 640, "width": 640}],
                    "tracks": {"href": "https://api.spotify.com/v1/playlists/x/tracks", "total": 50}
                },
                null,
                {
                    "id": "2",
                    "name": "Mine",
                    "description": null,
                    "owner": {"display_name": null},
                    "images": null,
                    "tracks": {"total": 3}
                }
            ],
            "next": null,
            "total": 3
        }"#;

        let page: Page<Option<SpotifyPlaylist>> = serde_json::from_str(json).unwrap();
        assert!(page.next.is_none());
        let playlists: Vec<PlaylistSummary> = page
            .items
            .into_iter()
            .flatten()
            .map(PlaylistSummary::from)
            .collect();

        assert_eq!(playlists.len(), 2);
        assert_eq!(playlists[0].owner.as_deref(), Some("Spotify"));
        assert_eq!(playlists[0].description, None);
        assert_eq!(playlists[0].image_url.as_deref(), Some("https://i.scdn.co/image/abc"));
        assert_eq!(playlists[0].track_total, 50);
        assert_eq!(playlists[1].image_url, None);
        assert_eq!(playlists[1].owner, None);
    }

    #[test]
    fn test_playlist_tracks_skip_local_and_removed() {
        let json = r#"{
            "items": [
                {"added_at": "2020-01-01T00:00:00Z", "track": {
                    "id": "4uLU6hMCjMI75M1A2tKUQC",
                    "name": "Never Gonna Give You Up",
                    "artists": [{"name": "Rick Astley"}],
                    "album": {"name": "Whenever You Need Somebody", "images": [{"url": "https://i.scdn.co/image/rick"}]},
                    "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
                    "preview_url": "https://p.scdn.co/mp3-preview/rick",
                    "duration_ms": 213573,
                    "is_local": false
                }},
                {"track": null},
                {"track": {
                    "id": null,
                    "name": "home recording",
                    "artists": [],
                    "album": {"name": "", "images": []},
                    "uri": "spotify:local:::home+recording:120",
                    "preview_url": null,
                    "duration_ms": 120000,
                    "is_local": true
                }}
            ],
            "next": "https://api.spotify.com/v1/playlists/x/tracks?offset=100&limit=100"
        }"#;

        let page: Page<SpotifyPlaylistItem> = serde_json::from_str(json).unwrap();
        assert!(page.next.is_some());
        let tracks: Vec<Track> = playlist_items_to_tracks(page.items).collect();

        assert_eq!(tracks.len(), 1);
        let rick = &tracks[0];
        assert_eq!(rick.id, "4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(rick.artists, vec!["Rick Astley".to_string()]);
        assert_eq!(rick.album, "Whenever You Need Somebody");
        assert_eq!(rick.album_art.as_deref(), Some("https://i.scdn.co/image/rick"));
        assert!(rick.is_playable());
    }

    #[test]
    fn test_check_id() {
        assert!(check_id("track", "4uLU6hMCjMI75M1A2tKUQC").is_ok());
        assert!(check_id("track", "").is_err());
        assert!(check_id("track", "../me").is_err());
        assert!(check_id("playlist", "abc?x=1").is_err());
    }

    #[tokio::test]
    async fn test_no_token_is_unauthorized() {
        let client = SpotifyClient::new(
            "http://127.0.0.1:9".to_string(),
            Client::new(),
            rate_limiter(10),
            100,
        );
        assert!(!client.readiness().borrow().ready);
        assert!(matches!(client.fetch_playlists().await, Err(AppError::Unauthorized)));
    }
}

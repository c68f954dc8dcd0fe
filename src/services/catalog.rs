use crate::error::Result;
use crate::models::{PlaylistSummary, Track};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// Where playlists and tracks come from. The game never talks to the
/// streaming service directly, only through this boundary.
#[async_trait]
pub trait MusicCatalog: Send + Sync {
    /// Playlists visible to the authenticated user.
    async fn fetch_playlists(&self) -> Result<Vec<PlaylistSummary>>;

    /// Tracks of one playlist, in playlist order.
    async fn fetch_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>>;

    async fn fetch_track(&self, track_id: &str) -> Result<Track>;
}

/// Readiness of a catalog connection. `epoch` counts successful logins, so
/// two logins in a row still read as two separate transitions even when a
/// watcher only sees the latest value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    pub epoch: u64,
}

impl Readiness {
    pub fn down(self) -> Self {
        Self { ready: false, ..self }
    }

    pub fn up(self) -> Self {
        Self {
            ready: true,
            epoch: self.epoch + 1,
        }
    }
}

/// Credentials side of a catalog connection.
#[async_trait]
pub trait CatalogAuth: Send + Sync {
    /// Installs and validates a user access token. Success raises the
    /// readiness signal with a new epoch.
    async fn authenticate(&self, access_token: &str) -> Result<()>;

    fn readiness(&self) -> watch::Receiver<Readiness>;
}

/// One user's connection to the streaming service: the data side and the
/// credentials side, usually the same client.
#[derive(Clone)]
pub struct CatalogConnection {
    pub catalog: Arc<dyn MusicCatalog>,
    pub auth: Arc<dyn CatalogAuth>,
}

/// Opens a fresh, unauthenticated connection per session.
pub type CatalogFactory = Arc<dyn Fn() -> CatalogConnection + Send + Sync>;

#[cfg(test)]
pub mod fake {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// In-memory catalog for tests. Individual calls can be made to fail or
    /// to block until released. The token "bad-token" is rejected.
    pub struct FakeCatalog {
        pub playlists: Mutex<Vec<PlaylistSummary>>,
        pub tracks: Mutex<HashMap<String, Vec<Track>>>,
        pub fail_playlists: AtomicBool,
        pub fail_tracks: AtomicBool,
        pub playlist_calls: AtomicUsize,
        pub gate: Mutex<Option<Arc<Notify>>>,
        pub ready: watch::Sender<Readiness>,
    }

    impl Default for FakeCatalog {
        fn default() -> Self {
            Self {
                playlists: Mutex::default(),
                tracks: Mutex::default(),
                fail_playlists: AtomicBool::new(false),
                fail_tracks: AtomicBool::new(false),
                playlist_calls: AtomicUsize::new(0),
                gate: Mutex::default(),
                ready: watch::channel(Readiness::default()).0,
            }
        }
    }

    pub fn connection(catalog: Arc<FakeCatalog>) -> CatalogConnection {
        CatalogConnection {
            catalog: catalog.clone(),
            auth: catalog,
        }
    }

    pub fn track(id: &str, name: &str, artist: &str) -> Track {
        Track {
            id: id.to_string(),
            name: name.to_string(),
            artists: vec![artist.to_string()],
            album: "Album".to_string(),
            uri: format!("spotify:track:{}", id),
            preview_url: Some(format!("https://p.scdn.co/mp3-preview/{}", id)),
            duration_ms: 200_000,
            album_art: None,
        }
    }

    pub fn summary(id: &str, track_total: u32) -> PlaylistSummary {
        PlaylistSummary {
            id: id.to_string(),
            name: format!("Playlist {}", id),
            description: None,
            owner: Some("me".to_string()),
            image_url: None,
            track_total,
        }
    }

    impl FakeCatalog {
        pub fn with_playlist(id: &str, tracks: Vec<Track>) -> Self {
            let catalog = FakeCatalog::default();
            catalog.add_playlist(id, tracks);
            catalog
        }

        pub fn add_playlist(&self, id: &str, tracks: Vec<Track>) {
            self.playlists
                .lock()
                .unwrap()
                .push(summary(id, tracks.len() as u32));
            self.tracks.lock().unwrap().insert(id.to_string(), tracks);
        }

        /// Makes the next playlist fetch wait until the returned handle is notified.
        pub fn hold_playlists(&self) -> Arc<Notify> {
            let notify = Arc::new(Notify::new());
            *self.gate.lock().unwrap() = Some(notify.clone());
            notify
        }
    }

    #[async_trait]
    impl MusicCatalog for FakeCatalog {
        async fn fetch_playlists(&self) -> Result<Vec<PlaylistSummary>> {
            self.playlist_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_playlists.load(Ordering::SeqCst) {
                return Err(AppError::Catalog("service down".to_string()));
            }
            Ok(self.playlists.lock().unwrap().clone())
        }

        async fn fetch_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>> {
            if self.fail_tracks.load(Ordering::SeqCst) {
                return Err(AppError::Catalog("service down".to_string()));
            }
            self.tracks
                .lock()
                .unwrap()
                .get(playlist_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Playlist {}", playlist_id)))
        }

        async fn fetch_track(&self, track_id: &str) -> Result<Track> {
            if self.fail_tracks.load(Ordering::SeqCst) {
                return Err(AppError::Catalog("service down".to_string()));
            }
            self.tracks
                .lock()
                .unwrap()
                .values()
                .flatten()
                .find(|t| t.id == track_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Track {}", track_id)))
        }
    }

    #[async_trait]
    impl CatalogAuth for FakeCatalog {
        async fn authenticate(&self, access_token: &str) -> Result<()> {
            self.ready.send_modify(|r| *r = r.down());
            if access_token == "bad-token" {
                return Err(AppError::Unauthorized);
            }
            self.ready.send_modify(|r| *r = r.up());
            Ok(())
        }

        fn readiness(&self) -> watch::Receiver<Readiness> {
            self.ready.subscribe()
        }
    }
}

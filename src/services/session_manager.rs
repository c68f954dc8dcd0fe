use crate::config::Config;
use crate::error::{AppError, Result};
use crate::services::catalog::{CatalogConnection, CatalogFactory};
use crate::services::session::{GameSettings, SessionHolder};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// How often idle sessions are swept
const REAPER_INTERVAL_SECONDS: u64 = 30;

#[derive(Clone)]
pub struct ActiveSession {
    pub holder: Arc<SessionHolder>,
    pub connection: CatalogConnection,
    pub last_seen: DateTime<Utc>,
}

/// All live games, one per browser page.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<Uuid, ActiveSession>>>,
    connect: CatalogFactory,
    settings: GameSettings,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(connect: CatalogFactory, config: &Config) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            connect,
            settings: GameSettings {
                snippet_duration_ms: config.snippet_duration_ms,
                max_playlist_tracks: config.max_playlist_tracks,
            },
            idle_timeout: Duration::seconds(config.session_idle_timeout_seconds),
        }
    }

    /// Opens a catalog connection with `access_token` and starts a game on
    /// it. A token the service rejects creates nothing.
    pub async fn create_session(&self, access_token: &str) -> Result<(Uuid, Arc<SessionHolder>)> {
        let connection = (self.connect)();
        let readiness = connection.auth.readiness();
        let holder = SessionHolder::new(connection.catalog.clone(), readiness, self.settings);

        connection.auth.authenticate(access_token).await?;

        let id = Uuid::new_v4();
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id,
            ActiveSession {
                holder: holder.clone(),
                connection,
                last_seen: Utc::now(),
            },
        );

        tracing::info!("Created session {} ({} active)", id, sessions.len());
        Ok((id, holder))
    }

    /// Looks up a session and marks it as seen.
    pub async fn get(&self, id: Uuid) -> Result<Arc<SessionHolder>> {
        let mut sessions = self.sessions.write().await;
        let active = sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;
        active.last_seen = Utc::now();
        Ok(active.holder.clone())
    }

    /// Swaps in a new access token. A valid token re-triggers the playlist
    /// load through the readiness signal.
    pub async fn update_token(&self, id: Uuid, access_token: &str) -> Result<()> {
        let auth = {
            let mut sessions = self.sessions.write().await;
            let active = sessions
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;
            active.last_seen = Utc::now();
            active.connection.auth.clone()
        };

        auth.authenticate(access_token).await?;
        tracing::info!("Refreshed token for session {}", id);
        Ok(())
    }

    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let removed = self.sessions.write().await.remove(&id);
        match removed {
            Some(active) => {
                active.holder.close().await;
                tracing::info!("Closed session {}", id);
                Ok(())
            }
            None => Err(AppError::NotFound("Session not found".to_string())),
        }
    }

    /// Drops sessions nobody has touched within the idle timeout.
    pub async fn reap_idle(&self) -> usize {
        let cutoff = Utc::now() - self.idle_timeout;

        let expired: Vec<ActiveSession> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, active)| active.last_seen < cutoff)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for active in &expired {
            active.holder.close().await;
        }
        if !expired.is_empty() {
            tracing::info!("Expired {} idle sessions", expired.len());
        }
        expired.len()
    }

    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(REAPER_INTERVAL_SECONDS));
            loop {
                interval.tick().await;
                manager.reap_idle().await;
            }
        })
    }

    #[cfg(test)]
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::services::catalog::fake::{connection, track, FakeCatalog};
    use std::sync::atomic::Ordering;

    pub fn fake_manager(catalog: Arc<FakeCatalog>, idle_timeout_seconds: i64) -> SessionManager {
        let config = Config {
            session_idle_timeout_seconds: idle_timeout_seconds,
            ..Config::default()
        };
        let factory: CatalogFactory = Arc::new(move || -> CatalogConnection { connection(catalog.clone()) });
        SessionManager::new(factory, &config)
    }

    #[tokio::test]
    async fn test_create_and_remove() {
        let catalog = Arc::new(FakeCatalog::with_playlist("p1", vec![track("a", "A", "X")]));
        let manager = fake_manager(catalog, 60);

        let (id, _holder) = manager.create_session("good-token").await.unwrap();
        assert_eq!(manager.session_count().await, 1);
        assert!(manager.get(id).await.is_ok());

        manager.remove(id).await.unwrap();
        assert_eq!(manager.session_count().await, 0);
        assert!(matches!(manager.get(id).await, Err(AppError::NotFound(_))));
        assert!(manager.remove(id).await.is_err());
    }

    #[tokio::test]
    async fn test_rejected_token_creates_nothing() {
        let catalog = Arc::new(FakeCatalog::default());
        let manager = fake_manager(catalog, 60);

        let err = manager.create_session("bad-token").await.err().unwrap();
        assert!(matches!(err, AppError::Unauthorized));
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_idle_sessions_reaped() {
        let catalog = Arc::new(FakeCatalog::default());
        let manager = fake_manager(catalog, 0);

        let (id, _) = manager.create_session("good-token").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(manager.reap_idle().await, 1);
        assert!(manager.get(id).await.is_err());
    }

    #[tokio::test]
    async fn test_recently_seen_sessions_survive() {
        let catalog = Arc::new(FakeCatalog::default());
        let manager = fake_manager(catalog, 3600);

        manager.create_session("good-token").await.unwrap();
        assert_eq!(manager.reap_idle().await, 0);
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_token_refresh_reloads_playlists() {
        let catalog = Arc::new(FakeCatalog::with_playlist("p1", vec![track("a", "A", "X")]));
        let manager = fake_manager(catalog.clone(), 60);

        let (id, holder) = manager.create_session("good-token").await.unwrap();
        wait_for_playlist_calls(&holder, &catalog, 1).await;

        manager.update_token(id, "good-token").await.unwrap();
        wait_for_playlist_calls(&holder, &catalog, 2).await;
        assert_eq!(catalog.playlist_calls.load(Ordering::SeqCst), 2);
        assert_eq!(holder.snapshot().await.playlists.len(), 1);
    }

    async fn wait_for_playlist_calls(holder: &SessionHolder, catalog: &FakeCatalog, calls: usize) {
        for _ in 0..400 {
            let loading = holder.snapshot().await.is_loading;
            if catalog.playlist_calls.load(Ordering::SeqCst) >= calls && !loading {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("token refresh did not load playlists {} times", calls);
    }

    #[tokio::test]
    async fn test_update_token_unknown_session() {
        let manager = fake_manager(Arc::new(FakeCatalog::default()), 60);
        let err = manager.update_token(Uuid::new_v4(), "good-token").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}

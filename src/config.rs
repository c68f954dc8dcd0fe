use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// Base URL of the Spotify Web API (overridable for local mocks)
    pub spotify_api_url: String,
    /// Allowed CORS origins (comma-separated). Use "*" for any origin (development only).
    pub cors_origins: Vec<String>,
    /// Length of the preview snippet the player hears, used for the speed bonus
    pub snippet_duration_ms: u64,
    /// Upper bound on tracks loaded per playlist
    pub max_playlist_tracks: usize,
    pub session_idle_timeout_seconds: i64,
    pub catalog_requests_per_second: u32,
    pub catalog_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8000,
            spotify_api_url: "https://api.spotify.com/v1".to_string(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            snippet_duration_ms: 30_000,
            max_playlist_tracks: 500,
            session_idle_timeout_seconds: 1800,
            catalog_requests_per_second: 10,
            catalog_timeout_seconds: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let cors_origins = match env::var("CORS_ORIGINS") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.cors_origins,
        };

        let catalog_requests_per_second: u32 = parse_or("CATALOG_REQUESTS_PER_SECOND", defaults.catalog_requests_per_second)?;
        if catalog_requests_per_second == 0 {
            return Err(anyhow::anyhow!(
                "CATALOG_REQUESTS_PER_SECOND must be greater than zero"
            ));
        }

        let snippet_duration_ms: u64 = parse_or("SNIPPET_DURATION_MS", defaults.snippet_duration_ms)?;
        if snippet_duration_ms == 0 {
            return Err(anyhow::anyhow!("SNIPPET_DURATION_MS must be greater than zero"));
        }

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.server_port),
            spotify_api_url: env::var("SPOTIFY_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.spotify_api_url),
            cors_origins,
            snippet_duration_ms,
            max_playlist_tracks: parse_or("MAX_PLAYLIST_TRACKS", defaults.max_playlist_tracks)?,
            session_idle_timeout_seconds: parse_or(
                "SESSION_IDLE_TIMEOUT_SECONDS",
                defaults.session_idle_timeout_seconds,
            )?,
            catalog_requests_per_second,
            catalog_timeout_seconds: parse_or("CATALOG_TIMEOUT_SECONDS", defaults.catalog_timeout_seconds)?,
        })
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T, anyhow::Error>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

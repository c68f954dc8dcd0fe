use crate::error::{AppError, Result};
use crate::models::{
    Challenge, ChallengeComparison, ChallengeMode, GameResult, Playlist, PlaylistSummary, Snippet,
    Track,
};
use crate::services::catalog::{MusicCatalog, Readiness};
use crate::services::{scoring, selection};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

pub const PLAYLIST_LOAD_FAILED: &str = "Failed to load playlists. Please try again.";
pub const TRACK_LOAD_FAILED: &str = "Failed to load the next track. Please pick a playlist again.";
pub const NO_PLAYABLE_TRACKS: &str = "This playlist has no tracks with a preview to play.";
pub const CHALLENGE_TRACK_MISSING: &str = "A track from this challenge is no longer in the playlist.";

/// What the player is looking at.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Loading,
    Browsing,
    Playing,
    ShowingResults,
}

#[derive(Debug, Clone)]
enum Stage {
    Browsing,
    Playing(Track),
    ShowingResults,
}

/// Identifies the round state a request was issued against. A response is
/// applied only if both numbers still match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTicket {
    generation: u64,
    round_seq: u64,
}

/// What happens after the current round is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Draw another unplayed track from the playlist
    Draw,
    /// Fetch the next challenge track
    Fetch(String),
    /// No rounds left
    Finish,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub phase: Phase,
    pub is_loading: bool,
    pub error: Option<String>,
    pub playlists: Vec<PlaylistSummary>,
    pub current_playlist: Option<PlaylistSummary>,
    pub is_challenge: bool,
    pub challenge_rounds: Option<usize>,
    /// One-based round number while playing, rounds played otherwise
    pub round: usize,
    pub score: u32,
    pub snippet: Option<Snippet>,
    pub last_result: Option<GameResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsView {
    pub results: Vec<GameResult>,
    pub total_points: u32,
    pub correct: usize,
    pub comparison: Option<ChallengeComparison>,
}

/// The state of one game. Every transition is synchronous; catalog calls
/// happen in [`SessionHolder`] between a `begin_*`/`plan_*` and the matching
/// `finish_*`/`apply_*`.
#[derive(Debug)]
pub struct GameSession {
    stage: Stage,
    loading: bool,
    playlists: Vec<PlaylistSummary>,
    playlists_loaded: bool,
    current_playlist: Option<Playlist>,
    challenge: ChallengeMode,
    played: HashSet<String>,
    results: Vec<GameResult>,
    error: Option<String>,
    generation: u64,
    round_seq: u64,
    playlist_seq: u64,
    closed: bool,
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GameSession {
    pub fn new() -> Self {
        Self {
            stage: Stage::Browsing,
            loading: true,
            playlists: Vec::new(),
            playlists_loaded: false,
            current_playlist: None,
            challenge: ChallengeMode::Solo,
            played: HashSet::new(),
            results: Vec::new(),
            error: None,
            generation: 0,
            round_seq: 0,
            playlist_seq: 0,
            closed: false,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.stage {
            Stage::Playing(_) => Phase::Playing,
            Stage::ShowingResults => Phase::ShowingResults,
            Stage::Browsing if self.loading => Phase::Loading,
            Stage::Browsing => Phase::Browsing,
        }
    }

    pub fn current_track(&self) -> Option<&Track> {
        match &self.stage {
            Stage::Playing(track) => Some(track),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn playlists(&self) -> &[PlaylistSummary] {
        &self.playlists
    }

    pub fn current_playlist(&self) -> Option<&Playlist> {
        self.current_playlist.as_ref()
    }

    pub fn played(&self) -> &HashSet<String> {
        &self.played
    }

    pub fn results(&self) -> &[GameResult] {
        &self.results
    }

    pub fn challenge(&self) -> &ChallengeMode {
        &self.challenge
    }

    // ============= Playlist loading =============

    /// Marks a playlist fetch as outstanding and returns its sequence number.
    /// Only the most recently issued fetch may land.
    pub fn begin_playlist_load(&mut self) -> u64 {
        self.playlist_seq += 1;
        self.loading = true;
        self.playlist_seq
    }

    /// Applies a playlist fetch. Returns `false` if the response was stale.
    pub fn finish_playlist_load(
        &mut self,
        seq: u64,
        result: Result<Vec<PlaylistSummary>>,
    ) -> bool {
        if self.closed || seq != self.playlist_seq {
            tracing::debug!(
                "Discarding playlist response {} (latest {}, closed {})",
                seq,
                self.playlist_seq,
                self.closed
            );
            return false;
        }

        self.loading = false;
        match result {
            Ok(playlists) => {
                tracing::info!("Loaded {} playlists", playlists.len());
                self.playlists = playlists;
                self.playlists_loaded = true;
                self.error = None;
            }
            Err(e) => {
                tracing::error!("Failed to fetch playlists: {}", e);
                self.error = Some(PLAYLIST_LOAD_FAILED.to_string());
            }
        }
        true
    }

    // ============= Playlist selection =============

    /// Checks that a playlist can be started now and returns the ticket the
    /// selection must be applied with.
    pub fn begin_selection(
        &self,
        playlist_id: &str,
        challenge: &ChallengeMode,
    ) -> Result<(RoundTicket, PlaylistSummary)> {
        match self.phase() {
            Phase::Browsing => {}
            Phase::Loading => {
                return Err(AppError::Conflict("Playlists are still loading".to_string()))
            }
            Phase::Playing | Phase::ShowingResults => {
                return Err(AppError::Conflict(
                    "A game is already running, start a new game first".to_string(),
                ))
            }
        }

        let summary = self
            .playlists
            .iter()
            .find(|p| p.id == playlist_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Playlist {} not found", playlist_id)))?;

        if let ChallengeMode::Challenge(c) = challenge {
            if c.playlist_id() != playlist_id {
                return Err(AppError::Validation(
                    "This challenge was recorded on a different playlist".to_string(),
                ));
            }
        }

        Ok((self.ticket(), summary))
    }

    /// Applies the outcome of loading a playlist's tracks (and, in a
    /// challenge, its first track). Catalog failures end up in `error`.
    pub fn apply_selection(
        &mut self,
        ticket: RoundTicket,
        summary: PlaylistSummary,
        challenge: ChallengeMode,
        fetched: Result<(Vec<Track>, Option<Track>)>,
    ) -> Result<()> {
        self.check_ticket(ticket, "The game changed before the playlist finished loading")?;

        let (tracks, challenge_track) = match fetched {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("Failed to load playlist {}: {}", summary.id, e);
                self.fail_round(TRACK_LOAD_FAILED);
                return Ok(());
            }
        };

        let playlist = Playlist::new(summary, tracks);
        let first = match (&challenge, challenge_track) {
            (ChallengeMode::Challenge(_), Some(track)) => accept_challenge_track(&playlist, track),
            (ChallengeMode::Challenge(_), None) => None,
            (ChallengeMode::Solo, _) => selection::pick_unplayed(&playlist, &self.played).cloned(),
        };

        let Some(first) = first else {
            let message = if challenge.is_challenge() {
                CHALLENGE_TRACK_MISSING
            } else {
                NO_PLAYABLE_TRACKS
            };
            tracing::warn!("Cannot start playlist {}: {}", playlist.id(), message);
            self.fail_round(message);
            return Ok(());
        };

        tracing::info!(
            "Starting {} game on '{}' ({} playable tracks)",
            if challenge.is_challenge() { "challenge" } else { "solo" },
            playlist.summary.name,
            playlist.playable_count()
        );

        self.current_playlist = Some(playlist);
        self.challenge = challenge;
        self.error = None;
        self.stage = Stage::Playing(first);
        self.round_seq += 1;
        Ok(())
    }

    // ============= Rounds =============

    /// Validates `result` against the running round and works out what
    /// comes next.
    pub fn plan_advance(&self, result: &GameResult) -> Result<(RoundTicket, Advance)> {
        let track = self
            .current_track()
            .ok_or_else(|| AppError::Conflict("No round is in progress".to_string()))?;

        if result.track_id != track.id {
            return Err(AppError::Validation(format!(
                "Result is for track {}, but track {} is playing",
                result.track_id, track.id
            )));
        }

        let completed = self.results.len() + 1;
        let advance = match &self.challenge {
            ChallengeMode::Challenge(c) if completed >= c.len() => Advance::Finish,
            ChallengeMode::Challenge(c) => match c.track_for_round(completed) {
                Some(id) => Advance::Fetch(id.to_string()),
                None => Advance::Finish,
            },
            ChallengeMode::Solo => Advance::Draw,
        };

        Ok((self.ticket(), advance))
    }

    /// Records `result` and moves to the next round or to the results.
    pub fn apply_advance(
        &mut self,
        ticket: RoundTicket,
        mut result: GameResult,
        advance: Advance,
        fetched: Option<Result<Track>>,
    ) -> Result<()> {
        self.check_ticket(ticket, "This round was already completed")?;

        let Some(track) = self.current_track().cloned() else {
            return Err(AppError::Conflict("No round is in progress".to_string()));
        };
        if let (Advance::Fetch(id), None) = (&advance, &fetched) {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Challenge track {} was never fetched",
                id
            )));
        }
        let Some(playlist) = self.current_playlist.take() else {
            return Err(AppError::Internal(anyhow::anyhow!("Round running without a playlist")));
        };

        result.round = self.results.len() + 1;
        tracing::info!(
            "Round {} on '{}': correct={} points={}",
            result.round,
            track.name,
            result.correct,
            result.points
        );
        self.results.push(result);
        self.played.insert(track.id);
        self.round_seq += 1;

        let next = match (advance, fetched) {
            (Advance::Finish, _) => Ok(Stage::ShowingResults),
            (Advance::Draw, _) => match selection::pick_unplayed(&playlist, &self.played) {
                Some(next) => Ok(Stage::Playing(next.clone())),
                None => {
                    tracing::info!("Playlist '{}' exhausted", playlist.summary.name);
                    Ok(Stage::ShowingResults)
                }
            },
            (Advance::Fetch(_), Some(Ok(next))) => accept_challenge_track(&playlist, next)
                .map(Stage::Playing)
                .ok_or(CHALLENGE_TRACK_MISSING),
            (Advance::Fetch(id), Some(Err(e))) => {
                tracing::error!("Failed to fetch challenge track {}: {}", id, e);
                Err(TRACK_LOAD_FAILED)
            }
            // Ruled out above
            (Advance::Fetch(_), None) => Err(TRACK_LOAD_FAILED),
        };
        self.current_playlist = Some(playlist);

        match next {
            Ok(stage) => self.stage = stage,
            Err(message) => {
                self.fail_round(message);
                return Ok(());
            }
        }

        if self.stage_is_results() {
            tracing::info!(
                "Game over after {} rounds, {} points",
                self.results.len(),
                self.total_points()
            );
        }
        Ok(())
    }

    /// Skips the running track without recording a round. Solo games only.
    pub fn play_again(&mut self) -> Result<()> {
        if self.challenge.is_challenge() {
            return Err(AppError::Validation(
                "Tracks cannot be skipped in a challenge".to_string(),
            ));
        }
        let Some(track_id) = self.current_track().map(|t| t.id.clone()) else {
            return Err(AppError::Conflict("No round is in progress".to_string()));
        };

        tracing::debug!("Skipping track {}", track_id);
        self.played.insert(track_id);
        self.round_seq += 1;

        let next = self
            .current_playlist
            .as_ref()
            .and_then(|p| selection::pick_unplayed(p, &self.played))
            .cloned();
        self.stage = match next {
            Some(next) => Stage::Playing(next),
            None => Stage::ShowingResults,
        };
        Ok(())
    }

    /// Back to the playlist list with a clean slate. Playlists already
    /// fetched are kept; round requests still in flight are discarded.
    pub fn new_game(&mut self) {
        self.generation += 1;
        self.reset_round_state();
        self.error = None;
        tracing::info!("New game (generation {})", self.generation);
    }

    /// Stops accepting responses; used when the session is discarded.
    pub fn close(&mut self) {
        self.closed = true;
        self.generation += 1;
    }

    pub fn needs_playlist_reload(&self) -> bool {
        !self.playlists_loaded && !self.loading
    }

    // ============= Views =============

    pub fn total_points(&self) -> u32 {
        self.results.iter().map(|r| r.points).sum()
    }

    pub fn view(&self) -> SessionView {
        let challenge_rounds = match &self.challenge {
            ChallengeMode::Challenge(c) => Some(c.len()),
            ChallengeMode::Solo => None,
        };
        let playing = self.current_track().is_some();

        SessionView {
            phase: self.phase(),
            is_loading: self.loading,
            error: self.error.clone(),
            playlists: self.playlists.clone(),
            current_playlist: self.current_playlist.as_ref().map(|p| p.summary.clone()),
            is_challenge: self.challenge.is_challenge(),
            challenge_rounds,
            round: self.results.len() + usize::from(playing),
            score: self.total_points(),
            snippet: self.current_track().map(Snippet::from),
            last_result: self.results.last().cloned(),
        }
    }

    pub fn results_view(&self) -> ResultsView {
        let comparison = match &self.challenge {
            ChallengeMode::Challenge(c) => Some(ChallengeComparison::new(c.rounds(), &self.results)),
            ChallengeMode::Solo => None,
        };

        ResultsView {
            results: self.results.clone(),
            total_points: self.total_points(),
            correct: self.results.iter().filter(|r| r.correct).count(),
            comparison,
        }
    }

    /// Packs the rounds played so far into a challenge for someone else.
    pub fn share_challenge(&self) -> Result<Challenge> {
        let playlist = self
            .current_playlist
            .as_ref()
            .ok_or_else(|| AppError::Conflict("No game to share".to_string()))?;
        if self.results.is_empty() {
            return Err(AppError::Conflict("Play at least one round before sharing".to_string()));
        }
        Challenge::from_results(playlist.id(), &self.results)
    }

    // ============= Internals =============

    fn ticket(&self) -> RoundTicket {
        RoundTicket {
            generation: self.generation,
            round_seq: self.round_seq,
        }
    }

    fn check_ticket(&self, ticket: RoundTicket, message: &str) -> Result<()> {
        if self.closed || ticket != self.ticket() {
            tracing::debug!(
                "Discarding stale response {:?} (current {:?})",
                ticket,
                self.ticket()
            );
            return Err(AppError::Conflict(message.to_string()));
        }
        Ok(())
    }

    fn stage_is_results(&self) -> bool {
        matches!(self.stage, Stage::ShowingResults)
    }

    fn reset_round_state(&mut self) {
        self.stage = Stage::Browsing;
        self.current_playlist = None;
        self.challenge = ChallengeMode::Solo;
        self.played.clear();
        self.results.clear();
        self.round_seq += 1;
    }

    fn fail_round(&mut self, message: &str) {
        self.reset_round_state();
        self.error = Some(message.to_string());
    }
}

/// A challenge track must still be in the playlist and have a snippet. The
/// playlist copy is used so the round carries the same metadata either way.
fn accept_challenge_track(playlist: &Playlist, fetched: Track) -> Option<Track> {
    let listed = playlist.track(&fetched.id)?;
    let track = if fetched.is_playable() { fetched } else { listed.clone() };
    track.is_playable().then_some(track)
}

#[derive(Debug, Clone, Copy)]
pub struct GameSettings {
    pub snippet_duration_ms: u64,
    pub max_playlist_tracks: usize,
}

/// Owns one [`GameSession`] and drives it against the catalog. Catalog calls
/// never run while the state lock is held.
pub struct SessionHolder {
    state: RwLock<GameSession>,
    catalog: Arc<dyn MusicCatalog>,
    readiness: watch::Receiver<Readiness>,
    settings: GameSettings,
}

impl SessionHolder {
    /// Creates the holder and starts watching `readiness`: every ready epoch
    /// (including starting out ready) fetches playlists once.
    pub fn new(
        catalog: Arc<dyn MusicCatalog>,
        readiness: watch::Receiver<Readiness>,
        settings: GameSettings,
    ) -> Arc<Self> {
        let holder = Arc::new(Self {
            state: RwLock::new(GameSession::new()),
            catalog,
            readiness: readiness.clone(),
            settings,
        });
        Self::spawn_readiness_watcher(Arc::downgrade(&holder), readiness);
        holder
    }

    fn spawn_readiness_watcher(
        holder: std::sync::Weak<Self>,
        mut readiness: watch::Receiver<Readiness>,
    ) {
        tokio::spawn(async move {
            // A watch channel only keeps the latest value, so a quick
            // down/up pair is recognised by its epoch.
            let mut loaded_epoch = None;
            loop {
                let current = *readiness.borrow_and_update();
                if current.ready && loaded_epoch != Some(current.epoch) {
                    loaded_epoch = Some(current.epoch);
                    let Some(holder) = holder.upgrade() else { break };
                    holder.initialize().await;
                }

                if readiness.changed().await.is_err() || holder.strong_count() == 0 {
                    break;
                }
            }
            tracing::debug!("Readiness watcher stopped");
        });
    }

    /// Fetches the user's playlists.
    pub async fn initialize(&self) {
        let seq = self.state.write().await.begin_playlist_load();
        tracing::debug!("Fetching playlists (request {})", seq);

        let result = self.catalog.fetch_playlists().await;
        self.state.write().await.finish_playlist_load(seq, result);
    }

    pub async fn select_playlist(&self, playlist_id: &str, challenge: ChallengeMode) -> Result<SessionView> {
        let (ticket, summary) = self.state.read().await.begin_selection(playlist_id, &challenge)?;

        let fetched = self.load_round_start(&summary.id, &challenge).await;

        let mut state = self.state.write().await;
        state.apply_selection(ticket, summary, challenge, fetched)?;
        Ok(state.view())
    }

    async fn load_round_start(
        &self,
        playlist_id: &str,
        challenge: &ChallengeMode,
    ) -> Result<(Vec<Track>, Option<Track>)> {
        let mut tracks = self.catalog.fetch_playlist_tracks(playlist_id).await?;

        let first = match challenge {
            ChallengeMode::Challenge(c) => match c.track_for_round(0) {
                Some(id) => Some(self.catalog.fetch_track(id).await?),
                None => None,
            },
            ChallengeMode::Solo => {
                tracks.truncate(self.settings.max_playlist_tracks);
                None
            }
        };

        Ok((tracks, first))
    }

    /// Records a finished round and moves on.
    pub async fn complete_round(&self, result: GameResult) -> Result<()> {
        let (ticket, advance) = self.state.read().await.plan_advance(&result)?;
        self.advance(ticket, result, advance).await
    }

    async fn advance(&self, ticket: RoundTicket, result: GameResult, advance: Advance) -> Result<()> {
        let fetched = match &advance {
            Advance::Fetch(id) => Some(self.catalog.fetch_track(id).await),
            Advance::Draw | Advance::Finish => None,
        };

        self.state
            .write()
            .await
            .apply_advance(ticket, result, advance, fetched)
    }

    /// Scores `guess` against the running track and completes the round.
    /// The round is planned under the same lock the guess is scored with, so
    /// a skip that lands in between surfaces as a stale ticket.
    pub async fn submit_guess(&self, guess: &str, elapsed_ms: u64) -> Result<GameResult> {
        let (result, ticket, advance) = {
            let state = self.state.read().await;
            let track = state
                .current_track()
                .ok_or_else(|| AppError::Conflict("No round is in progress".to_string()))?;
            let result = scoring::score_guess(
                state.results().len() + 1,
                track,
                guess,
                elapsed_ms,
                self.settings.snippet_duration_ms,
            );
            let (ticket, advance) = state.plan_advance(&result)?;
            (result, ticket, advance)
        };

        self.advance(ticket, result.clone(), advance).await?;
        Ok(result)
    }

    pub async fn play_again(&self) -> Result<SessionView> {
        let mut state = self.state.write().await;
        state.play_again()?;
        Ok(state.view())
    }

    /// Resets the game. If playlists never loaded and the catalog is ready,
    /// this is also the user's way to try the load again.
    pub async fn new_game(&self) -> SessionView {
        let reload = {
            let mut state = self.state.write().await;
            state.new_game();
            state.needs_playlist_reload()
        };

        if reload && self.readiness.borrow().ready {
            self.initialize().await;
        }

        self.snapshot().await
    }

    pub async fn snapshot(&self) -> SessionView {
        self.state.read().await.view()
    }

    pub async fn results(&self) -> ResultsView {
        self.state.read().await.results_view()
    }

    pub async fn share_challenge(&self) -> Result<String> {
        self.state.read().await.share_challenge()?.to_code()
    }

    pub async fn close(&self) {
        self.state.write().await.close();
    }

    #[cfg(test)]
    pub async fn inspect<R>(&self, f: impl FnOnce(&GameSession) -> R) -> R {
        f(&*self.state.read().await)
    }
}

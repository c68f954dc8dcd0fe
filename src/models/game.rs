use crate::error::{AppError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest result sequence a challenge may carry.
pub const MAX_CHALLENGE_ROUNDS: usize = 20;

/// One round: one track, one guess.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameResult {
    pub round: usize,
    pub track_id: String,
    pub track_name: String,
    pub artists: Vec<String>,
    pub guess: String,
    pub correct: bool,
    pub artist_correct: bool,
    pub points: u32,
    pub elapsed_ms: u64,
    pub answered_at: DateTime<Utc>,
}

/// A recorded run on one playlist that another player can replay.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Challenge {
    playlist_id: String,
    rounds: Vec<GameResult>,
}

#[derive(Deserialize)]
struct ChallengeWire {
    playlist_id: String,
    rounds: Vec<GameResult>,
}

impl Challenge {
    pub fn new(playlist_id: impl Into<String>, rounds: Vec<GameResult>) -> Result<Self> {
        let playlist_id = playlist_id.into();
        if playlist_id.trim().is_empty() {
            return Err(AppError::Validation("Challenge has no playlist".to_string()));
        }
        if rounds.is_empty() {
            return Err(AppError::Validation("Challenge has no rounds".to_string()));
        }
        if rounds.len() > MAX_CHALLENGE_ROUNDS {
            return Err(AppError::Validation(format!(
                "Challenge has {} rounds, at most {} are allowed",
                rounds.len(),
                MAX_CHALLENGE_ROUNDS
            )));
        }
        if rounds.iter().any(|r| r.track_id.is_empty()) {
            return Err(AppError::Validation("Challenge round without a track".to_string()));
        }

        Ok(Self { playlist_id, rounds })
    }

    /// Builds a challenge from a finished run, keeping the first
    /// [`MAX_CHALLENGE_ROUNDS`] rounds.
    pub fn from_results(playlist_id: impl Into<String>, results: &[GameResult]) -> Result<Self> {
        let rounds = results.iter().take(MAX_CHALLENGE_ROUNDS).cloned().collect();
        Self::new(playlist_id, rounds)
    }

    pub fn playlist_id(&self) -> &str {
        &self.playlist_id
    }

    pub fn rounds(&self) -> &[GameResult] {
        &self.rounds
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    /// Track the player faces in round `index` (zero based).
    pub fn track_for_round(&self, index: usize) -> Option<&str> {
        self.rounds.get(index).map(|r| r.track_id.as_str())
    }

    pub fn to_code(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode challenge: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn from_code(code: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(code.trim())
            .map_err(|e| AppError::Validation(format!("Malformed challenge code: {}", e)))?;
        let wire: ChallengeWire = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Validation(format!("Malformed challenge code: {}", e)))?;
        Self::new(wire.playlist_id, wire.rounds)
    }
}

/// How the current game was started.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ChallengeMode {
    #[default]
    Solo,
    Challenge(Challenge),
}

impl ChallengeMode {
    pub fn is_challenge(&self) -> bool {
        matches!(self, ChallengeMode::Challenge(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeOutcome {
    PlayerWins,
    ChallengerWins,
    Tie,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundComparison {
    pub round: usize,
    pub track_id: String,
    pub track_name: String,
    pub original: Option<GameResult>,
    pub player: Option<GameResult>,
}

/// Side-by-side view of a challenge and the player's attempt at it.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeComparison {
    pub rounds: Vec<RoundComparison>,
    pub original_points: u32,
    pub player_points: u32,
    pub original_correct: usize,
    pub player_correct: usize,
    pub outcome: ChallengeOutcome,
}

impl ChallengeComparison {
    pub fn new(original: &[GameResult], player: &[GameResult]) -> Self {
        let rounds = (0..original.len().max(player.len()))
            .map(|i| {
                let o = original.get(i);
                let p = player.get(i);
                let reference = o.or(p);
                RoundComparison {
                    round: i + 1,
                    track_id: reference.map(|r| r.track_id.clone()).unwrap_or_default(),
                    track_name: reference.map(|r| r.track_name.clone()).unwrap_or_default(),
                    original: o.cloned(),
                    player: p.cloned(),
                }
            })
            .collect();

        let original_points: u32 = original.iter().map(|r| r.points).sum();
        let player_points: u32 = player.iter().map(|r| r.points).sum();

        // Points decide; correct answers break a points tie.
        let original_correct = original.iter().filter(|r| r.correct).count();
        let player_correct = player.iter().filter(|r| r.correct).count();
        let outcome = match player_points
            .cmp(&original_points)
            .then(player_correct.cmp(&original_correct))
        {
            std::cmp::Ordering::Greater => ChallengeOutcome::PlayerWins,
            std::cmp::Ordering::Less => ChallengeOutcome::ChallengerWins,
            std::cmp::Ordering::Equal => ChallengeOutcome::Tie,
        };

        Self {
            rounds,
            original_points,
            player_points,
            original_correct,
            player_correct,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(round: usize, track_id: &str, correct: bool, points: u32) -> GameResult {
        GameResult {
            round,
            track_id: track_id.to_string(),
            track_name: format!("Song {}", track_id),
            artists: vec!["Someone".to_string()],
            guess: String::new(),
            correct,
            artist_correct: false,
            points,
            elapsed_ms: 1000,
            answered_at: Utc::now(),
        }
    }

    #[test]
    fn test_challenge_code_round_trip() {
        let challenge = Challenge::new("pl1", vec![result(1, "a", true, 150), result(2, "b", false, 0)]).unwrap();
        let code = challenge.to_code().unwrap();
        assert!(!code.contains('='));
        assert_eq!(Challenge::from_code(&code).unwrap(), challenge);
    }

    #[test]
    fn test_challenge_rejects_empty_and_oversized() {
        assert!(Challenge::new("pl1", vec![]).is_err());
        assert!(Challenge::new("", vec![result(1, "a", true, 1)]).is_err());

        let too_many = (0..=MAX_CHALLENGE_ROUNDS)
            .map(|i| result(i + 1, &i.to_string(), true, 1))
            .collect();
        assert!(Challenge::new("pl1", too_many).is_err());
    }

    #[test]
    fn test_from_results_truncates() {
        let results: Vec<GameResult> = (0..30)
            .map(|i| result(i + 1, &format!("t{}", i), true, 10))
            .collect();
        let challenge = Challenge::from_results("pl1", &results).unwrap();
        assert_eq!(challenge.len(), MAX_CHALLENGE_ROUNDS);
        assert_eq!(challenge.track_for_round(0), Some("t0"));
        assert_eq!(challenge.track_for_round(MAX_CHALLENGE_ROUNDS), None);
    }

    #[test]
    fn test_garbage_code_is_validation_error() {
        assert!(matches!(
            Challenge::from_code("not base64 !!"),
            Err(AppError::Validation(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(Challenge::from_code(&not_json), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_comparison_outcome() {
        let original = vec![result(1, "a", true, 150), result(2, "b", false, 0)];
        let player = vec![result(1, "a", true, 120), result(2, "b", true, 110)];
        let cmp = ChallengeComparison::new(&original, &player);
        assert_eq!(cmp.rounds.len(), 2);
        assert_eq!(cmp.original_points, 150);
        assert_eq!(cmp.player_points, 230);
        assert_eq!(cmp.outcome, ChallengeOutcome::PlayerWins);

        let cmp = ChallengeComparison::new(&original, &original);
        assert_eq!(cmp.outcome, ChallengeOutcome::Tie);

        // Player has not finished: missing rounds count as nothing
        let cmp = ChallengeComparison::new(&original, &player[..0]);
        assert_eq!(cmp.outcome, ChallengeOutcome::ChallengerWins);
        assert!(cmp.rounds[1].player.is_none());
        assert_eq!(cmp.rounds[1].track_id, "b");
    }
}

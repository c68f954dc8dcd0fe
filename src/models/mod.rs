pub mod game;
pub mod playlist;
pub mod track;

pub use game::{Challenge, ChallengeComparison, ChallengeMode, GameResult};
pub use playlist::{Playlist, PlaylistSummary};
pub use track::{Snippet, Track};

use crate::models::{GameResult, Track};
use chrono::Utc;

/// Points for naming the track.
const TITLE_POINTS: u32 = 100;
/// Extra points for a correct answer, scaled by how much of the snippet was left.
const MAX_SPEED_BONUS: u32 = 100;
/// Points for only getting the artist.
const ARTIST_POINTS: u32 = 25;

/// Turns one guess at one track into a [`GameResult`].
pub fn score_guess(
    round: usize,
    track: &Track,
    guess: &str,
    elapsed_ms: u64,
    snippet_duration_ms: u64,
) -> GameResult {
    let parts = guess_parts(guess);

    let title = normalize_title(&track.name);
    let correct = !title.is_empty() && parts.iter().any(|p| is_close(p, &title));

    let artists: Vec<String> = track.artists.iter().map(|a| normalize(a)).collect();
    let artist_correct = parts
        .iter()
        .any(|p| artists.iter().any(|a| !a.is_empty() && is_close(p, a)));

    let points = if correct {
        TITLE_POINTS + speed_bonus(elapsed_ms, snippet_duration_ms)
    } else if artist_correct {
        ARTIST_POINTS
    } else {
        0
    };

    tracing::debug!(
        "Round {} guess '{}' for '{}': correct={} artist={} points={}",
        round,
        guess,
        track.name,
        correct,
        artist_correct,
        points
    );

    GameResult {
        round,
        track_id: track.id.clone(),
        track_name: track.name.clone(),
        artists: track.artists.clone(),
        guess: guess.trim().to_string(),
        correct,
        artist_correct,
        points,
        elapsed_ms,
        answered_at: Utc::now(),
    }
}

fn speed_bonus(elapsed_ms: u64, snippet_duration_ms: u64) -> u32 {
    if snippet_duration_ms == 0 {
        return 0;
    }
    let remaining = snippet_duration_ms.saturating_sub(elapsed_ms);
    (remaining * MAX_SPEED_BONUS as u64 / snippet_duration_ms) as u32
}

/// A guess may be just a title, or "title - artist" / "title by artist".
fn guess_parts(guess: &str) -> Vec<String> {
    let lowered = guess.to_lowercase();
    let mut parts = vec![normalize(&lowered)];
    for sep in [" - ", " by ", " – "] {
        if let Some((left, right)) = lowered.split_once(sep) {
            parts.push(normalize(left));
            parts.push(normalize(right));
        }
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// Whole-word markers that introduce a featured artist.
const FEATURE_MARKERS: [&str; 4] = [" feat. ", " feat ", " featuring ", " ft. "];

/// Drops decorations streaming services add to titles: "(feat. X)",
/// "[Live]", "- Remastered 2011" and the like.
pub fn normalize_title(title: &str) -> String {
    let mut stripped = String::with_capacity(title.len());
    let mut depth = 0usize;
    for c in title.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }

    let base = match stripped.find(" - ") {
        Some(idx) if idx > 0 => &stripped[..idx],
        _ => stripped.as_str(),
    };

    let lowered = base.to_lowercase();
    let cut = FEATURE_MARKERS
        .iter()
        .filter_map(|marker| lowered.find(marker))
        .filter(|&idx| idx > 0)
        .min();
    let base = match cut {
        Some(idx) => &lowered[..idx],
        None => lowered.as_str(),
    };

    normalize(base)
}

/// Lowercase, ASCII-ish alphanumerics only, single spaces, no leading "the".
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .replace('&', " and ")
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let words = match words.first() {
        Some(&"the") if words.len() > 1 => &words[1..],
        _ => &words[..],
    };
    words.join(" ")
}

/// Exact match, or a typo or two on longer names.
fn is_close(guess: &str, answer: &str) -> bool {
    if guess == answer {
        return true;
    }
    let allowed = match answer.chars().count() {
        0..=4 => 0,
        5..=11 => 1,
        _ => 2,
    };
    allowed > 0 && levenshtein(guess, answer) <= allowed
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

// The order of these lists is the tie-break when a name holds several digit groups.
static SEASON_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)(?:staffel|season)\s*(\d+)",
        r"(?i)s(?:eason)?\s*(\d+)",
        r"^(\d+)$",
    ])
});

static EPISODE_TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)e(?:p(?:isode)?)?\s*(\d+)").expect("valid episode token regex"));

static LEADING_NUMBER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(?:\s*[-_.]\s*.+)?").expect("valid leading number regex"));

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid season regex"))
        .collect()
}

fn first_group(pattern: &Regex, text: &str) -> Option<i64> {
    let captures = pattern.captures(text)?;
    let number = captures.get(1)?.as_str();
    match number.parse() {
        Ok(number) => Some(number),
        Err(err) => {
            log::debug!("Cannot use {:?} from {:?} as a number: {}", number, text, err);
            None
        }
    }
}

/// Season ordinal from a season directory name such as `Staffel 3`, `S02` or `02`.
pub fn extract_season_number(season_name: &str) -> Option<i64> {
    let trimmed = season_name.trim();
    SEASON_PATTERNS
        .iter()
        .find_map(|pattern| first_group(pattern, trimmed))
}

/// Episode ordinal from an episode file name.
///
/// An episode token (`E05`, `EP05`, `Episode 5`) anywhere in the name wins over a number leading
/// the name without its extension (`07 - Title.mkv`).
pub fn extract_episode_number(episode_name: &str) -> Option<i64> {
    if let Some(number) = first_group(&EPISODE_TOKEN_PATTERN, episode_name) {
        return Some(number);
    }
    let stem = Path::new(episode_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(episode_name);
    first_group(&LEADING_NUMBER_PATTERN, stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn season_from_localized_token() {
        assert_eq!(extract_season_number("Staffel 2"), Some(2));
        assert_eq!(extract_season_number("staffel3"), Some(3));
        assert_eq!(extract_season_number("Season 04"), Some(4));
    }

    #[test]
    fn season_from_short_form() {
        assert_eq!(extract_season_number("S3"), Some(3));
        assert_eq!(extract_season_number("s01"), Some(1));
    }

    #[test]
    fn season_from_bare_number() {
        assert_eq!(extract_season_number("02"), Some(2));
        assert_eq!(extract_season_number("  7 "), Some(7));
    }

    #[test]
    fn season_absent() {
        assert_eq!(extract_season_number("Extras"), None);
        assert_eq!(extract_season_number("OVA"), None);
    }

    #[test]
    fn season_token_wins_over_other_digits() {
        assert_eq!(extract_season_number("2019 Staffel 5"), Some(5));
    }

    #[test]
    fn episode_from_leading_number() {
        assert_eq!(extract_episode_number("07 - Title.mkv"), Some(7));
        assert_eq!(extract_episode_number("12.mkv"), Some(12));
        assert_eq!(extract_episode_number("03_Something.mp4"), Some(3));
        assert_eq!(extract_episode_number("01 - Pilot.mkv"), Some(1));
    }

    #[test]
    fn episode_from_token() {
        assert_eq!(extract_episode_number("Show S01E05.mkv"), Some(5));
        assert_eq!(extract_episode_number("Show EP12.mkv"), Some(12));
        assert_eq!(extract_episode_number("Show Episode 3.avi"), Some(3));
    }

    #[test]
    fn episode_token_wins_over_leading_number() {
        assert_eq!(extract_episode_number("02 - Episode 14.mkv"), Some(14));
    }

    #[test]
    fn episode_absent() {
        assert_eq!(extract_episode_number("Pilot.mkv"), None);
    }
}

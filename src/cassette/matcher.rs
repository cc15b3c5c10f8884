//! Interaction matching

use super::format::Cassette;

/// Index of the interaction to replay for `key`, if any
///
/// Interactions that have never been played win, oldest first. Once every
/// candidate has been played, the oldest is served again when repeats are
/// allowed; otherwise there is no match.
#[must_use]
pub fn find(cassette: &Cassette, key: &str, allow_playback_repeats: bool) -> Option<usize> {
    let candidates = cassette
        .interactions
        .iter()
        .enumerate()
        .filter(|(_, interaction)| interaction.match_key() == key);

    let mut first_played = None;
    for (index, interaction) in candidates {
        if interaction.playback_count == 0 {
            return Some(index);
        }
        first_played.get_or_insert(index);
    }

    if allow_playback_repeats {
        first_played
    } else {
        None
    }
}

use std::collections::BTreeSet;

/// Parse a song-number filter such as `"12, 40 7"`.
///
/// Parts are separated by commas or whitespace; parts that are not integers
/// are ignored. Returns `None` for a blank filter, meaning "match everything".
pub fn parse_song_numbers(filter: &str) -> Option<BTreeSet<i64>> {
    if filter.trim().is_empty() {
        return None;
    }
    Some(
        filter
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.parse().ok())
            .collect(),
    )
}

/// Whether `number` passes a filter produced by [`parse_song_numbers`].
pub fn matches(filter: Option<&BTreeSet<i64>>, number: i64) -> bool {
    filter.map_or(true, |set| set.contains(&number))
}

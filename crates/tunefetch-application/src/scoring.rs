// SPDX-License-Identifier: GPL-3.0-or-later
//! Relevance scoring of search results against a query.
//!
//! One scorer, parameterized by [`ScoringWeights`]. Title and artist each
//! contribute through an exact / containment / word-overlap ladder; word
//! overlap is capped below the containment tiers so an exact title and
//! artist always outrank any partial match.

use tunefetch_config::ScoringWeights;
use tunefetch_domain::{ResultCandidate, SearchQuery};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Lowercases, strips accents and punctuation, and collapses whitespace.
pub fn normalize_for_match(value: &str) -> String {
    value
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| *c != '\'' && *c != '\u{2019}')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Either string contains the other. Empty strings never match.
fn contains_either(left: &str, right: &str) -> bool {
    !left.is_empty() && !right.is_empty() && (left.contains(right) || right.contains(left))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct WordOverlap {
    exact: i64,
    partial: i64,
    long: i64,
}

/// Counts target words (longer than two characters) found in `text`.
fn word_overlap(text: &str, target: &str) -> WordOverlap {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut overlap = WordOverlap::default();

    for target_word in target.split_whitespace().filter(|w| w.chars().count() > 2) {
        let long = target_word.chars().count() > 4;
        if words.contains(&target_word) {
            overlap.exact += 1;
        } else if words.iter().any(|word| {
            word.contains(target_word) || (word.chars().count() > 2 && target_word.contains(word))
        }) {
            overlap.partial += 1;
        } else {
            continue;
        }
        if long {
            overlap.long += 1;
        }
    }
    overlap
}

#[derive(Debug, Clone, Default)]
pub struct RelevanceScorer {
    weights: ScoringWeights,
}

impl RelevanceScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(&self, candidate: &ResultCandidate, query: &SearchQuery) -> i64 {
        let title = normalize_for_match(&candidate.title);
        let target_title = normalize_for_match(&query.song_name);
        let artist = normalize_for_match(&candidate.artist);
        let target_artist = normalize_for_match(query.artist());

        self.title_score(&title, &target_title)
            + self.artist_score(&artist, &target_artist)
            + self.position_bonus(candidate.source_position)
    }

    fn title_score(&self, title: &str, target: &str) -> i64 {
        let w = &self.weights;
        if title.is_empty() || target.is_empty() {
            return 0;
        }
        if title == target {
            return w.title_exact;
        }
        if title.contains(target) {
            return w.title_contains_target;
        }
        if target.contains(title) {
            return w.target_contains_title;
        }

        let overlap = word_overlap(title, target);
        let score = (overlap.exact * 2 + overlap.partial) * w.title_word_unit
            + overlap.exact * w.title_exact_word_bonus
            + overlap.long * w.title_long_word_bonus;
        score.min(w.title_word_cap)
    }

    fn artist_score(&self, artist: &str, target: &str) -> i64 {
        let w = &self.weights;
        if target.is_empty() {
            return 0;
        }
        if artist.is_empty() {
            return -w.missing_artist_penalty;
        }
        if artist == target {
            return w.artist_exact;
        }
        if artist.contains(target) {
            return w.artist_contains_target;
        }
        if target.contains(artist) {
            return w.target_contains_artist;
        }

        let overlap = word_overlap(artist, target);
        let score = (overlap.exact + overlap.partial) * w.artist_word_unit
            + overlap.exact * w.artist_exact_word_bonus;
        score.min(w.artist_word_cap)
    }

    fn position_bonus(&self, position: usize) -> i64 {
        let position = i64::try_from(position).unwrap_or(i64::MAX);
        (self.weights.position_bonus_cap - position).max(0)
    }
}

/// Candidate title and target song contain one another.
pub fn title_matches(candidate: &ResultCandidate, query: &SearchQuery) -> bool {
    contains_either(
        &normalize_for_match(&candidate.title),
        &normalize_for_match(&query.song_name),
    )
}

/// Artist agrees with the query. A missing artist on either side does not
/// contradict; the scorer already penalizes it.
pub fn artist_matches(candidate: &ResultCandidate, query: &SearchQuery) -> bool {
    let target = normalize_for_match(query.artist());
    let artist = normalize_for_match(&candidate.artist);
    if target.is_empty() || artist.is_empty() {
        return true;
    }
    contains_either(&artist, &target)
}

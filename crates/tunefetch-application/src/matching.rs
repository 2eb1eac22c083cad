// SPDX-License-Identifier: GPL-3.0-or-later
//! Selection of the best result and the escalation query ladder.
//!
//! Decision order over a ranked result set:
//! 1. Top score at or above the high threshold: accept with `High` confidence.
//! 2. Otherwise the best-ranked candidate whose title and artist both agree
//!    with the query and whose score clears the medium threshold: `Medium`.
//! 3. Otherwise reject; the caller escalates with alternate queries.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::debug;
use tunefetch_config::MatchingConfig;
use tunefetch_domain::{Confidence, MatchDecision, ResultCandidate, ScoredCandidate, SearchQuery};

use crate::scoring::{artist_matches, title_matches, RelevanceScorer};

/// Best score first; equal scores fall back to page order.
fn by_rank(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.candidate.source_position.cmp(&b.candidate.source_position))
}

#[derive(Debug, Clone)]
pub struct ResultSetMatcher {
    scorer: RelevanceScorer,
    high_threshold: i64,
    medium_threshold: i64,
}

impl Default for ResultSetMatcher {
    fn default() -> Self {
        Self::new(&MatchingConfig::default())
    }
}

impl ResultSetMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            scorer: RelevanceScorer::new(config.weights.clone()),
            high_threshold: config.high_confidence_score,
            medium_threshold: config.medium_confidence_score,
        }
    }

    /// Scores and ranks candidates, best first. Ties keep page order.
    pub fn rank(&self, candidates: &[ResultCandidate], query: &SearchQuery) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = candidates
            .iter()
            .map(|candidate| ScoredCandidate {
                score: self.scorer.score(candidate, query),
                candidate: candidate.clone(),
            })
            .collect();
        scored.sort_by(by_rank);
        scored
    }

    /// Decides over an already ranked set.
    pub fn decide(&self, ranked: &[ScoredCandidate], query: &SearchQuery) -> MatchDecision {
        let Some(top) = ranked.first() else {
            return MatchDecision::rejected(None);
        };

        if top.score >= self.high_threshold {
            debug!(target: "matching", score = top.score, title = %top.candidate.title, "high confidence match");
            return MatchDecision::accepted(top.clone(), Confidence::High);
        }

        let agreeing = ranked.iter().find(|scored| {
            scored.score >= self.medium_threshold
                && title_matches(&scored.candidate, query)
                && artist_matches(&scored.candidate, query)
        });
        if let Some(scored) = agreeing {
            debug!(target: "matching", score = scored.score, title = %scored.candidate.title, "medium confidence match");
            return MatchDecision::accepted(scored.clone(), Confidence::Medium);
        }

        debug!(target: "matching", best_score = top.score, "no acceptable candidate");
        MatchDecision::rejected(Some(top.clone()))
    }

    pub fn select_best(&self, candidates: &[ResultCandidate], query: &SearchQuery) -> MatchDecision {
        self.decide(&self.rank(candidates, query), query)
    }
}

/// Ranked candidates accumulated across query passes, one entry per URL.
#[derive(Debug, Default, Clone)]
pub struct CandidatePool {
    ranked: Vec<ScoredCandidate>,
}

impl CandidatePool {
    /// Adds a pass; a URL seen before keeps its higher score. Equal scores
    /// across passes are ordered by page position.
    pub fn merge(&mut self, scored: Vec<ScoredCandidate>) {
        for incoming in scored {
            match self
                .ranked
                .iter_mut()
                .find(|existing| existing.candidate.url == incoming.candidate.url)
            {
                Some(existing) if incoming.score > existing.score => *existing = incoming,
                Some(_) => {}
                None => self.ranked.push(incoming),
            }
        }
        self.ranked.sort_by(by_rank);
    }

    pub fn ranked(&self) -> &[ScoredCandidate] {
        &self.ranked
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

fn strip_punctuation(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Query variants tried when the primary search is not convincing, in order.
///
/// Duplicates, blanks and the primary query itself are dropped.
pub fn alternate_queries(query: &SearchQuery) -> Vec<String> {
    let song = query.song_name.trim();
    let artist = query.artist().trim();

    let mut variants = Vec::new();
    if artist.is_empty() {
        variants.push(format!("\"{song}\""));
        variants.push(strip_punctuation(song));
    } else {
        variants.push(format!("\"{song}\" {artist}"));
        variants.push(format!("{artist} {song}"));
        variants.push(format!("{song} \"{artist}\""));
        variants.push(format!("{} {}", strip_punctuation(song), strip_punctuation(artist)));
        variants.push(artist.to_string());
        variants.push(song.to_string());
    }

    let primary = query.search_text().to_lowercase();
    let mut seen: HashSet<String> = HashSet::new();

    variants
        .into_iter()
        .map(|variant| variant.trim().to_string())
        .filter(|variant| !variant.trim_matches('"').trim().is_empty())
        .filter(|variant| variant.to_lowercase() != primary)
        .filter(|variant| seen.insert(variant.to_lowercase()))
        .collect()
}

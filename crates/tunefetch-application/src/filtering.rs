// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashSet;

use tunefetch_config::SiteProfile;
use tunefetch_domain::AudioCandidate;

use crate::classifier::AUDIO_EXTENSION_PATTERN;

fn without_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// File name of the URL path with the query string removed.
fn base_filename(url: &str) -> String {
    let path = without_query(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_ascii_lowercase(),
        _ => path.to_ascii_lowercase(),
    }
}

/// Song page URLs leak into the observed traffic; only keep them when they
/// plainly point at a media file.
fn is_page_url(url: &str, profile: &SiteProfile) -> bool {
    if profile.page_path_marker.is_empty() || !url.contains(&profile.page_path_marker) {
        return false;
    }
    !(AUDIO_EXTENSION_PATTERN.is_match(without_query(url)) || profile.is_media_host(url))
}

/// Drops page URLs and collapses URLs sharing a base file name, keeping the
/// first observed. Applying it twice changes nothing.
pub fn filter_candidates(candidates: Vec<AudioCandidate>, profile: &SiteProfile) -> Vec<AudioCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| !is_page_url(&candidate.url, profile))
        .filter(|candidate| seen.insert(base_filename(&candidate.url)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunefetch_domain::Provenance;

    fn urls(candidates: &[AudioCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.url.as_str()).collect()
    }

    #[test]
    fn drops_song_pages_but_keeps_media_under_song_paths() {
        let profile = SiteProfile::jiosaavn();
        let filtered = filter_candidates(
            vec![
                AudioCandidate::new("https://www.jiosaavn.com/song/kesariya/OQMaey5hbVc", Provenance::Response),
                AudioCandidate::new("https://cdn.x/song/abc/track.mp3", Provenance::Request),
                AudioCandidate::new("https://aac.saavncdn.com/song/815/abc_160.mp4", Provenance::Request),
            ],
            &profile,
        );
        assert_eq!(
            urls(&filtered),
            vec!["https://cdn.x/song/abc/track.mp3", "https://aac.saavncdn.com/song/815/abc_160.mp4"]
        );
    }

    #[test]
    fn dedups_by_base_filename_first_seen_wins() {
        let profile = SiteProfile::default();
        let filtered = filter_candidates(
            vec![
                AudioCandidate::new("https://a.cdn/x/abc_160.mp4?token=1", Provenance::Request),
                AudioCandidate::new("https://b.cdn/y/abc_160.mp4?token=2", Provenance::Response),
                AudioCandidate::new("https://a.cdn/x/abc_320.mp4", Provenance::Request),
            ],
            &profile,
        );
        assert_eq!(
            urls(&filtered),
            vec!["https://a.cdn/x/abc_160.mp4?token=1", "https://a.cdn/x/abc_320.mp4"]
        );
    }

    #[test]
    fn filtering_is_idempotent() {
        let profile = SiteProfile::jiosaavn();
        let input = vec![
            AudioCandidate::new("https://www.jiosaavn.com/song/a/b", Provenance::Response),
            AudioCandidate::new("https://a.cdn/x/abc_160.mp4", Provenance::Request),
            AudioCandidate::new("https://b.cdn/abc_160.mp4", Provenance::Request),
            AudioCandidate::new("https://b.cdn/stream?id=4", Provenance::Response),
        ];
        let once = filter_candidates(input, &profile);
        let twice = filter_candidates(once.clone(), &profile);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }
}

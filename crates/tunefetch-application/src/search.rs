// SPDX-License-Identifier: GPL-3.0-or-later
//! Site search: drive the search surface, read the result list, and pick the song.

use std::time::Duration;

use lazy_static::lazy_static;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use tunefetch_config::SiteProfile;
use tunefetch_domain::{MatchDecision, ResultCandidate, ScoredCandidate, SearchQuery};
use tunefetch_infrastructure::{BrowserError, BrowserSession};
use url::Url;

use crate::error::ResolveError;
use crate::matching::{alternate_queries, CandidatePool, ResultSetMatcher};
use crate::scoring::normalize_for_match;

const MAX_TITLE_CHARS: usize = 100;

lazy_static! {
    static ref PARENTHESIZED: Regex = Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("valid parenthesis regex");
}

fn parse_selectors(selectors: &[String]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|raw| match Selector::parse(raw) {
            Ok(selector) => Some(selector),
            Err(err) => {
                debug!(target: "search", selector = %raw, error = ?err, "skipping unparsable selector");
                None
            }
        })
        .collect()
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    let text = collapse(&element.text().collect::<Vec<_>>().join(" "));
    if !text.is_empty() {
        return text;
    }
    ["data-title", "title", "aria-label"]
        .iter()
        .find_map(|attr| element.value().attr(attr))
        .map(collapse)
        .unwrap_or_default()
}

fn clean_title(raw: &str) -> String {
    let title = collapse(raw);
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title;
    }
    let stripped = collapse(&PARENTHESIZED.replace_all(&title, " "));
    stripped.chars().take(MAX_TITLE_CHARS).collect::<String>().trim().to_string()
}

/// Nearest element (the link itself included) matching any container selector.
fn closest<'a>(link: ElementRef<'a>, containers: &[Selector]) -> Option<ElementRef<'a>> {
    std::iter::once(link)
        .chain(link.ancestors().filter_map(ElementRef::wrap))
        .find(|element| containers.iter().any(|selector| selector.matches(element)))
}

fn first_text(container: ElementRef<'_>, selectors: &[Selector], accept: impl Fn(&str) -> bool) -> Option<String> {
    selectors.iter().find_map(|selector| {
        container
            .select(selector)
            .map(element_text)
            .find(|text| !text.is_empty() && accept(text))
    })
}

/// Splits "Title - Artist" (either order) when no artist element exists.
fn split_title_artist(title: &str, target_song: &str) -> Option<(String, String)> {
    let (left, right) = title.split_once(" - ")?;
    let (left, right) = (left.trim(), right.trim());
    if left.is_empty() || right.is_empty() || right.contains(" - ") {
        return None;
    }
    let target = normalize_for_match(target_song);
    let agrees = |part: &str| {
        let part = normalize_for_match(part);
        !part.is_empty() && !target.is_empty() && (part.contains(&target) || target.contains(&part))
    };
    if agrees(right) && !agrees(left) {
        Some((right.to_string(), left.to_string()))
    } else {
        Some((left.to_string(), right.to_string()))
    }
}

fn absolute_url(href: &str, base: Option<&Url>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:") {
        return None;
    }
    if let Ok(url) = Url::parse(href) {
        return Some(url.to_string());
    }
    base.and_then(|base| base.join(href).ok()).map(|url| url.to_string())
}

/// Reads result candidates from a serialized results page.
///
/// Link selector groups are tried in order and the first group with any
/// match is used; a generic song-link selector is the last resort. Each link
/// is paired with the title and artist found in its nearest container.
pub fn extract_candidates(
    html: &str,
    profile: &SiteProfile,
    page_url: Option<&str>,
    target_song: &str,
) -> Vec<ResultCandidate> {
    let document = Html::parse_document(html);
    let base = page_url
        .and_then(|url| Url::parse(url).ok())
        .or_else(|| profile.base_url.as_deref().and_then(|url| Url::parse(url).ok()));

    let mut links: Vec<ElementRef<'_>> = Vec::new();
    for selector in parse_selectors(&profile.result_link_selectors) {
        links = document.select(&selector).collect();
        if !links.is_empty() {
            break;
        }
    }
    if links.is_empty() && !profile.page_path_marker.is_empty() {
        let generic = format!("a[href*=\"{}\"]", profile.page_path_marker.replace('"', ""));
        let parsed = Selector::parse(&generic);
        if let Ok(selector) = parsed {
            links = document.select(&selector).collect();
        }
    }

    let containers = parse_selectors(&profile.container_selectors);
    let titles = parse_selectors(&profile.title_selectors);
    let artists = parse_selectors(&profile.artist_selectors);

    let mut candidates: Vec<ResultCandidate> = Vec::new();
    for link in links {
        if candidates.len() >= profile.max_results {
            break;
        }
        let Some(url) = link.value().attr("href").and_then(|href| absolute_url(href, base.as_ref())) else {
            continue;
        };
        if candidates.iter().any(|existing| existing.url == url) {
            continue;
        }

        let container = closest(link, &containers)
            .or_else(|| link.parent().and_then(ElementRef::wrap))
            .unwrap_or(link);

        let raw_title = first_text(container, &titles, |_| true).unwrap_or_else(|| element_text(link));
        let mut title = clean_title(&raw_title);
        if title.is_empty() {
            continue;
        }

        let mut artist = first_text(container, &artists, |text| {
            let len = text.chars().count();
            (2..MAX_TITLE_CHARS).contains(&len) && text != title
        })
        .unwrap_or_default();

        if artist.is_empty() {
            if let Some((split_title, split_artist)) = split_title_artist(&title, target_song) {
                title = split_title;
                artist = split_artist;
            }
        }

        candidates.push(ResultCandidate {
            title,
            artist,
            url,
            source_position: candidates.len(),
        });
    }

    debug!(target: "search", count = candidates.len(), "extracted result candidates");
    candidates
}

pub struct SearchNavigator {
    profile: SiteProfile,
    matcher: ResultSetMatcher,
    settle_multiplier: f64,
}

impl SearchNavigator {
    pub fn new(profile: SiteProfile, matcher: ResultSetMatcher, settle_multiplier: f64) -> Self {
        Self {
            profile,
            matcher,
            settle_multiplier: settle_multiplier.max(0.0),
        }
    }

    fn results_wait(&self) -> Duration {
        Duration::from_secs_f64(self.profile.results_wait_ms as f64 * self.settle_multiplier / 1000.0)
    }

    fn direct_search_url(&self, query_text: &str) -> Option<String> {
        let template = self.profile.search_url_template.as_deref()?;
        let encoded = utf8_percent_encode(query_text, NON_ALPHANUMERIC).to_string();
        Some(template.replace("{query}", &encoded))
    }

    /// Runs one search and returns the candidates on the results page.
    pub async fn find_candidates(
        &self,
        session: &mut dyn BrowserSession,
        query_text: &str,
        target_song: &str,
    ) -> Result<Vec<ResultCandidate>, BrowserError> {
        let mut submitted = false;
        if let Some(base) = &self.profile.base_url {
            let search_page = format!("{}{}", base.trim_end_matches('/'), self.profile.search_path);
            match session.goto(&search_page).await {
                Ok(()) => {
                    for selector in &self.profile.search_input_selectors {
                        if session.fill_and_submit(selector, query_text).await? {
                            debug!(target: "search", %selector, "submitted search box");
                            submitted = true;
                            break;
                        }
                    }
                }
                Err(err) => warn!(target: "search", url = %search_page, error = %err, "search page unavailable"),
            }
        }

        if !submitted {
            let Some(url) = self.direct_search_url(query_text) else {
                warn!(target: "search", domain = %self.profile.domain, "no search box and no direct search url");
                return Ok(Vec::new());
            };
            debug!(target: "search", %url, "falling back to direct search url");
            session.goto(&url).await?;
        }

        tokio::time::sleep(self.results_wait()).await;
        let html = session.content().await?;
        let page_url = session.current_url().await.ok().flatten();
        Ok(extract_candidates(&html, &self.profile, page_url.as_deref(), target_song))
    }

    /// Finds the song page for `query`, escalating through alternate queries
    /// until a candidate is accepted.
    pub async fn locate(
        &self,
        session: &mut dyn BrowserSession,
        query: &SearchQuery,
    ) -> Result<ScoredCandidate, ResolveError> {
        let mut pool = CandidatePool::default();
        let mut decision = MatchDecision::rejected(None);
        let mut last_error = None;

        let passes = std::iter::once(query.search_text()).chain(alternate_queries(query));
        for (pass, text) in passes.enumerate() {
            if pass > 0 {
                info!(target: "search", query = %text, "escalating with alternate query");
            }
            let candidates = match self.find_candidates(session, &text, &query.song_name).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    warn!(target: "search", query = %text, pass, error = %err, "search failed");
                    last_error = Some(err);
                    continue;
                }
            };
            pool.merge(self.matcher.rank(&candidates, query));
            decision = self.matcher.decide(pool.ranked(), query);
            if !decision.is_rejected() {
                break;
            }
        }

        // Nothing came back and at least one search broke: report the browser
        // failure rather than an empty result set.
        if pool.is_empty() {
            if let Some(err) = last_error {
                return Err(err.into());
            }
        }
        self.conclude(decision, &pool, query)
    }

    fn conclude(
        &self,
        decision: MatchDecision,
        pool: &CandidatePool,
        query: &SearchQuery,
    ) -> Result<ScoredCandidate, ResolveError> {
        if pool.is_empty() {
            return Err(ResolveError::NoCandidatesFound {
                query: query.to_string(),
            });
        }
        let confidence = decision.confidence();
        let best_attempt = decision.best_attempt().cloned();
        match decision.into_chosen() {
            Some(chosen) => {
                info!(
                    target: "search",
                    title = %chosen.candidate.title,
                    artist = %chosen.candidate.artist,
                    score = chosen.score,
                    ?confidence,
                    url = %chosen.candidate.url,
                    "song located"
                );
                Ok(chosen)
            }
            None => Err(ResolveError::NoConfidentMatch {
                query: query.to_string(),
                best_title: best_attempt.as_ref().map(|c| c.candidate.title.clone()),
                best_artist: best_attempt.map(|c| c.candidate.artist),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSession;

    const RESULTS_PAGE: &str = r#"
        <html><body>
          <ol>
            <li class="o-flag">
              <a href="/song/kesariya/OQMaey5hbVc"><img src="k.jpg"></a>
              <div class="o-flag__body">
                <h4 class="song-name"><a href="/song/kesariya/OQMaey5hbVc">Kesariya</a></h4>
                <p class="song-artists">Arijit Singh</p>
              </div>
            </li>
            <li class="o-flag">
              <div class="o-flag__body">
                <h4 class="song-name"><a href="https://www.jiosaavn.com/song/kesariya-rangu/ABC">Kesariya Rangu</a></h4>
                <p class="song-artists">Shreya Ghoshal</p>
              </div>
            </li>
          </ol>
        </body></html>
    "#;

    fn profile() -> SiteProfile {
        SiteProfile::jiosaavn()
    }

    #[test]
    fn extracts_title_artist_and_absolute_urls() {
        let candidates = extract_candidates(
            RESULTS_PAGE,
            &profile(),
            Some("https://www.jiosaavn.com/search/kesariya"),
            "Kesariya",
        );
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "Kesariya");
        assert_eq!(candidates[0].artist, "Arijit Singh");
        assert_eq!(candidates[0].url, "https://www.jiosaavn.com/song/kesariya/OQMaey5hbVc");
        assert_eq!(candidates[0].source_position, 0);
        assert_eq!(candidates[1].artist, "Shreya Ghoshal");
        assert_eq!(candidates[1].source_position, 1);
    }

    #[test]
    fn generic_fallback_and_dash_split() {
        let html = r#"<div><a href="/song/x/1">Arijit Singh - Kesariya</a></div>"#;
        let mut profile = SiteProfile::default();
        profile.result_link_selectors = vec![".does-not-exist a".to_string()];
        profile.base_url = Some("https://music.example.org".to_string());
        let candidates = extract_candidates(html, &profile, None, "Kesariya");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Kesariya");
        assert_eq!(candidates[0].artist, "Arijit Singh");
        assert_eq!(candidates[0].url, "https://music.example.org/song/x/1");
    }

    #[test]
    fn long_titles_lose_parenthesized_noise() {
        let noise = "(From \"A Very Long Movie Soundtrack Title That Keeps Going And Going Forever\")";
        let raw = format!("Kesariya {noise} [Official Lyric Video Remastered Edition]");
        assert!(raw.chars().count() > MAX_TITLE_CHARS);
        assert_eq!(clean_title(&raw), "Kesariya");
    }

    #[test]
    fn skips_links_without_titles_or_targets() {
        let html = r##"
            <div class="song-item"><a href="#">Top</a></div>
            <div class="song-item"><a href="javascript:void(0)">Play</a></div>
            <div class="song-item"><a href="/song/a/1"></a></div>
        "##;
        let mut profile = SiteProfile::default();
        profile.base_url = Some("https://x.org".to_string());
        assert!(extract_candidates(html, &profile, None, "a").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn locate_accepts_first_pass_through_search_box() {
        let profile = profile();
        let mut session = FakeSession::new()
            .search_input("input.rbt-input-main")
            .results_for("Kesariya Arijit Singh", RESULTS_PAGE);
        let log = session.log();
        let navigator = SearchNavigator::new(profile, ResultSetMatcher::default(), 1.0);

        let chosen = navigator
            .locate(&mut session, &SearchQuery::new("Kesariya", Some("Arijit Singh".to_string())))
            .await
            .unwrap();
        assert_eq!(chosen.candidate.url, "https://www.jiosaavn.com/song/kesariya/OQMaey5hbVc");
        assert_eq!(chosen.score, 3000 + 2500 + 20);
        let searches = log.lock().unwrap().iter().filter(|a| a.starts_with("search:")).count();
        assert_eq!(searches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn locate_escalates_until_a_match_appears() {
        let unrelated = r#"<li class="o-flag"><h4 class="song-name"><a href="/song/chaleya/1">Chaleya</a></h4><p class="song-artists">Anirudh</p></li>"#;
        let found = r#"<li class="o-flag"><h4 class="song-name"><a href="/song/tum-hi-ho/2">Tum Hi Ho</a></h4><p class="song-artists">Arijit Singh</p></li>"#;
        let mut session = FakeSession::new()
            .search_input("input.rbt-input-main")
            .results_for("Tum Hi Ho Arijit Singh", unrelated)
            .results_for("\"Tum Hi Ho\" Arijit Singh", unrelated)
            .results_for("Arijit Singh Tum Hi Ho", found);
        let log = session.log();
        let navigator = SearchNavigator::new(profile(), ResultSetMatcher::default(), 1.0);

        let chosen = navigator
            .locate(&mut session, &SearchQuery::new("Tum Hi Ho", Some("Arijit Singh".to_string())))
            .await
            .unwrap();
        assert_eq!(chosen.candidate.title, "Tum Hi Ho");
        let searches: Vec<String> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.starts_with("search:"))
            .cloned()
            .collect();
        assert_eq!(searches.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn locate_reports_no_confident_match_with_best_attempt() {
        let unrelated = r#"<li class="o-flag"><h4 class="song-name"><a href="/song/chaleya/1">Chaleya</a></h4><p class="song-artists">Anirudh</p></li>"#;
        let mut session = FakeSession::new().search_input("input.rbt-input-main");
        for text in [
            "Kesariya Arijit Singh",
            "\"Kesariya\" Arijit Singh",
            "Arijit Singh Kesariya",
            "Kesariya \"Arijit Singh\"",
            "Arijit Singh",
            "Kesariya",
        ] {
            session = session.results_for(text, unrelated);
        }
        let navigator = SearchNavigator::new(profile(), ResultSetMatcher::default(), 1.0);
        let err = navigator
            .locate(&mut session, &SearchQuery::new("Kesariya", Some("Arijit Singh".to_string())))
            .await
            .unwrap_err();
        match err {
            ResolveError::NoConfidentMatch { best_title, .. } => {
                assert_eq!(best_title.as_deref(), Some("Chaleya"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_results_everywhere_is_no_candidates_found() {
        let mut session = FakeSession::new();
        let navigator = SearchNavigator::new(profile(), ResultSetMatcher::default(), 1.0);
        let err = navigator
            .locate(&mut session, &SearchQuery::new("xyzzy", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoCandidatesFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_primary_search_still_escalates() {
        let found = r#"<li class="o-flag"><h4 class="song-name"><a href="/song/tum-hi-ho/2">Tum Hi Ho</a></h4><p class="song-artists">Arijit Singh</p></li>"#;
        let mut session = FakeSession::new()
            .search_input("input.rbt-input-main")
            .failing_search("Tum Hi Ho Arijit Singh")
            .results_for("\"Tum Hi Ho\" Arijit Singh", found);
        let navigator = SearchNavigator::new(profile(), ResultSetMatcher::default(), 1.0);

        let chosen = navigator
            .locate(&mut session, &SearchQuery::new("Tum Hi Ho", Some("Arijit Singh".to_string())))
            .await
            .unwrap();
        assert_eq!(chosen.candidate.url, "https://www.jiosaavn.com/song/tum-hi-ho/2");
    }

    #[tokio::test(start_paused = true)]
    async fn every_search_failing_surfaces_the_browser_error() {
        let mut session = FakeSession::new().search_input("input.rbt-input-main");
        for text in [
            "Kesariya Arijit Singh",
            "\"Kesariya\" Arijit Singh",
            "Arijit Singh Kesariya",
            "Kesariya \"Arijit Singh\"",
            "Arijit Singh",
            "Kesariya",
        ] {
            session = session.failing_search(text);
        }
        let navigator = SearchNavigator::new(profile(), ResultSetMatcher::default(), 1.0);

        let err = navigator
            .locate(&mut session, &SearchQuery::new("Kesariya", Some("Arijit Singh".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Browser(_)), "unexpected error: {err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn direct_search_url_is_used_without_a_search_box() {
        let mut session = FakeSession::new().page(
            "https://www.jiosaavn.com/search/Kesariya%20Arijit%20Singh",
            RESULTS_PAGE,
        );
        let navigator = SearchNavigator::new(profile(), ResultSetMatcher::default(), 1.0);
        let candidates = navigator
            .find_candidates(&mut session, "Kesariya Arijit Singh", "Kesariya")
            .await
            .unwrap();
        assert_eq!(candidates.len(), 2);
    }
}

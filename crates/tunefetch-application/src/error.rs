// SPDX-License-Identifier: GPL-3.0-or-later
use std::time::Duration;
use thiserror::Error;
use tunefetch_infrastructure::BrowserError;

/// Failure categories of a resolution job.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no search results for {query}")]
    NoCandidatesFound { query: String },
    #[error("no confident match for {query}")]
    NoConfidentMatch {
        query: String,
        best_title: Option<String>,
        best_artist: Option<String>,
    },
    #[error("no audio detected after {strategies_attempted} strategies")]
    NoAudioDetected { strategies_attempted: usize },
    #[error("download of {url} failed after {attempts} attempts: {reason}")]
    FetchFailed {
        url: String,
        attempts: u32,
        reason: String,
    },
    #[error("{stage} exceeded {limit:?}")]
    SessionTimeout { stage: &'static str, limit: Duration },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

impl ResolveError {
    /// Text shown to end users on a failed job.
    pub fn user_message(&self) -> String {
        match self {
            ResolveError::NoCandidatesFound { query } => format!(
                "No songs found for {query}. Check the spelling, or try adding the movie or album name (for example \"Kesariya Brahmastra\")."
            ),
            ResolveError::NoConfidentMatch {
                query,
                best_title,
                best_artist,
            } => {
                let closest = match (best_title, best_artist) {
                    (Some(title), Some(artist)) if !artist.is_empty() => {
                        format!(" The closest result was \"{title}\" by {artist}.")
                    }
                    (Some(title), _) => format!(" The closest result was \"{title}\"."),
                    _ => String::new(),
                };
                format!(
                    "No relevant songs found for {query}; the search returned unrelated results.{closest} Try a more specific title, add the artist, or include the movie or album name."
                )
            }
            ResolveError::NoAudioDetected { .. } => "The song page was found but no playable audio was detected. The song may be region-locked, require a login, or the page layout may have changed. Please try again later or use the direct download option with the song page URL.".to_string(),
            ResolveError::FetchFailed { .. } => "The audio stream was found but could not be downloaded. The link may have expired; please try again.".to_string(),
            ResolveError::SessionTimeout { .. } => "The music site took too long to respond. Please try again in a moment.".to_string(),
            ResolveError::InvalidRequest(reason) => reason.clone(),
            ResolveError::Cancelled => "The request was cancelled because the server is shutting down.".to_string(),
            ResolveError::Browser(_) => "The automated browser could not be started or lost its connection. Please try again; if this keeps happening, check the server's browser installation.".to_string(),
        }
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
pub mod sites;

use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use sites::{SiteCatalog, SiteProfile};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// Headless browser session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    pub executable_path: Option<PathBuf>,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout_secs: u64,
    /// Hard upper bound for one session, from launch to close.
    pub session_lifetime_secs: u64,
    /// Scales every settle/wait delay. Slow hosts want values above 1.0.
    pub settle_multiplier: f64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport_width: 1366,
            viewport_height: 768,
            navigation_timeout_secs: 30,
            session_lifetime_secs: 120,
            settle_multiplier: 1.0,
        }
    }
}

/// Weight table of the relevance scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub title_exact: i64,
    pub title_contains_target: i64,
    pub target_contains_title: i64,
    pub title_word_unit: i64,
    pub title_exact_word_bonus: i64,
    pub title_long_word_bonus: i64,
    /// Ceiling for the word-overlap title score; must stay below `target_contains_title`.
    pub title_word_cap: i64,
    pub artist_exact: i64,
    pub artist_contains_target: i64,
    pub target_contains_artist: i64,
    pub artist_word_unit: i64,
    pub artist_exact_word_bonus: i64,
    /// Ceiling for the word-overlap artist score; must stay below `target_contains_artist`.
    pub artist_word_cap: i64,
    pub missing_artist_penalty: i64,
    pub position_bonus_cap: i64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            title_exact: 3000,
            title_contains_target: 2000,
            target_contains_title: 1500,
            title_word_unit: 200,
            title_exact_word_bonus: 300,
            title_long_word_bonus: 400,
            title_word_cap: 1400,
            artist_exact: 2500,
            artist_contains_target: 1800,
            target_contains_artist: 1200,
            artist_word_unit: 300,
            artist_exact_word_bonus: 200,
            artist_word_cap: 1100,
            missing_artist_penalty: 500,
            position_bonus_cap: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub high_confidence_score: i64,
    pub medium_confidence_score: i64,
    pub weights: ScoringWeights,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            high_confidence_score: 4000,
            medium_confidence_score: 1000,
            weights: ScoringWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Wait after the first navigation before interacting.
    pub initial_load_ms: u64,
    /// Observation window after the interaction sequence.
    pub settle_ms: u64,
    /// Passive capture window of the last-resort strategy.
    pub aggressive_capture_ms: u64,
    pub resolution_cache_ttl_secs: u64,
    /// Quality markers tried when building alternate-quality variants, best first.
    pub quality_ladder: Vec<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initial_load_ms: 5000,
            settle_ms: 5000,
            aggressive_capture_ms: 20_000,
            resolution_cache_ttl_secs: 600,
            quality_ladder: vec![320, 160, 128, 96],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProberConfig {
    pub request_timeout_secs: u64,
    /// Recursion bound when walking JSON payloads.
    pub max_depth: usize,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            max_depth: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    pub download_dir: PathBuf,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Files at or below this size are treated as error pages.
    pub min_file_bytes: u64,
    pub request_timeout_secs: u64,
    /// When false, jobs complete with the resolved audio URL instead of a stored file.
    pub store_files: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            max_retries: 3,
            retry_delay_ms: 2000,
            min_file_bytes: 1024,
            request_timeout_secs: 30,
            store_files: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 60 * 60,
            sweep_interval_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
    pub browser: BrowserConfig,
    pub matching: MatchingConfig,
    pub pipeline: PipelineConfig,
    pub prober: ProberConfig,
    pub fetcher: FetcherConfig,
    pub jobs: JobsConfig,
    pub scheduler: SchedulerConfig,
    pub sites: SiteCatalog,
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: TUNEFETCH_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("TUNEFETCH_").split("__"));

    let config: AppConfig = figment.extract()?;
    info!(
        target: "config",
        headless = config.browser.headless,
        sites = config.sites.profiles.len(),
        "configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_round_trip_through_figment() {
        Jail::expect_with(|_jail| {
            let config = load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.http.port, 3000);
            assert!(config.browser.headless);
            assert_eq!(config.fetcher.max_retries, 3);
            assert_eq!(config.matching.high_confidence_score, 4000);
            assert!(!config.sites.profiles.is_empty());
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_nested_keys() {
        Jail::expect_with(|jail| {
            jail.set_env("TUNEFETCH_BROWSER__HEADLESS", "false");
            jail.set_env("TUNEFETCH_BROWSER__SETTLE_MULTIPLIER", "2.5");
            jail.set_env("TUNEFETCH_FETCHER__MAX_RETRIES", "5");
            let config = load(None).map_err(|e| e.to_string())?;
            assert!(!config.browser.headless);
            assert_eq!(config.browser.settle_multiplier, 2.5);
            assert_eq!(config.fetcher.max_retries, 5);
            Ok(())
        });
    }

    #[test]
    fn toml_file_is_merged_below_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tunefetch.toml",
                r#"
                [http]
                port = 8080

                [matching]
                medium_confidence_score = 800
                "#,
            )?;
            jail.set_env("TUNEFETCH_HTTP__PORT", "9090");
            let config = load(Some(Path::new("tunefetch.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.http.port, 9090);
            assert_eq!(config.matching.medium_confidence_score, 800);
            assert_eq!(config.matching.weights.title_exact, 3000);
            Ok(())
        });
    }

    #[test]
    fn word_caps_keep_exact_matches_ahead() {
        let weights = ScoringWeights::default();
        assert!(weights.title_word_cap < weights.target_contains_title);
        assert!(weights.artist_word_cap < weights.target_contains_artist);
        let best_partial = weights.title_contains_target
            + weights.artist_contains_target
            + weights.position_bonus_cap;
        assert!(weights.title_exact + weights.artist_exact > best_partial);
    }
}

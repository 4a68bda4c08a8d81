use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::estimate::EstimatorConfig;
use crate::extract::ExtractConfig;
use crate::fetch::FetchConfig;
use crate::matcher::{MatchConfig, ReferencePrice};
use crate::store::prices::MergePolicy;

pub const TARGETS_FILE: &str = "data/targets.json";
pub const PRICES_FILE: &str = "data/prices.json";
pub const SEEN_FILE: &str = "data/seen-hot-deals.json";
pub const CHECKED_FILE: &str = "data/checked-details.json";

pub const DEFAULT_PAGES: usize = 3;

/// A build page with fewer listings than this is treated as the last one.
pub const MIN_LISTINGS_PER_PAGE: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub scan_url: Option<String>,
    pub targets_file: PathBuf,
    pub prices_file: PathBuf,
    pub seen_file: PathBuf,
    /// Detail pages already read without finding urgency language.
    pub checked_file: PathBuf,
    pub notify_url: Option<String>,
    pub batch_index: usize,
    pub total_batches: usize,
    pub pages: usize,
    pub seen_capacity: usize,
    pub api_port: u16,
    pub log_level: String,
    pub fetch: FetchConfig,
    pub extract: ExtractConfig,
    pub estimator: EstimatorConfig,
    pub merge: MergePolicy,
    pub matcher: MatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_url: None,
            targets_file: TARGETS_FILE.into(),
            prices_file: PRICES_FILE.into(),
            seen_file: SEEN_FILE.into(),
            checked_file: CHECKED_FILE.into(),
            notify_url: None,
            batch_index: 0,
            total_batches: 1,
            pages: DEFAULT_PAGES,
            seen_capacity: crate::store::seen::DEFAULT_CAPACITY,
            api_port: 8080,
            log_level: "info".to_string(),
            fetch: FetchConfig::default(),
            extract: ExtractConfig::default(),
            estimator: EstimatorConfig::default(),
            merge: MergePolicy::default(),
            matcher: MatchConfig::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by environment variables (after `.env` is loaded).
    pub fn from_env() -> Result<Self> {
        let estimator = EstimatorConfig {
            trim_low: env_parse("TRIM_LOW", EstimatorConfig::default().trim_low)?,
            trim_high: env_parse("TRIM_HIGH", EstimatorConfig::default().trim_high)?,
            floor_percentile: env_parse(
                "FLOOR_PERCENTILE",
                EstimatorConfig::default().floor_percentile,
            )?,
            ceiling_percentile: env_parse(
                "CEILING_PERCENTILE",
                EstimatorConfig::default().ceiling_percentile,
            )?,
            margin: env_parse("MARGIN", EstimatorConfig::default().margin)?,
        };
        estimator.validate().map_err(AppError::Config)?;

        let merge = MergePolicy {
            min_samples: env_parse("MIN_SAMPLES", MergePolicy::default().min_samples)?,
            min_median: env_parse("MIN_MEDIAN", MergePolicy::default().min_median)?,
            margin: estimator.margin,
        };

        let reference = match env_opt("REFERENCE_PRICE").as_deref() {
            None | Some("floor") => ReferencePrice::Floor,
            Some("median") => ReferencePrice::Median,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "REFERENCE_PRICE must be floor or median, got {other:?}"
                )));
            }
        };
        let matcher = MatchConfig {
            threshold_factor: env_parse("THRESHOLD_FACTOR", MatchConfig::default().threshold_factor)?,
            max_detail_fetches: env_parse(
                "MAX_DETAIL_FETCHES",
                MatchConfig::default().max_detail_fetches,
            )?,
            reference,
            ..MatchConfig::default()
        };

        let defaults = FetchConfig::default();
        let fetch = FetchConfig {
            delay_ms: (
                env_parse("DELAY_MIN_MS", defaults.delay_ms.0)?,
                env_parse("DELAY_MAX_MS", defaults.delay_ms.1)?,
            ),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries)?,
            timeout: Duration::from_secs(env_parse("FETCH_TIMEOUT_SECS", defaults.timeout.as_secs())?),
            proxy_url: env_opt("PROXY_URL"),
            rotate_url: env_opt("CHANGE_IP_URL"),
            warmup: env_parse("WARMUP", defaults.warmup)?,
            ..defaults
        };
        if fetch.delay_ms.0 > fetch.delay_ms.1 {
            return Err(AppError::Config(
                "DELAY_MIN_MS must not exceed DELAY_MAX_MS".to_string(),
            ));
        }
        if fetch.max_retries == 0 {
            return Err(AppError::Config("MAX_RETRIES must be at least 1".to_string()));
        }

        let total_batches: usize = env_parse("TOTAL_BATCHES", 1)?;
        let batch_index: usize = env_parse("BATCH_INDEX", 0)?;
        if total_batches == 0 || batch_index >= total_batches {
            return Err(AppError::Config(format!(
                "BATCH_INDEX {batch_index} out of range for TOTAL_BATCHES {total_batches}"
            )));
        }

        Ok(Self {
            scan_url: env_opt("SCAN_URL"),
            targets_file: env_opt("TARGETS_FILE")
                .unwrap_or_else(|| TARGETS_FILE.to_string())
                .into(),
            prices_file: env_opt("PRICES_FILE")
                .unwrap_or_else(|| PRICES_FILE.to_string())
                .into(),
            seen_file: env_opt("SEEN_FILE")
                .unwrap_or_else(|| SEEN_FILE.to_string())
                .into(),
            checked_file: env_opt("CHECKED_FILE")
                .unwrap_or_else(|| CHECKED_FILE.to_string())
                .into(),
            notify_url: env_opt("NOTIFY_URL"),
            batch_index,
            total_batches,
            pages: env_parse("PAGES", DEFAULT_PAGES)?,
            seen_capacity: env_parse("SEEN_CAPACITY", crate::store::seen::DEFAULT_CAPACITY)?,
            api_port: env_parse("API_PORT", 8080)?,
            log_level: env_opt("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            fetch,
            extract: ExtractConfig::default(),
            estimator,
            merge,
            matcher,
        })
    }

    pub fn require_scan_url(&self) -> Result<&str> {
        self.scan_url
            .as_deref()
            .ok_or_else(|| AppError::Config("SCAN_URL is required for scan".to_string()))
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Unset falls back to `default`; set-but-malformed is an error.
fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env_opt(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
    }
}

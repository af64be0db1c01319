use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::pacing::RunPolicy;

const DEFAULT_CONFIG_FILE: &str = "corpus_scraper";
const ENV_PREFIX: &str = "HARVEST";

/// Pre-flight configuration problems. These abort a run before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{key}` (set {env} or add it to corpus_scraper.toml)")]
    Missing { key: &'static str, env: &'static str },
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub artifact_dir: PathBuf,
    /// Index origin scraped by discovery and resolution.
    pub scrape_base_site: Option<String>,
    /// Origin serving `<HASH>.torrent` files.
    pub cache_origin: Option<String>,
    pub api_key: Option<String>,
    pub http: HttpSettings,
    pub discover: DiscoverSettings,
    pub resolve: ResolveSettings,
    pub retrieve: RetrieveSettings,
    pub extract: ExtractSettings,
    pub partition: PartitionSettings,
    pub normalize: NormalizeSettings,
    pub annotate: AnnotateSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/database.db"),
            artifact_dir: PathBuf::from("data/torrent"),
            scrape_base_site: None,
            cache_origin: None,
            api_key: None,
            http: HttpSettings::default(),
            discover: DiscoverSettings::default(),
            resolve: ResolveSettings::default(),
            retrieve: RetrieveSettings::default(),
            extract: ExtractSettings::default(),
            partition: PartitionSettings::default(),
            normalize: NormalizeSettings::default(),
            annotate: AnnotateSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0"
                .into(),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".into(),
            accept_language: "en-US,en;q=0.5".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverSettings {
    /// Initial search path. A trailing number (`/1/`) is treated as a page counter.
    pub start_path: String,
    pub max_pages: usize,
    pub max_failures: usize,
    pub min_seeds: u32,
    pub pause_secs: f64,
    pub jitter_secs: f64,
}

impl Default for DiscoverSettings {
    fn default() -> Self {
        DiscoverSettings {
            start_path: "/top-100-anime".into(),
            max_pages: 50,
            max_failures: 3,
            min_seeds: 1,
            pause_secs: 15.0,
            jitter_secs: 5.0,
        }
    }
}

impl DiscoverSettings {
    pub fn policy(&self) -> RunPolicy {
        RunPolicy {
            pause: secs(self.pause_secs),
            jitter: secs(self.jitter_secs),
            max_failures: Some(self.max_failures),
            max_items: Some(self.max_pages),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolveSettings {
    pub shuffle: bool,
    pub max_failures: usize,
    pub pause_secs: f64,
    pub jitter_secs: f64,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        ResolveSettings {
            shuffle: true,
            max_failures: 3,
            pause_secs: 10.0,
            jitter_secs: 3.0,
        }
    }
}

impl ResolveSettings {
    pub fn policy(&self, limit: Option<usize>) -> RunPolicy {
        RunPolicy {
            pause: secs(self.pause_secs),
            jitter: secs(self.jitter_secs),
            max_failures: Some(self.max_failures),
            max_items: limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrieveSettings {
    pub shuffle: bool,
    pub max_failures: usize,
    pub pause_secs: f64,
    pub jitter_secs: f64,
    pub timeout_secs: u64,
}

impl Default for RetrieveSettings {
    fn default() -> Self {
        RetrieveSettings {
            shuffle: true,
            max_failures: 3,
            pause_secs: 10.0,
            jitter_secs: 5.0,
            timeout_secs: 10,
        }
    }
}

impl RetrieveSettings {
    pub fn policy(&self, limit: Option<usize>) -> RunPolicy {
        RunPolicy {
            pause: secs(self.pause_secs),
            jitter: secs(self.jitter_secs),
            max_failures: Some(self.max_failures),
            max_items: limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractSettings {
    /// Video container extensions kept from artifact member lists.
    pub extensions: Vec<String>,
    /// Unset: decode failures never stop the batch.
    pub max_failures: Option<usize>,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        ExtractSettings {
            extensions: [
                ".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".webm", ".mpeg", ".mpg", ".ogv",
                ".3gp",
            ]
            .iter()
            .map(|e| e.to_string())
            .collect(),
            max_failures: None,
        }
    }
}

impl ExtractSettings {
    pub fn policy(&self) -> RunPolicy {
        RunPolicy {
            max_failures: self.max_failures,
            ..RunPolicy::unpaced()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PartitionSettings {
    pub train_weight: f64,
    pub eval_weight: f64,
}

impl Default for PartitionSettings {
    fn default() -> Self {
        PartitionSettings {
            train_weight: 0.5,
            eval_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizeSettings {
    /// Partition whose file names are queued for labeling.
    pub group: char,
    pub shuffle: bool,
    pub max_names_per_item: usize,
    pub min_name_len: usize,
    pub ascii_only: bool,
    pub skip_samples: bool,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        NormalizeSettings {
            group: 'T',
            shuffle: true,
            max_names_per_item: 10,
            min_name_len: 12,
            ascii_only: true,
            skip_samples: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnnotateSettings {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub batch_size: usize,
    pub max_requests: usize,
    pub max_failures: usize,
    pub pause_secs: f64,
    pub prompt_path: PathBuf,
    /// Raw replies are archived here when set.
    pub responses_dir: Option<PathBuf>,
}

impl Default for AnnotateSettings {
    fn default() -> Self {
        AnnotateSettings {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
            model: "gemini-2.0-flash".into(),
            temperature: 0.2,
            top_p: 0.8,
            batch_size: 30,
            max_requests: 21,
            max_failures: 3,
            pause_secs: 5.0,
            prompt_path: PathBuf::from("data/prompt.txt"),
            responses_dir: Some(PathBuf::from("data/responses")),
        }
    }
}

impl AnnotateSettings {
    pub fn policy(&self) -> RunPolicy {
        RunPolicy {
            pause: secs(self.pause_secs),
            jitter: Duration::ZERO,
            max_failures: Some(self.max_failures),
            max_items: Some(self.max_requests),
        }
    }
}

impl Settings {
    /// Defaults, then the optional config file, then `HARVEST_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => config::File::from(p.to_path_buf()).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.partition;
        if p.train_weight < 0.0 || p.eval_weight < 0.0 || p.train_weight + p.eval_weight <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "partition",
                reason: "weights must be non-negative and not both zero".into(),
            });
        }
        if !matches!(self.normalize.group, 'T' | 'E') {
            return Err(ConfigError::Invalid {
                key: "normalize.group",
                reason: format!("expected T or E, got {}", self.normalize.group),
            });
        }
        let budgets = [
            ("discover.max_failures", Some(self.discover.max_failures)),
            ("resolve.max_failures", Some(self.resolve.max_failures)),
            ("retrieve.max_failures", Some(self.retrieve.max_failures)),
            ("extract.max_failures", self.extract.max_failures),
            ("annotate.max_failures", Some(self.annotate.max_failures)),
        ];
        if let Some((key, _)) = budgets.iter().find(|(_, budget)| *budget == Some(0)) {
            return Err(ConfigError::Invalid {
                key: *key,
                reason: "a failure budget must be at least 1".into(),
            });
        }
        if self.annotate.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "annotate.batch_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn require_base_site(&self) -> Result<&str, ConfigError> {
        require(&self.scrape_base_site, "scrape_base_site", "HARVEST_SCRAPE_BASE_SITE")
    }

    pub fn require_cache_origin(&self) -> Result<&str, ConfigError> {
        require(&self.cache_origin, "cache_origin", "HARVEST_CACHE_ORIGIN")
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        require(&self.api_key, "api_key", "HARVEST_API_KEY")
    }
}

fn require<'a>(
    value: &'a Option<String>,
    key: &'static str,
    env: &'static str,
) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { key, env })
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

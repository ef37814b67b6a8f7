use std::{path::PathBuf, time::Duration};

use regex::Regex;
use serde::Deserialize;

use crate::queue::worker::{DrainOrder, WorkerOptions};
use crate::queue::CoordinatorOptions;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    2334
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), password: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_clean_log")]
    pub clean_log_on_start: bool,
}
fn default_clean_log() -> bool {
    true
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self { clean_log_on_start: default_clean_log() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub ytdlp_path: Option<String>,
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_preferred_format")]
    pub preferred_format: String,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub order: DrainOrder,
}
fn default_fetch_timeout() -> u64 {
    120_000
}
fn default_preferred_format() -> String {
    "bestaudio".into()
}
impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            timeout_ms: default_fetch_timeout(),
            preferred_format: default_preferred_format(),
            retries: 0,
            order: DrainOrder::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
}
fn default_lookahead() -> usize {
    5
}
fn default_file_extension() -> String {
    "audio".into()
}
impl Default for QueueConfig {
    fn default() -> Self {
        Self { lookahead: default_lookahead(), cache_dir: None, file_extension: default_file_extension() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceRules {
    pub allowed: Vec<Regex>,
    pub blocked: Vec<Regex>,
}

#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub clean_log_on_start: bool,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub fetch_timeout_ms: u64,
    pub preferred_format: String,
    pub fetch_retries: u32,
    pub fetch_order: DrainOrder,
    pub lookahead: usize,
    pub cache_dir: PathBuf,
    pub file_extension: String,
    pub sources: SourceRules,
}

impl EffectiveConfig {
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            lookahead: self.lookahead,
            cache_dir: self.cache_dir.clone(),
            file_extension: self.file_extension.clone(),
            worker: WorkerOptions {
                order: self.fetch_order,
                timeout: Duration::from_millis(self.fetch_timeout_ms),
                retries: self.fetch_retries,
            },
        }
    }
}

pub const CONFIG_FILE: &str = "nearer.toml";

pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Nearer Node Configuration

[server]
# Host/IP to bind. Default: 0.0.0.0
host = "0.0.0.0"
# Port to bind. Default: 2334
port = 2334
# Optional password required in the Authorization header for all requests. Default: unset (no auth)
# password = "supersecret"

[logging]
# Truncate .logs/latest.log on startup. Default: true
clean_log_on_start = true

[fetch]
# Optional custom path to yt-dlp executable. Default: "yt-dlp"
ytdlp_path = "yt-dlp"
# Optional custom path to ffmpeg executable (used for playback). Default: "ffmpeg"
# ffmpeg_path = "ffmpeg"
# Upper bound for a single fetch attempt in milliseconds. Default: 120000
timeout_ms = 120000
# Format selector passed to yt-dlp; "bestaudio/best" is tried if it fails. Default: "bestaudio"
preferred_format = "bestaudio"
# Extra attempts after a failed fetch. Default: 0
retries = 0
# Order in which pending fetches are served: "fifo" or "lifo". Default: "fifo"
order = "fifo"

[queue]
# How many songs from the front of the queue are kept downloaded. Default: 5
lookahead = 5
# Where downloaded songs are stored. Default: <system temp dir>/nearer
# cache_dir = "/var/cache/nearer"
# Extension of the stored files. Default: "audio"
file_extension = "audio"

[sources]
# Regex patterns that are allowed. If empty, all are allowed unless blocked.
# Match is tested against both the song code and its hostname.
# Example: only allow YouTube
# allowed = ["(^|.*)(youtube\\.com|youtu\\.be)(/|$)"]
allowed = []

# Regex patterns that are blocked. These take priority over allowed.
# blocked = ["(^|.*)soundcloud\\.com(/|$)"]
blocked = []"#;

pub fn load_config() -> EffectiveConfig {
    let _ = dotenvy::dotenv();

    let path = std::path::Path::new(CONFIG_FILE);
    if !path.exists() {
        if let Err(e) = std::fs::write(path, DEFAULT_CONFIG_TEMPLATE) {
            tracing::warn!(?e, "Failed to create default config file");
        } else {
            tracing::info!("Created default config file at {CONFIG_FILE}");
        }
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents).unwrap_or_else(|e| {
            tracing::warn!(?e, "Failed to parse nearer config; using defaults");
            RawConfig::default()
        }),
        Err(_) => RawConfig::default(),
    };

    effective(raw, |key| std::env::var(key).ok())
}

pub fn parse_config(contents: &str) -> Result<RawConfig, toml::de::Error> {
    toml::from_str(contents)
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %p, ?e, "ignoring invalid source pattern");
                None
            }
        })
        .collect()
}

/// Folds environment overrides into the parsed file.
pub fn effective(raw: RawConfig, env: impl Fn(&str) -> Option<String>) -> EffectiveConfig {
    let timeout_env = env("FETCH_TIMEOUT_MS").and_then(|s| s.parse().ok());
    let lookahead_env = env("NEARER_LOOKAHEAD").and_then(|s| s.parse().ok());

    EffectiveConfig {
        host: raw.server.host,
        port: raw.server.port,
        password: raw.server.password.filter(|p| !p.is_empty()),
        clean_log_on_start: raw.logging.clean_log_on_start,
        ytdlp_path: env("YTDLP_PATH").unwrap_or_else(|| raw.fetch.ytdlp_path.unwrap_or_else(|| "yt-dlp".into())),
        ffmpeg_path: env("FFMPEG_PATH").unwrap_or_else(|| raw.fetch.ffmpeg_path.unwrap_or_else(|| "ffmpeg".into())),
        fetch_timeout_ms: timeout_env.unwrap_or(raw.fetch.timeout_ms),
        preferred_format: raw.fetch.preferred_format,
        fetch_retries: raw.fetch.retries,
        fetch_order: raw.fetch.order,
        lookahead: lookahead_env.unwrap_or(raw.queue.lookahead).max(1),
        cache_dir: env("NEARER_CACHE_DIR")
            .map(PathBuf::from)
            .or(raw.queue.cache_dir)
            .unwrap_or_else(|| std::env::temp_dir().join("nearer")),
        file_extension: raw.queue.file_extension,
        sources: SourceRules {
            allowed: compile_patterns(&raw.sources.allowed),
            blocked: compile_patterns(&raw.sources.blocked),
        },
    }
}

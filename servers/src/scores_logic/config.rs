use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Live scores distribution server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SCORES_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "SCORES_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SCORES_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SCORES_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SCORES_CACHE_TTL_SECONDS", help = "Seconds a cached feed value stays fresh.")]
    pub cache_ttl_seconds: Option<u64>,

    #[clap(long, env = "SCORES_BROADCAST_INTERVAL_SECONDS", help = "Seconds between stream broadcast ticks.")]
    pub broadcast_interval_seconds: Option<u64>,

    #[clap(long, env = "SCORES_RATE_WINDOW_SECONDS", help = "Length in seconds of one rate-limit window.")]
    pub rate_window_seconds: Option<u64>,

    #[clap(long, env = "SCORES_RATE_MAX_REQUESTS", help = "Requests admitted per client per window.")]
    pub rate_max_requests: Option<u32>,

    #[clap(long, env = "SCORES_SEND_TIMEOUT_MS", help = "Per-connection delivery timeout in milliseconds during a broadcast.")]
    pub send_timeout_ms: Option<u64>,

    #[clap(long, env = "SCORES_MOCK_LATENCY_MS", help = "Simulated upstream latency in milliseconds for the mock provider.")]
    pub mock_latency_ms: Option<u64>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            cache_ttl_seconds: other.cache_ttl_seconds.or(self.cache_ttl_seconds),
            broadcast_interval_seconds: other
                .broadcast_interval_seconds
                .or(self.broadcast_interval_seconds),
            rate_window_seconds: other.rate_window_seconds.or(self.rate_window_seconds),
            rate_max_requests: other.rate_max_requests.or(self.rate_max_requests),
            send_timeout_ms: other.send_timeout_ms.or(self.send_timeout_ms),
            mock_latency_ms: other.mock_latency_ms.or(self.mock_latency_ms),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn resolve(self) -> Settings {
        Settings {
            port: self.port.unwrap_or(9003),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            cache_ttl: Duration::from_secs(self.cache_ttl_seconds.unwrap_or(30)),
            broadcast_interval: Duration::from_secs(self.broadcast_interval_seconds.unwrap_or(5)),
            rate_window: Duration::from_secs(self.rate_window_seconds.unwrap_or(60)),
            rate_max_requests: self.rate_max_requests.unwrap_or(100),
            send_timeout: Duration::from_millis(self.send_timeout_ms.unwrap_or(2000)),
            mock_latency: Duration::from_millis(self.mock_latency_ms.unwrap_or(150)),
            tls_cert_path: self.tls_cert_path,
            tls_key_path: self.tls_key_path,
        }
    }
}

/// Fully-resolved runtime settings, every default applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub cache_ttl: Duration,
    pub broadcast_interval: Duration,
    pub rate_window: Duration,
    pub rate_max_requests: u32,
    pub send_timeout: Duration,
    pub mock_latency: Duration,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

pub fn load_settings() -> Settings {
    // 1. CLI/env first, so a --config-path override is honored when reading the file.
    let cli_args = Config::parse();

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_scores.conf"));

    // 2. Layer the config file (if any) over nothing, then CLI/env over the file.
    let mut current_config = Config::default();

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    }

    // 3. Defaults fill whatever is still unset.
    current_config.merge(cli_args).resolve()
}

use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TelemetryError;
use crate::models::Endpoints;

/// Default one-shot request endpoint.
pub const DEFAULT_HTTP_ENDPOINT: &str = "http://localhost:5000/graphql";

/// Default streaming endpoint.
pub const DEFAULT_WS_ENDPOINT: &str = "ws://localhost:5000/subscriptions";

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Live telemetry viewer and publisher
#[derive(Parser, Debug, Clone)]
#[command(
    name = "live-telemetry",
    about = "Stream live telemetry readings into a sliding window",
    version
)]
pub struct Settings {
    /// Run mode
    #[arg(long, default_value = "watch", value_parser = ["watch", "publish"])]
    pub mode: String,

    /// GraphQL request endpoint
    #[arg(long, env = "LIVE_TELEMETRY_HTTP_ENDPOINT", default_value = DEFAULT_HTTP_ENDPOINT)]
    pub http_endpoint: String,

    /// GraphQL subscription endpoint
    #[arg(long, env = "LIVE_TELEMETRY_WS_ENDPOINT", default_value = DEFAULT_WS_ENDPOINT)]
    pub ws_endpoint: String,

    /// Number of readings kept in the window (1-1000)
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub capacity: u16,

    /// Request timeout in seconds (1-300)
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..=300))]
    pub request_timeout: u64,

    /// Reconnect attempts before a subscription fails (0-100)
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u32).range(0..=100))]
    pub reconnect_attempts: u32,

    /// Upper bound for the reconnect back-off in seconds (1-300)
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..=300))]
    pub max_backoff: u64,

    /// Fail the subscription when no reading arrives for this many seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub stall_timeout: Option<u64>,

    /// Device identifier used when publishing
    #[arg(long, default_value = "device-id")]
    pub device_id: String,

    /// Seconds between published readings (1-3600)
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub publish_interval: u64,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Clear saved configuration
    #[arg(long)]
    pub clear: bool,
}

// ── LastUsedParams ─────────────────────────────────────────────────────────────

/// Persisted last-used parameters saved to `~/.live-telemetry/last_used.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct LastUsedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_attempts: Option<u32>,
}

impl LastUsedParams {
    /// Return the default path to the persisted config file.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Return the config path rooted at `base_dir` (used for testing).
    pub fn config_path_in(base_dir: &std::path::Path) -> PathBuf {
        base_dir.join(".live-telemetry").join("last_used.json")
    }

    /// Load persisted params from an explicit path.
    /// Returns `Default` when the file is absent or cannot be parsed.
    pub fn load_from(path: &std::path::Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Atomically write params to an explicit path, creating parent
    /// directories if needed.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        // Write to a temp file then rename for atomicity.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the config file at an explicit path if it exists.
    pub fn clear_at(path: &std::path::Path) -> Result<(), std::io::Error> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments, merge with last-used params where no explicit
    /// value was provided, and persist the result.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Full implementation – accepts args and an explicit config path so that
    /// tests can redirect to a temporary directory.
    pub fn load_with_last_used_impl(
        args: Vec<std::ffi::OsString>,
        config_path: &std::path::Path,
    ) -> Self {
        // Raw ArgMatches tell us where each value came from.
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            if let Err(e) = LastUsedParams::clear_at(config_path) {
                tracing::warn!(error = %e, "failed to clear saved configuration");
            }
            return settings.resolve_debug();
        }

        let last = LastUsedParams::load_from(config_path);

        // Explicit values (command line or environment) always win.
        if !is_arg_explicitly_set(&matches, "http_endpoint") {
            if let Some(v) = last.http_endpoint {
                settings.http_endpoint = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "ws_endpoint") {
            if let Some(v) = last.ws_endpoint {
                settings.ws_endpoint = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "capacity") {
            if let Some(v) = last.capacity.filter(|c| (1..=1000).contains(c)) {
                settings.capacity = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "reconnect_attempts") {
            if let Some(v) = last.reconnect_attempts.filter(|a| *a <= 100) {
                settings.reconnect_attempts = v;
            }
        }

        let settings = settings.resolve_debug();

        if let Err(e) = LastUsedParams::from(&settings).save_to(config_path) {
            tracing::debug!(error = %e, "could not persist last-used settings");
        }

        settings
    }

    /// Validated endpoint pair.
    pub fn endpoints(&self) -> Result<Endpoints, TelemetryError> {
        Endpoints::parse(&self.http_endpoint, &self.ws_endpoint)
    }

    pub fn window_capacity(&self) -> usize {
        usize::from(self.capacity)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout.map(Duration::from_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval)
    }

    /// `--debug` overrides the log level.
    fn resolve_debug(mut self) -> Self {
        if self.debug {
            self.log_level = "DEBUG".to_string();
        }
        self
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        LastUsedParams {
            http_endpoint: Some(s.http_endpoint.clone()),
            ws_endpoint: Some(s.ws_endpoint.clone()),
            capacity: Some(s.capacity),
            reconnect_attempts: Some(s.reconnect_attempts),
        }
    }
}

/// Returns `true` when `name` was supplied on the command line or through its
/// environment variable rather than falling back to the default.
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches!(
        matches.value_source(name),
        Some(clap::parser::ValueSource::CommandLine) | Some(clap::parser::ValueSource::EnvVariable)
    )
}

// ── Tests ──────────────────────────────────────────────────────────────────────

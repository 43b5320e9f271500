use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "BIP_RECONCILE_CONFIG";
/// Prefix of structured environment overrides, e.g. `BIP__ENGINE__ABUSE_THRESHOLD=5`
pub const CONFIG_ENV_PREFIX: &str = "BIP";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub schedule: ScheduleConfig,
    pub feed: FeedConfig,
    pub catalog: CatalogConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// Reconciliation rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pending scans of one EAN per day (the incoming one included) that trigger bulk cancellation.
    pub abuse_threshold: u32,
    /// Maximum |scan price - sale value| in minor units for a match.
    pub price_tolerance_cents: i64,
    /// Raw-digit prefix identifying employee badges.
    pub badge_prefix: String,
    /// Business timezone as a fixed offset from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub sync_interval_secs: u64,
    /// Local "HH:MM" after which the previous day's notification pass runs.
    pub daily_notify_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    File,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    pub output_dir: PathBuf,
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/bip_reconcile".to_string(),
                max_connections: 20,
                acquire_timeout_secs: 10,
            },
            engine: EngineConfig {
                abuse_threshold: 3,
                price_tolerance_cents: 3,
                badge_prefix: "3122".to_string(),
                utc_offset_minutes: -180,
            },
            schedule: ScheduleConfig {
                enabled: true,
                sync_interval_secs: 60,
                daily_notify_time: "08:00".to_string(),
            },
            feed: FeedConfig {
                url: "http://localhost:9000/sales".to_string(),
                timeout_secs: 600,
            },
            catalog: CatalogConfig {
                url: None,
                timeout_secs: 10,
            },
            notifier: NotifierConfig {
                kind: NotifierKind::File,
                output_dir: PathBuf::from("notifications"),
                url: None,
                timeout_secs: 30,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration, later sources overriding earlier ones:
    /// 1. built-in defaults
    /// 2. `bip-reconcile.{toml,yaml,json}` in the working directory, if present
    /// 3. the file named by `BIP_RECONCILE_CONFIG`, if set
    /// 4. `BIP__SECTION__KEY` environment variables
    /// 5. legacy `DATABASE_URL`, `SERVER_HOST` and `SERVER_PORT`
    pub fn load() -> Result<Self, config::ConfigError> {
        use config::{Config, Environment, File};

        let mut builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("bip-reconcile").required(false));

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&path).required(true));
        }

        let mut config: AppConfig = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.apply_legacy_env();
        Ok(config)
    }

    fn apply_legacy_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("SERVER_PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }
}

impl EngineConfig {
    /// Business timezone. Out-of-range offsets fall back to UTC.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

impl ScheduleConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn notify_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.daily_notify_time, "%H:%M").ok()
    }
}

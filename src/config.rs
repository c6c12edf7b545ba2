use crate::error::AppError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SERVICE_NAME: &str = "cost-board";

/// Unprefixed variables honoured for compatibility with the usual deployment
/// environment; they win over `COST_BOARD_*`.
const PLAIN_ENV_KEYS: [(&str, &str); 5] = [
    ("PORT", "port"),
    ("AWS_REGION", "aws_region"),
    ("AWS_PROFILE", "aws_profile"),
    ("CORS_ALLOWED_ORIGINS", "cors_allowed_origins"),
    ("REFRESH_INTERVAL_MINUTES", "refresh_interval_minutes"),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Fixture,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: String,
    pub port: u16,
    pub aws_region: String,
    pub aws_profile: Option<String>,
    pub cors_allowed_origins: String,
    pub refresh_interval_minutes: u64,
    pub refresh_timeout_seconds: u64,
    pub cost_required: bool,
    pub cost_window_days: u32,
    pub provider: ProviderKind,
    pub fixture_path: Option<PathBuf>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            aws_region: "us-east-1".into(),
            aws_profile: None,
            cors_allowed_origins: "*".into(),
            refresh_interval_minutes: 60,
            refresh_timeout_seconds: 300,
            cost_required: true,
            cost_window_days: 30,
            provider: ProviderKind::Aws,
            fixture_path: None,
            log_level: "info".into(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60))
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_seconds)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// `None` means any origin.
    pub fn cors_origins(&self) -> Option<Vec<String>> {
        let origins: Vec<String> = self
            .cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(|o| o.trim_end_matches('/').to_string())
            .collect();
        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            None
        } else {
            Some(origins)
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.refresh_interval_minutes == 0 {
            return Err(AppError::Config(
                "refresh_interval_minutes must be at least 1".into(),
            ));
        }
        if self.refresh_timeout_seconds == 0 {
            return Err(AppError::Config(
                "refresh_timeout_seconds must be at least 1".into(),
            ));
        }
        if !(1..=365).contains(&self.cost_window_days) {
            return Err(AppError::Config(
                "cost_window_days must be between 1 and 365".into(),
            ));
        }
        if self.aws_region.trim().is_empty() {
            return Err(AppError::Config("aws_region must be set".into()));
        }
        if self.provider == ProviderKind::Fixture && self.fixture_path.is_none() {
            return Err(AppError::Config(
                "provider 'fixture' requires fixture_path".into(),
            ));
        }
        for origin in self.cors_origins().unwrap_or_default() {
            let parsed = url::Url::parse(&origin).map_err(|err| {
                AppError::Config(format!("invalid CORS origin '{origin}': {err}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(AppError::Config(format!(
                    "CORS origin '{origin}' must be an http(s) origin"
                )));
            }
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, AppError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Values given on the command line; they take precedence over every other
/// source.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub aws_region: Option<String>,
}

fn app_home_dir() -> Option<PathBuf> {
    if let Ok(custom) = std::env::var("COST_BOARD_HOME") {
        return Some(PathBuf::from(custom));
    }
    ProjectDirs::from("dev", "cost-board", SERVICE_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn default_config_path() -> Option<PathBuf> {
    app_home_dir().map(|home| home.join("config.toml"))
}

/// Defaults, then the TOML file, then `COST_BOARD_*`, then the plain
/// variables, then CLI flags.
pub fn load_config(path: Option<&Path>, cli: &CliOverrides) -> Result<AppConfig, AppError> {
    let mut builder = ::config::Config::builder();

    match path {
        Some(explicit) => {
            if !explicit.exists() {
                return Err(AppError::Config(format!(
                    "config file {} does not exist",
                    explicit.display()
                )));
            }
            builder = builder.add_source(::config::File::from(explicit.to_path_buf()));
        }
        None => {
            if let Some(default) = default_config_path() {
                builder = builder
                    .add_source(::config::File::from(default).required(false));
            }
        }
    }

    builder = builder.add_source(
        ::config::Environment::with_prefix("COST_BOARD")
            .prefix_separator("_")
            .try_parsing(true),
    );

    for (var, key) in PLAIN_ENV_KEYS {
        let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        builder = builder.set_override_option(key, value)?;
    }
    builder = builder
        .set_override_option("port", cli.port.map(|p| p.to_string()))?
        .set_override_option("aws_region", cli.aws_region.clone())?;

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

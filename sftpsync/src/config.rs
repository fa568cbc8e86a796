use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sftpsync_core::{Credentials, SftpOptions};
use thiserror::Error;

use crate::sync::processor::ProcessorConfig;
use crate::sync::transfer::TransferConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";
pub const DEFAULT_CREDENTIALS_PATH: &str = "config/credenciales.json";
const CREDENTIALS_SECTION: &str = "SFTP";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid JSON in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{} has no `SFTP` section", .0.display())]
    MissingSection(PathBuf),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(alias = "directorio_local", default)]
    local_root: Option<String>,
    #[serde(alias = "directorio_remoto", default = "default_remote_root")]
    remote_root: String,
    #[serde(default)]
    force_download: bool,
    #[serde(default = "default_true")]
    keep_latest_only: bool,
    #[serde(default = "default_workers")]
    workers: u64,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_secs: u64,
    #[serde(default = "default_list_timeout")]
    list_timeout_secs: u64,
    #[serde(default = "default_download_timeout")]
    download_timeout_secs: u64,
    #[serde(default = "default_connect_attempts")]
    connect_attempts: u64,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_remote_root() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_workers() -> u64 {
    4
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_list_timeout() -> u64 {
    30
}

fn default_download_timeout() -> u64 {
    600
}

fn default_connect_attempts() -> u64 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RawConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(value) = read_string_env(lookup, "SFTPSYNC_LOCAL_ROOT") {
            self.local_root = Some(value);
        }
        if let Some(value) = read_string_env(lookup, "SFTPSYNC_REMOTE_ROOT") {
            self.remote_root = value;
        }
        self.workers = read_u64_env(lookup, "SFTPSYNC_WORKERS", self.workers);
        self.keep_latest_only =
            read_bool_env(lookup, "SFTPSYNC_KEEP_LATEST_ONLY", self.keep_latest_only);
        if let Some(value) = read_string_env(lookup, "SFTPSYNC_LOG_LEVEL") {
            self.log_level = value;
        }
    }
}

/// Validated run settings. Built once at startup and never re-read.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub local_root: PathBuf,
    pub remote_root: String,
    /// Accepted for compatibility; has no effect.
    pub force_download: bool,
    pub keep_latest_only: bool,
    pub workers: usize,
    pub connect_timeout: Duration,
    pub list_timeout: Duration,
    pub download_timeout: Duration,
    pub connect_attempts: u32,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    pub fn load_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let text = read_file(path)?;
        let raw: RawConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw, &lookup, dirs::home_dir().as_deref())
    }

    fn from_raw(
        mut raw: RawConfig,
        lookup: &impl Fn(&str) -> Option<String>,
        home: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        raw.apply_overrides(lookup);

        let local_root = raw
            .local_root
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::invalid("local_root", "is required"))?;
        let local_root = absolute(expand_path(local_root, home), "local_root")?;

        let remote_root = raw.remote_root.trim().to_string();
        if remote_root.is_empty() {
            return Err(ConfigError::invalid("remote_root", "must not be empty"));
        }

        let workers = usize::try_from(raw.workers)
            .ok()
            .filter(|value| *value >= 1)
            .ok_or_else(|| ConfigError::invalid("workers", "must be at least 1"))?;
        let connect_attempts = u32::try_from(raw.connect_attempts)
            .ok()
            .filter(|value| *value >= 1)
            .ok_or_else(|| ConfigError::invalid("connect_attempts", "must be at least 1"))?;

        let log_file = raw
            .log_file
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| absolute(expand_path(value, home), "log_file"))
            .transpose()?;

        let log_level = raw.log_level.trim().to_string();
        if log_level.is_empty() {
            return Err(ConfigError::invalid("log_level", "must not be empty"));
        }

        Ok(Self {
            local_root,
            remote_root,
            force_download: raw.force_download,
            keep_latest_only: raw.keep_latest_only,
            workers,
            connect_timeout: seconds("connect_timeout_secs", raw.connect_timeout_secs)?,
            list_timeout: seconds("list_timeout_secs", raw.list_timeout_secs)?,
            download_timeout: seconds("download_timeout_secs", raw.download_timeout_secs)?,
            connect_attempts,
            log_file,
            log_level,
        })
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            local_root: self.local_root.clone(),
            remote_root: self.remote_root.clone(),
            keep_latest_only: self.keep_latest_only,
            transfer: TransferConfig {
                download_concurrency: self.workers,
                download_timeout: self.download_timeout,
            },
        }
    }

    /// One session per worker; blocking calls are bounded by the list budget.
    pub fn sftp_options(&self) -> SftpOptions {
        SftpOptions {
            pool_size: self.workers,
            connect_timeout: self.connect_timeout,
            io_timeout: self.list_timeout,
            list_timeout: self.list_timeout,
            ..SftpOptions::default()
        }
    }
}

/// Reads the `SFTP` object of the credentials file.
pub fn load_credentials(path: &Path) -> Result<Credentials, ConfigError> {
    let text = read_file(path)?;
    parse_credentials(&text, path)
}

fn parse_credentials(text: &str, path: &Path) -> Result<Credentials, ConfigError> {
    let parse_error = |source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let mut document: serde_json::Value = serde_json::from_str(text).map_err(parse_error)?;
    let section = document
        .get_mut(CREDENTIALS_SECTION)
        .map(serde_json::Value::take)
        .ok_or_else(|| ConfigError::MissingSection(path.to_path_buf()))?;
    let credentials: Credentials = serde_json::from_value(section).map_err(parse_error)?;

    if credentials.host.trim().is_empty() {
        return Err(ConfigError::invalid("SFTP.host", "must not be empty"));
    }
    if credentials.username.trim().is_empty() {
        return Err(ConfigError::invalid("SFTP.username", "must not be empty"));
    }
    if !credentials.has_auth_method() {
        return Err(ConfigError::invalid(
            "SFTP.password",
            "a password or a private_key_path is required",
        ));
    }
    Ok(credentials)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn seconds(field: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than 0"));
    }
    Ok(Duration::from_secs(value))
}

fn absolute(path: PathBuf, field: &'static str) -> Result<PathBuf, ConfigError> {
    std::path::absolute(&path).map_err(|err| ConfigError::invalid(field, err.to_string()))
}

fn expand_path(value: &str, home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) => expand_with_home(value, home),
        None => PathBuf::from(value),
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_string_env(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn read_u64_env(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

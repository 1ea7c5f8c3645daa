//! Configuration system for mxlink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MXLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/mxlink/config.toml
//!   3. ~/.config/mxlink/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MxlinkConfig {
    pub transmit: TransmitConfig,
    pub envelope: EnvelopeConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitConfig {
    /// What to do with a chunk whose send failed.
    pub retry_policy: RetryPolicy,
}

/// Where a chunk goes after its send fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Re-append the chunk behind everything queued while it was in flight.
    /// This is what deployed firmware peers expect, but it reorders the
    /// chunk stream: the receiver drops the message it belonged to.
    #[default]
    RequeueTail,

    /// Retry the failed chunk before anything else.
    RetryHead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Append and verify the text checksum. Compression requires it.
    pub checksum: bool,
    /// Sealed messages at least this long are gzipped when that makes them
    /// smaller. 0 = never compress.
    pub compress_threshold: usize,
    /// Upper bound on inflated message size.
    pub max_decompressed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// tracing filter used when RUST_LOG is unset.
    pub filter: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            checksum: true,
            compress_threshold: 512,
            max_decompressed: 64 * 1024,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("mxlink")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MxlinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    /// No environment overrides are applied.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MXLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&Self::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply MXLINK_* overrides. `lookup` maps a variable name to its value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MXLINK_TRANSMIT__RETRY_POLICY") {
            match v.as_str() {
                "requeue_tail" => self.transmit.retry_policy = RetryPolicy::RequeueTail,
                "retry_head" => self.transmit.retry_policy = RetryPolicy::RetryHead,
                _ => {}
            }
        }
        if let Some(v) = lookup("MXLINK_ENVELOPE__CHECKSUM") {
            self.envelope.checksum = v == "true" || v == "1";
        }
        if let Some(v) = lookup("MXLINK_ENVELOPE__COMPRESS_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.envelope.compress_threshold = n;
            }
        }
        if let Some(v) = lookup("MXLINK_ENVELOPE__MAX_DECOMPRESSED") {
            if let Ok(n) = v.parse() {
                self.envelope.max_decompressed = n;
            }
        }
        if let Some(v) = lookup("MXLINK_LOG__FILTER") {
            self.log.filter = v;
        }
    }
}

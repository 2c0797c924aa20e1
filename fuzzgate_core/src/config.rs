use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("keep-going must be at least 1")]
    ZeroKeepGoing,
    #[error("ignore entry {0:?} is not a 64-bit hex dedup token")]
    InvalidIgnoreToken(String),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Number of distinct findings after which fuzzing stops.
    #[serde(default = "default_keep_going")]
    pub keep_going: u64,
    #[serde(default = "default_true")]
    pub dedup: bool,
    /// Normalize findings from injected hooks and record startup coverage.
    #[serde(default = "default_true")]
    pub hooks: bool,
    /// Dedup tokens, in hex, that are never reported.
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default = "default_reproducer_path")]
    pub reproducer_path: PathBuf,
    #[serde(default)]
    pub coverage_dump: Option<PathBuf>,
    #[serde(default)]
    pub coverage_report: Option<PathBuf>,
    /// Handed to the target's `initialize_with_args` hook.
    #[serde(default)]
    pub target_args: Vec<String>,
}

pub fn default_keep_going() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

pub fn default_reproducer_path() -> PathBuf {
    PathBuf::from(".")
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            keep_going: default_keep_going(),
            dedup: true,
            hooks: true,
            ignore: Vec::new(),
            reproducer_path: default_reproducer_path(),
            coverage_dump: None,
            coverage_report: None,
            target_args: Vec::new(),
        }
    }
}

impl HarnessConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: HarnessConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keep_going == 0 {
            return Err(ConfigError::ZeroKeepGoing);
        }
        self.ignored_tokens().map(|_| ())
    }

    /// Keeping going past a finding, or ignoring some, only works with dedup on.
    pub fn effective_dedup(&self) -> bool {
        self.dedup || self.keep_going > 1 || !self.ignore.is_empty()
    }

    pub fn ignored_tokens(&self) -> Result<Vec<u64>, ConfigError> {
        self.ignore.iter().map(|entry| parse_token(entry)).collect()
    }
}

fn parse_token(entry: &str) -> Result<u64, ConfigError> {
    let digits = entry.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    if digits.is_empty() || digits.len() > 16 {
        return Err(ConfigError::InvalidIgnoreToken(entry.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| ConfigError::InvalidIgnoreToken(entry.to_string()))
}

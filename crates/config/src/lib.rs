use std::fs;
use std::io::ErrorKind;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use core_types::{ApiConfig, DEFAULT_TIMEOUT_MS, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

const DEFAULT_LIMIT: NonZeroU32 = match NonZeroU32::new(DEFAULT_PAGE_SIZE) {
    Some(limit) => limit,
    None => panic!("default page size must be non-zero"),
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub entries_page_size: u32,
    #[serde(default = "default_page_size")]
    pub check_ins_page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            entries_page_size: DEFAULT_PAGE_SIZE,
            check_ins_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

const fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl PaginationConfig {
    pub fn entries_limit(&self) -> NonZeroU32 {
        NonZeroU32::new(self.entries_page_size).unwrap_or(DEFAULT_LIMIT)
    }

    pub fn check_ins_limit(&self) -> NonZeroU32 {
        NonZeroU32::new(self.check_ins_page_size).unwrap_or(DEFAULT_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub schema_version: u32,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            api: ApiConfig::default(),
            pagination: PaginationConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("config.json"),
        }
    }

    pub fn from_default_location() -> Result<Self> {
        let mut dir = dirs::config_dir().context("failed to resolve config_dir")?;
        dir.push("daybook");
        Ok(Self::from_dir(dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored document, or `None` when no file exists yet.
    pub fn load(&self) -> Result<Option<AppConfig>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(config))
    }

    /// Loads, upgrades and repairs the stored document, writing back the
    /// result. A missing file is created with defaults.
    pub fn load_or_init(&self) -> Result<AppConfig> {
        let Some(mut config) = self.load()? else {
            debug!(path = %self.path.display(), "no config file, writing defaults");
            let config = AppConfig::default();
            self.save(&config)?;
            return Ok(config);
        };

        let upgraded = self.migrate(&mut config);
        let repaired = sanitize(&mut config);
        if upgraded || repaired {
            self.save(&config)?;
        }
        Ok(config)
    }

    /// Writes through a sibling temp file so a crash never leaves a
    /// truncated document behind.
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        let dir = self
            .path
            .parent()
            .context("config path has no parent directory")?;
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let mut text = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        text.push('\n');
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, text)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn migrate(&self, config: &mut AppConfig) -> bool {
        if config.schema_version >= CURRENT_SCHEMA_VERSION {
            return false;
        }

        warn!(
            from = config.schema_version,
            to = CURRENT_SCHEMA_VERSION,
            "migrating app config schema"
        );

        // v1 had no retry section and retried nothing.
        if config.schema_version < 2 && config.retry.max_attempts == 0 {
            config.retry = RetryPolicy::default();
        }
        config.schema_version = CURRENT_SCHEMA_VERSION;
        true
    }
}

// Replaces values that would make every request or page fail. Returns whether
// anything changed.
fn sanitize(config: &mut AppConfig) -> bool {
    let mut repaired = false;
    let pagination = &mut config.pagination;
    for (name, size) in [
        ("entries_page_size", &mut pagination.entries_page_size),
        ("check_ins_page_size", &mut pagination.check_ins_page_size),
    ] {
        if *size == 0 {
            warn!(field = name, default = DEFAULT_PAGE_SIZE, "zero page size replaced");
            *size = DEFAULT_PAGE_SIZE;
            repaired = true;
        }
    }
    if config.api.timeout_ms == 0 {
        warn!(default = DEFAULT_TIMEOUT_MS, "zero request timeout replaced");
        config.api.timeout_ms = DEFAULT_TIMEOUT_MS;
        repaired = true;
    }
    repaired
}

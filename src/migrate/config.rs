use crate::migrate::paths::default_home;
use anyhow::{Result, anyhow};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/migrate_env_allowlist.rs"));
}

const ENV_PREFIX: &str = "BIOMAJ_MIGRATE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSection {
    pub keep_history: bool,
    /// IANA zone the legacy timestamps were written in.
    pub legacy_timezone: String,
}

impl Default for MigrationSection {
    fn default() -> Self {
        Self {
            keep_history: false,
            legacy_timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreSection {
    /// Overrides `db.dir` from the target properties.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigrateConfig {
    pub migration: MigrationSection,
    pub store: StoreSection,
}

impl MigrateConfig {
    pub fn zone(&self) -> Result<Tz> {
        parse_zone(&self.migration.legacy_timezone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialMigrateConfig {
    migration: Option<MigrationSection>,
    store: Option<StoreSection>,
}

fn parse_zone(raw: &str) -> Result<Tz> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|err| anyhow!("invalid legacy timezone `{raw}`: {err}"))
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_path(var: &str, fallback: Option<PathBuf>) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => fallback,
    }
}

fn validate(cfg: &MigrateConfig) -> Result<()> {
    parse_zone(&cfg.migration.legacy_timezone)?;
    if let Some(dir) = &cfg.store.dir
        && dir.as_os_str().is_empty()
    {
        return Err(anyhow!("invalid store dir: cannot be empty"));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("BIOMAJ_MIGRATE_CONFIG") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    default_home().ok().map(|home| home.join("migrate.toml"))
}

fn merge_file_config(base: &mut MigrateConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialMigrateConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse migrate config {}: {err}", path.display()))?;
    if let Some(migration) = parsed.migration {
        base.migration = migration;
    }
    if let Some(store) = parsed.store {
        base.store = store;
    }
    Ok(())
}

pub fn load_config() -> Result<MigrateConfig> {
    let mut cfg = MigrateConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.migration.keep_history =
        env_or_bool("BIOMAJ_MIGRATE_KEEP_HISTORY", cfg.migration.keep_history);
    cfg.migration.legacy_timezone =
        env_or_string("BIOMAJ_MIGRATE_LEGACY_TZ", &cfg.migration.legacy_timezone);
    cfg.store.dir = env_or_path("BIOMAJ_MIGRATE_STORE_DIR", cfg.store.dir.take());

    validate(&cfg)?;
    Ok(cfg)
}

/// `BIOMAJ_MIGRATE_*` variables set in the environment that nothing reads.
pub fn unknown_env_keys() -> Vec<String> {
    let mut out: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with(ENV_PREFIX))
        .filter(|key| !generated::GENERATED_MIGRATE_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    out.sort();
    out
}

use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct MigratePaths {
    pub home: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl MigratePaths {
    /// Layout rooted at `home` with no environment overrides.
    pub fn under(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            state_dir: home.join("state"),
            logs_dir: home.join("logs"),
        }
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn default_home() -> Result<PathBuf> {
    Ok(required_home_dir()?.join(".biomaj-migrate"))
}

pub fn resolve_paths() -> Result<MigratePaths> {
    let home = env_or_default_path("BIOMAJ_MIGRATE_HOME", default_home()?);
    let defaults = MigratePaths::under(&home);

    Ok(MigratePaths {
        state_dir: env_or_default_path("BIOMAJ_MIGRATE_STATE_DIR", defaults.state_dir),
        logs_dir: env_or_default_path("BIOMAJ_MIGRATE_LOGS_DIR", defaults.logs_dir),
        home,
    })
}

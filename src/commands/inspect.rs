use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, warn_unknown_env};
use crate::error::MigrateError;
use crate::migrate::config::load_config;
use crate::migrate::legacy::{LegacySource, SqliteLegacySource};
use crate::migrate::settings::LegacyConfig;

#[derive(Debug, Clone, Default)]
pub struct InspectOptions {
    pub oldconfig: Option<PathBuf>,
    pub legacy_db: Option<PathBuf>,
}

fn legacy_db_path(opts: &InspectOptions) -> Result<PathBuf> {
    if let Some(path) = &opts.legacy_db {
        return Ok(path.clone());
    }
    let Some(oldconfig) = &opts.oldconfig else {
        return Err(MigrateError::InvalidConfig(
            "inspect needs --legacy-db or --oldconfig".to_string(),
        )
        .into());
    };
    Ok(LegacyConfig::load(oldconfig)?.sqlite_path(None)?)
}

/// Read-only look at the legacy database.
pub fn run(opts: &InspectOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let zone = cfg.zone()?;
    let mut report = CommandReport::new("inspect");
    warn_unknown_env(&mut report);

    let db_path = legacy_db_path(opts)?;
    let source = SqliteLegacySource::open(&db_path)?;
    report.detail(format!("legacy_db={}", db_path.display()));
    report.detail(format!("schema={}", source.schema_shape().as_str()));

    let banks = source.bank_names()?;
    report.detail(format!("banks={}", banks.len()));
    for bank in banks {
        let all = source.productions(&bank, true, zone)?;
        let removed = all.records.iter().filter(|r| r.removal.is_some()).count();
        report.detail(format!(
            "bank={bank} live={} removed={removed} rejected={}",
            all.records.len() - removed,
            all.rejected.len()
        ));
        if !all.rejected.is_empty() {
            report.issue(format!(
                "bank {bank} has {} unreadable production rows",
                all.rejected.len()
            ));
        }
    }
    Ok(report)
}

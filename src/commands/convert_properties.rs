use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use crate::commands::{CommandReport, audit_event, open_store, warn_unknown_env};
use crate::migrate::config::load_config;
use crate::migrate::paths::resolve_paths;
use crate::migrate::properties;
use crate::migrate::settings::{LegacyConfig, TargetConfig, preflight};
use crate::migrate::store::BankStore;

#[derive(Debug, Clone, Default)]
pub struct ConvertPropertiesOptions {
    pub config: PathBuf,
    pub oldconfig: PathBuf,
    pub dry_run: bool,
}

/// Convert every legacy bank property file and register its bank document.
/// `store` is `None` for a dry run; nothing is written then.
pub fn convert(
    legacy: &LegacyConfig,
    target: &TargetConfig,
    mut store: Option<&mut dyn BankStore>,
    report: &mut CommandReport,
) -> Result<usize> {
    let dry_run = store.is_none();
    let converted = properties::convert_all(
        &legacy.conf_dir(),
        &target.conf_dir,
        &legacy.properties,
        dry_run,
    )?;

    for bank in &converted {
        info!(bank = %bank.bank, target = %bank.target.display(), "bank properties converted");
        report.detail(format!(
            "properties {} -> {}",
            bank.source.display(),
            bank.target.display()
        ));
        if let Some(store) = store.as_deref_mut()
            && store.register_bank(&bank.bank)?
        {
            report.detail(format!("bank.registered={}", bank.bank));
        }
    }
    report.detail(format!("properties.converted={}", converted.len()));
    Ok(converted.len())
}

pub fn run(opts: &ConvertPropertiesOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let mut report = CommandReport::new("convert-properties");
    warn_unknown_env(&mut report);

    let legacy = LegacyConfig::load(&opts.oldconfig)?;
    let target = TargetConfig::load(&opts.config)?;
    preflight(&legacy, &target)?;

    if opts.dry_run {
        report.detail("dry_run=true");
        convert(&legacy, &target, None, &mut report)?;
        return Ok(report);
    }

    let store_dir = cfg.store.dir.clone().unwrap_or_else(|| target.db_dir.clone());
    let mut store = open_store(&store_dir, false)?;
    report.detail(format!("store_dir={}", store_dir.display()));
    let count = convert(
        &legacy,
        &target,
        Some(&mut store as &mut dyn BankStore),
        &mut report,
    )?;
    audit_event(
        &paths,
        &mut report,
        None,
        "ok",
        &format!("properties.converted={count}"),
    );
    Ok(report)
}

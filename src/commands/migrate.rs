use anyhow::Result;
use std::path::PathBuf;

use crate::commands::convert_properties;
use crate::commands::{CommandReport, audit_event, open_store, warn_unknown_env};
use crate::migrate::config::load_config;
use crate::migrate::journal;
use crate::migrate::legacy::{LegacySource, SqliteLegacySource};
use crate::migrate::orchestrator::{self, MigrationContext, MigrationOptions};
use crate::migrate::paths::resolve_paths;
use crate::migrate::settings::{LegacyConfig, TargetConfig, preflight};
use crate::migrate::store::BankStore;

#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    pub config: PathBuf,
    pub oldconfig: PathBuf,
    pub keep_history: bool,
    pub legacy_db: Option<PathBuf>,
    pub banks: Vec<String>,
    pub dry_run: bool,
    pub skip_properties: bool,
}

pub fn run(opts: &MigrateOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let mut report = CommandReport::new("migrate");
    warn_unknown_env(&mut report);

    let legacy = LegacyConfig::load(&opts.oldconfig)?;
    let target = TargetConfig::load(&opts.config)?;
    preflight(&legacy, &target)?;

    let keep_history = opts.keep_history || cfg.migration.keep_history;
    let zone = cfg.zone()?;
    let store_dir = cfg.store.dir.clone().unwrap_or_else(|| target.db_dir.clone());
    let mut store = open_store(&store_dir, opts.dry_run)?;
    report.detail(format!("migrate_home={}", paths.home.display()));
    report.detail(format!("store_dir={}", store_dir.display()));
    report.detail(format!("keep_history={keep_history}"));
    report.detail(format!("legacy_timezone={zone}"));
    if opts.dry_run {
        report.detail("dry_run=true");
    }

    if !opts.skip_properties {
        let registrar: Option<&mut dyn BankStore> = if opts.dry_run {
            None
        } else {
            Some(&mut store as &mut dyn BankStore)
        };
        let mut step = CommandReport::new("convert-properties");
        convert_properties::convert(&legacy, &target, registrar, &mut step)?;
        report.merge(step);
    }
    report.detail(format!("store_banks={}", store.bank_names()?.len()));

    let db_path = legacy.sqlite_path(opts.legacy_db.as_deref())?;
    let source = SqliteLegacySource::open(&db_path)?;
    report.detail(format!("legacy_db={}", db_path.display()));
    report.detail(format!("legacy_schema={}", source.schema_shape().as_str()));

    let journal_file = journal::journal_path(&paths);
    let mut pending = journal::load_from(&journal_file)?;
    let outcome = {
        let mut ctx = MigrationContext {
            source: &source,
            store: &mut store,
            journal: &mut pending,
            journal_file: Some(journal_file.clone()),
            options: MigrationOptions {
                keep_history,
                zone,
                dry_run: opts.dry_run,
                banks: opts.banks.clone(),
            },
        };
        orchestrator::migrate_all(&mut ctx)?
    };

    if !opts.dry_run && !pending.is_empty() {
        report.detail(format!(
            "pending_writes={} journal={}",
            pending.len(),
            journal_file.display()
        ));
    }

    for bank in &outcome.banks {
        report.detail(bank.summary());
        match &bank.error {
            Some(err) => {
                report.issue(format!("bank {} abandoned: {err}", bank.bank));
                if !opts.dry_run {
                    audit_event(&paths, &mut report, Some(&bank.bank), "abandoned", err);
                }
            }
            None if !opts.dry_run => {
                audit_event(&paths, &mut report, Some(&bank.bank), "ok", &bank.summary());
            }
            None => {}
        }
    }
    for unknown in &outcome.unknown_banks {
        report.issue(format!("bank {unknown} not found in legacy database"));
    }
    report.detail(format!(
        "banks={} imported={} abandoned={}",
        outcome.banks.len(),
        outcome.imported(),
        outcome.abandoned().count()
    ));
    Ok(report)
}

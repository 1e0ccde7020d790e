use crate::error::MigrateError;
use crate::migrate::current;
use crate::migrate::journal::{self, PendingWrites};
use crate::migrate::legacy::LegacySource;
use crate::migrate::listing;
use crate::migrate::session::{
    BankSnapshot, ReconstructOptions, Reconstruction, SkipReason, reconstruct,
};
use crate::migrate::store::BankStore;
use crate::migrate::writer::{self, SessionWrite};
use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub keep_history: bool,
    pub zone: Tz,
    pub dry_run: bool,
    /// Restrict the run to these banks. Empty means every bank.
    pub banks: Vec<String>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            keep_history: false,
            zone: Tz::UTC,
            dry_run: false,
            banks: Vec::new(),
        }
    }
}

pub struct MigrationContext<'a> {
    pub source: &'a dyn LegacySource,
    pub store: &'a mut dyn BankStore,
    pub journal: &'a mut PendingWrites,
    /// Where the journal is written after each bank. `None` keeps it in
    /// memory only.
    pub journal_file: Option<PathBuf>,
    pub options: MigrationOptions,
}

impl MigrationContext<'_> {
    fn persist_journal(&self) -> Result<()> {
        if self.options.dry_run {
            return Ok(());
        }
        let Some(file) = &self.journal_file else {
            return Ok(());
        };
        journal::save_to(file, self.journal)
            .with_context(|| format!("failed to persist pending writes to {}", file.display()))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BankReport {
    pub bank: String,
    pub imported: usize,
    pub already_imported: usize,
    pub rejected: usize,
    pub duplicate_releases: usize,
    /// Sessions whose first save failed; nothing was written for them.
    pub failed: usize,
    pub partial_writes: usize,
    pub resumed: usize,
    pub planned: usize,
    pub listings_written: usize,
    pub current: Option<i64>,
    pub error: Option<String>,
}

impl BankReport {
    fn new(bank: &str) -> Self {
        Self {
            bank: bank.to_string(),
            ..Self::default()
        }
    }

    pub fn abandoned(&self) -> bool {
        self.error.is_some()
    }

    pub fn summary(&self) -> String {
        format!(
            "bank={} imported={} already_imported={} rejected={} duplicate_releases={} failed={} partial_writes={} resumed={} planned={} listings={} current={}",
            self.bank,
            self.imported,
            self.already_imported,
            self.rejected,
            self.duplicate_releases,
            self.failed,
            self.partial_writes,
            self.resumed,
            self.planned,
            self.listings_written,
            self.current
                .map(|id| id.to_string())
                .unwrap_or_else(|| "none".to_string()),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub banks: Vec<BankReport>,
    /// Requested with a bank filter but unknown to the legacy database.
    pub unknown_banks: Vec<String>,
}

impl MigrationReport {
    pub fn imported(&self) -> usize {
        self.banks.iter().map(|b| b.imported).sum()
    }

    pub fn abandoned(&self) -> impl Iterator<Item = &BankReport> {
        self.banks.iter().filter(|b| b.abandoned())
    }
}

/// Migrate every selected legacy bank in legacy order. One bank failing
/// never stops the others, and the journal is on disk before the next bank
/// starts.
///
/// Only errors that make the whole run pointless (unreachable stores,
/// unreadable bank list) are returned; anything scoped to one bank ends up in
/// that bank's report.
pub fn migrate_all(ctx: &mut MigrationContext<'_>) -> Result<MigrationReport> {
    let names = ctx
        .source
        .bank_names()
        .context("failed to list legacy banks")?;

    let mut report = MigrationReport {
        dry_run: ctx.options.dry_run,
        ..MigrationReport::default()
    };
    report.unknown_banks = ctx
        .options
        .banks
        .iter()
        .filter(|wanted| !names.contains(wanted))
        .cloned()
        .collect();

    for bank in names {
        if !ctx.options.banks.is_empty() && !ctx.options.banks.contains(&bank) {
            continue;
        }
        info!(bank = %bank, "migrating bank");
        let mut bank_report = BankReport::new(&bank);
        let outcome = migrate_bank(ctx, &bank, &mut bank_report);
        ctx.persist_journal()?;
        if let Err(err) = outcome {
            if err
                .downcast_ref::<MigrateError>()
                .is_some_and(MigrateError::is_fatal)
            {
                return Err(err);
            }
            error!(bank = %bank, error = %format!("{err:#}"), "bank abandoned");
            bank_report.error = Some(format!("{err:#}"));
        }
        report.banks.push(bank_report);
    }
    Ok(report)
}

fn resume_pending(ctx: &mut MigrationContext<'_>, bank: &str, report: &mut BankReport) {
    for write in ctx.journal.take_for_bank(bank) {
        let session_id = write.session_id;
        match writer::apply(&mut *ctx.store, write) {
            Ok(_) => {
                info!(bank, session_id, "resumed stalled session write");
                report.resumed += 1;
            }
            Err(stalled) => {
                warn!(
                    bank,
                    session_id,
                    stage = %stalled.write.stage,
                    error = %format!("{:#}", stalled.error),
                    "stalled session write still failing"
                );
                report.partial_writes += 1;
                ctx.journal.push(stalled.write);
            }
        }
    }
}

pub fn migrate_bank(
    ctx: &mut MigrationContext<'_>,
    bank: &str,
    report: &mut BankReport,
) -> Result<()> {
    if ctx.store.load_bank(bank)?.is_none() {
        return Err(MigrateError::MissingBankDocument(bank.to_string()).into());
    }
    if !ctx.options.dry_run {
        resume_pending(ctx, bank, report);
    }

    let doc = ctx
        .store
        .load_bank(bank)?
        .ok_or_else(|| MigrateError::MissingBankDocument(bank.to_string()))?;
    let mut snapshot = BankSnapshot::from_document(&doc);
    report.current = doc.current;

    let opts = ReconstructOptions {
        keep_history: ctx.options.keep_history,
        zone: ctx.options.zone,
    };
    let result = ctx
        .source
        .productions(bank, opts.keep_history, opts.zone)
        .with_context(|| format!("failed to read legacy productions of `{bank}`"))?;

    for rejection in &result.rejected {
        warn!(
            bank,
            row = rejection.row,
            path = rejection.path.as_deref().unwrap_or("-"),
            error = %rejection.error,
            "legacy row skipped"
        );
        report.rejected += 1;
    }

    for record in &result.records {
        let (session, duplicate_release) = match reconstruct(record, &snapshot, &opts) {
            Ok(Reconstruction::Session {
                session,
                duplicate_release,
            }) => (session, duplicate_release),
            Ok(Reconstruction::Skip {
                session_id,
                reason: SkipReason::AlreadyImported,
            }) => {
                info!(bank, session_id, creation = %record.creation, "session already imported");
                report.already_imported += 1;
                continue;
            }
            Err(error) => {
                warn!(bank, path = %record.path, error = %error, "legacy row skipped");
                report.rejected += 1;
                continue;
            }
        };
        let session_id = session.session_id;

        if duplicate_release {
            warn!(bank, release = %session.release, "production release already imported");
            report.duplicate_releases += 1;
        }

        let prod_path = Path::new(&session.path);
        if ctx.options.dry_run {
            debug!(bank, session_id, release = %session.release, "planned session import");
            report.planned += 1;
            snapshot.record(&session, &result.not_prod);
            if current::marker_path(prod_path).is_some_and(|marker| current::entry_exists(&marker))
            {
                report.current = Some(session_id);
            }
            continue;
        }

        let write = SessionWrite::plan(bank, &session, &result.not_prod);
        match writer::apply(&mut *ctx.store, write) {
            Ok(_) => {
                info!(
                    bank,
                    session_id,
                    legacy_session = record.session_id,
                    release = %session.release,
                    "session imported"
                );
                report.imported += 1;
            }
            Err(stalled) if stalled.is_phase_one() => {
                error!(
                    bank,
                    session_id,
                    error = %format!("{:#}", stalled.error),
                    "session save failed"
                );
                report.failed += 1;
                continue;
            }
            Err(stalled) => {
                let partial = MigrateError::PartialWrite {
                    bank: bank.to_string(),
                    session_id,
                    stage: stalled.write.stage.to_string(),
                    reason: format!("{:#}", stalled.error),
                };
                warn!(bank, session_id, error = %partial, "session write journaled for resume");
                report.partial_writes += 1;
                ctx.journal.push(stalled.write);
            }
        }
        snapshot.record(&session, &result.not_prod);

        report.listings_written += listing::migrate_listings(prod_path)?.len();
        if current::resolve(&mut *ctx.store, bank, prod_path, session_id)? {
            debug!(bank, session_id, "current pointer moved");
            report.current = Some(session_id);
        }
    }
    Ok(())
}

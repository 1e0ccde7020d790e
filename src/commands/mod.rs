pub mod convert_properties;
pub mod inspect;
pub mod migrate;

use crate::error::MigrateError;
use crate::migrate::audit;
use crate::migrate::paths::MigratePaths;
use crate::migrate::store::JsonBankStore;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

/// Audit logging never fails a command; a broken log dir is only reported.
pub fn audit_event(
    paths: &MigratePaths,
    report: &mut CommandReport,
    bank: Option<&str>,
    status: &str,
    message: &str,
) {
    if let Err(err) = audit::append_event(paths, &report.command, bank, status, message) {
        warn!(error = %format!("{err:#}"), "audit log write failed");
        report.detail(format!("audit.write_failed={err:#}"));
    }
}

pub fn warn_unknown_env(report: &mut CommandReport) {
    for key in crate::migrate::config::unknown_env_keys() {
        warn!(key = %key, "unknown BIOMAJ_MIGRATE_ variable ignored");
        report.detail(format!("env.unknown={key}"));
    }
}

/// Open the bank store. A writable store gets its directory created first.
pub fn open_store(dir: &Path, read_only: bool) -> Result<JsonBankStore, MigrateError> {
    if read_only {
        return JsonBankStore::open_read_only(dir);
    }
    fs::create_dir_all(dir)
        .map_err(|err| MigrateError::StoreConnectivity(format!("{}: {err}", dir.display())))?;
    JsonBankStore::open(dir)
}

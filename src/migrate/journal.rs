use crate::migrate::paths::MigratePaths;
use crate::migrate::writer::SessionWrite;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Session writes that stalled after the store accepted them, kept across
/// runs so the next run can finish them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingWrites {
    pub schema_version: u32,
    pub writes: Vec<SessionWrite>,
}

impl Default for PendingWrites {
    fn default() -> Self {
        Self {
            schema_version: 1,
            writes: Vec::new(),
        }
    }
}

impl PendingWrites {
    pub fn push(&mut self, write: SessionWrite) {
        self.writes
            .retain(|w| !(w.bank == write.bank && w.session_id == write.session_id));
        self.writes.push(write);
    }

    /// Remove and return the writes queued for `bank`, oldest first.
    pub fn take_for_bank(&mut self, bank: &str) -> Vec<SessionWrite> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.writes)
            .into_iter()
            .partition(|w| w.bank == bank);
        self.writes = kept;
        taken
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

pub fn journal_path(paths: &MigratePaths) -> PathBuf {
    paths.state_dir.join("pending_writes.json")
}

pub fn load_from(file: &Path) -> Result<PendingWrites> {
    if !file.exists() {
        return Ok(PendingWrites::default());
    }
    let raw =
        fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: PendingWrites = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

/// Write the journal to `file`, or remove `file` once nothing is pending.
pub fn save_to(file: &Path, journal: &PendingWrites) -> Result<()> {
    if journal.is_empty() {
        if file.exists() {
            fs::remove_file(file)
                .with_context(|| format!("failed to remove {}", file.display()))?;
        }
        return Ok(());
    }
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(journal)?;
    fs::write(file, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::session::ReconstructedSession;
    use crate::migrate::writer::WriteStage;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn write(bank: &str, id: i64) -> SessionWrite {
        let session = ReconstructedSession {
            session_id: id,
            release: "1".to_string(),
            remote_release: "1".to_string(),
            prod_dir: "ecoli_1".to_string(),
            path: "/db/ecoli/ecoli_1".to_string(),
            full_size: 0,
            workflow_status: true,
            flow_over: true,
            update: true,
            log_file: None,
            deleted: None,
        };
        let mut planned = SessionWrite::plan(bank, &session, &BTreeSet::new());
        planned.stage = WriteStage::Created;
        planned
    }

    #[test]
    fn take_for_bank_leaves_other_banks_queued() {
        let mut journal = PendingWrites::default();
        journal.push(write("ecoli", 1));
        journal.push(write("alu", 2));
        journal.push(write("ecoli", 3));

        let taken = journal.take_for_bank("ecoli");
        assert_eq!(taken.iter().map(|w| w.session_id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn push_replaces_same_session() {
        let mut journal = PendingWrites::default();
        journal.push(write("ecoli", 1));
        journal.push(write("ecoli", 1));
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn save_and_load_keep_stage() {
        let tmp = tempdir().expect("tempdir");
        let file = journal_path(&MigratePaths::under(tmp.path()));
        let mut journal = PendingWrites::default();
        journal.push(write("ecoli", 7));
        save_to(&file, &journal).expect("save");

        let loaded = load_from(&file).expect("load");
        assert_eq!(loaded.writes.len(), 1);
        assert_eq!(loaded.writes[0].stage, WriteStage::Created);

        save_to(&file, &PendingWrites::default()).expect("clear");
        assert!(!file.exists());
    }
}

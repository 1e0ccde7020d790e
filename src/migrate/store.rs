use crate::error::MigrateError;
use crate::migrate::util::now_epoch_secs;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FLOW_OVER: &str = "over";

const LOCK_FILE: &str = ".migrate.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Update,
}

impl WorkflowKind {
    pub fn action(self) -> &'static str {
        match self {
            Self::Update => "update",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRecord {
    pub id: i64,
    pub action: String,
    pub release: Option<String>,
    pub remoterelease: Option<String>,
    pub prod_dir: Option<String>,
    pub workflow_status: bool,
    pub fullsize: u64,
    pub status: BTreeMap<String, bool>,
    pub update: bool,
    pub last_update_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionEntry {
    pub session: i64,
    pub release: String,
    pub remoterelease: Option<String>,
    pub prod_dir: Option<String>,
    pub size: u64,
    pub freeze: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankDocument {
    pub name: String,
    pub sessions: Vec<SessionRecord>,
    pub production: Vec<ProductionEntry>,
    pub current: Option<i64>,
}

impl BankDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn session(&self, id: i64) -> Option<&SessionRecord> {
        self.sessions.iter().find(|s| s.id == id)
    }

    #[cfg(test)]
    pub fn production_for(&self, session_id: i64) -> Option<&ProductionEntry> {
        self.production.iter().find(|p| p.session == session_id)
    }
}

/// A session being assembled before the first persist.
///
/// Mirrors what the target system's workflow exposes: only these fields can
/// be set before saving. `last_update_time`, `log_file` and `deleted` are
/// patched afterwards through [`SessionPatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub id: i64,
    pub flow: WorkflowKind,
    pub action: String,
    pub release: Option<String>,
    pub remoterelease: Option<String>,
    pub prod_dir: Option<String>,
    pub workflow_status: bool,
    pub fullsize: u64,
    pub status: BTreeMap<String, bool>,
    pub update: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionField {
    ProdDir(String),
    Action(String),
    Release(String),
    RemoteRelease(String),
    WorkflowStatus(bool),
    FullSize(u64),
}

impl WorkflowSession {
    pub fn begin(flow: WorkflowKind, id: i64) -> Self {
        Self {
            id,
            flow,
            action: flow.action().to_string(),
            release: None,
            remoterelease: None,
            prod_dir: None,
            workflow_status: false,
            fullsize: 0,
            status: BTreeMap::new(),
            update: false,
        }
    }

    pub fn set(&mut self, field: SessionField) -> &mut Self {
        match field {
            SessionField::ProdDir(v) => self.prod_dir = Some(v),
            SessionField::Action(v) => self.action = v,
            SessionField::Release(v) => self.release = Some(v),
            SessionField::RemoteRelease(v) => self.remoterelease = Some(v),
            SessionField::WorkflowStatus(v) => self.workflow_status = v,
            SessionField::FullSize(v) => self.fullsize = v,
        }
        self
    }

    pub fn mark_flow_over(&mut self) -> &mut Self {
        self.status.insert(FLOW_OVER.to_string(), true);
        self
    }

    pub fn mark_update(&mut self) -> &mut Self {
        self.update = true;
        self
    }

    pub fn flow_over(&self) -> bool {
        self.status.get(FLOW_OVER).copied().unwrap_or(false)
    }

    fn into_record(self, last_update_time: i64) -> SessionRecord {
        SessionRecord {
            id: self.id,
            action: self.action,
            release: self.release,
            remoterelease: self.remoterelease,
            prod_dir: self.prod_dir,
            workflow_status: self.workflow_status,
            fullsize: self.fullsize,
            status: self.status,
            update: self.update,
            last_update_time,
            log_file: None,
            deleted: None,
        }
    }
}

/// A direct field write on an already persisted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "field", content = "value")]
pub enum SessionPatch {
    LastUpdateTime(i64),
    LogFile(String),
    Deleted(i64),
}

impl SessionPatch {
    pub fn apply(&self, record: &mut SessionRecord) {
        match self {
            Self::LastUpdateTime(v) => record.last_update_time = *v,
            Self::LogFile(v) => record.log_file = Some(v.clone()),
            Self::Deleted(v) => record.deleted = Some(*v),
        }
    }
}

/// The document-store operations the migration relies on.
pub trait BankStore {
    fn bank_names(&self) -> Result<Vec<String>>;

    fn load_bank(&self, bank: &str) -> Result<Option<BankDocument>>;

    /// Create an empty document for `bank` unless one exists. Returns whether
    /// a document was created.
    fn register_bank(&mut self, bank: &str) -> Result<bool>;

    /// Persist a finished workflow session.
    ///
    /// Appends to `sessions` in id order and stamps `last_update_time` with the
    /// wall clock. A finished update also becomes the production entry for its
    /// release, replacing any previous entry with the same release.
    fn save_session(&mut self, bank: &str, session: &WorkflowSession) -> Result<()>;

    fn patch_session(&mut self, bank: &str, session_id: i64, patch: &SessionPatch) -> Result<()>;

    /// Remove the production entry for `session_id`. Returns whether one was
    /// removed; the session itself stays.
    fn pull_production(&mut self, bank: &str, session_id: i64) -> Result<bool>;

    fn set_current(&mut self, bank: &str, session_id: i64) -> Result<()>;
}

pub(crate) fn apply_save(doc: &mut BankDocument, session: &WorkflowSession, now: i64) {
    let record = session.clone().into_record(now);
    let at = doc.sessions.partition_point(|s| s.id < record.id);
    doc.sessions.insert(at, record);

    if !(session.update && session.flow_over()) {
        return;
    }
    let release = session.release.clone().unwrap_or_default();
    let entry = ProductionEntry {
        session: session.id,
        release: release.clone(),
        remoterelease: session.remoterelease.clone(),
        prod_dir: session.prod_dir.clone(),
        size: session.fullsize,
        freeze: false,
    };
    match doc.production.iter_mut().find(|p| p.release == release) {
        Some(existing) => *existing = entry,
        None => doc.production.push(entry),
    }
}

/// One pretty-printed JSON document per bank in a directory.
///
/// A writable handle holds an exclusive lock on the directory for its
/// lifetime, so two migrations cannot interleave writes to the same store.
/// A read-only handle creates nothing and treats a missing directory as an
/// empty store.
#[derive(Debug)]
pub struct JsonBankStore {
    dir: PathBuf,
    read_only: bool,
    _lock: Option<File>,
}

impl JsonBankStore {
    pub fn open(dir: &Path) -> Result<Self, MigrateError> {
        if !dir.is_dir() {
            return Err(MigrateError::StoreConnectivity(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let lock_path = dir.join(LOCK_FILE);
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|err| {
                MigrateError::StoreConnectivity(format!("{}: {err}", lock_path.display()))
            })?;
        lock.try_lock_exclusive().map_err(|_| {
            MigrateError::StoreConnectivity(format!(
                "{} is locked by another migration",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            read_only: false,
            _lock: Some(lock),
        })
    }

    /// Open without writing anything. A shared lock is taken only when a
    /// writer has already left its lock file behind.
    pub fn open_read_only(dir: &Path) -> Result<Self, MigrateError> {
        if dir.exists() && !dir.is_dir() {
            return Err(MigrateError::StoreConnectivity(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let lock_path = dir.join(LOCK_FILE);
        let lock = match File::open(&lock_path) {
            Ok(file) => {
                file.try_lock_shared().map_err(|_| {
                    MigrateError::StoreConnectivity(format!(
                        "{} is locked by another migration",
                        dir.display()
                    ))
                })?;
                Some(file)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                return Err(MigrateError::StoreConnectivity(format!(
                    "{}: {err}",
                    lock_path.display()
                )));
            }
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            read_only: true,
            _lock: lock,
        })
    }

    fn document_path(&self, bank: &str) -> Result<PathBuf> {
        if bank.is_empty()
            || bank.starts_with('.')
            || bank.contains(['/', '\\'])
            || bank.contains('\0')
        {
            anyhow::bail!("invalid bank name `{bank}`");
        }
        Ok(self.dir.join(format!("{bank}.json")))
    }

    fn write_document(&self, doc: &BankDocument) -> Result<()> {
        if self.read_only {
            anyhow::bail!("{} is open read-only", self.dir.display());
        }
        let path = self.document_path(&doc.name)?;
        let data = serde_json::to_string_pretty(doc)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("failed to create temp file in {}", self.dir.display()))?;
        tmp.write_all(format!("{data}\n").as_bytes())?;
        tmp.persist(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn require_bank(&self, bank: &str) -> Result<BankDocument> {
        self.load_bank(bank)?
            .ok_or_else(|| MigrateError::MissingBankDocument(bank.to_string()).into())
    }
}

impl BankStore for JsonBankStore {
    fn bank_names(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let read_dir = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read {}", self.dir.display()))?;
        let mut out = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                out.push(stem.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    fn load_bank(&self, bank: &str) -> Result<Option<BankDocument>> {
        let path = self.document_path(bank)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let doc: BankDocument = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(doc))
    }

    fn register_bank(&mut self, bank: &str) -> Result<bool> {
        if self.load_bank(bank)?.is_some() {
            return Ok(false);
        }
        self.write_document(&BankDocument::new(bank))?;
        Ok(true)
    }

    fn save_session(&mut self, bank: &str, session: &WorkflowSession) -> Result<()> {
        let mut doc = self.require_bank(bank)?;
        apply_save(&mut doc, session, now_epoch_secs()?);
        self.write_document(&doc)
    }

    fn patch_session(&mut self, bank: &str, session_id: i64, patch: &SessionPatch) -> Result<()> {
        let mut doc = self.require_bank(bank)?;
        let Some(record) = doc.sessions.iter_mut().find(|s| s.id == session_id) else {
            return Err(MigrateError::MissingSession {
                bank: bank.to_string(),
                session_id,
            }
            .into());
        };
        patch.apply(record);
        self.write_document(&doc)
    }

    fn pull_production(&mut self, bank: &str, session_id: i64) -> Result<bool> {
        let mut doc = self.require_bank(bank)?;
        let before = doc.production.len();
        doc.production.retain(|p| p.session != session_id);
        if doc.production.len() == before {
            return Ok(false);
        }
        self.write_document(&doc)?;
        Ok(true)
    }

    fn set_current(&mut self, bank: &str, session_id: i64) -> Result<()> {
        let mut doc = self.require_bank(bank)?;
        doc.current = Some(session_id);
        self.write_document(&doc)
    }
}

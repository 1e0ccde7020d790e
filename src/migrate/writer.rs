use crate::migrate::session::ReconstructedSession;
use crate::migrate::store::{BankStore, SessionField, SessionPatch, WorkflowKind, WorkflowSession};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStage {
    Pending,
    Created,
    MetadataCorrected,
    Pruned,
}

impl WriteStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Created => "created",
            Self::MetadataCorrected => "metadata_corrected",
            Self::Pruned => "pruned",
        }
    }
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two-phase persistence of one reconstructed session.
///
/// The store's save stamps `last_update_time` with the wall clock and does
/// not accept `log_file` or `deleted`, so an import is a save, then direct
/// patches, then production pruning. A stalled write keeps its stage and
/// resumes without repeating the save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionWrite {
    pub bank: String,
    pub session_id: i64,
    pub stage: WriteStage,
    pub workflow: WorkflowSession,
    pub corrections: Vec<SessionPatch>,
    pub prune: BTreeSet<i64>,
}

/// A write that could not reach [`WriteStage::Pruned`]. `write.stage` is the
/// last stage that completed.
#[derive(Debug)]
pub struct StalledWrite {
    pub write: SessionWrite,
    pub error: anyhow::Error,
}

impl StalledWrite {
    /// Nothing reached the store; the session simply does not exist.
    pub fn is_phase_one(&self) -> bool {
        self.write.stage == WriteStage::Pending
    }
}

fn workflow_for(session: &ReconstructedSession) -> WorkflowSession {
    let mut workflow = WorkflowSession::begin(WorkflowKind::Update, session.session_id);
    workflow
        .set(SessionField::ProdDir(session.prod_dir.clone()))
        .set(SessionField::Action(WorkflowKind::Update.action().to_string()))
        .set(SessionField::Release(session.release.clone()))
        .set(SessionField::RemoteRelease(session.remote_release.clone()))
        .set(SessionField::WorkflowStatus(session.workflow_status))
        .set(SessionField::FullSize(session.full_size));
    if session.flow_over {
        workflow.mark_flow_over();
    }
    if session.update {
        workflow.mark_update();
    }
    workflow
}

impl SessionWrite {
    /// Plan the full write of `session` into `bank`.
    ///
    /// The legacy log file is only recorded when it still exists on disk.
    pub fn plan(bank: &str, session: &ReconstructedSession, not_prod: &BTreeSet<i64>) -> Self {
        let mut corrections = vec![SessionPatch::LastUpdateTime(session.session_id)];
        if let Some(log_file) = session.log_file.as_deref()
            && Path::new(log_file).exists()
        {
            corrections.push(SessionPatch::LogFile(log_file.to_string()));
        }
        if let Some(deleted) = session.deleted {
            corrections.push(SessionPatch::Deleted(deleted));
        }

        Self {
            bank: bank.to_string(),
            session_id: session.session_id,
            stage: WriteStage::Pending,
            workflow: workflow_for(session),
            corrections,
            prune: not_prod.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stage == WriteStage::Pruned
    }

    /// Perform the next transition. Does nothing once pruned.
    pub fn advance(&mut self, store: &mut dyn BankStore) -> Result<WriteStage> {
        match self.stage {
            WriteStage::Pending => {
                store.save_session(&self.bank, &self.workflow)?;
                self.stage = WriteStage::Created;
            }
            WriteStage::Created => {
                for patch in &self.corrections {
                    store.patch_session(&self.bank, self.session_id, patch)?;
                }
                self.stage = WriteStage::MetadataCorrected;
            }
            WriteStage::MetadataCorrected => {
                self.prune_production(store)?;
                self.stage = WriteStage::Pruned;
            }
            WriteStage::Pruned => {}
        }
        Ok(self.stage)
    }

    fn prune_production(&self, store: &mut dyn BankStore) -> Result<()> {
        if self.prune.is_empty() {
            return Ok(());
        }
        let Some(doc) = store.load_bank(&self.bank)? else {
            return Ok(());
        };
        let stale: Vec<i64> = doc
            .production
            .iter()
            .map(|p| p.session)
            .filter(|id| self.prune.contains(id))
            .collect();
        for session_id in stale {
            store.pull_production(&self.bank, session_id)?;
        }
        Ok(())
    }
}

/// Drive `write` until it is pruned or a transition fails.
pub fn apply(store: &mut dyn BankStore, mut write: SessionWrite) -> Result<SessionWrite, StalledWrite> {
    while !write.is_complete() {
        if let Err(error) = write.advance(store) {
            return Err(StalledWrite { write, error });
        }
    }
    Ok(write)
}

use crate::error::ParseError;
use crate::migrate::legacy::LegacyProductionRecord;
use crate::migrate::store::BankDocument;
use crate::migrate::util::epoch_secs_in;
use chrono_tz::Tz;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static RELEASE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*__(\d+)$").expect("valid release suffix pattern"));

#[derive(Debug, Clone, Copy)]
pub struct ReconstructOptions {
    pub keep_history: bool,
    pub zone: Tz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedSession {
    pub session_id: i64,
    pub release: String,
    pub remote_release: String,
    pub prod_dir: String,
    pub path: String,
    pub full_size: u64,
    pub workflow_status: bool,
    pub flow_over: bool,
    pub update: bool,
    pub log_file: Option<String>,
    pub deleted: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyImported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconstruction {
    Session {
        session: ReconstructedSession,
        /// Another production entry already carries this release. The session
        /// is still imported.
        duplicate_release: bool,
    },
    Skip {
        session_id: i64,
        reason: SkipReason,
    },
}

/// What the reconstructor needs to know about a bank document: the ids it
/// already holds and the releases currently in production.
#[derive(Debug, Clone, Default)]
pub struct BankSnapshot {
    session_ids: BTreeSet<i64>,
    production_releases: BTreeMap<String, i64>,
}

impl BankSnapshot {
    pub fn from_document(doc: &BankDocument) -> Self {
        Self {
            session_ids: doc.sessions.iter().map(|s| s.id).collect(),
            production_releases: doc
                .production
                .iter()
                .map(|p| (p.release.clone(), p.session))
                .collect(),
        }
    }

    pub fn contains_session(&self, id: i64) -> bool {
        self.session_ids.contains(&id)
    }

    pub fn release_in_production(&self, release: &str) -> bool {
        self.production_releases.contains_key(release)
    }

    /// Account for a session this run has written, then for the production
    /// pruning of every id in `not_prod`, the same way the store applies them.
    pub fn record(&mut self, session: &ReconstructedSession, not_prod: &BTreeSet<i64>) {
        self.session_ids.insert(session.session_id);
        if session.update && session.flow_over {
            self.production_releases
                .insert(session.release.clone(), session.session_id);
        }
        self.production_releases.retain(|_, id| !not_prod.contains(id));
    }
}

/// Last path component of a production path. Trailing slashes are ignored.
pub fn release_dir(path: &str) -> Result<&str, ParseError> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|dir| !dir.is_empty())
        .ok_or_else(|| ParseError::ReleaseSuffix(path.to_string()))
}

/// `rel1` in `genomes__3` becomes `rel1__3`; without a `__<digits>` suffix the
/// release is unchanged.
pub fn disambiguate_release(release: &str, dir: &str) -> String {
    match RELEASE_SUFFIX.captures(dir) {
        Some(caps) => format!("{release}__{}", &caps[1]),
        None => release.to_string(),
    }
}

pub fn derive_session_id(record: &LegacyProductionRecord, zone: Tz) -> Result<i64, ParseError> {
    epoch_secs_in(&record.creation, zone)
}

pub fn reconstruct(
    record: &LegacyProductionRecord,
    snapshot: &BankSnapshot,
    opts: &ReconstructOptions,
) -> Result<Reconstruction, ParseError> {
    let session_id = derive_session_id(record, opts.zone)?;
    if snapshot.contains_session(session_id) {
        return Ok(Reconstruction::Skip {
            session_id,
            reason: SkipReason::AlreadyImported,
        });
    }

    let prod_dir = release_dir(&record.path)?;
    let release = disambiguate_release(&record.update_release, prod_dir);
    let duplicate_release = snapshot.release_in_production(&release);

    let deleted = match (opts.keep_history, record.removal.as_ref()) {
        (true, Some(removal)) => Some(epoch_secs_in(removal, opts.zone)?),
        _ => None,
    };

    Ok(Reconstruction::Session {
        session: ReconstructedSession {
            session_id,
            release,
            remote_release: record.update_release.clone(),
            prod_dir: prod_dir.to_string(),
            path: record.path.clone(),
            full_size: record.size_bytes,
            workflow_status: record.workflow_succeeded,
            flow_over: true,
            update: true,
            log_file: record.log_file.clone(),
            deleted,
        },
        duplicate_release,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::store::{ProductionEntry, SessionRecord};
    use crate::migrate::util::parse_legacy_timestamp;

    fn record(path: &str, creation: &str, release: &str) -> LegacyProductionRecord {
        LegacyProductionRecord {
            path: path.to_string(),
            session_id: 42,
            creation: parse_legacy_timestamp(creation).expect("creation"),
            removal: None,
            size_bytes: 100,
            update_release: release.to_string(),
            log_file: None,
            workflow_succeeded: true,
        }
    }

    fn opts(keep_history: bool) -> ReconstructOptions {
        ReconstructOptions {
            keep_history,
            zone: Tz::UTC,
        }
    }

    fn session_of(got: Reconstruction) -> (ReconstructedSession, bool) {
        match got {
            Reconstruction::Session {
                session,
                duplicate_release,
            } => (session, duplicate_release),
            other => panic!("expected a session, got {other:?}"),
        }
    }

    #[test]
    fn numeric_directory_suffix_is_appended_to_release() {
        assert_eq!(disambiguate_release("rel1", "genomes__3"), "rel1__3");
        assert_eq!(disambiguate_release("rel1", "genomes"), "rel1");
        assert_eq!(disambiguate_release("rel1", "genomes__x3"), "rel1");
    }

    #[test]
    fn release_dir_is_last_component() {
        assert_eq!(release_dir("/db/ecoli/ecoli__7"), Ok("ecoli__7"));
        assert_eq!(release_dir("/db/ecoli/ecoli__7/"), Ok("ecoli__7"));
        assert!(release_dir("/").is_err());
    }

    #[test]
    fn session_fields_follow_the_record() {
        let rec = record("/db/ecoli/ecoli__7", "2020-06-01 00:00:00", "2");
        let (session, duplicate) =
            session_of(reconstruct(&rec, &BankSnapshot::default(), &opts(false)).expect("ok"));
        assert!(!duplicate);
        assert_eq!(session.session_id, 1_590_969_600);
        assert_eq!(session.release, "2__7");
        assert_eq!(session.remote_release, "2");
        assert_eq!(session.prod_dir, "ecoli__7");
        assert_eq!(session.full_size, 100);
        assert!(session.flow_over && session.update && session.workflow_status);
        assert_eq!(session.deleted, None);
    }

    #[test]
    fn same_row_always_yields_same_id() {
        let rec = record("/db/ecoli/a", "2020-01-01 00:00:00", "1");
        let first = derive_session_id(&rec, Tz::UTC).expect("id");
        let second = derive_session_id(&rec.clone(), Tz::UTC).expect("id");
        assert_eq!(first, second);
        assert_eq!(first, 1_577_836_800);
    }

    #[test]
    fn existing_session_id_is_skipped() {
        let mut doc = BankDocument::new("ecoli");
        doc.sessions.push(SessionRecord {
            id: 1_577_836_800,
            ..SessionRecord::default()
        });
        let snapshot = BankSnapshot::from_document(&doc);
        let rec = record("/db/ecoli/a", "2020-01-01 00:00:00", "1");
        assert_eq!(
            reconstruct(&rec, &snapshot, &opts(false)).expect("ok"),
            Reconstruction::Skip {
                session_id: 1_577_836_800,
                reason: SkipReason::AlreadyImported,
            }
        );
    }

    #[test]
    fn duplicate_release_only_flags() {
        let mut doc = BankDocument::new("ecoli");
        doc.production.push(ProductionEntry {
            session: 1,
            release: "1".to_string(),
            ..ProductionEntry::default()
        });
        let snapshot = BankSnapshot::from_document(&doc);
        let rec = record("/db/ecoli/a", "2020-01-01 00:00:00", "1");
        let (session, duplicate) =
            session_of(reconstruct(&rec, &snapshot, &opts(false)).expect("ok"));
        assert!(duplicate);
        assert_eq!(session.release, "1");
    }

    #[test]
    fn deletion_time_only_kept_with_history() {
        let mut rec = record("/db/ecoli/a", "2020-01-01 00:00:00", "1");
        rec.removal = Some(parse_legacy_timestamp("2020-02-01 00:00:00").expect("removal"));

        let (without, _) =
            session_of(reconstruct(&rec, &BankSnapshot::default(), &opts(false)).expect("ok"));
        assert_eq!(without.deleted, None);

        let (with, _) =
            session_of(reconstruct(&rec, &BankSnapshot::default(), &opts(true)).expect("ok"));
        assert_eq!(with.deleted, Some(1_580_515_200));
    }

    #[test]
    fn snapshot_tracks_written_sessions() {
        let mut snapshot = BankSnapshot::default();
        let rec = record("/db/ecoli/a", "2020-01-01 00:00:00", "1");
        let (session, _) =
            session_of(reconstruct(&rec, &snapshot, &opts(false)).expect("ok"));
        snapshot.record(&session, &BTreeSet::new());
        assert!(snapshot.contains_session(session.session_id));
        assert!(snapshot.release_in_production("1"));

        let again = reconstruct(&rec, &snapshot, &opts(false)).expect("ok");
        assert!(matches!(again, Reconstruction::Skip { .. }));
    }

    #[test]
    fn pruned_write_frees_its_release() {
        let mut doc = BankDocument::new("ecoli");
        for (session, release) in [(10, "1"), (20, "0")] {
            doc.production.push(ProductionEntry {
                session,
                release: release.to_string(),
                ..ProductionEntry::default()
            });
        }
        let mut snapshot = BankSnapshot::from_document(&doc);

        let removed = record("/db/ecoli/a", "2019-01-01 00:00:00", "1");
        let (session, duplicate) =
            session_of(reconstruct(&removed, &snapshot, &opts(true)).expect("ok"));
        assert!(duplicate);
        let not_prod = BTreeSet::from([session.session_id, 20]);
        snapshot.record(&session, &not_prod);
        assert!(!snapshot.release_in_production("1"));
        assert!(!snapshot.release_in_production("0"));

        let live = record("/db/ecoli/b", "2020-01-01 00:00:00", "1");
        let (_, duplicate) = session_of(reconstruct(&live, &snapshot, &opts(true)).expect("ok"));
        assert!(!duplicate);
    }
}

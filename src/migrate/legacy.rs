use crate::error::{MigrateError, ParseError};
use crate::migrate::util::{epoch_secs_in, parse_human_size, parse_legacy_timestamp};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

const CORE_TABLES: &[&str] = &["bank", "updateBank", "session", "productionDirectory"];

const RICH_QUERY: &str = "SELECT p.path, p.session, p.creation, p.remove, p.size, \
     u.updateRelease, s.logfile, s.status \
     FROM productionDirectory p \
     JOIN updateBank u ON u.idLastSession = p.session \
     JOIN bank b ON b.idbank = p.ref_idbank \
     LEFT JOIN session s ON s.idsession = u.idLastSession \
     WHERE b.name = ?1 AND (?2 = 1 OR p.remove IS NULL) \
     ORDER BY p.creation ASC";

const MINIMAL_QUERY: &str = "SELECT p.path, p.session, p.creation, p.remove, NULL, \
     u.updateRelease, NULL, NULL \
     FROM productionDirectory p \
     JOIN updateBank u ON u.idLastSession = p.session \
     JOIN bank b ON b.idbank = p.ref_idbank \
     WHERE b.name = ?1 AND (?2 = 1 OR p.remove IS NULL) \
     ORDER BY p.creation ASC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaShape {
    Rich,
    Minimal,
}

impl SchemaShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rich => "rich",
            Self::Minimal => "minimal",
        }
    }

    fn query(self) -> &'static str {
        match self {
            Self::Rich => RICH_QUERY,
            Self::Minimal => MINIMAL_QUERY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyProductionRecord {
    pub path: String,
    pub session_id: i64,
    pub creation: NaiveDateTime,
    pub removal: Option<NaiveDateTime>,
    pub size_bytes: u64,
    pub update_release: String,
    pub log_file: Option<String>,
    pub workflow_succeeded: bool,
}

#[derive(Debug, Clone)]
pub struct RowRejection {
    pub row: usize,
    pub path: Option<String>,
    pub error: ParseError,
}

#[derive(Debug, Clone, Default)]
pub struct LegacyQueryResult {
    pub records: Vec<LegacyProductionRecord>,
    pub rejected: Vec<RowRejection>,
    /// Derived session ids of productions the legacy tool marked removed.
    /// Only filled in history mode.
    pub not_prod: BTreeSet<i64>,
}

/// Read side of the legacy relational schema.
///
/// The rich shape carries `size` on `productionDirectory` and
/// `status`/`logfile` on `session`. The minimal one only has paths, sessions,
/// timestamps and releases. Both map onto [`LegacyProductionRecord`].
pub trait LegacySource {
    fn schema_shape(&self) -> SchemaShape;

    /// Legacy bank names in creation order.
    fn bank_names(&self) -> Result<Vec<String>>;

    fn productions(&self, bank: &str, include_history: bool, zone: Tz)
    -> Result<LegacyQueryResult>;
}

/// Untyped view of one query row, before any parsing.
#[derive(Debug)]
struct RawRow {
    path: Option<String>,
    session: Option<i64>,
    creation: Option<String>,
    remove: Option<String>,
    size: Option<String>,
    release: Option<String>,
    logfile: Option<String>,
    status: Option<bool>,
}

fn column_text(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(v) => Some(v.to_string()),
        ValueRef::Real(v) => Some(v.to_string()),
        ValueRef::Text(v) | ValueRef::Blob(v) => Some(String::from_utf8_lossy(v).into_owned()),
    })
}

fn column_i64(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<i64>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(v) => Some(v),
        ValueRef::Text(v) => std::str::from_utf8(v).ok().and_then(|s| s.trim().parse().ok()),
        _ => None,
    })
}

fn column_flag(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<bool>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(v) => Some(v != 0),
        ValueRef::Real(v) => Some(v != 0.0),
        ValueRef::Text(v) | ValueRef::Blob(v) => {
            let text = String::from_utf8_lossy(v).trim().to_ascii_lowercase();
            Some(!(text.is_empty() || text == "0" || text == "false"))
        }
    })
}

fn read_raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        path: column_text(row, 0)?,
        session: column_i64(row, 1)?,
        creation: column_text(row, 2)?,
        remove: column_text(row, 3)?,
        size: column_text(row, 4)?,
        release: column_text(row, 5)?,
        logfile: column_text(row, 6)?,
        status: column_flag(row, 7)?,
    })
}

impl RawRow {
    fn into_record(self) -> Result<LegacyProductionRecord, ParseError> {
        let path = self.path.ok_or(ParseError::MissingValue("path"))?;
        let session_id = self.session.ok_or(ParseError::MissingValue("session"))?;
        let creation = parse_legacy_timestamp(
            self.creation
                .as_deref()
                .ok_or(ParseError::MissingValue("creation"))?,
        )?;
        let removal = self
            .remove
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(parse_legacy_timestamp)
            .transpose()?;
        let size_bytes = match self.size.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_human_size(raw)?,
            _ => 0,
        };
        let update_release = self
            .release
            .ok_or(ParseError::MissingValue("updateRelease"))?;

        Ok(LegacyProductionRecord {
            path,
            session_id,
            creation,
            removal,
            size_bytes,
            update_release,
            log_file: self.logfile.filter(|l| !l.trim().is_empty()),
            workflow_succeeded: self.status.unwrap_or(false),
        })
    }
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.into_iter().map(|n| n.to_ascii_lowercase()).collect())
}

pub fn detect_shape(conn: &Connection) -> Result<SchemaShape, MigrateError> {
    let mut columns = Vec::with_capacity(CORE_TABLES.len());
    for table in CORE_TABLES {
        let cols = table_columns(conn, table)
            .map_err(|err| MigrateError::LegacyConnectivity(format!("{table}: {err}")))?;
        if cols.is_empty() {
            return Err(MigrateError::LegacyConnectivity(format!(
                "legacy table `{table}` is missing"
            )));
        }
        columns.push(cols);
    }
    let production = &columns[3];
    let session = &columns[2];
    if production.contains("size") && session.contains("status") && session.contains("logfile") {
        Ok(SchemaShape::Rich)
    } else {
        Ok(SchemaShape::Minimal)
    }
}

pub struct SqliteLegacySource {
    conn: Connection,
    shape: SchemaShape,
}

impl SqliteLegacySource {
    pub fn open(path: &Path) -> Result<Self, MigrateError> {
        if !path.is_file() {
            return Err(MigrateError::LegacyConnectivity(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| MigrateError::LegacyConnectivity(format!("{}: {err}", path.display())))?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, MigrateError> {
        let shape = detect_shape(&conn)?;
        Ok(Self { conn, shape })
    }
}

impl LegacySource for SqliteLegacySource {
    fn schema_shape(&self) -> SchemaShape {
        self.shape
    }

    fn bank_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM bank ORDER BY idbank ASC, name ASC")
            .context("failed to prepare bank listing")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list legacy banks")?;
        Ok(names)
    }

    fn productions(
        &self,
        bank: &str,
        include_history: bool,
        zone: Tz,
    ) -> Result<LegacyQueryResult> {
        let mut stmt = self
            .conn
            .prepare(self.shape.query())
            .context("failed to prepare production query")?;
        let raw_rows = stmt
            .query_map((bank, include_history), read_raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to query productions of `{bank}`"))?;

        let mut out = LegacyQueryResult::default();
        for (row, raw) in raw_rows.into_iter().enumerate() {
            let path = raw.path.clone();
            let record = match raw.into_record() {
                Ok(record) => record,
                Err(error) => {
                    out.rejected.push(RowRejection { row, path, error });
                    continue;
                }
            };
            if include_history && record.removal.is_some() {
                match epoch_secs_in(&record.creation, zone) {
                    Ok(id) => {
                        out.not_prod.insert(id);
                    }
                    Err(error) => {
                        out.rejected.push(RowRejection { row, path, error });
                        continue;
                    }
                }
            }
            out.records.push(record);
        }
        out.records.sort_by_key(|r| r.creation);
        Ok(out)
    }
}

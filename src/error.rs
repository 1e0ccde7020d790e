use thiserror::Error;

/// Failure to interpret a single legacy row. Scoped to that row: the record is
/// skipped and the bank continues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid timestamp `{0}`")]
    Timestamp(String),
    #[error("timestamp `{value}` does not exist in time zone {zone}")]
    NonexistentLocalTime { value: String, zone: String },
    #[error("invalid size `{0}`")]
    Size(String),
    #[error("cannot derive release directory from path `{0}`")]
    ReleaseSuffix(String),
    #[error("column `{0}` is null")]
    MissingValue(&'static str),
}

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("legacy database unreachable: {0}")]
    LegacyConnectivity(String),
    #[error("bank store unreachable: {0}")]
    StoreConnectivity(String),
    #[error("configuration invalid: {0}")]
    InvalidConfig(String),
    #[error("bank `{0}` has no target document")]
    MissingBankDocument(String),
    #[error("bank `{bank}` has no session {session_id}")]
    MissingSession { bank: String, session_id: i64 },
    #[error("session {session_id} of bank `{bank}` stalled at stage {stage}: {reason}")]
    PartialWrite {
        bank: String,
        session_id: i64,
        stage: String,
        reason: String,
    },
}

impl MigrateError {
    /// Errors that abort the whole run rather than a single bank.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LegacyConnectivity(_) | Self::StoreConnectivity(_) | Self::InvalidConfig(_)
        )
    }
}

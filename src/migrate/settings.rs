use crate::error::MigrateError;
use crate::migrate::properties::{Properties, read_properties, unescape_value};
use std::path::{Path, PathBuf};

const SQLITE_URL_PREFIXES: &[&str] = &["jdbc:sqlite:", "sqlite://", "sqlite:"];

fn required(props: &Properties, key: &str, file: &Path) -> Result<String, MigrateError> {
    props
        .get(key)
        .map(|v| unescape_value(v))
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            MigrateError::InvalidConfig(format!("{} has no `{key}`", file.display()))
        })
}

fn load(file: &Path) -> Result<Properties, MigrateError> {
    read_properties(file).map_err(|err| MigrateError::InvalidConfig(format!("{err:#}")))
}

fn without_trailing_slash(dir: &str) -> &str {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

fn parent_of(dir: &str) -> PathBuf {
    Path::new(without_trailing_slash(dir))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// The legacy tool's `global.properties`.
#[derive(Debug, Clone)]
pub struct LegacyConfig {
    pub file: PathBuf,
    pub properties: Properties,
    pub data_dir: String,
    pub database_url: Option<String>,
}

impl LegacyConfig {
    pub fn load(file: &Path) -> Result<Self, MigrateError> {
        let properties = load(file)?;
        Ok(Self {
            file: file.to_path_buf(),
            data_dir: required(&properties, "data.dir", file)?,
            database_url: properties
                .get("database.url")
                .map(|v| unescape_value(v))
                .filter(|v| !v.trim().is_empty()),
            properties,
        })
    }

    /// Directory holding the bank property files.
    pub fn conf_dir(&self) -> PathBuf {
        self.file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Path of the SQLite export to read. `override_path` wins over
    /// `database.url`.
    pub fn sqlite_path(&self, override_path: Option<&Path>) -> Result<PathBuf, MigrateError> {
        if let Some(path) = override_path {
            return Ok(path.to_path_buf());
        }
        let Some(url) = self.database_url.as_deref() else {
            return Err(MigrateError::InvalidConfig(format!(
                "{} has no `database.url`; pass --legacy-db",
                self.file.display()
            )));
        };
        SQLITE_URL_PREFIXES
            .iter()
            .find_map(|prefix| url.strip_prefix(prefix))
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                MigrateError::InvalidConfig(format!(
                    "database.url `{url}` is not a sqlite url; pass --legacy-db"
                ))
            })
    }
}

/// The new system's `global.properties`.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub file: PathBuf,
    pub conf_dir: PathBuf,
    pub data_dir: String,
    pub db_dir: PathBuf,
}

impl TargetConfig {
    pub fn load(file: &Path) -> Result<Self, MigrateError> {
        let properties = load(file)?;
        let data_dir = required(&properties, "data.dir", file)?;
        let db_dir = match properties.get("db.dir").map(|v| unescape_value(v)) {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => parent_of(&data_dir).join("biomaj-db"),
        };
        Ok(Self {
            file: file.to_path_buf(),
            conf_dir: PathBuf::from(required(&properties, "conf.dir", file)?),
            data_dir,
            db_dir,
        })
    }
}

/// Configuration consistency checks run before any bank is touched.
pub fn preflight(legacy: &LegacyConfig, target: &TargetConfig) -> Result<(), MigrateError> {
    if legacy.file.parent() == target.file.parent() {
        return Err(MigrateError::InvalidConfig(
            "Bank properties use the same directory, please use a different conf.dir"
                .to_string(),
        ));
    }
    if parent_of(&legacy.data_dir) != parent_of(&target.data_dir) {
        return Err(MigrateError::InvalidConfig(format!(
            "Data dirs are different ({} vs {}), please use the same data dirs",
            legacy.data_dir, target.data_dir
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, body: &str) -> PathBuf {
        fs::create_dir_all(dir).expect("mkdir");
        let file = dir.join("global.properties");
        fs::write(&file, body).expect("write");
        file
    }

    #[test]
    fn jdbc_sqlite_url_resolves_to_path() {
        let tmp = tempdir().expect("tempdir");
        let file = write(
            tmp.path(),
            "data.dir=/db/\ndatabase.url=jdbc\\:sqlite\\:/var/biomaj/log.db\n",
        );
        let legacy = LegacyConfig::load(&file).expect("load");
        assert_eq!(
            legacy.sqlite_path(None).expect("path"),
            PathBuf::from("/var/biomaj/log.db")
        );
        assert_eq!(
            legacy.sqlite_path(Some(Path::new("/tmp/x.db"))).expect("override"),
            PathBuf::from("/tmp/x.db")
        );
    }

    #[test]
    fn mysql_url_needs_override() {
        let tmp = tempdir().expect("tempdir");
        let file = write(
            tmp.path(),
            "data.dir=/db\ndatabase.url=jdbc\\:mysql\\://genobdd/biomaj_log\n",
        );
        let legacy = LegacyConfig::load(&file).expect("load");
        assert!(matches!(
            legacy.sqlite_path(None),
            Err(MigrateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn target_db_dir_defaults_beside_data_dir() {
        let tmp = tempdir().expect("tempdir");
        let file = write(tmp.path(), "[GENERAL]\nconf.dir=/etc/biomaj\ndata.dir=/srv/db/\n");
        let target = TargetConfig::load(&file).expect("load");
        assert_eq!(target.db_dir, PathBuf::from("/srv/biomaj-db"));
        assert_eq!(target.conf_dir, PathBuf::from("/etc/biomaj"));
    }

    #[test]
    fn preflight_rejects_shared_config_dir() {
        let tmp = tempdir().expect("tempdir");
        let legacy_file = write(tmp.path(), "data.dir=/srv/db\n");
        let legacy = LegacyConfig::load(&legacy_file).expect("legacy");
        let target = TargetConfig {
            file: tmp.path().join("global.properties"),
            conf_dir: tmp.path().join("conf"),
            data_dir: "/srv/db".to_string(),
            db_dir: tmp.path().join("store"),
        };
        let err = preflight(&legacy, &target).expect_err("same dir");
        assert!(err.to_string().contains("different conf.dir"));
    }

    #[test]
    fn preflight_compares_data_dir_parents() {
        let tmp = tempdir().expect("tempdir");
        let legacy_file = write(&tmp.path().join("old"), "data.dir=/srv/db/\n");
        let legacy = LegacyConfig::load(&legacy_file).expect("legacy");
        let target_file = write(
            &tmp.path().join("new"),
            "conf.dir=/etc/biomaj\ndata.dir=/srv/db3\n",
        );
        let target = TargetConfig::load(&target_file).expect("target");
        assert!(preflight(&legacy, &target).is_ok());

        let moved = write(
            &tmp.path().join("elsewhere"),
            "conf.dir=/etc/biomaj\ndata.dir=/data/db\n",
        );
        let moved = TargetConfig::load(&moved).expect("target");
        assert!(preflight(&legacy, &moved).is_err());
    }
}

use predicates::prelude::*;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

const JUN_2020: i64 = 1_590_969_600;

struct Layout {
    tmp: TempDir,
}

impl Layout {
    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn old_global(&self) -> PathBuf {
        self.root().join("old/global.properties")
    }

    fn new_global(&self) -> PathBuf {
        self.root().join("new/global.properties")
    }

    fn legacy_db(&self) -> PathBuf {
        self.root().join("legacy.db")
    }

    fn store_doc(&self, bank: &str) -> PathBuf {
        self.root().join(format!("biomaj-db/{bank}.json"))
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("biomaj-migrate");
        cmd.current_dir(self.root())
            .env("BIOMAJ_MIGRATE_HOME", self.root().join("home"))
            .env("BIOMAJ_MIGRATE_CONFIG", self.root().join("home/migrate.toml"))
            .env("BIOMAJ_MIGRATE_LEGACY_TZ", "UTC")
            .env_remove("BIOMAJ_MIGRATE_STORE_DIR")
            .env_remove("BIOMAJ_MIGRATE_KEEP_HISTORY");
        cmd
    }
}

fn write_legacy_db(path: &Path, first: &Path, second: &Path) {
    let conn = Connection::open(path).expect("open legacy db");
    conn.execute_batch(
        "CREATE TABLE bank (idbank INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE session (idsession INTEGER PRIMARY KEY, status INTEGER, logfile TEXT);
         CREATE TABLE updateBank (idupdateBank INTEGER PRIMARY KEY, idLastSession INTEGER,
             updateRelease TEXT, ref_idbank INTEGER);
         CREATE TABLE productionDirectory (idproductionDirectory INTEGER PRIMARY KEY,
             path TEXT, session INTEGER, creation TEXT, remove TEXT, size TEXT,
             ref_idbank INTEGER);
         INSERT INTO bank (idbank, name) VALUES (1, 'ecoli');
         INSERT INTO session (idsession, status, logfile) VALUES (1, 1, NULL), (2, 1, NULL);
         INSERT INTO updateBank (idLastSession, updateRelease, ref_idbank)
             VALUES (1, '1', 1), (2, '2', 1);",
    )
    .expect("schema");
    for (session, path, creation) in [
        (1, first, "2020-01-01 00:00:00"),
        (2, second, "2020-06-01 00:00:00"),
    ] {
        conn.execute(
            "INSERT INTO productionDirectory (path, session, creation, size, ref_idbank)
             VALUES (?1, ?2, ?3, '12 MB', 1)",
            (path.display().to_string(), session, creation),
        )
        .expect("production row");
    }
}

fn layout() -> Layout {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path();
    let data = root.join("data");
    let first = data.join("ecoli/ecoli_1");
    let second = data.join("ecoli/ecoli__7");
    fs::create_dir_all(&first).expect("first prod");
    fs::create_dir_all(&second).expect("second prod");
    fs::create_dir_all(data.join("ecoli/current")).expect("current marker");
    fs::write(second.join("listing.rdf"), "\"files\": []").expect("listing");

    fs::create_dir_all(root.join("old")).expect("old conf");
    fs::create_dir_all(root.join("new")).expect("new conf");
    fs::create_dir_all(root.join("biomaj-db")).expect("store");
    fs::write(
        root.join("old/global.properties"),
        format!(
            "data.dir={}/\ndatabase.url=jdbc\\:sqlite\\:{}\n",
            data.display(),
            root.join("legacy.db").display()
        ),
    )
    .expect("old global");
    fs::write(
        root.join("old/ecoli.properties"),
        "* legacy header\ndb.name=ecoli\noffline.dir.name=${db.name}_tmp\nroot=${HOME}\n",
    )
    .expect("bank properties");
    fs::write(
        root.join("new/global.properties"),
        format!(
            "[GENERAL]\nconf.dir={}\ndata.dir={}\n",
            root.join("conf").display(),
            data.display()
        ),
    )
    .expect("new global");

    write_legacy_db(&root.join("legacy.db"), &first, &second);
    Layout { tmp }
}

fn read_doc(path: &Path) -> serde_json::Value {
    let raw = fs::read_to_string(path).expect("bank document");
    serde_json::from_str(&raw).expect("bank json")
}

#[test]
fn migrate_imports_bank_and_is_idempotent() {
    let lay = layout();

    lay.cmd()
        .arg("migrate")
        .arg("-c")
        .arg(lay.new_global())
        .arg("-o")
        .arg(lay.old_global())
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"command\": \"migrate\""))
        .stdout(predicate::str::contains("imported=2"));

    let doc = read_doc(&lay.store_doc("ecoli"));
    assert_eq!(doc["sessions"].as_array().map(Vec::len), Some(2));
    assert_eq!(doc["current"].as_i64(), Some(JUN_2020));
    assert_eq!(doc["production"][1]["release"], "2__7");

    let converted = fs::read_to_string(lay.root().join("conf/ecoli.properties")).expect("conf");
    assert!(converted.starts_with("[GENERAL]\n"));
    assert!(converted.contains("offline.dir.name=%(db.name)s_tmp"));
    assert!(converted.contains("root=${HOME}"));
    assert!(!converted.contains("legacy header"));

    let envelope = fs::read_to_string(lay.root().join("data/ecoli/ecoli__7/listingv1.rdf"))
        .expect("listing envelope");
    assert_eq!(envelope, "{\"files\": [], \"name\": \"rdf\",\"files\": []}");
    assert!(lay.root().join("home/logs/audit.log").exists());

    lay.cmd()
        .arg("migrate")
        .arg("-c")
        .arg(lay.new_global())
        .arg("-o")
        .arg(lay.old_global())
        .assert()
        .success()
        .stdout(predicate::str::contains("already_imported=2"));
    let again = read_doc(&lay.store_doc("ecoli"));
    assert_eq!(again, doc);
}

#[test]
fn migrate_refuses_shared_config_dir() {
    let lay = layout();
    let shared = lay.root().join("old/new_global.properties");
    fs::copy(lay.new_global(), &shared).expect("copy");

    lay.cmd()
        .arg("migrate")
        .arg("-c")
        .arg(&shared)
        .arg("-o")
        .arg(lay.old_global())
        .assert()
        .failure()
        .stderr(predicate::str::contains("different conf.dir"));
    assert!(!lay.store_doc("ecoli").exists());
}

#[test]
fn migrate_fails_when_legacy_db_is_missing() {
    let lay = layout();
    fs::remove_file(lay.legacy_db()).expect("remove db");

    lay.cmd()
        .arg("migrate")
        .arg("-c")
        .arg(lay.new_global())
        .arg("-o")
        .arg(lay.old_global())
        .assert()
        .failure()
        .stderr(predicate::str::contains("legacy database unreachable"));
}

#[test]
fn dry_run_leaves_store_untouched() {
    let lay = layout();

    lay.cmd()
        .arg("migrate")
        .arg("-c")
        .arg(lay.new_global())
        .arg("-o")
        .arg(lay.old_global())
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("dry_run=true"));
    assert!(!lay.store_doc("ecoli").exists());
    assert!(!lay.root().join("biomaj-db/.migrate.lock").exists());
    assert!(!lay.root().join("conf/ecoli.properties").exists());
    assert!(!lay.root().join("home/state/pending_writes.json").exists());
}

#[test]
fn dry_run_without_store_dir_reports_banks_as_abandoned() {
    let lay = layout();
    let store = lay.root().join("biomaj-db");
    fs::remove_dir(&store).expect("remove store");

    lay.cmd()
        .arg("migrate")
        .arg("-c")
        .arg(lay.new_global())
        .arg("-o")
        .arg(lay.old_global())
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("store_banks=0"))
        .stdout(predicate::str::contains("bank ecoli abandoned"));
    assert!(!store.exists());
}

#[test]
fn convert_properties_registers_banks() {
    let lay = layout();

    lay.cmd()
        .arg("convert-properties")
        .arg("-c")
        .arg(lay.new_global())
        .arg("-o")
        .arg(lay.old_global())
        .assert()
        .success()
        .stdout(predicate::str::contains("bank.registered=ecoli"));

    let doc = read_doc(&lay.store_doc("ecoli"));
    assert_eq!(doc["name"], "ecoli");
    assert_eq!(doc["sessions"].as_array().map(Vec::len), Some(0));
}

#[test]
fn inspect_reports_schema_and_counts() {
    let lay = layout();

    lay.cmd()
        .arg("inspect")
        .arg("--legacy-db")
        .arg(lay.legacy_db())
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("schema=rich"))
        .stdout(predicate::str::contains(
            "bank=ecoli live=2 removed=0 rejected=0",
        ));
}

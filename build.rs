use regex::Regex;
use std::collections::BTreeSet;
use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Settings keys appear in the sources as string literals only.
const ENV_KEY_LITERAL: &str = r#""(BIOMAJ_MIGRATE_[A-Z0-9_]+)""#;

fn rust_sources(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn env_keys(files: &[PathBuf]) -> Result<BTreeSet<String>, Box<dyn Error>> {
    let pattern = Regex::new(ENV_KEY_LITERAL)?;
    let mut keys = BTreeSet::new();
    for file in files {
        let source = fs::read_to_string(file)?;
        keys.extend(pattern.captures_iter(&source).map(|caps| caps[1].to_string()));
    }
    Ok(keys)
}

fn render_allowlist(keys: &BTreeSet<String>) -> String {
    let entries: String = keys.iter().map(|key| format!("    {key:?},\n")).collect();
    format!("pub const GENERATED_MIGRATE_ENV_ALLOWLIST: &[&str] = &[\n{entries}];\n")
}

/// Rewrite only on change so dependents are not rebuilt for nothing.
fn write_if_changed(path: &Path, contents: &str) -> std::io::Result<()> {
    if fs::read_to_string(path).is_ok_and(|old| old == contents) {
        return Ok(());
    }
    fs::write(path, contents)
}

fn main() -> Result<(), Box<dyn Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let sources = rust_sources(Path::new("src"))?;
    let keys = env_keys(&sources)?;
    write_if_changed(
        &out_dir.join("migrate_env_allowlist.rs"),
        &render_allowlist(&keys),
    )?;

    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH)?;
    println!(
        "cargo:rustc-env=BUILD_UUID={:x}-{:x}",
        now.as_secs(),
        now.subsec_nanos()
    );
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    for file in &sources {
        println!("cargo:rerun-if-changed={}", file.display());
    }
    Ok(())
}

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static VARIABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z0-9_.\-]+)\}").expect("valid variable pattern")
});

pub type Properties = BTreeMap<String, String>;

/// Parse flat `key=value` lines.
///
/// Only the first `=` splits, so JDBC urls survive. Section headers and
/// comment lines carry no keys.
pub fn parse_properties(raw: &str) -> Properties {
    let mut out = Properties::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with('!')
            || trimmed.starts_with(';')
            || trimmed.starts_with('[')
        {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), value.trim().to_string());
    }
    out
}

pub fn read_properties(path: &Path) -> Result<Properties> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_properties(&raw))
}

/// Undo the `\:` escaping legacy property files apply to urls.
pub fn unescape_value(value: &str) -> String {
    value.replace("\\:", ":").replace("\\=", "=")
}

fn collect_property_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let read_dir =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_property_files(&path, out)?;
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".properties") && name != "global.properties" {
            out.push(path);
        }
    }
    Ok(())
}

/// Every bank property file below `dir`, sorted by path.
pub fn discover_bank_properties(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    collect_property_files(dir, &mut out)?;
    out.sort();
    Ok(out)
}

/// Rewrite one legacy property line into the new syntax.
///
/// `${name}` becomes `%(name)s` only when `name` is a known key; other
/// variables are environment references and stay as they are.
pub fn convert_line(line: &str, global: &Properties, bank: &Properties) -> String {
    let mut converted = line.to_string();
    for caps in VARIABLE_PATTERN.captures_iter(line) {
        let name = &caps[1];
        if global.contains_key(name) || bank.contains_key(name) {
            converted = converted.replace(&format!("${{{name}}}"), &format!("%({name})s"));
        }
    }
    converted.replace("\\\\", "\\").replace("db.source", "depends")
}

pub fn convert_document(raw: &str, global: &Properties) -> String {
    let bank = parse_properties(raw);
    let mut out = String::from("[GENERAL]\n");
    for line in raw.split_inclusive('\n') {
        if line.starts_with('*') || line.starts_with("/*") {
            continue;
        }
        out.push_str(&convert_line(line, global, &bank));
    }
    out
}

#[derive(Debug, Clone)]
pub struct ConvertedBank {
    pub bank: String,
    pub source: PathBuf,
    pub target: PathBuf,
}

pub fn bank_name_for(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim_end_matches(".properties").to_string())
        .filter(|n| !n.is_empty())
}

/// Convert every bank property file under `legacy_dir` into `conf_dir`.
pub fn convert_all(
    legacy_dir: &Path,
    conf_dir: &Path,
    global: &Properties,
    dry_run: bool,
) -> Result<Vec<ConvertedBank>> {
    let files = discover_bank_properties(legacy_dir)?;
    if !dry_run {
        fs::create_dir_all(conf_dir)
            .with_context(|| format!("failed to create {}", conf_dir.display()))?;
    }

    let mut out = Vec::with_capacity(files.len());
    for source in files {
        let (Some(bank), Some(file_name)) = (bank_name_for(&source), source.file_name()) else {
            continue;
        };
        let target = conf_dir.join(file_name);
        if !dry_run {
            let raw = fs::read_to_string(&source)
                .with_context(|| format!("failed to read {}", source.display()))?;
            fs::write(&target, convert_document(&raw, global))
                .with_context(|| format!("failed to write {}", target.display()))?;
        }
        out.push(ConvertedBank {
            bank,
            source,
            target,
        });
    }
    Ok(out)
}

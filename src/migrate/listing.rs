use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const LEGACY_PREFIX: &str = "listing.";
const ENVELOPE_STEM: &str = "listingv1";

/// Wrap a legacy listing body into the versioned envelope.
///
/// The legacy body is an object-body fragment and is inserted as is.
pub fn envelope(name: &str, legacy_body: &[u8]) -> Vec<u8> {
    let mut out = format!("{{\"files\": [], \"name\": \"{name}\",").into_bytes();
    out.extend_from_slice(legacy_body);
    out.push(b'}');
    out
}

/// Final extension of a legacy listing file, dot included. `listing.` has the
/// empty extension `.`.
fn dotted_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
}

/// Write `listingv1<ext>` next to every `listing.<ext>` in `prod_dir`.
///
/// Envelopes are rewritten on every call. A missing directory has no
/// listings.
pub fn migrate_listings(prod_dir: &Path) -> Result<Vec<PathBuf>> {
    if !prod_dir.exists() {
        return Ok(Vec::new());
    }
    let read_dir = fs::read_dir(prod_dir)
        .with_context(|| format!("failed to read {}", prod_dir.display()))?;

    let mut sources = Vec::new();
    for entry in read_dir {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(LEGACY_PREFIX) && path.is_file() {
            sources.push(path);
        }
    }
    sources.sort();

    let mut written = Vec::with_capacity(sources.len());
    for source in sources {
        let Some(ext) = source
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(dotted_extension)
        else {
            continue;
        };
        let body = fs::read(&source)
            .with_context(|| format!("failed to read {}", source.display()))?;
        let target = prod_dir.join(format!("{ENVELOPE_STEM}{ext}"));
        fs::write(&target, envelope(ext.trim_start_matches('.'), &body))
            .with_context(|| format!("failed to write {}", target.display()))?;
        written.push(target);
    }
    Ok(written)
}

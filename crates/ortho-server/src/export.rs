use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::store::is_image_file;

/// Package the given files into an in-memory zip archive. Missing paths and
/// non-image files are skipped with a warning; duplicate basenames keep the
/// first occurrence. Returns the archive bytes and how many files went in.
pub fn build_zip(paths: &[PathBuf]) -> Result<(Vec<u8>, usize)> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let mut seen = HashSet::new();
    let mut added = 0usize;

    for path in paths {
        if !path.is_file() {
            warn!("export: skipping missing file {}", path.display());
            continue;
        }
        if !is_image_file(path) {
            warn!("export: skipping non-image {}", path.display());
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if !seen.insert(name.clone()) {
            continue;
        }
        let bytes =
            std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        writer.start_file(&name, options).context("start zip entry")?;
        writer.write_all(&bytes).context("write zip entry")?;
        added += 1;
    }

    let cursor = writer.finish().context("finalize zip")?;
    Ok((cursor.into_inner(), added))
}

//! CSV output

use anyhow::Context as _;
use serde::Serialize;
use std::path::Path;

/// Write `rows` to `path` after a header row
///
/// The header is written explicitly so an empty extract still produces a
/// readable file.
pub fn write_csv<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(headers)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::debug!(path = %path.display(), rows = rows.len(), "Wrote CSV");
    Ok(())
}

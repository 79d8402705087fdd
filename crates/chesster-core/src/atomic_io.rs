use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

/// Writes text through a sibling temp file and a rename so readers never see a torn file.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let temp_path = prepare_temp_sibling(path)?;
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    commit_temp_sibling(&temp_path, path)
}

/// Copies `source` to `destination` via a temp sibling, creating parent directories.
///
/// The destination only appears once the full copy has landed, so a model store
/// scan never picks up a half-copied artifact.
pub fn copy_file_atomic(source: &Path, destination: &Path) -> Result<u64> {
    if !source.is_file() {
        bail!("copy source '{}' is not a file", source.display());
    }
    let temp_path = prepare_temp_sibling(destination)?;
    let copied = std::fs::copy(source, &temp_path).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            temp_path.display()
        )
    })?;
    commit_temp_sibling(&temp_path, destination)?;
    Ok(copied)
}

fn prepare_temp_sibling(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("chesster");
    Ok(parent_dir.join(format!(
        ".{file_name}.tmp-{}-{}",
        std::process::id(),
        current_unix_timestamp_ms()
    )))
}

fn commit_temp_sibling(temp_path: &Path, path: &Path) -> Result<()> {
    std::fs::rename(temp_path, path).with_context(|| {
        format!(
            "failed to move temporary file {} into place at {}",
            temp_path.display(),
            path.display()
        )
    })
}

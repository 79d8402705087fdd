use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chesster_core::copy_file_atomic;

/// A trained weights file found in a run's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundArtifact {
    pub path: PathBuf,
    /// Matched extension without the leading dot, e.g. `pb.gz`.
    pub extension: String,
    pub modified: SystemTime,
}

/// Returns the most recently modified file in `dir` ending in `.<ext>` for any of `extensions`.
///
/// A missing directory yields `Ok(None)`.
pub fn find_latest_artifact(dir: &Path, extensions: &[String]) -> Result<Option<FoundArtifact>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read {}", dir.display()))
        }
    };

    let mut latest: Option<FoundArtifact> = None;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(extension) = extensions.iter().find(|extension| {
            name.len() > extension.len() + 1 && name.ends_with(&format!(".{extension}"))
        }) else {
            continue;
        };
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let newer = latest.as_ref().map_or(true, |current| {
            (modified, path.as_path()) > (current.modified, current.path.as_path())
        });
        if newer {
            latest = Some(FoundArtifact {
                path,
                extension: extension.clone(),
                modified,
            });
        }
    }
    Ok(latest)
}

/// Destination of a stored artifact: `<store>/<username>_<session_id>.<ext>`.
pub fn stored_artifact_path(
    store_dir: &Path,
    username: &str,
    session_id: &str,
    extension: &str,
) -> PathBuf {
    store_dir.join(format!("{username}_{session_id}.{extension}"))
}

/// Copies `artifact` into the per-user model store and returns the stored path.
pub fn store_artifact(
    artifact: &FoundArtifact,
    store_dir: &Path,
    username: &str,
    session_id: &str,
) -> Result<PathBuf> {
    let destination = stored_artifact_path(store_dir, username, session_id, &artifact.extension);
    let bytes = copy_file_atomic(&artifact.path, &destination)?;
    tracing::info!(
        source = %artifact.path.display(),
        destination = %destination.display(),
        bytes,
        "stored trained model"
    );
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    use super::{find_latest_artifact, store_artifact};

    fn write_with_mtime(path: &Path, content: &str, seconds_ago: u64) {
        std::fs::write(path, content).expect("write artifact");
        let file = std::fs::File::options()
            .write(true)
            .open(path)
            .expect("open artifact");
        file.set_modified(SystemTime::now() - Duration::from_secs(seconds_ago))
            .expect("set mtime");
    }

    fn extensions() -> Vec<String> {
        vec!["pb.gz".to_string()]
    }

    #[test]
    fn functional_latest_artifact_is_chosen_by_modification_time() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_with_mtime(&temp.path().join("maia-step-1000.pb.gz"), "old", 600);
        write_with_mtime(&temp.path().join("maia-step-2000.pb.gz"), "new", 5);
        write_with_mtime(&temp.path().join("events.log"), "noise", 0);
        std::fs::create_dir(temp.path().join("nested.pb.gz")).expect("dir");

        let found = find_latest_artifact(temp.path(), &extensions())
            .expect("scan")
            .expect("artifact");
        assert!(found.path.ends_with("maia-step-2000.pb.gz"));
        assert_eq!(found.extension, "pb.gz");
    }

    #[test]
    fn unit_missing_or_empty_directory_has_no_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(find_latest_artifact(&temp.path().join("absent"), &extensions())
            .expect("missing dir")
            .is_none());
        std::fs::write(temp.path().join(".pb.gz"), "bare extension").expect("write");
        assert!(find_latest_artifact(temp.path(), &extensions())
            .expect("empty dir")
            .is_none());
    }

    #[test]
    fn functional_store_names_artifact_after_user_and_session() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run_models = temp.path().join("run").join("models");
        std::fs::create_dir_all(&run_models).expect("mkdir");
        write_with_mtime(&run_models.join("final.pb.gz"), "weights", 0);
        let found = find_latest_artifact(&run_models, &extensions())
            .expect("scan")
            .expect("artifact");

        let store = temp.path().join("store");
        let stored = store_artifact(&found, &store, "magnus", "1760000000000").expect("store");
        assert_eq!(stored, store.join("magnus_1760000000000.pb.gz"));
        assert_eq!(std::fs::read_to_string(stored).expect("read"), "weights");
    }
}

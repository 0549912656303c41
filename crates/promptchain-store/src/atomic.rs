//! Atomic file writes: write to a temp file in the target directory, fsync,
//! then atomically rename into place — with a cross-filesystem fallback.
//!
//! Every artifact the engine persists goes through here. Nothing in the
//! store ever opens a target path for writing directly.

use camino::Utf8Path;
use promptchain_error::PromptChainError;
use std::fs;
use std::io::{self, Write};

use tempfile::NamedTempFile;

/// Write `contents` to `path` atomically, creating parent directories as
/// needed.
pub fn write_atomic(path: &Utf8Path, contents: &[u8]) -> Result<(), PromptChainError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    let temp_path = temp.path().to_path_buf();
    match temp.persist(path.as_std_path()) {
        Ok(_) => Ok(()),
        Err(err) if is_cross_filesystem_error(&err.error) => {
            cross_filesystem_copy(&temp_path, path)
        }
        Err(err) => Err(PromptChainError::Filesystem(err.error)),
    }
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: serde::Serialize>(
    path: &Utf8Path,
    value: &T,
) -> Result<(), PromptChainError> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    write_atomic(path, &body)
}

/// Append one line to an append-only log file (`run.log`). Not itself
/// rename-atomic — the log is a stream, not a point-in-time artifact — but
/// each write is a single `O_APPEND` call.
pub fn append_line(path: &Utf8Path, line: &str) -> Result<(), PromptChainError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(unix)]
fn is_cross_filesystem_error(err: &io::Error) -> bool {
    err.raw_os_error() == Some(18) // EXDEV
}

#[cfg(not(unix))]
fn is_cross_filesystem_error(_err: &io::Error) -> bool {
    false
}

fn cross_filesystem_copy(temp_path: &std::path::Path, target: &Utf8Path) -> Result<(), PromptChainError> {
    let content = fs::read(temp_path)?;
    let dir = target.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut target_temp = NamedTempFile::new_in(dir)?;
    target_temp.write_all(&content)?;
    target_temp.as_file().sync_all()?;
    target_temp
        .persist(target.as_std_path())
        .map_err(|e| PromptChainError::Filesystem(e.error))?;
    let _ = fs::remove_file(temp_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_creates_parents_and_content() {
        let dir = TempDir::new().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("a/b/c.txt");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(path.as_std_path()).unwrap(), "hello");
    }

    #[test]
    fn write_atomic_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("f.txt");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(path.as_std_path()).unwrap(), "two");
    }

    #[test]
    fn append_line_appends_across_calls() {
        let dir = TempDir::new().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("run.log");
        append_line(&path, "first").unwrap();
        append_line(&path, "second").unwrap();
        let content = fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }
}

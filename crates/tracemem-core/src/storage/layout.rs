use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::CoreError;
use crate::model::SessionId;

pub const SESSIONS_DIR: &str = "sessions";
pub const PATTERNS_DIR: &str = "patterns";
pub const SESSION_FILE: &str = "session.json";
pub const TRACE_FILE: &str = "trace.log";
pub const WRITER_LOCK_FILE: &str = "writer.lock";
pub const CONSOLIDATION_FILE: &str = "consolidation.json";
pub const PATTERNS_FILE: &str = "patterns.json";
pub const PATTERNS_LOCK_FILE: &str = "patterns.lock";

/// On-disk layout of a tracemem root directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    pub fn patterns_dir(&self) -> PathBuf {
        self.root.join(PATTERNS_DIR)
    }

    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.sessions_dir().join(id.as_str())
    }

    pub fn session_file(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(SESSION_FILE)
    }

    pub fn trace_file(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(TRACE_FILE)
    }

    pub fn writer_lock_file(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(WRITER_LOCK_FILE)
    }

    pub fn consolidation_file(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(CONSOLIDATION_FILE)
    }

    pub fn patterns_file(&self) -> PathBuf {
        self.patterns_dir().join(PATTERNS_FILE)
    }

    pub fn patterns_lock_file(&self) -> PathBuf {
        self.patterns_dir().join(PATTERNS_LOCK_FILE)
    }

    /// Create the top-level directories.
    pub fn ensure(&self) -> Result<(), CoreError> {
        fs::create_dir_all(self.sessions_dir())?;
        fs::create_dir_all(self.patterns_dir())?;
        Ok(())
    }
}

/// Replace `path` with the JSON encoding of `value`. Readers see either the
/// old or the new content, never a mix.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("{} has no parent", path.display())))?;
    let json = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir);
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CoreError> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Best-effort fsync of a directory so a rename inside it is durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(d) = fs::File::open(dir) {
        let _ = d.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/data");
        let id = SessionId::parse("s1").unwrap();
        assert_eq!(layout.trace_file(&id), PathBuf::from("/data/sessions/s1/trace.log"));
        assert_eq!(layout.patterns_file(), PathBuf::from("/data/patterns/patterns.json"));
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("value.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        write_json_atomic(&path, &vec![4]).unwrap();
        let value: Vec<u32> = read_json(&path).unwrap();
        assert_eq!(value, vec![4]);
        // No stray temp files left behind.
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }
}

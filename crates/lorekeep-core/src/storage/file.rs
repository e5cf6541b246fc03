//! Local-directory backend: one `<key>.json` file per document.

use super::{Backend, StorageError, read_or_absent, validate_key};
use crate::lock::StoreLock;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCK_FILE: &str = ".store.lock";
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Stores documents as pretty-printed JSON files under a data directory.
///
/// Writes go to a sibling temp file and are renamed into place while holding
/// an exclusive advisory lock.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn doc_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn io_err(path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn lock(&self) -> Result<StoreLock, StorageError> {
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_err(&self.dir, e))?;
        Ok(StoreLock::acquire(&self.dir.join(LOCK_FILE), LOCK_TIMEOUT)?)
    }

    /// Temp file and rename. The caller holds the lock.
    fn write_locked(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let path = self.doc_path(key)?;
        let body = serde_json::to_string_pretty(value)?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        {
            let mut file = fs::File::create(&tmp).map_err(|e| Self::io_err(&tmp, e))?;
            file.write_all(body.as_bytes())
                .and_then(|()| file.write_all(b"\n"))
                .and_then(|()| file.sync_all())
                .map_err(|e| Self::io_err(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| Self::io_err(&path, e))
    }
}

impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let path = self.doc_path(key)?;
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::io_err(&path, err)),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.doc_path(key)?;
        let _lock = self.lock()?;
        self.write_locked(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.doc_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_err(&path, err)),
        }
    }

    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.doc_path(key)?.is_file())
    }

    fn read_modify_write(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Result<Option<Value>, StorageError>,
    ) -> Result<(), StorageError> {
        self.doc_path(key)?;
        let _lock = self.lock()?;
        let current = read_or_absent(self, key)?;
        if let Some(next) = f(current)? {
            self.write_locked(key, &next)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.write("changelog", &json!({"entries": []})).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with(".store"))
            .collect();
        assert_eq!(names, vec!["changelog.json".to_string()]);
    }

    #[test]
    fn write_creates_missing_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let backend = FileBackend::new(&nested);
        backend.write("agent-state", &json!({"status": "idle"})).unwrap();
        assert_eq!(
            backend.read("agent-state").unwrap(),
            Some(json!({"status": "idle"}))
        );
    }

    #[test]
    fn read_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(backend.read("nothing-here").unwrap().is_none());
        assert!(!backend.contains("nothing-here").unwrap());
    }
}

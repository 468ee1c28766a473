use crate::correlation::CorrelationId;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive file {0} already exists")]
    AlreadyExists(PathBuf),
    #[error("cannot write archive file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Keeps raw copies of held or problematic messages, one file per correlation id.
#[derive(Debug, Clone)]
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &CorrelationId) -> PathBuf {
        self.dir.join(id.as_str())
    }

    /// Write `data` verbatim. An existing file with the same name is left untouched.
    pub fn store(&self, id: &CorrelationId, data: &[u8]) -> Result<PathBuf, ArchiveError> {
        let path = self.path_for(id);
        let io_err = |source| ArchiveError::Io {
            path: path.clone(),
            source,
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArchiveError::AlreadyExists(path.clone()));
            }
            Err(e) => return Err(io_err(e)),
        };
        file.write_all(data).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_writes_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        let id = CorrelationId::generate();
        let raw = b"From: a@corp.example\r\n\r\n\xffbinary body";

        let path = archive.store(&id, raw).unwrap();
        assert_eq!(path, dir.path().join(id.as_str()));
        assert_eq!(std::fs::read(&path).unwrap(), raw);
    }

    #[test]
    fn test_store_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        let id = CorrelationId::generate();

        archive.store(&id, b"first").unwrap();
        let err = archive.store(&id, b"second").unwrap_err();
        assert!(matches!(err, ArchiveError::AlreadyExists(_)));
        assert_eq!(std::fs::read(archive.path_for(&id)).unwrap(), b"first");
    }

    #[test]
    fn test_store_into_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path().join("does-not-exist"));
        let err = archive
            .store(&CorrelationId::generate(), b"data")
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }
}

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The raw text of a book, read once from disk.
#[derive(Debug, Clone)]
pub struct BookSource {
    pub path: PathBuf,
    pub text: String,
    /// Size of the source file in bytes.
    pub size: u64,
}

impl BookSource {
    /// Read a book file. Missing, unreadable or non UTF-8 files are all
    /// reported as [`Error::SourceNotFound`].
    pub fn read(path: &Path) -> Result<Self> {
        let not_found = |reason: String| Error::SourceNotFound {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_file() {
            return Err(not_found("no such file".into()));
        }
        let bytes = std::fs::read(path).map_err(|e| not_found(e.to_string()))?;
        let size = bytes.len() as u64;
        let text = String::from_utf8(bytes)
            .map_err(|e| not_found(format!("invalid UTF-8: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            text,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_utf8_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("book.txt");
        std::fs::write(&path, "Hello world").unwrap();

        let source = BookSource::read(&path).unwrap();
        assert_eq!(source.text, "Hello world");
        assert_eq!(source.size, 11);
    }

    #[test]
    fn missing_file_is_source_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = BookSource::read(&tmp.path().join("ghost.txt")).unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));
    }

    #[test]
    fn directory_is_source_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = BookSource::read(tmp.path()).unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));
    }

    #[test]
    fn malformed_bytes_are_source_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("latin1.txt");
        std::fs::write(&path, [0x48, 0x69, 0xff, 0xfe]).unwrap();

        let err = BookSource::read(&path).unwrap_err();
        match err {
            Error::SourceNotFound { reason, .. } => {
                assert!(reason.contains("UTF-8"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

use std::path::{Path, PathBuf};

use globset::GlobMatcher;

use crate::error::Result;

/// A book file found under a directory.
#[derive(Debug, Clone)]
pub struct DiscoveredBook {
    /// Path relative to the directory that was walked.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

impl DiscoveredBook {
    /// File name without extension, e.g. `the_hobbit` for `the_hobbit.txt`.
    pub fn stem(&self) -> String {
        self.relative_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

const BOOK_EXTENSION: &str = "txt";

/// Recursively walk a directory and discover plain-text books.
///
/// Skips hidden files/directories (names starting with `.`). When a filter
/// is given, only files whose relative path matches it are returned.
pub fn discover_books(
    root: &Path,
    filter: Option<&GlobMatcher>,
) -> Result<Vec<DiscoveredBook>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    if let Some(filter) = filter {
        results.retain(|book| filter.is_match(&book.relative_path));
    }
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredBook>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(root, &entry.path(), results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = entry.path().canonicalize() else {
                continue;
            };
            // Directory links are not followed.
            if resolved.is_file() && is_book(&resolved) {
                results.push(discovered(root, &entry.path(), resolved));
            }
        } else if file_type.is_file() && is_book(&entry.path()) {
            let absolute = entry.path().canonicalize()?;
            results.push(discovered(root, &entry.path(), absolute));
        }
    }
    Ok(())
}

fn is_book(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(BOOK_EXTENSION))
}

fn discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: PathBuf,
) -> DiscoveredBook {
    DiscoveredBook {
        relative_path: original_path
            .strip_prefix(root)
            .unwrap_or(original_path)
            .to_path_buf(),
        absolute_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(books: &[DiscoveredBook]) -> Vec<String> {
        books
            .iter()
            .map(|b| b.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn discovers_txt_only() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("dracula.txt"), "Hello").unwrap();
        std::fs::write(tmp.path().join("LOUD.TXT"), "Hello").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("cover.png"), "binary").unwrap();

        let books = discover_books(tmp.path(), None).unwrap();
        assert_eq!(names(&books), vec!["LOUD.TXT", "dracula.txt"]);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".cache");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("old.txt"), "old").unwrap();
        std::fs::write(tmp.path().join(".draft.txt"), "draft").unwrap();
        std::fs::write(tmp.path().join("emma.txt"), "emma").unwrap();

        let books = discover_books(tmp.path(), None).unwrap();
        assert_eq!(names(&books), vec!["emma.txt"]);
    }

    #[test]
    fn recurses_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("austen");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("persuasion.txt"), "p").unwrap();
        std::fs::write(tmp.path().join("beowulf.txt"), "b").unwrap();

        let books = discover_books(tmp.path(), None).unwrap();
        assert_eq!(names(&books), vec!["austen/persuasion.txt", "beowulf.txt"]);
        assert_eq!(books[0].stem(), "persuasion");
        assert!(books[0].absolute_path.is_absolute());
    }

    #[test]
    fn filter_matches_relative_path() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("austen");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("emma.txt"), "e").unwrap();
        std::fs::write(tmp.path().join("beowulf.txt"), "b").unwrap();

        let filter = globset::Glob::new("austen/*").unwrap().compile_matcher();
        let books = discover_books(tmp.path(), Some(&filter)).unwrap();
        assert_eq!(names(&books), vec!["austen/emma.txt"]);
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_books(tmp.path(), None).unwrap().is_empty());
    }
}

//! Turning book sources into stored occurrences.
//!
//! A book is ingested in a single write transaction: the book row, every
//! new dictionary word and every occurrence are committed together or not
//! at all. Observers of [`Event::BookInserted`] are notified once, after the
//! commit.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use globset::GlobMatcher;
use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    grammar,
    index::{self, Appearance, Book, Dictionary, Index, OccurrenceTables},
    observers::Event,
    source::BookSource,
    tokenizer::Tokenizer,
    walker::{self, DiscoveredBook},
};

/// Shared flag used to stop a running ingestion between two source lines.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What to ingest.
#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl NewBook {
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            path: path.into(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a directory ingestion.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub ingested: Vec<Book>,
    pub failed: Vec<(PathBuf, Error)>,
}

impl Index {
    /// Validate, tokenize and store one book.
    ///
    /// Fails with `InvalidInput` when the title or author is not title-cased
    /// grammar words, `SourceNotFound` when the file cannot be read as UTF-8
    /// text, and `Duplicate` when a book with the same title and author is
    /// already stored. No state is changed on failure.
    pub fn ingest_book(&self, book: &NewBook) -> Result<Book> {
        self.ingest_book_with_cancel(book, &CancelFlag::new())
    }

    pub fn ingest_book_with_cancel(
        &self,
        book: &NewBook,
        cancel: &CancelFlag,
    ) -> Result<Book> {
        let title = grammar::validate_title("title", &book.title)?;
        let author = grammar::validate_title("author", &book.author)?;
        let source = BookSource::read(&book.path)?;
        self.store_book(&title, &author, &source, book.created_at, &|| {
            cancel.is_cancelled()
        })
    }

    /// Ingest every `.txt` file under `root`. Titles are the title-cased file
    /// stems; every book gets the same `author`.
    ///
    /// Sources are read in parallel and committed one book per transaction.
    /// A failing file is reported in [`BatchReport::failed`] and does not
    /// stop the batch; cancellation does.
    pub fn ingest_dir(
        &self,
        root: &Path,
        author: &str,
        filter: Option<&GlobMatcher>,
        cancel: &CancelFlag,
    ) -> Result<BatchReport> {
        let author = grammar::validate_title("author", author)?;
        let found = walker::discover_books(root, filter)?;
        tracing::debug!(root = %root.display(), files = found.len(), "discovered books");

        let loaded: Vec<_> = found
            .par_iter()
            .map(|file| (file.absolute_path.clone(), load_discovered(file)))
            .collect();

        let mut report = BatchReport::default();
        for (path, loaded) in loaded {
            let result = loaded.and_then(|(title, source)| {
                self.store_book(&title, &author, &source, Utc::now(), &|| {
                    cancel.is_cancelled()
                })
            });
            match result {
                Ok(book) => report.ingested.push(book),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping book");
                    report.failed.push((path, e));
                }
            }
        }

        tracing::info!(
            ingested = report.ingested.len(),
            failed = report.failed.len(),
            "directory ingestion finished"
        );
        Ok(report)
    }

    /// `should_stop` is polled once up front and then each time the
    /// tokenizer starts a new source line.
    fn store_book(
        &self,
        title: &str,
        author: &str,
        source: &BookSource,
        created_at: DateTime<Utc>,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<Book> {
        if should_stop() {
            return Err(Error::Cancelled);
        }

        let txn = self.db.begin_write()?;
        let (book, words, learned) = {
            let mut dictionary = Dictionary::open(&txn, &self.cache)?;
            let book = index::insert_book_row(
                &txn,
                &mut dictionary,
                title,
                author,
                &source.path,
                source.size,
                created_at,
            )?;
            let mut occurrences = OccurrenceTables::open(&txn)?;

            let mut tokenizer = Tokenizer::new(&source.text);
            let mut polled_line = 0;
            let mut words = 0u64;
            while let Some(occurrence) = tokenizer.next() {
                if tokenizer.lines_read() != polled_line {
                    polled_line = tokenizer.lines_read();
                    if should_stop() {
                        tracing::debug!(title, line = polled_line, "ingestion cancelled");
                        return Err(Error::Cancelled);
                    }
                }

                let word_id = dictionary.intern(&occurrence.word)?;
                occurrences.insert(&Appearance {
                    book_id: book.id,
                    word_id,
                    word_index: occurrence.word_index,
                    paragraph: occurrence.paragraph,
                    line: occurrence.line,
                    line_index: occurrence.line_index,
                    line_offset: occurrence.line_offset,
                    sentence: occurrence.sentence,
                    sentence_index: occurrence.sentence_index,
                    length: grammar::word_length(&occurrence.word),
                })?;
                words = occurrence.word_index;
            }
            (book, words, dictionary.into_learned())
        };
        txn.commit()?;
        self.remember_words(learned);

        tracing::info!(
            book_id = book.id,
            title = %book.title,
            author = %book.author,
            words,
            "ingested book"
        );
        self.notify(Event::BookInserted, book.id);
        Ok(book)
    }
}

/// Title for a book file: the stem with `_` and `-` read as spaces, then
/// title-cased.
pub fn title_from_stem(stem: &str) -> String {
    let spaced: String = stem
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect();
    let words: Vec<&str> = spaced.split_whitespace().collect();
    grammar::title_case(&words.join(" "))
}

fn load_discovered(file: &DiscoveredBook) -> Result<(String, BookSource)> {
    let title = grammar::validate_title("title", &title_from_stem(&file.stem()))?;
    let source = BookSource::read(&file.absolute_path)?;
    Ok((title, source))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use redb::ReadableTable;

    use super::*;
    use crate::query::AppearanceQuery;

    struct Fixture {
        tmp: tempfile::TempDir,
        index: Index,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let index = Index::open(&tmp.path().join("index.redb")).unwrap();
            Self { tmp, index }
        }

        fn write(&self, name: &str, text: &str) -> PathBuf {
            let path = self.tmp.path().join(name);
            std::fs::write(&path, text).unwrap();
            path
        }
    }

    #[test]
    fn ingest_stores_every_occurrence() {
        let fx = Fixture::new();
        let path = fx.write("hobbit.txt", "In a hole.\n\nThere lived a hobbit.");
        let book = fx
            .index
            .ingest_book(&NewBook::new("The Hobbit", "J R R Tolkien", &path))
            .unwrap();

        assert_eq!(book.full_name(), "The Hobbit by J R R Tolkien");
        assert_eq!(book.size, 33);

        let words = fx.index.book_words_in_order(book.id).unwrap();
        assert_eq!(words.len(), 7);
        for (i, w) in words.iter().enumerate() {
            assert_eq!(w.word_index, i as u64 + 1);
        }
        let a = fx.index.word_id("a").unwrap().unwrap();
        assert_eq!(words[1].word_id, a);
        assert_eq!(words[5].word_id, a);
        assert_eq!(words[3].paragraph, 2);
        assert_eq!(words[3].sentence, 2);
    }

    #[test]
    fn lower_case_title_is_rejected() {
        let fx = Fixture::new();
        let path = fx.write("lotr.txt", "One ring");

        let err = fx
            .index
            .ingest_book(&NewBook::new("the lord of the rings", "Tolkien", &path))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { kind: "title", .. }));

        fx.index
            .ingest_book(&NewBook::new("The Lord Of The Rings", "Tolkien", &path))
            .unwrap();
    }

    #[test]
    fn missing_source_is_reported() {
        let fx = Fixture::new();
        let err = fx
            .index
            .ingest_book(&NewBook::new("Ghost", "Nobody", fx.tmp.path().join("no.txt")))
            .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));
        assert!(fx.index.all_books().unwrap().is_empty());
    }

    #[test]
    fn duplicate_book_leaves_no_trace() {
        let fx = Fixture::new();
        let first = fx.write("a.txt", "common words");
        let second = fx.write("b.txt", "entirely novel vocabulary");

        fx.index
            .ingest_book(&NewBook::new("Twice", "Someone", &first))
            .unwrap();
        let err = fx
            .index
            .ingest_book(&NewBook::new("Twice", "Someone", &second))
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { kind: "book", .. }));

        assert_eq!(fx.index.all_books().unwrap().len(), 1);
        assert_eq!(fx.index.word_id("novel").unwrap(), None);
        assert_eq!(fx.index.all_words().unwrap().len(), 2);
    }

    #[test]
    fn same_title_different_author_is_fine() {
        let fx = Fixture::new();
        let path = fx.write("poems.txt", "verse");
        fx.index
            .ingest_book(&NewBook::new("Poems", "Keats", &path))
            .unwrap();
        fx.index
            .ingest_book(&NewBook::new("Poems", "Shelley", &path))
            .unwrap();
        assert_eq!(fx.index.all_books().unwrap().len(), 2);
    }

    #[test]
    fn cancelled_ingestion_commits_nothing() {
        let fx = Fixture::new();
        let path = fx.write("long.txt", "line one\nline two\nline three");
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = fx
            .index
            .ingest_book_with_cancel(&NewBook::new("Long", "Writer", &path), &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(fx.index.all_books().unwrap().is_empty());
        assert!(fx.index.all_words().unwrap().is_empty());
    }

    #[test]
    fn cancel_between_lines_rolls_back_partial_book() {
        let fx = Fixture::new();
        let path = fx.write("long.txt", "one two\nthree four\nfive six\n");
        let source = BookSource::read(&path).unwrap();

        // Stop on the third poll: after the first line has been stored.
        let polls = AtomicUsize::new(0);
        let err = fx
            .index
            .store_book("Long", "Writer", &source, Utc::now(), &|| {
                polls.fetch_add(1, Ordering::SeqCst) + 1 >= 3
            })
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert!(fx.index.all_books().unwrap().is_empty());
        assert!(fx.index.all_words().unwrap().is_empty());
        assert_eq!(fx.index.word_id("one").unwrap(), None);
        assert!(
            fx.index
                .search_word_appearances(&AppearanceQuery::new())
                .unwrap()
                .is_empty()
        );

        let book = fx
            .index
            .ingest_book(&NewBook::new("Long", "Writer", &path))
            .unwrap();
        assert_eq!(book.id, 1);
        assert_eq!(fx.index.book_words_in_order(book.id).unwrap().len(), 6);
    }

    /// Two-letter title-cased label, e.g. 27 -> "Bb".
    fn label(i: usize) -> String {
        let first = (b'A' + (i / 26) as u8) as char;
        let second = (b'a' + (i % 26) as u8) as char;
        format!("{first}{second}")
    }

    /// Every stored occurrence in one read snapshot, resolved to its word
    /// name. Unknown ids come back as `None`.
    fn resolved_books(target: &Index) -> Vec<(Book, Vec<Option<String>>)> {
        let txn = target.begin_read().unwrap();
        let words = txn.open_table(index::WORDS).unwrap();
        index::all_books_in(&txn)
            .unwrap()
            .into_iter()
            .map(|book| {
                let names = index::book_appearances(&txn, book.id)
                    .unwrap()
                    .iter()
                    .map(|a| words.get(a.word_id).unwrap().map(|v| v.value().to_string()))
                    .collect();
                (book, names)
            })
            .collect()
    }

    #[test]
    fn concurrent_ingestion_shares_the_dictionary() {
        let fx = Fixture::new();
        let path = fx.write("common.txt", "the quick fox\nthe lazy dog\n");

        std::thread::scope(|scope| {
            for t in 0..4 {
                let index = &fx.index;
                let path = &path;
                scope.spawn(move || {
                    for b in 0..5 {
                        let title = format!("Tale {}", label(t * 5 + b));
                        index
                            .ingest_book(&NewBook::new(title, "Many Hands", path))
                            .unwrap();
                    }
                });
            }
        });

        let books = resolved_books(&fx.index);
        assert_eq!(books.len(), 20);
        for (_, names) in &books {
            let names: Vec<_> = names.iter().map(|n| n.as_deref()).collect();
            assert_eq!(
                names,
                vec![
                    Some("the"),
                    Some("quick"),
                    Some("fox"),
                    Some("the"),
                    Some("lazy"),
                    Some("dog")
                ]
            );
        }
        assert_eq!(fx.index.all_words().unwrap().len(), 5);
    }

    #[test]
    fn reset_during_ingestion_leaves_no_stale_ids() {
        struct StopOnDrop<'a>(&'a AtomicBool);

        impl Drop for StopOnDrop<'_> {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let fx = Fixture::new();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    fx.index.reset().unwrap();
                }
            });
            let _stop = StopOnDrop(&done);

            for i in 0..300 {
                let tag = label(i);
                let path = fx.write(&format!("{tag}.txt"), &format!("{tag} foo bar"));
                fx.index
                    .ingest_book(&NewBook::new(format!("Part {tag}"), "Anon", &path))
                    .unwrap();

                for (book, names) in resolved_books(&fx.index) {
                    let tag = book.title.trim_start_matches("Part ").to_lowercase();
                    let expected = vec![Some(tag), Some("foo".into()), Some("bar".into())];
                    assert_eq!(names, expected, "book {}", book.title);
                }
            }
        });
    }

    #[test]
    fn cancel_from_observer_stops_next_book() {
        let fx = Fixture::new();
        let dir = fx.tmp.path().join("shelf");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("alpha.txt"), "first").unwrap();
        std::fs::write(dir.join("beta.txt"), "second").unwrap();

        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        fx.index
            .subscribe(Event::BookInserted, move |_| trigger.cancel());

        let err = fx
            .index
            .ingest_dir(&dir, "Anon", None, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(fx.index.all_books().unwrap().len(), 1);
    }

    #[test]
    fn book_observer_fires_once_per_book() {
        let fx = Fixture::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        fx.index.subscribe(Event::BookInserted, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let path = fx.write("x.txt", "many words in this little book");
        fx.index
            .ingest_book(&NewBook::new("Little", "Author", &path))
            .unwrap();
        let _ = fx.index.ingest_book(&NewBook::new("Little", "Author", &path));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ingest_dir_reports_failures_and_continues() {
        let fx = Fixture::new();
        let dir = fx.tmp.path().join("shelf");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("war_and_peace.txt"), "Well, Prince").unwrap();
        std::fs::write(dir.join("broken.txt"), [0xff, 0xfe, 0x00]).unwrap();
        std::fs::write(dir.join("moby-dick.txt"), "Call me Ishmael.").unwrap();

        let report = fx
            .index
            .ingest_dir(&dir, "Various", None, &CancelFlag::new())
            .unwrap();

        let titles: Vec<_> = report.ingested.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Moby Dick", "War And Peace"]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, Error::SourceNotFound { .. }));
    }

    #[test]
    fn ingest_dir_rejects_bad_author() {
        let fx = Fixture::new();
        let err = fx
            .index
            .ingest_dir(fx.tmp.path(), "anonymous", None, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { kind: "author", .. }));
    }

    #[test]
    fn titles_from_stems() {
        assert_eq!(title_from_stem("war_and_peace"), "War And Peace");
        assert_eq!(title_from_stem("MOBY-DICK"), "Moby Dick");
        assert_eq!(title_from_stem("  odd__spacing "), "Odd Spacing");
    }

    #[test]
    fn book_helpers_and_removal() {
        let fx = Fixture::new();
        let path = fx.write("emma.txt", "Emma Woodhouse, handsome.");
        let book = fx
            .index
            .ingest_book(&NewBook::new("Emma", "Jane Austen", &path))
            .unwrap();

        assert_eq!(fx.index.book_path(book.id).unwrap(), path);
        assert_eq!(fx.index.book_full_name(book.id).unwrap(), "Emma by Jane Austen");
        let second = fx.index.occurrence(book.id, 2).unwrap().unwrap();
        assert_eq!(second.word_id, fx.index.word_id("woodhouse").unwrap().unwrap());
        assert_eq!(second.line_offset, 5);

        fx.index.remove_book(book.id).unwrap();
        assert!(fx.index.book(book.id).unwrap().is_none());
        assert!(fx.index.occurrence(book.id, 2).unwrap().is_none());
        assert!(fx.index.word_id("emma").unwrap().is_some());
        assert!(matches!(
            fx.index.remove_book(book.id),
            Err(Error::NotFound { kind: "book", .. })
        ));

        // the same title and author can be ingested again
        fx.index
            .ingest_book(&NewBook::new("Emma", "Jane Austen", &path))
            .unwrap();
    }
}

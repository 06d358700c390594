use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use redb::{ReadableMultimapTable, ReadableTable, ReadableTableMetadata};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    index::{self, GROUP_WORDS, GROUPS, Index, PHRASES, WORDS},
};

/// Index-wide counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralStats {
    pub books: u64,
    pub groups: u64,
    /// Average number of distinct words per group.
    pub avg_words_per_group: f64,
    pub phrases: u64,
    /// Average number of distinct words per phrase.
    pub avg_words_per_phrase: f64,
    /// Sum of the source sizes in bytes.
    pub total_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UnitStats {
    pub count: u64,
    pub avg_words: f64,
    pub avg_letters: f64,
}

/// Word statistics of one book or of every book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextStats {
    pub books: u64,
    pub total_words: u64,
    pub unique_words: u64,
    pub total_letters: u64,
    pub avg_letters_per_word: f64,
    pub paragraphs: UnitStats,
    pub lines: UnitStats,
    pub sentences: UnitStats,
}

#[derive(Debug, Default)]
struct BookTally {
    words: u64,
    letters: u64,
    unique: HashSet<u64>,
    paragraphs: u64,
    lines: u64,
    sentences: u64,
}

fn average(total: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

impl UnitStats {
    fn new(count: u64, words: u64, letters: u64) -> Self {
        Self {
            count,
            avg_words: average(words, count),
            avg_letters: average(letters, count),
        }
    }
}

impl Index {
    pub fn general_stats(&self) -> Result<GeneralStats> {
        let txn = self.begin_read()?;
        let books = index::all_books_in(&txn)?;

        let groups = txn.open_table(GROUPS)?;
        let members = txn.open_multimap_table(GROUP_WORDS)?;
        let mut group_words = 0;
        for entry in groups.iter()? {
            let (id, _) = entry?;
            group_words += members.get(id.value())?.len();
        }

        let phrases = txn.open_table(PHRASES)?;
        let mut phrase_words = 0;
        for entry in phrases.iter()? {
            let (id, _) = entry?;
            let distinct: HashSet<u64> = index::phrase_word_ids(&txn, id.value())?
                .into_iter()
                .collect();
            phrase_words += distinct.len() as u64;
        }

        Ok(GeneralStats {
            books: books.len() as u64,
            groups: groups.len()?,
            avg_words_per_group: average(group_words, groups.len()?),
            phrases: phrases.len()?,
            avg_words_per_phrase: average(phrase_words, phrases.len()?),
            total_size: books.iter().map(|b| b.size).sum(),
        })
    }

    /// Statistics of one book, or of all books when `book_id` is `None`.
    /// Books are tallied in parallel.
    pub fn text_stats(&self, book_id: Option<u64>) -> Result<TextStats> {
        let book_ids: Vec<u64> = match book_id {
            Some(id) => vec![self.require_book(id)?.id],
            None => self.all_books()?.iter().map(|b| b.id).collect(),
        };

        let lengths = {
            let txn = self.begin_read()?;
            let table = txn.open_table(WORDS)?;
            let mut lengths = HashMap::new();
            for entry in table.iter()? {
                let (id, name) = entry?;
                lengths.insert(id.value(), name.value().chars().count() as u64);
            }
            lengths
        };

        let tallies = book_ids
            .par_iter()
            .map(|&id| self.tally_book(id, &lengths))
            .collect::<Result<Vec<_>>>()?;

        let mut unique = HashSet::new();
        let (mut words, mut letters) = (0, 0);
        let (mut paragraphs, mut lines, mut sentences) = (0, 0, 0);
        for tally in tallies {
            words += tally.words;
            letters += tally.letters;
            paragraphs += tally.paragraphs;
            lines += tally.lines;
            sentences += tally.sentences;
            unique.extend(tally.unique);
        }

        Ok(TextStats {
            books: book_ids.len() as u64,
            total_words: words,
            unique_words: unique.len() as u64,
            total_letters: letters,
            avg_letters_per_word: average(letters, words),
            paragraphs: UnitStats::new(paragraphs, words, letters),
            lines: UnitStats::new(lines, words, letters),
            sentences: UnitStats::new(sentences, words, letters),
        })
    }

    fn tally_book(&self, book_id: u64, lengths: &HashMap<u64, u64>) -> Result<BookTally> {
        let txn = self.begin_read()?;
        let mut tally = BookTally::default();
        let mut paragraphs = HashSet::new();
        let mut lines = HashSet::new();
        let mut sentences = HashSet::new();

        for a in index::book_appearances(&txn, book_id)? {
            let length = lengths
                .get(&a.word_id)
                .ok_or_else(|| Error::not_found("word", a.word_id))?;
            tally.words += 1;
            tally.letters += length;
            tally.unique.insert(a.word_id);
            paragraphs.insert(a.paragraph);
            lines.insert(a.line);
            sentences.insert(a.sentence);
        }

        tally.paragraphs = paragraphs.len() as u64;
        tally.lines = lines.len() as u64;
        tally.sentences = sentences.len() as u64;
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::NewBook;

    fn ingest(index: &Index, dir: &std::path::Path, title: &str, text: &str) -> u64 {
        let path = dir.join(format!("{title}.txt"));
        std::fs::write(&path, text).unwrap();
        index
            .ingest_book(&NewBook::new(title, "Someone", &path))
            .unwrap()
            .id
    }

    #[test]
    fn empty_index() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Index::open(&tmp.path().join("index.redb")).unwrap();

        let general = index.general_stats().unwrap();
        assert_eq!(general.books, 0);
        assert_eq!(general.avg_words_per_group, 0.0);

        let text = index.text_stats(None).unwrap();
        assert_eq!(text.total_words, 0);
        assert_eq!(text.sentences.avg_words, 0.0);
    }

    #[test]
    fn general_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Index::open(&tmp.path().join("index.redb")).unwrap();
        ingest(&index, tmp.path(), "Tiny", "abc");

        let colors = index.create_group("Colors").unwrap();
        index.add_word_to_group(colors, "red").unwrap();
        index.add_word_to_group(colors, "green").unwrap();
        index.create_group("Empty").unwrap();
        index.create_phrase("to be or not to be").unwrap();
        index.create_phrase("hello").unwrap();

        let stats = index.general_stats().unwrap();
        assert_eq!(stats.books, 1);
        assert_eq!(stats.total_size, 3);
        assert_eq!(stats.groups, 2);
        assert_eq!(stats.avg_words_per_group, 1.0);
        assert_eq!(stats.phrases, 2);
        // "to be or not to be" has four distinct words
        assert_eq!(stats.avg_words_per_phrase, 2.5);
    }

    #[test]
    fn per_book_and_overall() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Index::open(&tmp.path().join("index.redb")).unwrap();
        let first = ingest(&index, tmp.path(), "First", "ab cd. ab\n\nefg");
        ingest(&index, tmp.path(), "Second", "ab");

        let one = index.text_stats(Some(first)).unwrap();
        assert_eq!(one.books, 1);
        assert_eq!(one.total_words, 4);
        assert_eq!(one.unique_words, 3);
        assert_eq!(one.total_letters, 9);
        assert_eq!(one.avg_letters_per_word, 2.25);
        assert_eq!(one.paragraphs.count, 2);
        assert_eq!(one.lines.count, 2);
        assert_eq!(one.sentences.count, 3);
        assert_eq!(one.paragraphs.avg_words, 2.0);

        let all = index.text_stats(None).unwrap();
        assert_eq!(all.books, 2);
        assert_eq!(all.total_words, 5);
        assert_eq!(all.unique_words, 3);
        assert_eq!(all.sentences.count, 4);
    }

    #[test]
    fn unknown_book() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Index::open(&tmp.path().join("index.redb")).unwrap();
        assert!(matches!(
            index.text_stats(Some(3)),
            Err(Error::NotFound { .. })
        ));
    }
}

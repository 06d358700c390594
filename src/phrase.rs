//! Phrase search over the positional index.
//!
//! A phrase of N words matches wherever N occurrences with consecutive
//! `word_index` values in one book carry the phrase's word ids in order.
//! Candidates are anchored on the postings of the first word; matches may
//! overlap and may cross sentence or line boundaries.

use redb::{ReadTransaction, ReadableMultimapTable, ReadableTable};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    index::{self, Appearance, Index, OCCURRENCES, PHRASES, POSTINGS, SENTENCE_WORDS},
};

/// A word position expressed in sentence coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SentencePosition {
    pub sentence: u32,
    pub sentence_index: u32,
}

impl From<&Appearance> for SentencePosition {
    fn from(a: &Appearance) -> Self {
        Self {
            sentence: a.sentence,
            sentence_index: a.sentence_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhraseMatch {
    pub book_id: u64,
    pub start_word_index: u64,
    /// First matched word.
    pub start: SentencePosition,
    /// Last matched word.
    pub end: SentencePosition,
}

/// A character position on a line of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineOffset {
    pub line: u32,
    pub offset: u32,
}

fn matches_in_book(
    txn: &ReadTransaction,
    book_id: u64,
    words: &[u64],
) -> Result<Vec<PhraseMatch>> {
    let Some((&first, rest)) = words.split_first() else {
        return Ok(Vec::new());
    };
    let postings = txn.open_multimap_table(POSTINGS)?;
    let occurrences = txn.open_table(OCCURRENCES)?;

    let mut matches = Vec::new();
    for start in postings.get((book_id, first))? {
        let start = start?.value();
        let Some(first_row) = occurrences.get((book_id, start))? else {
            continue;
        };
        let first_appearance = Appearance::from_row(book_id, start, first_row.value());

        let mut last = first_appearance;
        let mut complete = true;
        for (offset, &expected) in rest.iter().enumerate() {
            let word_index = start + offset as u64 + 1;
            match occurrences.get((book_id, word_index))? {
                Some(row) if row.value().0 == expected => {
                    last = Appearance::from_row(book_id, word_index, row.value());
                }
                _ => {
                    complete = false;
                    break;
                }
            }
        }

        if complete {
            matches.push(PhraseMatch {
                book_id,
                start_word_index: start,
                start: SentencePosition::from(&first_appearance),
                end: SentencePosition::from(&last),
            });
        }
    }
    Ok(matches)
}

fn require_phrase_words(txn: &ReadTransaction, phrase_id: u64) -> Result<Vec<u64>> {
    if txn.open_table(PHRASES)?.get(phrase_id)?.is_none() {
        return Err(Error::not_found("phrase", phrase_id));
    }
    index::phrase_word_ids(txn, phrase_id)
}

impl Index {
    /// Every occurrence of a stored phrase, in (book, word index) order.
    pub fn find_phrase(&self, phrase_id: u64) -> Result<Vec<PhraseMatch>> {
        let txn = self.begin_read()?;
        let words = require_phrase_words(&txn, phrase_id)?;

        let mut matches = Vec::new();
        for book in index::all_books_in(&txn)? {
            matches.extend(matches_in_book(&txn, book.id, &words)?);
        }
        tracing::debug!(phrase_id, matches = matches.len(), "phrase search");
        Ok(matches)
    }

    pub fn find_phrase_in_book(
        &self,
        book_id: u64,
        phrase_id: u64,
    ) -> Result<Vec<PhraseMatch>> {
        let txn = self.begin_read()?;
        if index::read_book(&txn, book_id)?.is_none() {
            return Err(Error::not_found("book", book_id));
        }
        let words = require_phrase_words(&txn, phrase_id)?;
        matches_in_book(&txn, book_id, &words)
    }

    /// Resolve a sentence coordinate to its line and character offset.
    /// With `end`, the offset is just past the word as written in the
    /// source.
    pub fn word_location_to_offset(
        &self,
        book_id: u64,
        sentence: u32,
        sentence_index: u32,
        end: bool,
    ) -> Result<LineOffset> {
        let txn = self.begin_read()?;
        let location = || format!("book {book_id} sentence {sentence}:{sentence_index}");

        let word_index = txn
            .open_table(SENTENCE_WORDS)?
            .get((book_id, sentence, sentence_index))?
            .map(|v| v.value())
            .ok_or_else(|| Error::not_found("word location", location()))?;
        let (_, _, line, _, line_offset, _, _, length) = txn
            .open_table(OCCURRENCES)?
            .get((book_id, word_index))?
            .map(|v| v.value())
            .ok_or_else(|| Error::not_found("word location", location()))?;

        let offset = if end { line_offset + length } else { line_offset };
        Ok(LineOffset { line, offset })
    }

    /// Start and exclusive end of a phrase match, for highlighting.
    pub fn phrase_span(&self, m: &PhraseMatch) -> Result<(LineOffset, LineOffset)> {
        Ok((
            self.word_location_to_offset(
                m.book_id,
                m.start.sentence,
                m.start.sentence_index,
                false,
            )?,
            self.word_location_to_offset(
                m.book_id,
                m.end.sentence,
                m.end.sentence_index,
                true,
            )?,
        ))
    }
}

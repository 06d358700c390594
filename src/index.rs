//! The on-disk word index.
//!
//! Everything lives in a single redb file: the word dictionary, the books,
//! one row per word occurrence, words groups, phrases and a small settings
//! table. Every mutating operation runs in one write transaction and is only
//! committed after all of its checks passed; redb allows a single write
//! transaction at a time, which serializes writers while readers keep
//! working on the last committed state.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redb::{
    Database,
    Key,
    MultimapTable,
    MultimapTableDefinition,
    ReadTransaction,
    ReadableDatabase,
    ReadableMultimapTable,
    ReadableTable,
    Table,
    TableDefinition,
    Value,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    grammar,
    observers::{Event, Observers},
    word_cache::{self, WordCache},
};

pub(crate) const SETTINGS: TableDefinition<&str, &str> =
    TableDefinition::new("settings");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

pub(crate) const WORDS: TableDefinition<u64, &str> =
    TableDefinition::new("words");
pub(crate) const WORD_IDS: TableDefinition<&str, u64> =
    TableDefinition::new("word_ids");

pub(crate) const BOOKS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("books");
const BOOK_KEYS: TableDefinition<&str, u64> = TableDefinition::new("book_keys");

/// (book_id, word_index) -> occurrence row.
pub(crate) const OCCURRENCES: TableDefinition<(u64, u64), OccurrenceRow> =
    TableDefinition::new("occurrences");
/// (book_id, word_id) -> word_index of every occurrence of the word.
pub(crate) const POSTINGS: MultimapTableDefinition<(u64, u64), u64> =
    MultimapTableDefinition::new("postings");
/// (book_id, sentence, sentence_index) -> word_index.
pub(crate) const SENTENCE_WORDS: TableDefinition<(u64, u32, u32), u64> =
    TableDefinition::new("sentence_words");

pub(crate) const GROUPS: TableDefinition<u64, &str> =
    TableDefinition::new("groups");
const GROUP_IDS: TableDefinition<&str, u64> = TableDefinition::new("group_ids");
pub(crate) const GROUP_WORDS: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("group_words");

pub(crate) const PHRASES: TableDefinition<u64, &str> =
    TableDefinition::new("phrases");
/// (phrase_id, phrase_index) -> word_id.
pub(crate) const PHRASE_WORDS: TableDefinition<(u64, u32), u64> =
    TableDefinition::new("phrase_words");

/// word_id, paragraph, line, line_index, line_offset, sentence,
/// sentence_index, length
pub(crate) type OccurrenceRow = (u64, u32, u32, u32, u32, u32, u32, u32);

pub const SETTING_ALLOW_DUPLICATE_PHRASES: &str = "phrases.allow_duplicates";
pub const SETTING_CACHE_CAPACITY: &str = "dictionary.cache_capacity";

/// A dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Word {
    pub id: u64,
    pub name: String,
    pub length: u32,
}

impl Word {
    pub(crate) fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            length: grammar::word_length(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: u64,
    pub title: String,
    pub author: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl Book {
    /// "Title by Author".
    pub fn full_name(&self) -> String {
        format!("{} by {}", self.title, self.author)
    }
}

/// A stored occurrence of a word in a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Appearance {
    pub book_id: u64,
    pub word_id: u64,
    pub word_index: u64,
    pub paragraph: u32,
    pub line: u32,
    pub line_index: u32,
    pub line_offset: u32,
    pub sentence: u32,
    pub sentence_index: u32,
    /// Characters of the word as written in the source. Can differ from
    /// the dictionary form when case folding changes the length.
    pub length: u32,
}

impl Appearance {
    pub(crate) fn from_row(
        book_id: u64,
        word_index: u64,
        row: OccurrenceRow,
    ) -> Self {
        let (
            word_id,
            paragraph,
            line,
            line_index,
            line_offset,
            sentence,
            sentence_index,
            length,
        ) = row;
        Self {
            book_id,
            word_id,
            word_index,
            paragraph,
            line,
            line_index,
            line_offset,
            sentence,
            sentence_index,
            length,
        }
    }

    fn row(&self) -> OccurrenceRow {
        (
            self.word_id,
            self.paragraph,
            self.line,
            self.line_index,
            self.line_offset,
            self.sentence,
            self.sentence_index,
            self.length,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phrase {
    pub id: u64,
    pub text: String,
    pub word_count: u32,
}

fn book_key(title: &str, author: &str) -> String {
    format!("{title}\0{author}")
}

fn next_id(counters: &mut Table<'_, &'static str, u64>, name: &str) -> Result<u64> {
    let next = counters.get(name)?.map(|v| v.value()).unwrap_or(0) + 1;
    counters.insert(name, next)?;
    Ok(next)
}

/// Raise a counter so that ids handed out later stay above `id`.
fn bump_counter(
    counters: &mut Table<'_, &'static str, u64>,
    name: &str,
    id: u64,
) -> Result<()> {
    let current = counters.get(name)?.map(|v| v.value()).unwrap_or(0);
    if id > current {
        counters.insert(name, id)?;
    }
    Ok(())
}

/// Dictionary tables opened inside a write transaction.
///
/// Words created here are only published to the shared cache once the
/// transaction has committed (see [`Index::remember_words`]).
pub(crate) struct Dictionary<'t> {
    words: Table<'t, u64, &'static str>,
    ids: Table<'t, &'static str, u64>,
    counters: Table<'t, &'static str, u64>,
    cache: &'t Mutex<WordCache>,
    epoch: u64,
    seen: HashMap<String, u64>,
}

/// Words resolved by one write transaction, tagged with the cache epoch
/// the transaction started in.
pub(crate) struct LearnedWords {
    epoch: u64,
    words: HashMap<String, u64>,
}

impl<'t> Dictionary<'t> {
    pub(crate) fn open(
        txn: &'t WriteTransaction,
        cache: &'t Mutex<WordCache>,
    ) -> Result<Self> {
        Ok(Self {
            words: txn.open_table(WORDS)?,
            ids: txn.open_table(WORD_IDS)?,
            counters: txn.open_table(COUNTERS)?,
            epoch: cache.lock().epoch(),
            cache,
            seen: HashMap::new(),
        })
    }

    /// Look the word up, creating it if absent. Reads are tried first since
    /// most words of a book are already known.
    pub(crate) fn intern(&mut self, word: &str) -> Result<u64> {
        let canonical = grammar::canonical_word(word)?;
        if let Some(&id) = self.seen.get(&canonical) {
            return Ok(id);
        }
        if let Some(id) = self.cache.lock().get(&canonical) {
            self.seen.insert(canonical, id);
            return Ok(id);
        }

        let existing = self.ids.get(canonical.as_str())?.map(|v| v.value());
        let id = match existing {
            Some(id) => id,
            None => {
                let id = next_id(&mut self.counters, "word")?;
                self.words.insert(id, canonical.as_str())?;
                self.ids.insert(canonical.as_str(), id)?;
                tracing::trace!(word = %canonical, id, "new word");
                id
            }
        };
        self.seen.insert(canonical, id);
        Ok(id)
    }

    /// Insert a word with a known id, bypassing grammar checks.
    fn insert_with_id(&mut self, id: u64, name: &str) -> Result<()> {
        if let Some(existing) = self.ids.get(name)?.map(|v| v.value()) {
            if existing == id {
                return Ok(());
            }
            return Err(Error::duplicate("word", name));
        }
        if self.words.get(id)?.is_some() {
            return Err(Error::duplicate("word id", id));
        }
        self.words.insert(id, name)?;
        self.ids.insert(name, id)?;
        bump_counter(&mut self.counters, "word", id)?;
        self.seen.insert(name.to_string(), id);
        Ok(())
    }

    pub(crate) fn next_id(&mut self, counter: &str) -> Result<u64> {
        next_id(&mut self.counters, counter)
    }

    fn contains_id(&self, id: u64) -> Result<bool> {
        Ok(self.words.get(id)?.is_some())
    }

    pub(crate) fn into_learned(self) -> LearnedWords {
        LearnedWords {
            epoch: self.epoch,
            words: self.seen,
        }
    }
}

/// Occurrence tables opened inside a write transaction.
pub(crate) struct OccurrenceTables<'t> {
    occurrences: Table<'t, (u64, u64), OccurrenceRow>,
    postings: MultimapTable<'t, (u64, u64), u64>,
    sentences: Table<'t, (u64, u32, u32), u64>,
}

impl<'t> OccurrenceTables<'t> {
    pub(crate) fn open(txn: &'t WriteTransaction) -> Result<Self> {
        Ok(Self {
            occurrences: txn.open_table(OCCURRENCES)?,
            postings: txn.open_multimap_table(POSTINGS)?,
            sentences: txn.open_table(SENTENCE_WORDS)?,
        })
    }

    pub(crate) fn insert(&mut self, appearance: &Appearance) -> Result<()> {
        let a = appearance;
        self.occurrences.insert((a.book_id, a.word_index), a.row())?;
        self.postings.insert((a.book_id, a.word_id), a.word_index)?;
        self.sentences
            .insert((a.book_id, a.sentence, a.sentence_index), a.word_index)?;
        Ok(())
    }
}

/// Create the book row, enforcing (title, author) uniqueness.
pub(crate) fn insert_book_row(
    txn: &WriteTransaction,
    dictionary: &mut Dictionary<'_>,
    title: &str,
    author: &str,
    path: &Path,
    size: u64,
    created_at: DateTime<Utc>,
) -> Result<Book> {
    let mut keys = txn.open_table(BOOK_KEYS)?;
    let key = book_key(title, author);
    if keys.get(key.as_str())?.is_some() {
        return Err(Error::duplicate("book", format!("{title} by {author}")));
    }

    let id = dictionary.next_id("book")?;
    let book = Book {
        id,
        title: title.to_string(),
        author: author.to_string(),
        path: path.to_path_buf(),
        size,
        created_at,
    };

    let mut books = txn.open_table(BOOKS)?;
    books.insert(id, serde_json::to_vec(&book)?.as_slice())?;
    keys.insert(key.as_str(), id)?;
    Ok(book)
}

pub struct Index {
    pub(crate) db: Database,
    path: PathBuf,
    pub(crate) cache: Mutex<WordCache>,
    observers: Arc<Observers>,
}

impl Index {
    /// Open or create an index file.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_observers(path, Arc::new(Observers::new()))
    }

    /// Open or create an index file that notifies an existing set of
    /// observers.
    pub fn open_with_observers(
        path: &Path,
        observers: Arc<Observers>,
    ) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        create_tables(&txn)?;
        txn.commit()?;

        let index = Self {
            db,
            path: path.to_path_buf(),
            cache: Mutex::new(WordCache::default()),
            observers,
        };

        let capacity = index
            .get_setting(SETTING_CACHE_CAPACITY)?
            .map(|v| {
                v.parse::<usize>().map_err(|_| {
                    Error::Config(format!(
                        "{SETTING_CACHE_CAPACITY} must be a number, got {v:?}"
                    ))
                })
            })
            .transpose()?
            .unwrap_or(word_cache::DEFAULT_CAPACITY);
        *index.cache.lock() = WordCache::new(capacity);

        tracing::debug!(path = %path.display(), capacity, "opened index");
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn observers(&self) -> &Arc<Observers> {
        &self.observers
    }

    pub fn subscribe<F>(&self, event: Event, handler: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.observers.subscribe(event, handler);
    }

    pub(crate) fn notify(&self, event: Event, id: u64) {
        self.observers.notify(event, id);
    }

    pub(crate) fn begin_read(&self) -> Result<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    /// Publish words interned by a committed transaction to the cache.
    /// Words from a transaction that started before the last reset are
    /// dropped: their ids may no longer exist.
    pub(crate) fn remember_words(&self, learned: LearnedWords) {
        let mut cache = self.cache.lock();
        if cache.epoch() != learned.epoch {
            tracing::debug!(
                words = learned.words.len(),
                "dropping words learned before a reset"
            );
            return;
        }
        for (word, id) in learned.words {
            cache.insert(word, id);
        }
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    // -- Dictionary --

    /// Return the id of `word`, adding it to the dictionary if needed.
    pub fn intern_word(&self, word: &str) -> Result<u64> {
        let canonical = grammar::canonical_word(word)?;
        if let Some(id) = self.cache.lock().get(&canonical) {
            return Ok(id);
        }

        let txn = self.db.begin_write()?;
        let (id, seen) = {
            let mut dictionary = Dictionary::open(&txn, &self.cache)?;
            let id = dictionary.intern(&canonical)?;
            (id, dictionary.into_learned())
        };
        txn.commit()?;
        self.remember_words(seen);
        Ok(id)
    }

    /// Look a word up without creating it. The input is canonicalized first.
    pub fn word_id(&self, word: &str) -> Result<Option<u64>> {
        let canonical = grammar::canonical_word(word)?;
        if let Some(id) = self.cache.lock().get(&canonical) {
            return Ok(Some(id));
        }
        let txn = self.db.begin_read()?;
        let table = txn.open_table(WORD_IDS)?;
        Ok(table.get(canonical.as_str())?.map(|v| v.value()))
    }

    pub fn word(&self, word_id: u64) -> Result<Option<Word>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(WORDS)?;
        Ok(table.get(word_id)?.map(|v| Word::new(word_id, v.value())))
    }

    /// All dictionary words ordered by name.
    pub fn all_words(&self) -> Result<Vec<Word>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(WORD_IDS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (name, id) = entry?;
            result.push(Word::new(id.value(), name.value()));
        }
        Ok(result)
    }

    // -- Books --

    pub fn book(&self, book_id: u64) -> Result<Option<Book>> {
        let txn = self.db.begin_read()?;
        read_book(&txn, book_id)
    }

    pub(crate) fn require_book(&self, book_id: u64) -> Result<Book> {
        self.book(book_id)?
            .ok_or_else(|| Error::not_found("book", book_id))
    }

    pub fn all_books(&self) -> Result<Vec<Book>> {
        let txn = self.db.begin_read()?;
        all_books_in(&txn)
    }

    pub fn book_full_name(&self, book_id: u64) -> Result<String> {
        Ok(self.require_book(book_id)?.full_name())
    }

    pub fn book_path(&self, book_id: u64) -> Result<PathBuf> {
        Ok(self.require_book(book_id)?.path)
    }

    /// Every occurrence of a book ordered by word index.
    pub fn book_words_in_order(&self, book_id: u64) -> Result<Vec<Appearance>> {
        let txn = self.db.begin_read()?;
        if read_book(&txn, book_id)?.is_none() {
            return Err(Error::not_found("book", book_id));
        }
        book_appearances(&txn, book_id)
    }

    pub fn occurrence(
        &self,
        book_id: u64,
        word_index: u64,
    ) -> Result<Option<Appearance>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(OCCURRENCES)?;
        Ok(table
            .get((book_id, word_index))?
            .map(|row| Appearance::from_row(book_id, word_index, row.value())))
    }

    /// Delete a book and all of its occurrences. Dictionary words are kept.
    pub fn remove_book(&self, book_id: u64) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut books = txn.open_table(BOOKS)?;
            let book: Book = match books.remove(book_id)? {
                Some(bytes) => serde_json::from_slice(bytes.value())?,
                None => return Err(Error::not_found("book", book_id)),
            };
            let mut keys = txn.open_table(BOOK_KEYS)?;
            keys.remove(book_key(&book.title, &book.author).as_str())?;

            let mut occurrences = txn.open_table(OCCURRENCES)?;
            let mut postings = txn.open_multimap_table(POSTINGS)?;
            let mut sentences = txn.open_table(SENTENCE_WORDS)?;

            let mut rows = Vec::new();
            for entry in occurrences.range((book_id, 0)..=(book_id, u64::MAX))? {
                let (key, row) = entry?;
                rows.push((key.value().1, row.value()));
            }
            for (word_index, (word_id, _, _, _, _, sentence, sentence_index, _)) in
                rows
            {
                occurrences.remove((book_id, word_index))?;
                postings.remove_all((book_id, word_id))?;
                sentences.remove((book_id, sentence, sentence_index))?;
            }
        }
        txn.commit()?;
        tracing::info!(book_id, "removed book");
        Ok(())
    }

    // -- Groups --

    /// Create a words group. Fails with `InvalidInput` for names outside the
    /// title grammar or reserved names, and `Duplicate` for existing names.
    pub fn create_group(&self, name: &str) -> Result<u64> {
        let name = grammar::validate_group_name(name)?;

        let txn = self.db.begin_write()?;
        let id = {
            let mut ids = txn.open_table(GROUP_IDS)?;
            if ids.get(name.as_str())?.is_some() {
                return Err(Error::duplicate("group", &name));
            }
            let mut counters = txn.open_table(COUNTERS)?;
            let id = next_id(&mut counters, "group")?;
            let mut groups = txn.open_table(GROUPS)?;
            groups.insert(id, name.as_str())?;
            ids.insert(name.as_str(), id)?;
            id
        };
        txn.commit()?;

        tracing::debug!(group = %name, id, "created group");
        self.notify(Event::GroupInserted, id);
        Ok(id)
    }

    /// Add a word to a group, interning it first. Returns the word id.
    pub fn add_word_to_group(&self, group_id: u64, word: &str) -> Result<u64> {
        let txn = self.db.begin_write()?;
        let (word_id, seen) = {
            let groups = txn.open_table(GROUPS)?;
            if groups.get(group_id)?.is_none() {
                return Err(Error::not_found("group", group_id));
            }

            let mut dictionary = Dictionary::open(&txn, &self.cache)?;
            let word_id = dictionary.intern(word)?;

            let mut members = txn.open_multimap_table(GROUP_WORDS)?;
            if members.insert(group_id, word_id)? {
                return Err(Error::duplicate(
                    "group word",
                    format!("{} in group {group_id}", word.trim()),
                ));
            }
            (word_id, dictionary.into_learned())
        };
        txn.commit()?;
        self.remember_words(seen);

        self.notify(Event::GroupWordInserted, group_id);
        Ok(word_id)
    }

    pub fn group(&self, group_id: u64) -> Result<Option<Group>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(GROUPS)?;
        Ok(table.get(group_id)?.map(|v| Group {
            id: group_id,
            name: v.value().to_string(),
        }))
    }

    pub fn group_by_name(&self, name: &str) -> Result<Option<Group>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(GROUP_IDS)?;
        Ok(table.get(name.trim())?.map(|v| Group {
            id: v.value(),
            name: name.trim().to_string(),
        }))
    }

    pub fn all_groups(&self) -> Result<Vec<Group>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(GROUPS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (id, name) = entry?;
            result.push(Group {
                id: id.value(),
                name: name.value().to_string(),
            });
        }
        Ok(result)
    }

    /// Members of a group ordered by name.
    pub fn words_in_group(&self, group_id: u64) -> Result<Vec<Word>> {
        let txn = self.db.begin_read()?;
        if txn.open_table(GROUPS)?.get(group_id)?.is_none() {
            return Err(Error::not_found("group", group_id));
        }
        let members = txn.open_multimap_table(GROUP_WORDS)?;
        let words = txn.open_table(WORDS)?;
        let mut result = Vec::new();
        for member in members.get(group_id)? {
            let word_id = member?.value();
            if let Some(name) = words.get(word_id)? {
                result.push(Word::new(word_id, name.value()));
            }
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    // -- Phrases --

    /// Store a phrase as the ordered list of its words.
    ///
    /// Duplicate phrase text is accepted unless the
    /// `phrases.allow_duplicates` setting is `false`.
    pub fn create_phrase(&self, text: &str) -> Result<u64> {
        let text = text.trim();
        let words = grammar::split_words(text);
        if words.is_empty() {
            return Err(Error::invalid("phrase", text));
        }
        let allow_duplicates = self
            .get_setting_or(SETTING_ALLOW_DUPLICATE_PHRASES, "true")?
            != "false";

        let txn = self.db.begin_write()?;
        let (id, seen) = {
            let mut phrases = txn.open_table(PHRASES)?;
            if !allow_duplicates {
                for entry in phrases.iter()? {
                    let (_, existing) = entry?;
                    if existing.value() == text {
                        return Err(Error::duplicate("phrase", text));
                    }
                }
            }

            let mut dictionary = Dictionary::open(&txn, &self.cache)?;
            let id = dictionary.next_id("phrase")?;
            phrases.insert(id, text)?;

            let mut slots = txn.open_table(PHRASE_WORDS)?;
            for (position, word) in words.iter().enumerate() {
                let word_id = dictionary.intern(word)?;
                slots.insert((id, position as u32 + 1), word_id)?;
            }
            (id, dictionary.into_learned())
        };
        txn.commit()?;
        self.remember_words(seen);

        tracing::debug!(phrase = %text, id, words = words.len(), "created phrase");
        self.notify(Event::PhraseInserted, id);
        Ok(id)
    }

    pub fn phrase(&self, phrase_id: u64) -> Result<Option<Phrase>> {
        let txn = self.db.begin_read()?;
        read_phrase(&txn, phrase_id)
    }

    pub fn all_phrases(&self) -> Result<Vec<Phrase>> {
        let txn = self.db.begin_read()?;
        let ids: Vec<u64> = {
            let table = txn.open_table(PHRASES)?;
            let mut ids = Vec::new();
            for entry in table.iter()? {
                ids.push(entry?.0.value());
            }
            ids
        };
        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(phrase) = read_phrase(&txn, id)? {
                result.push(phrase);
            }
        }
        Ok(result)
    }

    /// Word ids of a phrase in phrase order.
    pub fn words_in_phrase(&self, phrase_id: u64) -> Result<Vec<u64>> {
        let txn = self.db.begin_read()?;
        if txn.open_table(PHRASES)?.get(phrase_id)?.is_none() {
            return Err(Error::not_found("phrase", phrase_id));
        }
        phrase_word_ids(&txn, phrase_id)
    }

    // -- Whole index --

    /// Remove every book, word, group and phrase. Settings are kept.
    pub fn reset(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        clear_data_tables(&txn)?;
        {
            // Held across the commit so no writer sees old ids afterwards.
            let mut cache = self.cache.lock();
            txn.commit()?;
            cache.clear();
        }
        tracing::info!(path = %self.path.display(), "index reset");
        Ok(())
    }

    /// Write a copy of the committed state of this index to a new file.
    pub fn snapshot_to(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let target = Database::create(path)?;

        let src = self.db.begin_read()?;
        let dst = target.begin_write()?;
        copy_table(SETTINGS, &src, &dst)?;
        copy_table(COUNTERS, &src, &dst)?;
        copy_table(WORDS, &src, &dst)?;
        copy_table(WORD_IDS, &src, &dst)?;
        copy_table(BOOKS, &src, &dst)?;
        copy_table(BOOK_KEYS, &src, &dst)?;
        copy_table(OCCURRENCES, &src, &dst)?;
        copy_multimap_table(POSTINGS, &src, &dst)?;
        copy_table(SENTENCE_WORDS, &src, &dst)?;
        copy_table(GROUPS, &src, &dst)?;
        copy_table(GROUP_IDS, &src, &dst)?;
        copy_multimap_table(GROUP_WORDS, &src, &dst)?;
        copy_table(PHRASES, &src, &dst)?;
        copy_table(PHRASE_WORDS, &src, &dst)?;
        dst.commit()?;

        tracing::info!(path = %path.display(), "wrote index snapshot");
        Ok(())
    }

    /// Run `load` against a [`BulkLoader`] inside one write transaction.
    /// Nothing is committed if `load` fails.
    pub fn bulk_load<T, F>(&self, load: F) -> Result<T>
    where
        F: FnOnce(&mut BulkLoader<'_>) -> Result<T>,
    {
        self.run_bulk(false, load)
    }

    /// Like [`Index::bulk_load`], but the current content is cleared first in
    /// the same transaction.
    pub fn bulk_replace<T, F>(&self, load: F) -> Result<T>
    where
        F: FnOnce(&mut BulkLoader<'_>) -> Result<T>,
    {
        self.run_bulk(true, load)
    }

    fn run_bulk<T, F>(&self, clear: bool, load: F) -> Result<T>
    where
        F: FnOnce(&mut BulkLoader<'_>) -> Result<T>,
    {
        let txn = self.db.begin_write()?;
        if clear {
            clear_data_tables(&txn)?;
        }
        let (value, learned) = {
            let mut loader = BulkLoader {
                txn: &txn,
                dictionary: Dictionary::open(&txn, &self.cache)?,
            };
            let value = load(&mut loader)?;
            (value, loader.dictionary.into_learned())
        };
        if clear {
            let mut cache = self.cache.lock();
            txn.commit()?;
            cache.clear();
            for (word, id) in learned.words {
                cache.insert(word, id);
            }
        } else {
            txn.commit()?;
            self.remember_words(learned);
        }
        Ok(value)
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Insert entry points that take pre-resolved word ids, used to rebuild an
/// index from an export without tokenizing the original sources.
pub struct BulkLoader<'t> {
    txn: &'t WriteTransaction,
    dictionary: Dictionary<'t>,
}

impl BulkLoader<'_> {
    pub fn insert_word_with_id(&mut self, id: u64, name: &str) -> Result<()> {
        self.dictionary.insert_with_id(id, name)
    }

    pub fn insert_book(
        &mut self,
        title: &str,
        author: &str,
        path: &Path,
        size: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Book> {
        insert_book_row(
            self.txn,
            &mut self.dictionary,
            title,
            author,
            path,
            size,
            created_at,
        )
    }

    /// Append occurrences of an existing book. Every referenced word id must
    /// already be in the dictionary.
    pub fn insert_appearances(&mut self, appearances: &[Appearance]) -> Result<()> {
        let mut tables = OccurrenceTables::open(self.txn)?;
        for appearance in appearances {
            if !self.dictionary.contains_id(appearance.word_id)? {
                return Err(Error::not_found("word", appearance.word_id));
            }
            tables.insert(appearance)?;
        }
        Ok(())
    }

    pub fn insert_group_with_word_ids(
        &mut self,
        name: &str,
        word_ids: &[u64],
    ) -> Result<u64> {
        let mut ids = self.txn.open_table(GROUP_IDS)?;
        if ids.get(name)?.is_some() {
            return Err(Error::duplicate("group", name));
        }
        let id = self.dictionary.next_id("group")?;
        self.txn.open_table(GROUPS)?.insert(id, name)?;
        ids.insert(name, id)?;

        let mut members = self.txn.open_multimap_table(GROUP_WORDS)?;
        for &word_id in word_ids {
            if !self.dictionary.contains_id(word_id)? {
                return Err(Error::not_found("word", word_id));
            }
            members.insert(id, word_id)?;
        }
        Ok(id)
    }

    pub fn insert_phrase_with_word_ids(
        &mut self,
        text: &str,
        word_ids: &[u64],
    ) -> Result<u64> {
        let id = self.dictionary.next_id("phrase")?;
        self.txn.open_table(PHRASES)?.insert(id, text)?;

        let mut slots = self.txn.open_table(PHRASE_WORDS)?;
        for (position, &word_id) in word_ids.iter().enumerate() {
            if !self.dictionary.contains_id(word_id)? {
                return Err(Error::not_found("word", word_id));
            }
            slots.insert((id, position as u32 + 1), word_id)?;
        }
        Ok(id)
    }
}

fn clear_data_tables(txn: &WriteTransaction) -> Result<()> {
    txn.delete_table(COUNTERS)?;
    txn.delete_table(WORDS)?;
    txn.delete_table(WORD_IDS)?;
    txn.delete_table(BOOKS)?;
    txn.delete_table(BOOK_KEYS)?;
    txn.delete_table(OCCURRENCES)?;
    txn.delete_multimap_table(POSTINGS)?;
    txn.delete_table(SENTENCE_WORDS)?;
    txn.delete_table(GROUPS)?;
    txn.delete_table(GROUP_IDS)?;
    txn.delete_multimap_table(GROUP_WORDS)?;
    txn.delete_table(PHRASES)?;
    txn.delete_table(PHRASE_WORDS)?;
    create_tables(txn)
}

fn create_tables(txn: &WriteTransaction) -> Result<()> {
    txn.open_table(SETTINGS)?;
    txn.open_table(COUNTERS)?;
    txn.open_table(WORDS)?;
    txn.open_table(WORD_IDS)?;
    txn.open_table(BOOKS)?;
    txn.open_table(BOOK_KEYS)?;
    txn.open_table(OCCURRENCES)?;
    txn.open_multimap_table(POSTINGS)?;
    txn.open_table(SENTENCE_WORDS)?;
    txn.open_table(GROUPS)?;
    txn.open_table(GROUP_IDS)?;
    txn.open_multimap_table(GROUP_WORDS)?;
    txn.open_table(PHRASES)?;
    txn.open_table(PHRASE_WORDS)?;
    Ok(())
}

fn copy_table<K: Key + 'static, V: Value + 'static>(
    definition: TableDefinition<K, V>,
    src: &ReadTransaction,
    dst: &WriteTransaction,
) -> Result<()> {
    let from = src.open_table(definition)?;
    let mut to = dst.open_table(definition)?;
    for entry in from.iter()? {
        let (k, v) = entry?;
        to.insert(k.value(), v.value())?;
    }
    Ok(())
}

fn copy_multimap_table<K: Key + 'static, V: Key + 'static>(
    definition: MultimapTableDefinition<K, V>,
    src: &ReadTransaction,
    dst: &WriteTransaction,
) -> Result<()> {
    let from = src.open_multimap_table(definition)?;
    let mut to = dst.open_multimap_table(definition)?;
    for entry in from.iter()? {
        let (k, values) = entry?;
        for v in values {
            to.insert(k.value(), v?.value())?;
        }
    }
    Ok(())
}

pub(crate) fn read_book(txn: &ReadTransaction, book_id: u64) -> Result<Option<Book>> {
    let table = txn.open_table(BOOKS)?;
    match table.get(book_id)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn all_books_in(txn: &ReadTransaction) -> Result<Vec<Book>> {
    let table = txn.open_table(BOOKS)?;
    let mut result = Vec::new();
    for entry in table.iter()? {
        let (_, bytes) = entry?;
        result.push(serde_json::from_slice(bytes.value())?);
    }
    Ok(result)
}

pub(crate) fn book_appearances(
    txn: &ReadTransaction,
    book_id: u64,
) -> Result<Vec<Appearance>> {
    let table = txn.open_table(OCCURRENCES)?;
    let mut result = Vec::new();
    for entry in table.range((book_id, 0)..=(book_id, u64::MAX))? {
        let (key, row) = entry?;
        result.push(Appearance::from_row(book_id, key.value().1, row.value()));
    }
    Ok(result)
}

pub(crate) fn phrase_word_ids(
    txn: &ReadTransaction,
    phrase_id: u64,
) -> Result<Vec<u64>> {
    let table = txn.open_table(PHRASE_WORDS)?;
    let mut result = Vec::new();
    for entry in table.range((phrase_id, 0)..=(phrase_id, u32::MAX))? {
        result.push(entry?.1.value());
    }
    Ok(result)
}

fn read_phrase(txn: &ReadTransaction, phrase_id: u64) -> Result<Option<Phrase>> {
    let text = {
        let table = txn.open_table(PHRASES)?;
        match table.get(phrase_id)? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        }
    };
    let word_count = phrase_word_ids(txn, phrase_id)?.len() as u32;
    Ok(Some(Phrase {
        id: phrase_id,
        text,
        word_count,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn test_index() -> (tempfile::TempDir, Index) {
        let tmp = tempfile::tempdir().unwrap();
        let index = Index::open(&tmp.path().join("index.redb")).unwrap();
        (tmp, index)
    }

    #[test]
    fn intern_is_idempotent_and_case_folded() {
        let (_tmp, index) = test_index();

        let a = index.intern_word("Hobbit").unwrap();
        let b = index.intern_word("  hobbit ").unwrap();
        let c = index.intern_word("HOBBIT").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_ne!(a, index.intern_word("ring").unwrap());

        let word = index.word(a).unwrap().unwrap();
        assert_eq!(word.name, "hobbit");
        assert_eq!(word.length, 6);
    }

    #[test]
    fn intern_rejects_invalid_words() {
        let (_tmp, index) = test_index();
        assert!(matches!(
            index.intern_word("two words"),
            Err(Error::InvalidInput { .. })
        ));
        assert!(index.intern_word("").is_err());
        assert!(index.all_words().unwrap().is_empty());
    }

    #[test]
    fn word_id_does_not_create() {
        let (_tmp, index) = test_index();
        assert_eq!(index.word_id("ghost").unwrap(), None);
        let id = index.intern_word("ghost").unwrap();
        assert_eq!(index.word_id("Ghost").unwrap(), Some(id));
    }

    #[test]
    fn ids_survive_reopen_with_cold_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.redb");
        let id = {
            let index = Index::open(&path).unwrap();
            index.intern_word("persistent").unwrap()
        };
        let index = Index::open(&path).unwrap();
        assert!(index.cache.lock().is_empty());
        assert_eq!(index.intern_word("persistent").unwrap(), id);
    }

    #[test]
    fn all_words_sorted_by_name() {
        let (_tmp, index) = test_index();
        for w in ["pear", "apple", "fig"] {
            index.intern_word(w).unwrap();
        }
        let names: Vec<_> = index
            .all_words()
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["apple", "fig", "pear"]);
    }

    #[test]
    fn groups_crud() {
        let (_tmp, index) = test_index();
        let colors = index.create_group("Colors").unwrap();
        assert!(matches!(
            index.create_group("Colors"),
            Err(Error::Duplicate { .. })
        ));
        assert!(matches!(
            index.create_group("All"),
            Err(Error::InvalidInput { .. })
        ));
        assert!(matches!(
            index.create_group("colors"),
            Err(Error::InvalidInput { .. })
        ));

        index.add_word_to_group(colors, "Red").unwrap();
        index.add_word_to_group(colors, "blue").unwrap();
        assert!(matches!(
            index.add_word_to_group(colors, "RED"),
            Err(Error::Duplicate { .. })
        ));

        let names: Vec<_> = index
            .words_in_group(colors)
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["blue", "red"]);
        assert_eq!(
            index.group_by_name("Colors").unwrap().map(|g| g.id),
            Some(colors)
        );
        assert_eq!(index.all_groups().unwrap().len(), 1);
    }

    #[test]
    fn add_word_to_missing_group_fails_without_interning() {
        let (_tmp, index) = test_index();
        assert!(matches!(
            index.add_word_to_group(42, "orphan"),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(index.word_id("orphan").unwrap(), None);
    }

    #[test]
    fn group_observers_fire_after_commit() {
        let (_tmp, index) = test_index();
        let created = Arc::new(AtomicUsize::new(0));
        let grown = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&created);
        index.subscribe(Event::GroupInserted, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let g = Arc::clone(&grown);
        index.subscribe(Event::GroupWordInserted, move |_| {
            g.fetch_add(1, Ordering::SeqCst);
        });

        let group = index.create_group("Animals").unwrap();
        index.add_word_to_group(group, "cat").unwrap();
        let _ = index.add_word_to_group(group, "cat");
        let _ = index.create_group("Animals");

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(grown.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn phrases_keep_order_and_duplicates() {
        let (_tmp, index) = test_index();
        let id = index.create_phrase("  the cat and the hat ").unwrap();

        let phrase = index.phrase(id).unwrap().unwrap();
        assert_eq!(phrase.text, "the cat and the hat");
        assert_eq!(phrase.word_count, 5);

        let ids = index.words_in_phrase(id).unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[0], ids[3]);
        assert_eq!(Some(ids[1]), index.word_id("cat").unwrap());
    }

    #[test]
    fn empty_phrase_is_invalid() {
        let (_tmp, index) = test_index();
        assert!(matches!(
            index.create_phrase(" ... "),
            Err(Error::InvalidInput { .. })
        ));
        assert!(index.all_phrases().unwrap().is_empty());
    }

    #[test]
    fn duplicate_phrases_follow_setting() {
        let (_tmp, index) = test_index();
        index.create_phrase("once upon a time").unwrap();
        index.create_phrase("once upon a time").unwrap();
        assert_eq!(index.all_phrases().unwrap().len(), 2);

        index
            .set_setting(SETTING_ALLOW_DUPLICATE_PHRASES, "false")
            .unwrap();
        assert!(matches!(
            index.create_phrase("once upon a time"),
            Err(Error::Duplicate { .. })
        ));
        assert_eq!(index.all_phrases().unwrap().len(), 2);
    }

    #[test]
    fn settings_crud() {
        let (_tmp, index) = test_index();
        assert_eq!(index.get_setting("missing").unwrap(), None);
        assert_eq!(index.get_setting_or("missing", "x").unwrap(), "x");
        index.set_setting("k", "v").unwrap();
        assert_eq!(index.get_setting("k").unwrap(), Some("v".into()));
        assert_eq!(index.list_settings().unwrap().len(), 1);
    }

    #[test]
    fn cache_capacity_setting_must_be_numeric() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.redb");
        {
            let index = Index::open(&path).unwrap();
            index.set_setting(SETTING_CACHE_CAPACITY, "lots").unwrap();
        }
        assert!(matches!(Index::open(&path), Err(Error::Config(_))));
    }

    #[test]
    fn reset_clears_everything_but_settings() {
        let (_tmp, index) = test_index();
        index.set_setting("k", "v").unwrap();
        let old = index.intern_word("gone").unwrap();
        index.create_group("Things").unwrap();
        index.create_phrase("gone away").unwrap();

        index.reset().unwrap();

        assert!(index.cache.lock().is_empty());
        assert!(index.all_words().unwrap().is_empty());
        assert!(index.all_groups().unwrap().is_empty());
        assert!(index.all_phrases().unwrap().is_empty());
        assert_eq!(index.get_setting("k").unwrap(), Some("v".into()));
        assert_eq!(index.word(old).unwrap(), None);
        // counters restart after a reset
        assert_eq!(index.intern_word("fresh").unwrap(), 1);
    }

    fn learn_and_commit(index: &Index, word: &str) -> LearnedWords {
        let txn = index.db.begin_write().unwrap();
        let learned = {
            let mut dictionary = Dictionary::open(&txn, &index.cache).unwrap();
            dictionary.intern(word).unwrap();
            dictionary.into_learned()
        };
        txn.commit().unwrap();
        learned
    }

    #[test]
    fn words_learned_before_a_clear_are_not_cached() {
        let (_tmp, index) = test_index();

        // committed, then reset before it reached the cache
        let learned = learn_and_commit(&index, "stale");
        index.reset().unwrap();
        index.remember_words(learned);
        let fresh = index.intern_word("fresh").unwrap();
        assert_eq!(index.word_id("stale").unwrap(), None);
        assert_eq!(index.word(fresh).unwrap().unwrap().name, "fresh");

        // same with an import-style replacement
        let learned = learn_and_commit(&index, "older");
        index
            .bulk_replace(|loader| loader.insert_word_with_id(1, "replaced"))
            .unwrap();
        index.remember_words(learned);
        assert_eq!(index.word_id("older").unwrap(), None);
        assert_eq!(index.word_id("replaced").unwrap(), Some(1));
        assert_eq!(index.word_id("fresh").unwrap(), None);
    }

    #[test]
    fn snapshot_copies_committed_state() {
        let (tmp, index) = test_index();
        let word = index.intern_word("copied").unwrap();
        let group = index.create_group("Kept").unwrap();
        index.add_word_to_group(group, "copied").unwrap();

        let copy_path = tmp.path().join("copy.redb");
        index.snapshot_to(&copy_path).unwrap();

        let copy = Index::open(&copy_path).unwrap();
        assert_eq!(copy.word_id("copied").unwrap(), Some(word));
        assert_eq!(copy.words_in_group(group).unwrap().len(), 1);
        // ids keep increasing in the copy
        assert!(copy.intern_word("next").unwrap() > word);
    }

    #[test]
    fn bulk_load_is_all_or_nothing() {
        let (_tmp, index) = test_index();
        let result = index.bulk_load(|loader| {
            loader.insert_word_with_id(10, "ten")?;
            loader.insert_group_with_word_ids("Numbers", &[10, 11])
        });
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert!(index.all_words().unwrap().is_empty());
        assert!(index.all_groups().unwrap().is_empty());

        index
            .bulk_load(|loader| {
                loader.insert_word_with_id(10, "ten")?;
                loader.insert_phrase_with_word_ids("ten ten", &[10, 10])
            })
            .unwrap();
        assert_eq!(index.word_id("ten").unwrap(), Some(10));
        assert!(index.intern_word("eleven").unwrap() > 10);
    }
}

//! Structured queries over books and word appearances.
//!
//! A query is a conjunctive list of optional constraints. It is compiled
//! into a [`Plan`] that picks the cheapest access path the constraints allow
//! (postings of a known word set, the occurrence range of a book, or a full
//! scan) and keeps the coordinate constraints as residual filters.

use std::collections::{BTreeSet, HashMap};

use redb::{ReadTransaction, ReadableMultimapTable, ReadableTable};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    index::{
        self,
        Appearance,
        Book,
        GROUP_WORDS,
        Index,
        OCCURRENCES,
        POSTINGS,
        WORD_IDS,
        WORDS,
        Word,
    },
};

/// A case-insensitive LIKE-style pattern over whole values.
///
/// `_` matches one character, `%` (or `*`) any run of characters, and a
/// backslash makes the next character literal.
///
/// ```
/// use bookworm::query::NamePattern;
///
/// let p = NamePattern::new("h*b_t").unwrap();
/// assert!(p.is_match("hobbit"));
/// assert!(p.is_match("Habit"));
/// assert!(!p.is_match("hobbits"));
/// ```
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut expr = String::from("^");
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '%' | '*' => expr.push_str(".*"),
                '_' => expr.push('.'),
                '\\' => match chars.next() {
                    Some(escaped) => {
                        expr.push_str(&regex::escape(&escaped.to_string()))
                    }
                    None => expr.push_str(r"\\"),
                },
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        let regex = RegexBuilder::new(&expr)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .map_err(|_| Error::invalid("pattern", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Matches values containing `text` literally.
    pub fn contains(text: &str) -> Result<Self> {
        let mut escaped = String::with_capacity(text.len() + 2);
        escaped.push('%');
        for c in text.chars() {
            if matches!(c, '%' | '*' | '_' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped.push('%');
        Self::new(&escaped)
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Position columns of an occurrence that can be constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coordinate {
    Paragraph,
    Line,
    LineIndex,
    Sentence,
    SentenceIndex,
}

impl Coordinate {
    fn of(self, a: &Appearance) -> u32 {
        match self {
            Coordinate::Paragraph => a.paragraph,
            Coordinate::Line => a.line,
            Coordinate::LineIndex => a.line_index,
            Coordinate::Sentence => a.sentence,
            Coordinate::SentenceIndex => a.sentence_index,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Book(u64),
    Word(u64),
    Name(NamePattern),
    Group(u64),
    At(Coordinate, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Name,
    Count,
    Length,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Order {
    pub key: SortKey,
    pub direction: Direction,
}

/// Filters over stored occurrences. All predicates must hold; an empty
/// query matches every occurrence.
///
/// ```
/// use bookworm::query::{AppearanceQuery, Direction, SortKey};
///
/// let query = AppearanceQuery::new()
///     .book(1)
///     .sentence(3)
///     .unique_words(true)
///     .order_by(SortKey::Count, Direction::Desc);
/// assert_eq!(query.predicates().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct AppearanceQuery {
    predicates: Vec<Predicate>,
    unique_words: bool,
    order: Option<Order>,
}

impl AppearanceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn book(self, book_id: u64) -> Self {
        self.filter(Predicate::Book(book_id))
    }

    pub fn word(self, word_id: u64) -> Self {
        self.filter(Predicate::Word(word_id))
    }

    pub fn name(self, pattern: NamePattern) -> Self {
        self.filter(Predicate::Name(pattern))
    }

    pub fn group(self, group_id: u64) -> Self {
        self.filter(Predicate::Group(group_id))
    }

    pub fn paragraph(self, n: u32) -> Self {
        self.filter(Predicate::At(Coordinate::Paragraph, n))
    }

    pub fn line(self, n: u32) -> Self {
        self.filter(Predicate::At(Coordinate::Line, n))
    }

    pub fn line_index(self, n: u32) -> Self {
        self.filter(Predicate::At(Coordinate::LineIndex, n))
    }

    pub fn sentence(self, n: u32) -> Self {
        self.filter(Predicate::At(Coordinate::Sentence, n))
    }

    pub fn sentence_index(self, n: u32) -> Self {
        self.filter(Predicate::At(Coordinate::SentenceIndex, n))
    }

    /// Collapse the result to one row per distinct word with its count.
    pub fn unique_words(mut self, unique: bool) -> Self {
        self.unique_words = unique;
        self
    }

    pub fn order_by(mut self, key: SortKey, direction: Direction) -> Self {
        self.order = Some(Order { key, direction });
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_unique_words(&self) -> bool {
        self.unique_words
    }

    pub fn order(&self) -> Option<Order> {
        self.order
    }
}

/// How the candidate occurrences are read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Postings of these words, in the given books (or every book).
    Postings {
        words: BTreeSet<u64>,
        books: Option<BTreeSet<u64>>,
    },
    /// Every occurrence of these books.
    Books(BTreeSet<u64>),
    Scan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub access: Access,
    /// Coordinate constraints applied to every candidate.
    pub residual: Vec<(Coordinate, u32)>,
}

fn intersect(acc: &mut Option<BTreeSet<u64>>, set: BTreeSet<u64>) {
    *acc = Some(match acc.take() {
        Some(current) => current.intersection(&set).copied().collect(),
        None => set,
    });
}

/// Resolve word, name and group predicates to a word set and pick an
/// access path.
pub(crate) fn compile(
    txn: &ReadTransaction,
    predicates: &[Predicate],
) -> Result<Plan> {
    let mut books = None;
    let mut words = None;
    let mut residual = Vec::new();

    for predicate in predicates {
        match predicate {
            Predicate::Book(id) => intersect(&mut books, BTreeSet::from([*id])),
            Predicate::Word(id) => intersect(&mut words, BTreeSet::from([*id])),
            Predicate::Group(id) => {
                let members = txn.open_multimap_table(GROUP_WORDS)?;
                let mut set = BTreeSet::new();
                for member in members.get(*id)? {
                    set.insert(member?.value());
                }
                intersect(&mut words, set);
            }
            Predicate::Name(pattern) => {
                let table = txn.open_table(WORD_IDS)?;
                let mut set = BTreeSet::new();
                for entry in table.iter()? {
                    let (name, id) = entry?;
                    if pattern.is_match(name.value()) {
                        set.insert(id.value());
                    }
                }
                intersect(&mut words, set);
            }
            Predicate::At(coordinate, value) => {
                residual.push((*coordinate, *value))
            }
        }
    }

    let access = match (words, books) {
        (Some(words), books) => Access::Postings { words, books },
        (None, Some(books)) => Access::Books(books),
        (None, None) => Access::Scan,
    };
    Ok(Plan { access, residual })
}

fn execute(txn: &ReadTransaction, plan: &Plan) -> Result<Vec<Appearance>> {
    let occurrences = txn.open_table(OCCURRENCES)?;
    let mut found = Vec::new();

    match &plan.access {
        Access::Postings { words, books } => {
            let postings = txn.open_multimap_table(POSTINGS)?;
            let book_ids: Vec<u64> = match books {
                Some(books) => books.iter().copied().collect(),
                None => index::all_books_in(txn)?.iter().map(|b| b.id).collect(),
            };
            for &book_id in &book_ids {
                for &word_id in words {
                    for word_index in postings.get((book_id, word_id))? {
                        let word_index = word_index?.value();
                        if let Some(row) = occurrences.get((book_id, word_index))? {
                            found.push(Appearance::from_row(
                                book_id,
                                word_index,
                                row.value(),
                            ));
                        }
                    }
                }
            }
        }
        Access::Books(books) => {
            for &book_id in books {
                found.extend(index::book_appearances(txn, book_id)?);
            }
        }
        Access::Scan => {
            for entry in occurrences.iter()? {
                let (key, row) = entry?;
                let (book_id, word_index) = key.value();
                found.push(Appearance::from_row(book_id, word_index, row.value()));
            }
        }
    }

    found.retain(|a| {
        plan.residual
            .iter()
            .all(|(coordinate, value)| coordinate.of(a) == *value)
    });
    found.sort_by_key(|a| (a.book_id, a.word_index));
    Ok(found)
}

/// One matching occurrence with its word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppearanceRow {
    pub word: String,
    #[serde(flatten)]
    pub appearance: Appearance,
}

/// One distinct word of a unique-words search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordCount {
    #[serde(flatten)]
    pub word: Word,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SearchRows {
    Appearances(Vec<AppearanceRow>),
    Words(Vec<WordCount>),
}

impl SearchRows {
    pub fn len(&self) -> usize {
        match self {
            SearchRows::Appearances(rows) => rows.len(),
            SearchRows::Words(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Book filters. Each present filter must match; text filters match
/// anywhere in the value, case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct BookQuery {
    pub title: Option<String>,
    pub author: Option<String>,
    pub path: Option<String>,
    /// Only books containing a word matching this pattern.
    pub word: Option<NamePattern>,
}

fn word_names(
    txn: &ReadTransaction,
    ids: impl IntoIterator<Item = u64>,
) -> Result<HashMap<u64, Word>> {
    let table = txn.open_table(WORDS)?;
    let mut names = HashMap::new();
    for id in ids {
        if names.contains_key(&id) {
            continue;
        }
        if let Some(name) = table.get(id)? {
            names.insert(id, Word::new(id, name.value()));
        }
    }
    Ok(names)
}

fn sort_words(rows: &mut [WordCount], order: Order) {
    rows.sort_by(|a, b| {
        let ord = match order.key {
            SortKey::Name => a.word.name.cmp(&b.word.name),
            SortKey::Count => a.count.cmp(&b.count),
            SortKey::Length => a.word.length.cmp(&b.word.length),
        }
        .then_with(|| a.word.name.cmp(&b.word.name));
        match order.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    });
}

impl Index {
    /// Run an appearance query.
    ///
    /// Without ordering, occurrences come in (book, word index) order and
    /// unique words by name. With ordering, occurrences are sorted by their
    /// word's name, length or number of matching occurrences, keeping
    /// (book, word index) order among equal keys.
    pub fn search_word_appearances(
        &self,
        query: &AppearanceQuery,
    ) -> Result<SearchRows> {
        let txn = self.begin_read()?;
        let plan = compile(&txn, query.predicates())?;
        tracing::debug!(?plan, unique = query.is_unique_words(), "appearance search");

        let found = execute(&txn, &plan)?;
        let words = word_names(&txn, found.iter().map(|a| a.word_id))?;

        let mut counts: HashMap<u64, u64> = HashMap::new();
        for a in &found {
            *counts.entry(a.word_id).or_default() += 1;
        }

        if query.is_unique_words() {
            let mut rows: Vec<WordCount> = counts
                .iter()
                .filter_map(|(id, &count)| {
                    words.get(id).map(|word| WordCount {
                        word: word.clone(),
                        count,
                    })
                })
                .collect();
            sort_words(&mut rows, query.order().unwrap_or_default());
            return Ok(SearchRows::Words(rows));
        }

        let mut rows: Vec<AppearanceRow> = found
            .into_iter()
            .filter_map(|appearance| {
                words.get(&appearance.word_id).map(|word| AppearanceRow {
                    word: word.name.clone(),
                    appearance,
                })
            })
            .collect();

        if let Some(order) = query.order() {
            rows.sort_by(|a, b| {
                let ord = match order.key {
                    SortKey::Name => a.word.cmp(&b.word),
                    SortKey::Count => counts[&a.appearance.word_id]
                        .cmp(&counts[&b.appearance.word_id]),
                    SortKey::Length => a.word.chars().count().cmp(&b.word.chars().count()),
                };
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        Ok(SearchRows::Appearances(rows))
    }

    /// Books matching every given filter, ordered by id.
    pub fn search_books(&self, query: &BookQuery) -> Result<Vec<Book>> {
        let txn = self.begin_read()?;
        let title = query.title.as_deref().map(NamePattern::contains).transpose()?;
        let author = query.author.as_deref().map(NamePattern::contains).transpose()?;
        let path = query.path.as_deref().map(NamePattern::contains).transpose()?;

        let mut books: Vec<Book> = index::all_books_in(&txn)?
            .into_iter()
            .filter(|book| {
                title.as_ref().is_none_or(|p| p.is_match(&book.title))
                    && author.as_ref().is_none_or(|p| p.is_match(&book.author))
                    && path
                        .as_ref()
                        .is_none_or(|p| p.is_match(&book.path.to_string_lossy()))
            })
            .collect();

        if let Some(pattern) = &query.word {
            let plan = compile(&txn, &[Predicate::Name(pattern.clone())])?;
            let Access::Postings { words, .. } = plan.access else {
                return Ok(Vec::new());
            };
            let postings = txn.open_multimap_table(POSTINGS)?;
            let mut keep = Vec::with_capacity(books.len());
            for book in books {
                let mut contains = false;
                for &word_id in &words {
                    if postings.get((book.id, word_id))?.next().is_some() {
                        contains = true;
                        break;
                    }
                }
                if contains {
                    keep.push(book);
                }
            }
            books = keep;
        }

        books.sort_by_key(|b| b.id);
        Ok(books)
    }
}

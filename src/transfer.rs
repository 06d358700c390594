//! Whole-index export and import as an XML document.
//!
//! ```xml
//! <tables>
//!   <words><word id="1">hello</word></words>
//!   <books>
//!     <book id="1">
//!       <title>Hello</title><author>Anon</author><path>/b.txt</path>
//!       <size>12</size><date>2024-01-01T00:00:00+00:00</date>
//!       <body>
//!         <paragraph><sentence><appr refid="1">1:0</appr></sentence></paragraph>
//!       </body>
//!     </book>
//!   </books>
//!   <groups><group><name>Greetings</name><wordref refid="1"/></group></groups>
//!   <phrases><phrase><text>hello</text><wordref refid="1"/></phrase></phrases>
//! </tables>
//! ```
//!
//! An `appr` is one occurrence; its text is `line:line_offset`. Word indexes,
//! line indexes and the paragraph and sentence numbers are implied by the
//! document order, so a book is rebuilt without its source file. An optional
//! `len` attribute carries the written length of the word when it differs
//! from the dictionary form. Word ids are kept; book, group and phrase ids
//! are reassigned.
//!
//! Importing notifies the index observers once per inserted book, group,
//! group word and phrase, after the replacement has committed.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use quick_xml::{
    Reader,
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use redb::{ReadableMultimapTable, ReadableTable};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    grammar,
    index::{self, Appearance, GROUP_WORDS, GROUPS, Index, PHRASES, WORDS},
    observers,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub words: usize,
    pub books: usize,
    pub appearances: usize,
    pub groups: usize,
    pub phrases: usize,
}

fn text_element<W: Write>(w: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn word_refs<W: Write>(w: &mut Writer<W>, ids: &[u64]) -> Result<()> {
    for id in ids {
        let mut wordref = BytesStart::new("wordref");
        wordref.push_attribute(("refid", id.to_string().as_str()));
        w.write_event(Event::Empty(wordref))?;
    }
    Ok(())
}

fn start<W: Write>(w: &mut Writer<W>, name: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    Ok(())
}

fn end<W: Write>(w: &mut Writer<W>, name: &str) -> Result<()> {
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Books parsed from an export document.
#[derive(Debug, Default)]
struct BookEntry {
    title: String,
    author: String,
    path: String,
    size: u64,
    date: Option<String>,
    /// paragraph -> sentence -> (word id, line, line offset, written length)
    paragraphs: Vec<Vec<Vec<(u64, u32, u32, Option<u32>)>>>,
}

#[derive(Debug, Default)]
struct Document {
    words: Vec<(u64, String)>,
    books: Vec<BookEntry>,
    groups: Vec<(String, Vec<u64>)>,
    phrases: Vec<(String, Vec<u64>)>,
}

fn malformed(message: impl Into<String>) -> Error {
    Error::Import(message.into())
}

fn attribute<T: std::str::FromStr>(
    element: &BytesStart<'_>,
    key: &str,
) -> Result<Option<T>> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr.unescape_value()?;
            return value
                .parse()
                .map(Some)
                .map_err(|_| malformed(format!("bad {key} attribute {value:?}")));
        }
    }
    Ok(None)
}

fn id_attribute(element: &BytesStart<'_>, key: &str) -> Result<u64> {
    attribute(element, key)?.ok_or_else(|| {
        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        malformed(format!("<{name}> without {key} attribute"))
    })
}

fn parse_position(text: &str) -> Result<(u32, u32)> {
    let bad = || malformed(format!("bad appearance position {text:?}"));
    let (line, offset) = text.split_once(':').ok_or_else(bad)?;
    Ok((
        line.trim().parse().map_err(|_| bad())?,
        offset.trim().parse().map_err(|_| bad())?,
    ))
}

/// Collects a [`Document`] from reader events.
#[derive(Default)]
struct Parser {
    doc: Document,
    stack: Vec<String>,
    word: Option<u64>,
    book: Option<BookEntry>,
    appr: Option<(u64, Option<u32>)>,
    group: Option<(String, Vec<u64>)>,
    phrase: Option<(String, Vec<u64>)>,
}

impl Parser {
    fn current_sentence(&mut self) -> Result<&mut Vec<(u64, u32, u32, Option<u32>)>> {
        self.book
            .as_mut()
            .and_then(|b| b.paragraphs.last_mut())
            .and_then(|p| p.last_mut())
            .ok_or_else(|| malformed("<appr> outside of a sentence"))
    }

    fn open(&mut self, name: &str, element: &BytesStart<'_>) -> Result<()> {
        match name {
            "word" => self.word = Some(id_attribute(element, "id")?),
            "book" => self.book = Some(BookEntry::default()),
            "paragraph" => self
                .book
                .as_mut()
                .ok_or_else(|| malformed("<paragraph> outside of a book"))?
                .paragraphs
                .push(Vec::new()),
            "sentence" => self
                .book
                .as_mut()
                .and_then(|b| b.paragraphs.last_mut())
                .ok_or_else(|| malformed("<sentence> outside of a paragraph"))?
                .push(Vec::new()),
            "appr" => {
                self.current_sentence()?;
                let word = id_attribute(element, "refid")?;
                self.appr = Some((word, attribute(element, "len")?));
            }
            "group" => self.group = Some(Default::default()),
            "phrase" => self.phrase = Some(Default::default()),
            "wordref" => {
                let id = id_attribute(element, "refid")?;
                if let Some((_, ids)) = self.phrase.as_mut() {
                    ids.push(id);
                } else if let Some((_, ids)) = self.group.as_mut() {
                    ids.push(id);
                } else {
                    return Err(malformed("<wordref> outside of a group or phrase"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        let Some(parent) = self.stack.last() else {
            return Ok(());
        };
        match parent.as_str() {
            "word" => {
                let id = self
                    .word
                    .take()
                    .ok_or_else(|| malformed("word text outside of <word>"))?;
                self.doc.words.push((id, text.to_string()));
            }
            "appr" => {
                let (word, length) = self
                    .appr
                    .take()
                    .ok_or_else(|| malformed("appearance text outside of <appr>"))?;
                let (line, offset) = parse_position(text)?;
                self.current_sentence()?.push((word, line, offset, length));
            }
            "name" => {
                if let Some((name, _)) = self.group.as_mut() {
                    *name = text.to_string();
                }
            }
            "text" => {
                if let Some((phrase, _)) = self.phrase.as_mut() {
                    *phrase = text.to_string();
                }
            }
            field => {
                if let Some(book) = self.book.as_mut() {
                    match field {
                        "title" => book.title = text.to_string(),
                        "author" => book.author = text.to_string(),
                        "path" => book.path = text.to_string(),
                        "size" => {
                            book.size = text
                                .parse()
                                .map_err(|_| malformed(format!("bad size {text:?}")))?
                        }
                        "date" => book.date = Some(text.to_string()),
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<()> {
        match name {
            "word" if self.word.is_some() => Err(malformed("empty <word>")),
            "appr" if self.appr.is_some() => Err(malformed("empty <appr>")),
            "book" => {
                let book = self
                    .book
                    .take()
                    .ok_or_else(|| malformed("unbalanced </book>"))?;
                self.doc.books.push(book);
                Ok(())
            }
            "group" => {
                if let Some(group) = self.group.take() {
                    self.doc.groups.push(group);
                }
                Ok(())
            }
            "phrase" => {
                if let Some(phrase) = self.phrase.take() {
                    self.doc.phrases.push(phrase);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn parse_document<R: BufRead>(input: R) -> Result<Document> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);

    let mut parser = Parser::default();
    let mut buf = Vec::new();
    let mut seen_root = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if parser.stack.is_empty() {
                    if name != "tables" {
                        return Err(malformed(format!("unexpected root <{name}>")));
                    }
                    seen_root = true;
                }
                parser.open(&name, &e)?;
                parser.stack.push(name);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                parser.open(&name, &e)?;
                parser.close(&name)?;
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                parser.text(&text)?;
            }
            Event::End(_) => {
                let name = parser
                    .stack
                    .pop()
                    .ok_or_else(|| malformed("unbalanced end tag"))?;
                parser.close(&name)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(malformed("missing <tables> root"));
    }
    if !parser.stack.is_empty() {
        return Err(malformed("document ended inside an element"));
    }
    Ok(parser.doc)
}

fn parse_date(text: Option<&str>) -> Result<DateTime<Utc>> {
    match text {
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|_| malformed(format!("bad date {text:?}"))),
        None => Ok(Utc::now()),
    }
}

/// Expand a parsed book body back into occurrences. Appearances without a
/// written length take the length of their dictionary word.
fn book_appearances(
    book_id: u64,
    entry: &BookEntry,
    lengths: &HashMap<u64, u32>,
) -> Vec<Appearance> {
    let mut appearances = Vec::new();
    let mut word_index = 0u64;
    let mut sentence = 0u32;
    let mut last_line = None;
    let mut line_index = 0u32;

    for (p, paragraph) in entry.paragraphs.iter().enumerate() {
        for words in paragraph {
            if words.is_empty() {
                continue;
            }
            sentence += 1;
            for (i, &(word_id, line, line_offset, length)) in words.iter().enumerate() {
                word_index += 1;
                if last_line != Some(line) {
                    last_line = Some(line);
                    line_index = 0;
                }
                line_index += 1;
                appearances.push(Appearance {
                    book_id,
                    word_id,
                    word_index,
                    paragraph: p as u32 + 1,
                    line,
                    line_index,
                    line_offset,
                    sentence,
                    sentence_index: i as u32 + 1,
                    length: length
                        .or_else(|| lengths.get(&word_id).copied())
                        .unwrap_or_default(),
                });
            }
        }
    }
    appearances
}

impl Index {
    /// Write the whole index as an XML document.
    pub fn export_xml<W: Write>(&self, out: W) -> Result<TransferSummary> {
        let txn = self.begin_read()?;
        let mut summary = TransferSummary::default();
        let mut w = Writer::new_with_indent(out, b' ', 2);

        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        start(&mut w, "tables")?;

        let mut lengths = HashMap::new();
        start(&mut w, "words")?;
        for entry in txn.open_table(WORDS)?.iter()? {
            let (id, name) = entry?;
            lengths.insert(id.value(), grammar::word_length(name.value()));
            let mut word = BytesStart::new("word");
            word.push_attribute(("id", id.value().to_string().as_str()));
            w.write_event(Event::Start(word))?;
            w.write_event(Event::Text(BytesText::new(name.value())))?;
            end(&mut w, "word")?;
            summary.words += 1;
        }
        end(&mut w, "words")?;

        start(&mut w, "books")?;
        for book in index::all_books_in(&txn)? {
            let mut element = BytesStart::new("book");
            element.push_attribute(("id", book.id.to_string().as_str()));
            w.write_event(Event::Start(element))?;
            text_element(&mut w, "title", &book.title)?;
            text_element(&mut w, "author", &book.author)?;
            text_element(&mut w, "path", &book.path.to_string_lossy())?;
            text_element(&mut w, "size", &book.size.to_string())?;
            text_element(&mut w, "date", &book.created_at.to_rfc3339())?;

            start(&mut w, "body")?;
            let mut open: Option<(u32, u32)> = None;
            for a in index::book_appearances(&txn, book.id)? {
                match open {
                    Some((paragraph, sentence)) if paragraph == a.paragraph => {
                        if sentence != a.sentence {
                            end(&mut w, "sentence")?;
                            start(&mut w, "sentence")?;
                        }
                    }
                    Some(_) => {
                        end(&mut w, "sentence")?;
                        end(&mut w, "paragraph")?;
                        start(&mut w, "paragraph")?;
                        start(&mut w, "sentence")?;
                    }
                    None => {
                        start(&mut w, "paragraph")?;
                        start(&mut w, "sentence")?;
                    }
                }
                open = Some((a.paragraph, a.sentence));

                let mut appr = BytesStart::new("appr");
                appr.push_attribute(("refid", a.word_id.to_string().as_str()));
                if lengths.get(&a.word_id) != Some(&a.length) {
                    appr.push_attribute(("len", a.length.to_string().as_str()));
                }
                w.write_event(Event::Start(appr))?;
                let position = format!("{}:{}", a.line, a.line_offset);
                w.write_event(Event::Text(BytesText::new(&position)))?;
                end(&mut w, "appr")?;
                summary.appearances += 1;
            }
            if open.is_some() {
                end(&mut w, "sentence")?;
                end(&mut w, "paragraph")?;
            }
            end(&mut w, "body")?;
            end(&mut w, "book")?;
            summary.books += 1;
        }
        end(&mut w, "books")?;

        start(&mut w, "groups")?;
        let members = txn.open_multimap_table(GROUP_WORDS)?;
        for entry in txn.open_table(GROUPS)?.iter()? {
            let (id, name) = entry?;
            let mut ids = Vec::new();
            for member in members.get(id.value())? {
                ids.push(member?.value());
            }
            start(&mut w, "group")?;
            text_element(&mut w, "name", name.value())?;
            word_refs(&mut w, &ids)?;
            end(&mut w, "group")?;
            summary.groups += 1;
        }
        end(&mut w, "groups")?;

        start(&mut w, "phrases")?;
        for entry in txn.open_table(PHRASES)?.iter()? {
            let (id, text) = entry?;
            start(&mut w, "phrase")?;
            text_element(&mut w, "text", text.value())?;
            word_refs(&mut w, &index::phrase_word_ids(&txn, id.value())?)?;
            end(&mut w, "phrase")?;
            summary.phrases += 1;
        }
        end(&mut w, "phrases")?;

        end(&mut w, "tables")?;
        w.into_inner().flush()?;

        tracing::info!(?summary, "exported index");
        Ok(summary)
    }

    pub fn export_to_path(&self, path: &Path) -> Result<TransferSummary> {
        let file = File::create(path)?;
        self.export_xml(BufWriter::new(file))
    }

    /// Replace the content of this index with an exported document.
    ///
    /// The document is parsed completely before anything is written, and
    /// the replacement is a single transaction: a malformed or inconsistent
    /// document leaves the index untouched. Settings are kept.
    pub fn import_xml<R: BufRead>(&self, input: R) -> Result<TransferSummary> {
        let doc = parse_document(input)?;

        let lengths: HashMap<u64, u32> = doc
            .words
            .iter()
            .map(|(id, name)| (*id, grammar::word_length(name)))
            .collect();

        let (summary, inserted) = self.bulk_replace(|loader| {
            let mut summary = TransferSummary::default();
            let mut inserted = Vec::new();
            for (id, name) in &doc.words {
                loader.insert_word_with_id(*id, name)?;
                summary.words += 1;
            }
            for entry in &doc.books {
                let book = loader.insert_book(
                    &entry.title,
                    &entry.author,
                    &PathBuf::from(&entry.path),
                    entry.size,
                    parse_date(entry.date.as_deref())?,
                )?;
                let appearances = book_appearances(book.id, entry, &lengths);
                loader.insert_appearances(&appearances)?;
                inserted.push((observers::Event::BookInserted, book.id));
                summary.appearances += appearances.len();
                summary.books += 1;
            }
            for (name, ids) in &doc.groups {
                let id = loader.insert_group_with_word_ids(name, ids)?;
                inserted.push((observers::Event::GroupInserted, id));
                inserted.extend(ids.iter().map(|_| (observers::Event::GroupWordInserted, id)));
                summary.groups += 1;
            }
            for (text, ids) in &doc.phrases {
                let id = loader.insert_phrase_with_word_ids(text, ids)?;
                inserted.push((observers::Event::PhraseInserted, id));
                summary.phrases += 1;
            }
            Ok((summary, inserted))
        })?;

        tracing::info!(?summary, "imported index");
        for (event, id) in inserted {
            self.notify(event, id);
        }
        Ok(summary)
    }

    pub fn import_from_path(&self, path: &Path) -> Result<TransferSummary> {
        let file = File::open(path).map_err(|e| Error::SourceNotFound {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.import_xml(BufReader::new(file))
    }
}

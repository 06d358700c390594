//! bookworm - a positional word index for plain-text books.
//!
//! Every word of every ingested book is stored together with its position
//! (word index, paragraph, line, sentence and offsets), backed by a single
//! [redb](https://github.com/cberner/redb) file. On top of that index you
//! can run structured word queries, search stored phrases, keep named word
//! groups, compute statistics and move whole indexes around as XML.
//!
//! # Quick start
//!
//! ```no_run
//! use bookworm::{Index, NewBook};
//! use bookworm::query::{AppearanceQuery, NamePattern};
//!
//! let index = Index::open(std::path::Path::new("books.redb")).unwrap();
//! let book = index
//!     .ingest_book(&NewBook::new("Moby Dick", "Herman Melville", "moby.txt"))
//!     .unwrap();
//!
//! let query = AppearanceQuery::new()
//!     .book(book.id)
//!     .name(NamePattern::new("whal%").unwrap());
//! let rows = index.search_word_appearances(&query).unwrap();
//! println!("{} matches", rows.len());
//!
//! let phrase = index.create_phrase("call me ishmael").unwrap();
//! for m in index.find_phrase(phrase).unwrap() {
//!     let (start, end) = index.phrase_span(&m).unwrap();
//!     println!("line {} offset {}..{}", start.line, start.offset, end.offset);
//! }
//! ```

pub mod data_dir;
pub mod error;
pub mod grammar;
pub mod index;
pub mod ingestion;
pub mod observers;
pub mod phrase;
pub mod query;
pub mod session;
pub mod source;
pub mod stats;
pub mod tokenizer;
pub mod transfer;
pub mod walker;
pub mod word_cache;

pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use index::{Appearance, Book, Group, Index, Phrase, Word};
pub use ingestion::{BatchReport, CancelFlag, NewBook};
pub use observers::Event;
pub use session::Session;

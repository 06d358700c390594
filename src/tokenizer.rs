//! Positional segmentation of book text into word occurrences.
//!
//! The text is processed line by line. Each line is split into sentence
//! fragments on `.`, `?` and `!`, and every grammar word of a fragment
//! becomes one [`Occurrence`] carrying its paragraph, line, sentence and
//! offset coordinates.
//!
//! Segmentation rules:
//!
//! - A line without any word marks a gap between paragraphs; the next line
//!   that has words opens a new paragraph. Consecutive word-less lines count
//!   as one gap.
//! - A sentence terminator closes the open sentence. A paragraph gap closes
//!   it too. A new sentence number is only taken when the next word is
//!   emitted, so terminators without following words never produce empty
//!   sentences and sentence numbers stay gapless.
//! - A sentence left open at the end of a line continues on the next line.
//! - `line_offset` is the sum of the character lengths of the preceding
//!   fragments on the line (each removed terminator counting as one
//!   character) plus the character offset of the word inside its fragment.

use std::collections::VecDeque;

use serde::Serialize;

use crate::grammar::WORD_IN_TEXT;

const SENTENCE_TERMINATORS: [char; 3] = ['.', '?', '!'];

/// One concrete appearance of a word in a text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    /// The word as written in the source (not case-folded).
    pub word: String,
    /// 1-based, gapless position of the word in the whole text.
    pub word_index: u64,
    pub paragraph: u32,
    pub line: u32,
    /// 1-based position of the word within its line.
    pub line_index: u32,
    /// 0-based character offset of the word's first character.
    pub line_offset: u32,
    pub sentence: u32,
    /// 1-based position of the word within its sentence.
    pub sentence_index: u32,
}

impl Occurrence {
    /// The dictionary form of the word.
    pub fn canonical(&self) -> String {
        self.word.to_lowercase()
    }
}

/// State carried from one line to the next.
#[derive(Debug, Default, Clone)]
struct SegmentState {
    word_index: u64,
    paragraph: u32,
    between_paragraphs: bool,
    sentence: u32,
    sentence_index: u32,
    sentence_open: bool,
}

impl SegmentState {
    fn new() -> Self {
        Self {
            between_paragraphs: true,
            ..Self::default()
        }
    }

    fn close_sentence(&mut self) {
        self.sentence_open = false;
    }

    /// Called for the first word of a line.
    fn enter_word_line(&mut self) {
        if self.between_paragraphs {
            self.paragraph += 1;
            self.between_paragraphs = false;
            self.close_sentence();
        }
    }

    /// Advance the word counters and return (word_index, sentence, sentence_index).
    fn next_word(&mut self) -> (u64, u32, u32) {
        if !self.sentence_open {
            self.sentence += 1;
            self.sentence_index = 0;
            self.sentence_open = true;
        }
        self.word_index += 1;
        self.sentence_index += 1;
        (self.word_index, self.sentence, self.sentence_index)
    }
}

/// Lazy, single-pass iterator over the occurrences of a text.
///
/// ```
/// use bookworm::tokenizer::Tokenizer;
///
/// let words: Vec<_> = Tokenizer::new("Hello. World")
///     .map(|o| (o.canonical(), o.sentence, o.sentence_index))
///     .collect();
/// assert_eq!(words, vec![("hello".into(), 1, 1), ("world".into(), 2, 1)]);
/// ```
pub struct Tokenizer<'a> {
    lines: std::str::Split<'a, char>,
    line: u32,
    state: SegmentState,
    pending: VecDeque<Occurrence>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.split('\n'),
            line: 0,
            state: SegmentState::new(),
            pending: VecDeque::new(),
        }
    }

    /// Number of source lines consumed so far.
    pub fn lines_read(&self) -> u32 {
        self.line
    }

    fn segment_line(&mut self, line: &str) {
        self.line += 1;
        let line = line.strip_suffix('\r').unwrap_or(line);

        let mut line_index = 0u32;
        let mut fragment_base = 0u32;
        let mut has_words = false;

        for (fragment_number, fragment) in
            line.split(SENTENCE_TERMINATORS).enumerate()
        {
            if fragment_number > 0 {
                self.state.close_sentence();
            }

            let mut scanned_bytes = 0usize;
            let mut scanned_chars = 0u32;
            for caps in WORD_IN_TEXT.captures_iter(fragment) {
                let Some(m) = caps.get(1) else { continue };

                if !has_words {
                    has_words = true;
                    self.state.enter_word_line();
                }

                scanned_chars +=
                    fragment[scanned_bytes..m.start()].chars().count() as u32;
                scanned_bytes = m.start();

                let (word_index, sentence, sentence_index) =
                    self.state.next_word();
                line_index += 1;

                self.pending.push_back(Occurrence {
                    word: m.as_str().to_string(),
                    word_index,
                    paragraph: self.state.paragraph,
                    line: self.line,
                    line_index,
                    line_offset: fragment_base + scanned_chars,
                    sentence,
                    sentence_index,
                });
            }

            fragment_base += fragment.chars().count() as u32 + 1;
        }

        if !has_words {
            self.state.between_paragraphs = true;
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        loop {
            if let Some(occurrence) = self.pending.pop_front() {
                return Some(occurrence);
            }
            let line = self.lines.next()?;
            self.segment_line(line);
        }
    }
}

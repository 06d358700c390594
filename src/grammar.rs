//! Word and title grammars shared by the tokenizer, the dictionary and the
//! book/group validators.
//!
//! A *word* is a run of word characters (`\w`) that may contain apostrophes
//! but neither starts nor ends with one: `\w(?:[\w']*\w)?`. Inside running
//! text a word must be preceded by the start of the fragment or by a
//! non-word character (which includes quote marks).

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Group names that collide with the "no filter" entries of group pickers.
pub const RESERVED_GROUP_NAMES: &[&str] = &["None", "All"];

const WORD: &str = r"\w(?:[\w']*\w)?";

/// Finds words inside running text. Capture group 1 is the word itself,
/// the optional leading character is the boundary.
pub(crate) static WORD_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?:^|\W)({WORD})")).expect("word pattern compiles")
});

static SINGLE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{WORD}$")).expect("word pattern compiles")
});

static MULTIPLE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{WORD}(?:\W+{WORD})*$"))
        .expect("word pattern compiles")
});

static WORD_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(WORD).expect("word pattern compiles"));

/// Returns true when `word` is exactly one grammar word.
pub fn is_word(word: &str) -> bool {
    SINGLE_WORD.is_match(word)
}

/// Case-fold and trim `word`, then validate it against the word grammar.
///
/// ```
/// use bookworm::grammar::canonical_word;
///
/// assert_eq!(canonical_word("  Hobbit's ").unwrap(), "hobbit's");
/// assert!(canonical_word("two words").is_err());
/// ```
pub fn canonical_word(word: &str) -> Result<String> {
    let canonical = word.trim().to_lowercase();
    if !is_word(&canonical) {
        return Err(Error::invalid("word", word));
    }
    Ok(canonical)
}

/// Number of characters of a word.
pub fn word_length(word: &str) -> u32 {
    word.chars().count() as u32
}

/// Split free text into its grammar words, in order, case-folded.
/// Duplicates are kept.
pub fn split_words(text: &str) -> Vec<String> {
    WORD_IN_TEXT
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn is_title_cased_word(word: &str) -> bool {
    let mut chars = word.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    !first.is_lowercase() && chars.all(|c| !c.is_uppercase())
}

/// Validate a title-like value (book title, author, group name).
///
/// The trimmed value must be one or more grammar words separated by
/// non-word characters, and every word must be title-cased. Returns the
/// trimmed value.
pub fn validate_title(kind: &'static str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    let valid = MULTIPLE_WORDS.is_match(trimmed)
        && WORD_ONLY
            .find_iter(trimmed)
            .all(|m| is_title_cased_word(m.as_str()));
    if !valid {
        return Err(Error::invalid(kind, value));
    }
    Ok(trimmed.to_string())
}

/// Title-case every grammar word of `value`, keeping the separators.
///
/// ```
/// use bookworm::grammar::title_case;
///
/// assert_eq!(title_case("the lord-of the RINGS"), "The Lord-Of The Rings");
/// ```
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for m in WORD_ONLY.find_iter(value) {
        out.push_str(&value[last..m.start()]);
        let mut chars = m.as_str().chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.extend(chars.flat_map(char::to_lowercase));
        }
        last = m.end();
    }
    out.push_str(&value[last..]);
    out
}

/// Validate a words-group name: title grammar plus the reserved names.
pub fn validate_group_name(name: &str) -> Result<String> {
    let name = validate_title("group name", name)?;
    if RESERVED_GROUP_NAMES.contains(&name.as_str()) {
        return Err(Error::invalid("group name", name));
    }
    Ok(name)
}

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "bookworm",
    about = "A positional word index for plain-text books"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Use this index file instead of <data dir>/index.redb
    #[arg(long, global = true)]
    pub index: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest and inspect books
    Book {
        #[command(subcommand)]
        action: BookAction,
    },
    /// Query word appearances
    Word {
        #[command(subcommand)]
        action: WordAction,
    },
    /// Manage named word groups
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Manage and search stored phrases
    Phrase {
        #[command(subcommand)]
        action: PhraseAction,
    },
    /// Resolve a sentence position to a line and character offset
    Locate(LocateArgs),
    /// Show index statistics
    Stats(StatsArgs),
    /// Write the whole index as an XML document
    Export(ExportArgs),
    /// Replace the index with the contents of an XML document
    Import(ImportArgs),
    /// Start over with an empty index
    New {
        /// Index file to create (defaults to the current index)
        path: Option<PathBuf>,
    },
    /// Copy the current index to a new file
    SaveAs {
        /// Destination index file
        path: PathBuf,
    },
    /// Read or change per-index settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Book subcommands --

#[derive(Debug, Subcommand)]
pub enum BookAction {
    /// Ingest one text file
    Add {
        /// Path to the UTF-8 text file
        path: PathBuf,
        /// Title-cased book title (e.g. "Moby Dick")
        #[arg(long)]
        title: String,
        /// Title-cased author name
        #[arg(long)]
        author: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ingest every .txt file under a directory
    AddDir {
        /// Directory to scan
        path: PathBuf,
        /// Author recorded for every book
        #[arg(long)]
        author: String,
        /// Only ingest files whose relative path matches this glob
        #[arg(long)]
        glob: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List books, optionally filtered
    List(BookListArgs),
    /// Remove a book and its occurrences
    Remove {
        /// Book id
        id: u64,
    },
    /// Show one book
    Show {
        /// Book id
        id: u64,
        /// Print the stored words in order instead of the metadata
        #[arg(long)]
        words: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Parser)]
pub struct BookListArgs {
    /// Title contains this text
    #[arg(long)]
    pub title: Option<String>,

    /// Author contains this text
    #[arg(long)]
    pub author: Option<String>,

    /// Path contains this text
    #[arg(long)]
    pub path: Option<String>,

    /// Book contains a word matching this pattern (`%`/`*` any, `_` one)
    #[arg(long)]
    pub word: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Word subcommands --

#[derive(Debug, Subcommand)]
pub enum WordAction {
    /// Search word appearances
    Search(WordSearchArgs),
    /// List the dictionary
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OrderKey {
    Name,
    Count,
    Length,
}

#[derive(Debug, Parser)]
pub struct WordSearchArgs {
    /// Word name pattern (`%`/`*` any, `_` one, `\` escapes)
    pub pattern: Option<String>,

    /// Only this book
    #[arg(short = 'b', long)]
    pub book: Option<u64>,

    /// Only words of this group
    #[arg(short = 'g', long)]
    pub group: Option<String>,

    #[arg(long)]
    pub paragraph: Option<u32>,

    #[arg(long)]
    pub line: Option<u32>,

    /// Position within the line
    #[arg(long)]
    pub line_index: Option<u32>,

    #[arg(long)]
    pub sentence: Option<u32>,

    /// Position within the sentence
    #[arg(long)]
    pub sentence_index: Option<u32>,

    /// One row per distinct word with its number of appearances
    #[arg(short = 'u', long)]
    pub unique: bool,

    /// Sort results
    #[arg(long, value_enum)]
    pub order: Option<OrderKey>,

    /// Sort in descending order
    #[arg(long)]
    pub desc: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Group subcommands --

#[derive(Debug, Subcommand)]
pub enum GroupAction {
    /// Create an empty group
    Create {
        /// Group name
        name: String,
    },
    /// Add words to a group
    Add {
        /// Group name
        group: String,
        /// Words to add
        #[arg(required = true)]
        words: Vec<String>,
    },
    /// List all groups
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the words of a group
    Show {
        /// Group name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Phrase subcommands --

#[derive(Debug, Subcommand)]
pub enum PhraseAction {
    /// Store a phrase
    Add {
        /// Phrase text
        text: String,
    },
    /// List stored phrases
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find every occurrence of a stored phrase
    Find {
        /// Phrase id
        id: u64,
        /// Only this book
        #[arg(short = 'b', long)]
        book: Option<u64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Locate --

#[derive(Debug, Parser)]
pub struct LocateArgs {
    /// Book id
    pub book: u64,

    /// Sentence number
    pub sentence: u32,

    /// Word position within the sentence
    pub sentence_index: u32,

    /// Report the offset just past the word
    #[arg(long)]
    pub end: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Stats --

#[derive(Debug, Parser)]
pub struct StatsArgs {
    /// Text statistics of this book only
    #[arg(short = 'b', long)]
    pub book: Option<u64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Export / Import --

#[derive(Debug, Parser)]
pub struct ExportArgs {
    /// Destination file (stdout when omitted)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct ImportArgs {
    /// XML document written by `bookworm export`
    pub path: PathBuf,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print a setting (or every setting)
    Get {
        /// Setting key
        key: Option<String>,
    },
    /// Change a setting
    Set {
        /// Setting key
        key: String,
        /// New value
        value: String,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "bookworm",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_word_search() {
        let cli = Cli::parse_from([
            "bookworm", "word", "search", "wh%", "-b", "2", "--sentence", "3",
            "--unique", "--order", "count", "--desc",
        ]);
        match cli.command {
            Command::Word {
                action: WordAction::Search(args),
            } => {
                assert_eq!(args.pattern.as_deref(), Some("wh%"));
                assert_eq!(args.book, Some(2));
                assert_eq!(args.sentence, Some(3));
                assert!(args.unique);
                assert_eq!(args.order, Some(OrderKey::Count));
                assert!(args.desc);
                assert!(!args.json);
            }
            _ => panic!("expected word search"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "bookworm", "stats", "--index", "/tmp/x.redb", "-vv",
        ]);
        assert_eq!(cli.index, Some(PathBuf::from("/tmp/x.redb")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn group_add_needs_words() {
        assert!(Cli::try_parse_from(["bookworm", "group", "add", "Colors"]).is_err());
    }

    #[test]
    fn command_is_consistent() {
        Cli::command().debug_assert();
    }
}

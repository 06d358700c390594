use std::path::Path;

use bookworm::{
    DataDir,
    Error,
    Group,
    Index,
    NewBook,
    Result,
    Session,
    ingestion::CancelFlag,
    query::{AppearanceQuery, BookQuery, Direction, NamePattern, SearchRows, SortKey},
};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    BookAction,
    Cli,
    Command,
    ConfigAction,
    GroupAction,
    OrderKey,
    PhraseAction,
    WordAction,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("BOOKWORM_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let session = Session::open(&data_dir.index_path(cli.index.as_deref()))?;

    match cli.command {
        Command::Book { action } => match action {
            BookAction::Add {
                path,
                title,
                author,
                json,
            } => {
                let book = session
                    .index()
                    .ingest_book(&NewBook::new(title, author, path))?;
                if json {
                    print_json(&book)?;
                } else {
                    println!("Added #{} {}", book.id, book.full_name());
                }
            }
            BookAction::AddDir {
                path,
                author,
                glob,
                json,
            } => {
                book_add_dir(&session.index(), &path, &author, glob.as_deref(), json)?;
            }
            BookAction::List(args) => book_list(&session.index(), &args)?,
            BookAction::Remove { id } => {
                let index = session.index();
                let name = index.book_full_name(id)?;
                index.remove_book(id)?;
                println!("Removed #{id} {name}");
            }
            BookAction::Show { id, words, json } => {
                book_show(&session.index(), id, words, json)?;
            }
        },
        Command::Word { action } => match action {
            WordAction::Search(args) => word_search(&session.index(), &args)?,
            WordAction::List { json } => {
                let words = session.index().all_words()?;
                if json {
                    print_json(&words)?;
                } else {
                    for word in &words {
                        println!("{}\t{}", word.id, word.name);
                    }
                }
            }
        },
        Command::Group { action } => group_command(&session.index(), action)?,
        Command::Phrase { action } => phrase_command(&session.index(), action)?,
        Command::Locate(args) => {
            let location = session.index().word_location_to_offset(
                args.book,
                args.sentence,
                args.sentence_index,
                args.end,
            )?;
            if args.json {
                print_json(&location)?;
            } else {
                println!("{}:{}", location.line, location.offset);
            }
        }
        Command::Stats(args) => stats(&session.index(), args.book, args.json)?,
        Command::Export(args) => {
            let index = session.index();
            let summary = match &args.path {
                Some(path) => index.export_to_path(path)?,
                None => index.export_xml(std::io::stdout().lock())?,
            };
            if args.path.is_some() {
                println!(
                    "Exported {} books, {} words, {} groups, {} phrases",
                    summary.books, summary.words, summary.groups, summary.phrases
                );
            }
        }
        Command::Import(args) => {
            let summary = session.index().import_from_path(&args.path)?;
            println!(
                "Imported {} books, {} words, {} appearances, {} groups, {} phrases",
                summary.books,
                summary.words,
                summary.appearances,
                summary.groups,
                summary.phrases
            );
        }
        Command::New { path } => {
            let path = path.unwrap_or_else(|| session.path());
            session.new_index(&path)?;
            println!("Started empty index at {}", path.display());
        }
        Command::SaveAs { path } => {
            session.save_as(&path)?;
            println!("Saved index to {}", path.display());
        }
        Command::Config { action } => match action {
            ConfigAction::Get { key: Some(key) } => {
                let value = session.index().get_setting(&key)?.ok_or_else(|| {
                    Error::NotFound {
                        kind: "setting",
                        name: key.clone(),
                    }
                })?;
                println!("{value}");
            }
            ConfigAction::Get { key: None } => {
                for (key, value) in session.index().list_settings()? {
                    println!("{key}\t{value}");
                }
            }
            ConfigAction::Set { key, value } => {
                session.index().set_setting(&key, &value)?;
                println!("{key} = {value}");
            }
        },
        Command::Completions(_) => {}
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn book_add_dir(
    index: &Index,
    path: &Path,
    author: &str,
    glob: Option<&str>,
    json: bool,
) -> Result<()> {
    if !path.is_dir() {
        return Err(Error::SourceNotFound {
            path: path.to_path_buf(),
            reason: "not a directory".into(),
        });
    }
    let matcher = glob
        .map(|pattern| {
            globset::Glob::new(pattern)
                .map(|g| g.compile_matcher())
                .map_err(|e| Error::InvalidInput {
                    kind: "glob",
                    value: e.to_string(),
                })
        })
        .transpose()?;

    let report = index.ingest_dir(path, author, matcher.as_ref(), &CancelFlag::new())?;

    if json {
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|(path, e)| {
                serde_json::json!({ "path": path, "error": e.to_string() })
            })
            .collect();
        print_json(&serde_json::json!({
            "ingested": report.ingested,
            "failed": failed,
        }))?;
    } else {
        for book in &report.ingested {
            println!("Added #{} {}", book.id, book.full_name());
        }
        for (path, e) in &report.failed {
            eprintln!("Skipped {}: {e}", path.display());
        }
        println!(
            "{} books added, {} skipped",
            report.ingested.len(),
            report.failed.len()
        );
    }
    Ok(())
}

fn book_list(index: &Index, args: &cli::BookListArgs) -> Result<()> {
    let query = BookQuery {
        title: args.title.clone(),
        author: args.author.clone(),
        path: args.path.clone(),
        word: args.word.as_deref().map(NamePattern::new).transpose()?,
    };
    let books = index.search_books(&query)?;

    if args.json {
        print_json(&books)?;
    } else if books.is_empty() {
        println!("No books found.");
    } else {
        for book in &books {
            println!(
                "{}\t{}\t{}\t{}",
                book.id,
                book.title,
                book.author,
                book.path.display()
            );
        }
    }
    Ok(())
}

fn book_show(index: &Index, id: u64, words: bool, json: bool) -> Result<()> {
    if words {
        let appearances = index.book_words_in_order(id)?;
        if json {
            return print_json(&appearances);
        }
        let mut names = std::collections::HashMap::new();
        for a in &appearances {
            if !names.contains_key(&a.word_id) {
                let name = index
                    .word(a.word_id)?
                    .map(|w| w.name)
                    .unwrap_or_default();
                names.insert(a.word_id, name);
            }
            println!(
                "{}\t{}\t{}:{}\t{}:{}",
                a.word_index,
                names[&a.word_id],
                a.line,
                a.line_offset,
                a.sentence,
                a.sentence_index
            );
        }
        return Ok(());
    }

    let book = index.book(id)?.ok_or_else(|| Error::NotFound {
        kind: "book",
        name: id.to_string(),
    })?;
    if json {
        print_json(&book)?;
    } else {
        println!("Book #{}", book.id);
        println!("Title: {}", book.title);
        println!("Author: {}", book.author);
        println!("Path: {}", book.path.display());
        println!("Size: {} bytes", book.size);
        println!("Added: {}", book.created_at.to_rfc3339());
    }
    Ok(())
}

fn word_search(index: &Index, args: &cli::WordSearchArgs) -> Result<()> {
    let mut query = AppearanceQuery::new().unique_words(args.unique);
    if let Some(pattern) = &args.pattern {
        query = query.name(NamePattern::new(pattern)?);
    }
    if let Some(book) = args.book {
        query = query.book(book);
    }
    if let Some(name) = &args.group {
        let group = index.group_by_name(name)?.ok_or_else(|| Error::NotFound {
            kind: "group",
            name: name.clone(),
        })?;
        query = query.group(group.id);
    }
    if let Some(n) = args.paragraph {
        query = query.paragraph(n);
    }
    if let Some(n) = args.line {
        query = query.line(n);
    }
    if let Some(n) = args.line_index {
        query = query.line_index(n);
    }
    if let Some(n) = args.sentence {
        query = query.sentence(n);
    }
    if let Some(n) = args.sentence_index {
        query = query.sentence_index(n);
    }
    if let Some(key) = args.order {
        let key = match key {
            OrderKey::Name => SortKey::Name,
            OrderKey::Count => SortKey::Count,
            OrderKey::Length => SortKey::Length,
        };
        let direction = if args.desc {
            Direction::Desc
        } else {
            Direction::Asc
        };
        query = query.order_by(key, direction);
    }

    let rows = index.search_word_appearances(&query)?;
    if args.json {
        return print_json(&rows);
    }
    match &rows {
        SearchRows::Appearances(rows) => {
            for row in rows {
                let a = &row.appearance;
                println!(
                    "{}\tbook {}\t#{}\tline {}:{}\tsentence {}:{}",
                    row.word,
                    a.book_id,
                    a.word_index,
                    a.line,
                    a.line_offset,
                    a.sentence,
                    a.sentence_index
                );
            }
        }
        SearchRows::Words(rows) => {
            for row in rows {
                println!("{}\t{}", row.word.name, row.count);
            }
        }
    }
    if rows.is_empty() {
        eprintln!("No matches.");
    }
    Ok(())
}

fn group_command(index: &Index, action: GroupAction) -> Result<()> {
    let require = |name: &str| -> Result<Group> {
        index.group_by_name(name)?.ok_or_else(|| Error::NotFound {
            kind: "group",
            name: name.to_string(),
        })
    };

    match action {
        GroupAction::Create { name } => {
            let id = index.create_group(&name)?;
            println!("Created group #{id} {name}");
        }
        GroupAction::Add { group, words } => {
            let group = require(&group)?;
            for word in &words {
                index.add_word_to_group(group.id, word)?;
            }
            println!("Added {} words to {}", words.len(), group.name);
        }
        GroupAction::List { json } => {
            let groups = index.all_groups()?;
            if json {
                print_json(&groups)?;
            } else if groups.is_empty() {
                println!("No groups.");
            } else {
                for group in &groups {
                    println!("{}\t{}", group.id, group.name);
                }
            }
        }
        GroupAction::Show { name, json } => {
            let group = require(&name)?;
            let words = index.words_in_group(group.id)?;
            if json {
                print_json(&words)?;
            } else {
                for word in &words {
                    println!("{}", word.name);
                }
            }
        }
    }
    Ok(())
}

fn phrase_command(index: &Index, action: PhraseAction) -> Result<()> {
    match action {
        PhraseAction::Add { text } => {
            let id = index.create_phrase(&text)?;
            println!("Created phrase #{id}");
        }
        PhraseAction::List { json } => {
            let phrases = index.all_phrases()?;
            if json {
                print_json(&phrases)?;
            } else if phrases.is_empty() {
                println!("No phrases.");
            } else {
                for phrase in &phrases {
                    println!("{}\t{}", phrase.id, phrase.text);
                }
            }
        }
        PhraseAction::Find { id, book, json } => {
            let matches = match book {
                Some(book) => index.find_phrase_in_book(book, id)?,
                None => index.find_phrase(id)?,
            };
            if json {
                print_json(&matches)?;
            } else if matches.is_empty() {
                println!("No matches.");
            } else {
                for m in &matches {
                    let (start, end) = index.phrase_span(m)?;
                    println!(
                        "book {}\t#{}\t{}:{}-{}:{}",
                        m.book_id,
                        m.start_word_index,
                        start.line,
                        start.offset,
                        end.line,
                        end.offset
                    );
                }
            }
        }
    }
    Ok(())
}

fn stats(index: &Index, book: Option<u64>, json: bool) -> Result<()> {
    let text = index.text_stats(book)?;
    if json {
        if book.is_some() {
            return print_json(&text);
        }
        let general = index.general_stats()?;
        return print_json(&serde_json::json!({
            "general": general,
            "text": text,
        }));
    }

    if book.is_none() {
        let general = index.general_stats()?;
        println!("Books: {}", general.books);
        println!("Total size: {} bytes", general.total_size);
        println!(
            "Groups: {} ({:.2} words each)",
            general.groups, general.avg_words_per_group
        );
        println!(
            "Phrases: {} ({:.2} words each)",
            general.phrases, general.avg_words_per_phrase
        );
    }
    println!("Words: {} ({} unique)", text.total_words, text.unique_words);
    println!(
        "Letters: {} ({:.2} per word)",
        text.total_letters, text.avg_letters_per_word
    );
    for (name, unit) in [
        ("Paragraphs", text.paragraphs),
        ("Lines", text.lines),
        ("Sentences", text.sentences),
    ] {
        println!(
            "{name}: {} ({:.2} words, {:.2} letters each)",
            unit.count, unit.avg_words, unit.avg_letters
        );
    }
    Ok(())
}

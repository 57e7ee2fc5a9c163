//! Line-oriented librarian console.
//!
//! Each line is `<command> [arg|arg|...]`; arguments are separated by `|` so
//! titles and names may contain spaces.

use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::broadcast::{self, error::TryRecvError},
};

use crate::{
    book::{BookDraft, BookPatch, BookRecord, Entrant},
    core::StoreError,
    engine::{lending::BorrowOutcome, search::BookQuery},
    error::AppError,
    runtime::{
        events::LibraryEvent,
        handle::{LibraryHandle, RuntimeError},
    },
    types::BookKey,
};

/// Command summary printed by `help`.
pub const HELP: &str = "\
commands (arguments separated by '|'):
  register username|id|password
  login username|id|password
  logout
  add title|author|copies|genre|year
  remove title|author
  borrow title|author|name|email|phone
  return title|author
  restock title|author|copies
  update title|author|genre|year      (leave a field empty to keep it)
  waitlist title|author|name|email|phone
  queue title|author
  search all|title|author|genre|available|loaned [|text]
  popular [n]
  list
  save
  quit";

const DEFAULT_POPULAR: usize = 10;

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Print [`HELP`].
    Help,
    /// Register a librarian.
    Register {
        /// Display name.
        username: String,
        /// Unique id.
        id: String,
        /// Plain-text password.
        password: String,
    },
    /// Start a session.
    Login {
        /// Display name.
        username: String,
        /// Librarian id.
        id: String,
        /// Plain-text password.
        password: String,
    },
    /// End the session.
    Logout,
    /// Add a title.
    Add(BookDraft),
    /// Remove a title.
    Remove(BookKey),
    /// Borrow a copy or join the waitlist.
    Borrow {
        /// Requested book.
        key: BookKey,
        /// Requester.
        entrant: Entrant,
    },
    /// Return a copy.
    Return(BookKey),
    /// Set the total number of copies.
    Restock {
        /// Book to restock.
        key: BookKey,
        /// New total.
        copies: u32,
    },
    /// Patch genre and year.
    Update {
        /// Book to patch.
        key: BookKey,
        /// Fields to change.
        patch: BookPatch,
    },
    /// Join a waitlist without borrowing.
    Waitlist {
        /// Book to wait for.
        key: BookKey,
        /// Entrant to enroll.
        entrant: Entrant,
    },
    /// Show a waitlist.
    Queue(BookKey),
    /// Run a catalog query.
    Search(BookQuery),
    /// Show the most requested books.
    Popular(usize),
    /// Show the whole catalog.
    List,
    /// Flush state to storage.
    Save,
    /// Shut down and exit.
    Quit,
}

/// Why a console line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Blank line.
    #[error("empty input")]
    Empty,
    /// First word is not a command.
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
    /// Wrong argument count or shape; carries the usage line.
    #[error("usage: {0}")]
    Usage(&'static str),
    /// Arguments failed domain validation.
    #[error(transparent)]
    Invalid(#[from] StoreError),
}

/// Parses `<command> [arg|arg|...]`. Command words are case-insensitive.
pub fn parse_line(line: &str) -> Result<ConsoleCommand, ParseError> {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .unwrap_or((line, ""));
    if word.is_empty() {
        return Err(ParseError::Empty);
    }
    let rest = rest.trim();
    let args: Vec<&str> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split('|').map(str::trim).collect()
    };

    let cmd = match word.to_ascii_lowercase().as_str() {
        "help" | "?" => ConsoleCommand::Help,
        "register" => {
            let [username, id, password] = args[..] else {
                return Err(ParseError::Usage("register username|id|password"));
            };
            ConsoleCommand::Register {
                username: username.to_string(),
                id: id.to_string(),
                password: password.to_string(),
            }
        }
        "login" => {
            let [username, id, password] = args[..] else {
                return Err(ParseError::Usage("login username|id|password"));
            };
            ConsoleCommand::Login {
                username: username.to_string(),
                id: id.to_string(),
                password: password.to_string(),
            }
        }
        "logout" => ConsoleCommand::Logout,
        "add" => {
            const USAGE: &str = "add title|author|copies|genre|year";
            let [title, author, copies, genre, year] = args[..] else {
                return Err(ParseError::Usage(USAGE));
            };
            ConsoleCommand::Add(BookDraft::new(
                title,
                author,
                number(copies, USAGE)?,
                genre,
                number(year, USAGE)?,
            ))
        }
        "remove" => ConsoleCommand::Remove(key_arg(&args, "remove title|author")?),
        "return" => ConsoleCommand::Return(key_arg(&args, "return title|author")?),
        "queue" => ConsoleCommand::Queue(key_arg(&args, "queue title|author")?),
        "borrow" => {
            let (key, entrant) = key_and_entrant(&args, "borrow title|author|name|email|phone")?;
            ConsoleCommand::Borrow { key, entrant }
        }
        "waitlist" => {
            let (key, entrant) = key_and_entrant(&args, "waitlist title|author|name|email|phone")?;
            ConsoleCommand::Waitlist { key, entrant }
        }
        "restock" => {
            const USAGE: &str = "restock title|author|copies";
            let [title, author, copies] = args[..] else {
                return Err(ParseError::Usage(USAGE));
            };
            ConsoleCommand::Restock {
                key: BookKey::new(title, author)?,
                copies: number(copies, USAGE)?,
            }
        }
        "update" => {
            const USAGE: &str = "update title|author|genre|year";
            let [title, author, genre, year] = args[..] else {
                return Err(ParseError::Usage(USAGE));
            };
            let patch = BookPatch {
                genre: (!genre.is_empty()).then(|| genre.to_string()),
                year: if year.is_empty() {
                    None
                } else {
                    Some(number(year, USAGE)?)
                },
            };
            if patch.is_empty() {
                return Err(ParseError::Usage(USAGE));
            }
            ConsoleCommand::Update {
                key: BookKey::new(title, author)?,
                patch,
            }
        }
        "search" => ConsoleCommand::Search(parse_query(&args)?),
        "popular" => match args[..] {
            [] => ConsoleCommand::Popular(DEFAULT_POPULAR),
            [n] => ConsoleCommand::Popular(number(n, "popular [n]")?),
            _ => return Err(ParseError::Usage("popular [n]")),
        },
        "list" => ConsoleCommand::List,
        "save" => ConsoleCommand::Save,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(cmd)
}

fn number<T: std::str::FromStr>(raw: &str, usage: &'static str) -> Result<T, ParseError> {
    raw.parse().map_err(|_| ParseError::Usage(usage))
}

fn key_arg(args: &[&str], usage: &'static str) -> Result<BookKey, ParseError> {
    let [title, author] = args[..] else {
        return Err(ParseError::Usage(usage));
    };
    Ok(BookKey::new(title, author)?)
}

fn key_and_entrant(args: &[&str], usage: &'static str) -> Result<(BookKey, Entrant), ParseError> {
    let [title, author, name, email, phone] = args[..] else {
        return Err(ParseError::Usage(usage));
    };
    Ok((BookKey::new(title, author)?, Entrant::new(name, email, phone)?))
}

fn parse_query(args: &[&str]) -> Result<BookQuery, ParseError> {
    const USAGE: &str = "search all|title|author|genre|available|loaned [|text]";
    let query = match args {
        [field] => match field.to_ascii_lowercase().as_str() {
            "all" => BookQuery::All,
            "available" => BookQuery::Available,
            "loaned" | "borrowed" => BookQuery::Loaned,
            _ => return Err(ParseError::Usage(USAGE)),
        },
        [field, text] => match field.to_ascii_lowercase().as_str() {
            "title" => BookQuery::Title(text.to_string()),
            "author" => BookQuery::Author(text.to_string()),
            "genre" | "category" => BookQuery::Genre(text.to_string()),
            _ => return Err(ParseError::Usage(USAGE)),
        },
        _ => return Err(ParseError::Usage(USAGE)),
    };
    Ok(query)
}

/// Runs one command and renders the reply.
pub async fn execute(handle: &LibraryHandle, cmd: ConsoleCommand) -> Result<String, RuntimeError> {
    let reply = match cmd {
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Register {
            username,
            id,
            password,
        } => {
            handle.register(username.as_str(), id, password).await?;
            format!("registered librarian {}", username.trim())
        }
        ConsoleCommand::Login {
            username,
            id,
            password,
        } => {
            let session = handle.login(username, id, password).await?;
            format!("welcome, {}", session.username)
        }
        ConsoleCommand::Logout => match handle.logout().await? {
            Some(session) => format!("goodbye, {}", session.username),
            None => "nobody is logged in".to_string(),
        },
        ConsoleCommand::Add(draft) => {
            let key = handle.add_book(draft).await?;
            format!("added {key}")
        }
        ConsoleCommand::Remove(key) => {
            let rec = handle.remove_book(key).await?;
            format!("removed {} by {}", rec.title, rec.author)
        }
        ConsoleCommand::Borrow { key, entrant } => {
            let name = entrant.name.clone();
            match handle.borrow(key.clone(), entrant).await? {
                BorrowOutcome::Lent { remaining } => {
                    format!("lent {key} to {name}, {remaining} left")
                }
                BorrowOutcome::Queued { position } => {
                    format!("{key} is fully loaned; {name} is #{position} on the waitlist")
                }
            }
        }
        ConsoleCommand::Return(key) => {
            let receipt = handle.return_book(key.clone()).await?;
            format!("returned {key}, {} available", receipt.available)
        }
        ConsoleCommand::Restock { key, copies } => describe(&handle.restock(key, copies).await?),
        ConsoleCommand::Update { key, patch } => describe(&handle.update_details(key, patch).await?),
        ConsoleCommand::Waitlist { key, entrant } => {
            let name = entrant.name.clone();
            let position = handle.join_waitlist(key.clone(), entrant).await?;
            format!("{name} is #{position} on the waitlist for {key}")
        }
        ConsoleCommand::Queue(key) => {
            let entrants = handle.waitlist(key.clone()).await?;
            if entrants.is_empty() {
                format!("nobody is waiting for {key}")
            } else {
                entrants
                    .iter()
                    .enumerate()
                    .map(|(i, e)| format!("{}. {} <{}> {}", i + 1, e.name, e.email, e.phone))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        ConsoleCommand::Search(query) => listing(&handle.search(query).await?),
        ConsoleCommand::List => listing(&handle.books().await?),
        ConsoleCommand::Popular(n) => {
            let ranked = handle.popular(n).await?;
            if ranked.is_empty() {
                "no books".to_string()
            } else {
                ranked
                    .iter()
                    .map(|(rec, count)| format!("{count:>4}  {} by {}", rec.title, rec.author))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        ConsoleCommand::Save => {
            let seq = handle.flush().await?;
            format!("saved (journal at #{seq})")
        }
        ConsoleCommand::Quit => "bye".to_string(),
    };
    Ok(reply)
}

fn describe(rec: &BookRecord) -> String {
    format!(
        "{} by {} [{}, {}] {}/{} available",
        rec.title, rec.author, rec.genre, rec.year, rec.available, rec.copies
    )
}

fn listing(records: &[BookRecord]) -> String {
    if records.is_empty() {
        return "no books".to_string();
    }
    records.iter().map(describe).collect::<Vec<_>>().join("\n")
}

/// Reads commands until `quit` or end of input, then shuts the runtime down.
pub async fn run<R, W>(handle: LibraryHandle, input: R, mut output: W) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut events = handle.subscribe();
    let mut lines = input.lines();
    output.write_all(b"booklend console, type 'help' for commands\n").await?;

    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match parse_line(&line) {
            Ok(ConsoleCommand::Quit) => break,
            Ok(cmd) => match execute(&handle, cmd).await {
                Ok(text) => text,
                Err(RuntimeError::ChannelClosed) => return Err(RuntimeError::ChannelClosed.into()),
                Err(err) => format!("error: {err}"),
            },
            Err(err) => format!("error: {err}"),
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        write_notices(&mut events, &mut output).await?;
    }

    handle.shutdown().await?;
    write_notices(&mut events, &mut output).await?;
    output.write_all(b"bye\n").await?;
    output.flush().await?;
    Ok(())
}

async fn write_notices<W>(events: &mut broadcast::Receiver<LibraryEvent>, output: &mut W) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = match events.try_recv() {
            Ok(LibraryEvent::WaitlistNotified(n)) => format!(
                "notify {} <{}> {}: '{}' by {} is available\n",
                n.entrant.name, n.entrant.email, n.entrant.phone, n.title, n.author
            ),
            Ok(LibraryEvent::PersistFailed { message }) => format!("warning: {message}\n"),
            Ok(_) => continue,
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "console fell behind the event stream");
                continue;
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        };
        output.write_all(line.as_bytes()).await?;
    }
    Ok(())
}

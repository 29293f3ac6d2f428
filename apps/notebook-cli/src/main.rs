//! notebook: command-line access to the note store.
//!
//! Lists, reads, writes, and deletes notes in Cloud Datastore (or the
//! in-memory store for local trials). Notes are printed as JSON on stdout;
//! logs go to stderr.
//!
//! Run:
//! ```bash
//! GOOGLE_APPLICATION_CREDENTIALS=key.json DATASTORE_PROJECT_ID=my-project \
//!   cargo run -p notebook-cli -- put --author Alice --text "hello"
//!
//! # against the local emulator
//! DATASTORE_EMULATOR_HOST=localhost:8081 DATASTORE_PROJECT_ID=demo \
//!   cargo run -p notebook-cli -- list
//! ```
//!
//! Configuration: See `config.rs` and `google_datastore::DatastoreConfig`.

mod config;

use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};
use google_datastore::{DatastoreConfig, DatastoreStore};
use notebook::adapters::memory_store::InMemoryStore;
use notebook::{EntityStore, NoteWithText, NotebookRepository, RetryPolicy};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Manage notes stored in Cloud Datastore
#[derive(Debug, Parser)]
#[command(name = "notebook", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the id and author of every note
    List,
    /// Print one note with its text
    Get {
        /// Numeric note id
        id: String,
    },
    /// Create a note, or overwrite an existing one when --id is given
    Put {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        author: String,
        #[arg(long)]
        text: String,
    },
    /// Delete a note (unknown ids are ignored)
    Delete {
        /// Numeric note id
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;
    init_tracing(&cfg);
    cfg.warn_if_ephemeral();

    let store = build_store(&cfg)?;
    let retry = RetryPolicy {
        max_attempts: cfg.retry_attempts,
        ..RetryPolicy::default()
    };
    let repo = NotebookRepository::new(store).with_retry(retry);
    info!(about = %notebook::about(), "notebook ready");

    let output = execute(&repo, cli.command)?;
    if let Some(json) = output {
        println!("{json}");
    }
    Ok(())
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}

// Construct a store based on config.
fn build_store(cfg: &config::Config) -> anyhow::Result<Box<dyn EntityStore>> {
    match cfg.storage_provider {
        config::StorageProvider::Memory => Ok(Box::new(InMemoryStore::new())),
        config::StorageProvider::Datastore => {
            let ds_cfg = DatastoreConfig::from_env()?;
            let store = DatastoreStore::new(ds_cfg).context("connecting to Cloud Datastore")?;
            Ok(Box::new(store))
        }
    }
}

/// Run one command, returning the JSON to print (if any).
fn execute<S: EntityStore>(
    repo: &NotebookRepository<S>,
    command: Command,
) -> anyhow::Result<Option<String>> {
    match command {
        Command::List => {
            let mut notes: Vec<_> = repo.list()?.into_iter().collect();
            notes.sort_by_key(|n| n.id.parse::<i64>().unwrap_or(i64::MAX));
            Ok(Some(serde_json::to_string_pretty(&notes)?))
        }
        Command::Get { id } => {
            let note = repo.get(&id)?;
            Ok(Some(serde_json::to_string_pretty(&note)?))
        }
        Command::Put { id, author, text } => {
            let note = NoteWithText {
                id: id.unwrap_or_default(),
                author,
                text,
            };
            let saved = repo.save(note)?;
            Ok(Some(serde_json::to_string_pretty(&saved)?))
        }
        Command::Delete { id } => {
            repo.delete(&id)?;
            info!(note_id = %id, "note deleted");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use notebook::{Note, NotebookError};

    fn repo() -> NotebookRepository<InMemoryStore> {
        NotebookRepository::new(InMemoryStore::new())
    }

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(std::iter::once("notebook").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn put_then_get_prints_json() {
        let repo = repo();
        let out = execute(&repo, parse(&["put", "--author", "Alice", "--text", "hi"]))
            .unwrap()
            .unwrap();
        let saved: NoteWithText = serde_json::from_str(&out).unwrap();
        assert_eq!(saved.author, "Alice");

        let out = execute(&repo, parse(&["get", &saved.id])).unwrap().unwrap();
        let got: NoteWithText = serde_json::from_str(&out).unwrap();
        assert_eq!(got, saved);
    }

    #[test]
    fn list_is_sorted_by_numeric_id() {
        let repo = repo();
        for author in ["a", "b", "c"] {
            repo.save(NoteWithText::new(author, "t")).unwrap();
        }
        let out = execute(&repo, parse(&["list"])).unwrap().unwrap();
        let notes: Vec<Note> = serde_json::from_str(&out).unwrap();
        let authors: Vec<_> = notes.iter().map(|n| n.author.as_str()).collect();
        assert_eq!(authors, ["a", "b", "c"]);
    }

    #[test]
    fn delete_prints_nothing() {
        assert!(execute(&repo(), parse(&["delete", "17"])).unwrap().is_none());
    }

    #[test]
    fn bad_id_surfaces_typed_error() {
        let err = execute(&repo(), parse(&["get", "abc"])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NotebookError>(),
            Some(NotebookError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn put_requires_author_and_text() {
        assert!(Cli::try_parse_from(["notebook", "put", "--author", "A"]).is_err());
    }
}

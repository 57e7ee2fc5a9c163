use std::{fs, path::PathBuf, process::ExitCode};

use booklend::{
    config::{self, Backend},
    console,
    error::AppError,
    logger,
    persist::{SnapshotSink, flatfile::FlatFileStore, open_desk, sqlite::SqliteStore},
    runtime::handle::{LibraryHandle, spawn_library},
};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);

    let handle = match start(config_path) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("booklend: {err}");
            return ExitCode::FAILURE;
        }
    };

    match console::run(handle, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "console stopped");
            eprintln!("booklend: {err}");
            ExitCode::FAILURE
        }
    }
}

fn start(config_path: Option<PathBuf>) -> Result<LibraryHandle, AppError> {
    let config = config::load(config_path.as_deref())?;
    logger::init(&config.log_level)?;

    let (desk, report, sink) = match config.backend {
        Backend::Csv => {
            let store = FlatFileStore::open(&config.data_dir)?;
            let (desk, report) = open_desk(&store)?;
            (desk, report, Box::new(store) as Box<dyn SnapshotSink>)
        }
        Backend::Sqlite => {
            fs::create_dir_all(&config.data_dir)?;
            let store = SqliteStore::open(config.sqlite_path())?;
            let (desk, report) = open_desk(&store)?;
            (desk, report, Box::new(store) as Box<dyn SnapshotSink>)
        }
    };

    for row in &report.skipped {
        eprintln!("skipped row {}: {}", row.line, row.reason);
    }
    tracing::info!(
        backend = ?config.backend,
        data_dir = %config.data_dir.display(),
        "booklend started"
    );
    Ok(spawn_library(desk, Some(sink), config.runtime))
}

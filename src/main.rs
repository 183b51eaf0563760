//! E-money Settlement CLI
//!
//! Ingests terminal transaction logs into a data directory and writes
//! settlement files for selected sources.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- ingest --kind raw gate1.txt gate2.txt
//! cargo run -- settle gate1.txt gate2.txt > batches.csv
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `warn` to control logging verbosity
//! - `EMONEY_SETTLEMENT_DATA_DIR`: Data directory (default `settlement-data`)

use clap::{Parser, Subcommand, ValueEnum};
use emoney_settlement::config::{DATA_DIR_ENV, DEFAULT_DATA_DIR};
use emoney_settlement::{Config, DataKind, HeaderOptions, Result, SettlementEngine};
use log::error;
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "emoney-settlement",
    about = "Decode e-money terminal logs and emit batched settlement files."
)]
struct Cli {
    /// Directory holding the transaction store, error codes and outbox
    #[arg(long, global = true, env = DATA_DIR_ENV, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode log files and add them to the store.
    Ingest {
        /// Log kind of every file given
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Log files; each file name becomes a source name
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List ingested sources with totals and error counts.
    Sources,
    /// List decoded transactions.
    Transactions {
        /// Only this source
        #[arg(long)]
        source: Option<String>,
    },
    /// Write settlement files for the given sources.
    Settle {
        /// Append the RAW/NOK label to each header
        #[arg(long)]
        label: bool,
        /// Append the code:count error tally to each header
        #[arg(long)]
        details: bool,
        /// Source names as listed by `sources`
        sources: Vec<String>,
    },
    /// Manage NOK error codes.
    Codes {
        #[command(subcommand)]
        command: CodesCommands,
    },
    /// Remove all ingested data, error code overrides and settlement files.
    Clear,
}

#[derive(Subcommand)]
enum CodesCommands {
    /// Print every code as code=description.
    List,
    /// Add or replace a code.
    Add { code: String, description: String },
    /// Remove a code.
    Remove { code: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Raw,
    Nok,
}

impl From<KindArg> for DataKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Raw => DataKind::Raw,
            KindArg::Nok => DataKind::Nok,
        }
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut engine = SettlementEngine::open(Config::new(cli.data_dir))?;
    let stdout = io::stdout();
    let handle = stdout.lock();

    match cli.command {
        Commands::Ingest { kind, files } => {
            let mut reports = Vec::new();
            let mut failed = None;
            for path in &files {
                match engine.ingest_file(path, kind.into()) {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        error!("{}: {}", path.display(), e);
                        if failed.is_none() {
                            failed = Some(e);
                        }
                    }
                }
            }
            SettlementEngine::write_reports(&reports, handle)?;
            if let Some(e) = failed {
                return Err(e);
            }
        }
        Commands::Sources => engine.write_sources(handle)?,
        Commands::Transactions { source } => {
            engine.write_transactions(handle, source.as_deref())?
        }
        Commands::Settle {
            label,
            details,
            sources,
        } => {
            let batches = engine.settle(&sources, HeaderOptions { label, details })?;
            SettlementEngine::write_batches(&batches, handle)?;
        }
        Commands::Codes { command } => match command {
            CodesCommands::List => engine.write_codes(handle)?,
            CodesCommands::Add { code, description } => {
                engine.registry_mut().add(&code, &description)?
            }
            CodesCommands::Remove { code } => {
                if !engine.registry_mut().remove(&code)? {
                    eprintln!("Code {} was not registered", code);
                }
            }
        },
        Commands::Clear => engine.clear_all()?,
    }

    Ok(())
}

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tilawah_core::index::JsonlLog;
use tilawah_core::{
    load_tilawah_config, Catalog, ClipRepository, RepairContext, RepairMode, RetryPolicy,
    S3ObjectStore, SqliteClipStore, StorageClient, TilawahConfig, Transcoder,
};

pub use commands::{ClipCommands, IndexCommands, IngestArgs, RepairCommands};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] tilawah_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata store error: {0}")]
    Store(#[from] tilawah_core::ClipStoreError),
    #[error("storage error: {0}")]
    Storage(#[from] tilawah_core::StorageError),
    #[error("ingest failed: {0}")]
    Ingest(#[from] tilawah_core::IngestError),
    #[error("repair failed: {0}")]
    Repair(#[from] tilawah_core::RepairError),
    #[error("index error: {0}")]
    Index(#[from] tilawah_core::IndexError),
    #[error("repository error: {0}")]
    Repository(#[from] tilawah_core::store::RepositoryError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Quran recitation clip ingestion and maintenance", long_about = None)]
pub struct Cli {
    /// Path to tilawah.toml
    #[arg(long, default_value = "configs/tilawah.toml")]
    pub config: PathBuf,
    /// Override for the SQLite metadata database
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Override for the generated JSON index
    #[arg(long)]
    pub index: Option<PathBuf>,
    /// Use a JSON-Lines clip log as the source of record instead of SQLite
    #[arg(long)]
    pub source_log: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest one source file as a clip
    Ingest(IngestArgs),
    /// Inspect and delete committed clips
    #[command(subcommand)]
    Clips(ClipCommands),
    /// Generated JSON index
    #[command(subcommand)]
    Index(IndexCommands),
    /// Batch repair and migration tools (dry-run unless --apply)
    #[command(subcommand)]
    Repair(RepairCommands),
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Runs the command and returns the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "tilawahctl", &mut std::io::stdout());
        return Ok(0);
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Ingest(args) => commands::ingest(&context, args, cli.format).await,
        Commands::Clips(command) => commands::clips(&context, command, cli.format).await,
        Commands::Index(command) => commands::index(&context, command, cli.format),
        Commands::Repair(command) => commands::repair(&context, command, cli.format).await,
        Commands::Completions { .. } => Ok(0),
    }
}

pub(crate) fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

pub(crate) trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
pub(crate) struct AppContext {
    config: TilawahConfig,
    catalog: Catalog,
    database: PathBuf,
    index_path: PathBuf,
    source_log: Option<PathBuf>,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_tilawah_config(&cli.config)?;
        let catalog = Catalog::from_config(&config.catalog);
        let database = cli
            .database
            .clone()
            .unwrap_or_else(|| config.database_path());
        let index_path = cli.index.clone().unwrap_or_else(|| config.index_path());
        Ok(Self {
            catalog,
            database,
            index_path,
            source_log: cli.source_log.clone(),
            config,
        })
    }

    pub(crate) fn config(&self) -> &TilawahConfig {
        &self.config
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn index_path(&self) -> &PathBuf {
        &self.index_path
    }

    pub(crate) fn source_log(&self) -> Option<JsonlLog> {
        self.source_log
            .as_ref()
            .map(|path| JsonlLog::new(path).with_catalog(self.catalog.clone()))
    }

    pub(crate) fn store(&self) -> Result<SqliteClipStore> {
        let store = SqliteClipStore::builder().path(&self.database).build()?;
        store.initialize()?;
        Ok(store)
    }

    pub(crate) fn repository(&self) -> Result<Box<dyn ClipRepository>> {
        match self.source_log() {
            Some(log) => Ok(Box::new(log)),
            None => Ok(Box::new(self.store()?)),
        }
    }

    pub(crate) async fn storage(&self) -> StorageClient {
        let backend = S3ObjectStore::from_config(&self.config.storage).await;
        StorageClient::new(
            Arc::new(backend),
            RetryPolicy::new(&self.config.storage.retry),
        )
    }

    pub(crate) fn transcoder(&self) -> Transcoder {
        Transcoder::new(self.config.transcode.clone())
    }

    pub(crate) async fn repair_context(&self, apply: bool, with_storage: bool) -> Result<RepairContext> {
        let mut context = RepairContext::new(
            self.repository()?,
            self.catalog.clone(),
            RepairMode::from_flag(apply),
        )
        .with_key_prefix(self.config.storage.key_prefix.clone())
        .with_index_path(self.index_path.clone())
        .with_temp_dir(self.config.temp_dir());
        if with_storage {
            context = context.with_storage(self.storage().await);
        }
        Ok(context)
    }
}

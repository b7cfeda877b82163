use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;
use tilawah_core::index::{build_index, write_index, SourceLine};
use tilawah_core::store::ClipFilter;

use crate::{render, AppContext, DisplayFallback, OutputFormat, Result};

#[derive(Subcommand, Debug)]
pub enum IndexCommands {
    /// Rebuild the JSON index from the metadata store or --source-log
    Build(IndexBuildArgs),
}

#[derive(Args, Debug)]
pub struct IndexBuildArgs {
    /// Write here instead of the configured index path
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct IndexBuildView {
    source: String,
    path: PathBuf,
    clip_count: usize,
}

impl DisplayFallback for IndexBuildView {
    fn display(&self) -> String {
        format!(
            "wrote {} clips from {} to {}",
            self.clip_count,
            self.source,
            self.path.display()
        )
    }
}

pub fn index(context: &AppContext, command: &IndexCommands, format: OutputFormat) -> Result<i32> {
    match command {
        IndexCommands::Build(args) => {
            let (source, lines) = match context.source_log() {
                Some(log) => (format!("jsonl:{}", log.path().display()), log.read_lines()?),
                None => {
                    let store = context.store()?;
                    let records = store.list_records(&ClipFilter::default())?;
                    (
                        format!("sqlite:{}", store.path().display()),
                        SourceLine::from_records(&records),
                    )
                }
            };
            let index = build_index(&lines, context.catalog())?;
            let path = args
                .output
                .clone()
                .unwrap_or_else(|| context.index_path().clone());
            write_index(&path, &index)?;
            render(
                &IndexBuildView {
                    source,
                    path,
                    clip_count: index.clip_count,
                },
                format,
            )?;
            Ok(0)
        }
    }
}

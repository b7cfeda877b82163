use std::path::PathBuf;

use clap::{Args, Subcommand};
use tilawah_core::repair::{
    audit_storage, backfill_hls, backfill_thumbnails, fix_keys, prune_variants, retag_translation,
    ItemStatus, RetagOptions,
};
use tilawah_core::BatchSummary;

use crate::{render, AppContext, DisplayFallback, OutputFormat, Result};

#[derive(Subcommand, Debug)]
pub enum RepairCommands {
    /// Move clips to another translation, rewriting ids and keys
    Retag(RetagArgs),
    /// Re-point variant keys at objects stored under legacy names
    FixKeys(ClipSelectionArgs),
    /// Drop deprecated variants when a playable one remains
    Prune(ApplyArgs),
    /// Backfill thumbnails and blur placeholders
    Thumbnails(ApplyArgs),
    /// Backfill HLS packages for video clips, resumable
    Hls(HlsArgs),
    /// Compare stored objects with recorded digests (read-only)
    Audit(AuditArgs),
}

#[derive(Args, Debug)]
pub struct RetagArgs {
    /// Clip id to retag (repeatable)
    #[arg(long = "clip", required = true)]
    pub clips: Vec<String>,
    /// Target translation slug or alias
    #[arg(long)]
    pub translation: String,
    /// Commit metadata changes
    #[arg(long, default_value_t = false)]
    pub apply: bool,
    /// Copy stored objects to the new keys
    #[arg(long, default_value_t = false)]
    pub apply_r2: bool,
    /// Delete old keys once the new ones exist
    #[arg(long, default_value_t = false, requires = "apply_r2")]
    pub delete_old: bool,
}

#[derive(Args, Debug)]
pub struct ClipSelectionArgs {
    /// Restrict to these clip ids (repeatable)
    #[arg(long = "clip")]
    pub clips: Vec<String>,
    #[arg(long, default_value_t = false)]
    pub apply: bool,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[arg(long, default_value_t = false)]
    pub apply: bool,
}

#[derive(Args, Debug)]
pub struct HlsArgs {
    #[arg(long, default_value_t = false)]
    pub apply: bool,
    /// Stop after this many clips
    #[arg(long)]
    pub limit: Option<usize>,
    /// Progress file; defaults to hls-backfill.json in the progress directory
    #[arg(long)]
    pub progress: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    #[arg(long = "clip")]
    pub clips: Vec<String>,
}

pub async fn repair(context: &AppContext, command: &RepairCommands, format: OutputFormat) -> Result<i32> {
    let summary = match command {
        RepairCommands::Retag(args) => {
            let mut ctx = context.repair_context(args.apply, args.apply_r2).await?;
            let options = RetagOptions {
                apply_storage: args.apply_r2,
                delete_old: args.delete_old,
            };
            retag_translation(&mut ctx, &args.clips, &args.translation, options).await?
        }
        RepairCommands::FixKeys(args) => {
            let mut ctx = context.repair_context(args.apply, true).await?;
            fix_keys(&mut ctx, &args.clips).await?
        }
        RepairCommands::Prune(args) => {
            let mut ctx = context.repair_context(args.apply, args.apply).await?;
            prune_variants(&mut ctx).await?
        }
        RepairCommands::Thumbnails(args) => {
            let mut ctx = context.repair_context(args.apply, true).await?;
            backfill_thumbnails(&mut ctx, &context.transcoder()).await?
        }
        RepairCommands::Hls(args) => {
            let progress = args
                .progress
                .clone()
                .unwrap_or_else(|| context.config().progress_dir().join("hls-backfill.json"));
            let mut ctx = context.repair_context(args.apply, true).await?;
            backfill_hls(&mut ctx, &context.transcoder(), &progress, args.limit).await?
        }
        RepairCommands::Audit(args) => {
            let mut ctx = context.repair_context(false, true).await?;
            audit_storage(&mut ctx, &args.clips).await?
        }
    };
    render(&summary, format)?;
    Ok(summary.exit_code())
}

impl DisplayFallback for BatchSummary {
    fn display(&self) -> String {
        let mode = if self.mode.is_apply() { "apply" } else { "dry-run" };
        let mut lines = vec![format!("{} ({mode})", self.tool)];
        for item in &self.items {
            let marker = match item.status {
                ItemStatus::Ok => "ok",
                ItemStatus::Failed => "FAILED",
                ItemStatus::Skipped => "skip",
            };
            lines.push(format!("  [{marker}] {}: {}", item.clip_id, item.message));
            for action in &item.actions {
                lines.push(format!("      {action}"));
            }
        }
        if let Some(backup) = &self.backup {
            lines.push(format!("backup: {}", backup.display()));
        }
        if let Some(count) = self.index_rebuilt {
            lines.push(format!("index rebuilt with {count} clips"));
        }
        lines.push(format!(
            "ok={} failed={} skipped={}",
            self.ok, self.failed, self.skipped
        ));
        lines.join("\n")
    }
}

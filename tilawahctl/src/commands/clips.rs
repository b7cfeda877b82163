use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;
use tilawah_core::repair::delete_clips;
use tilawah_core::store::DistinctField;
use tilawah_core::{ClipFilter, ClipRecord, PublicUrlResolver};

use crate::{render, AppContext, AppError, DisplayFallback, OutputFormat, Result};

#[derive(Subcommand, Debug)]
pub enum ClipCommands {
    /// List committed clips in surah/ayah order
    List(ClipListArgs),
    /// Show one clip with its variants
    Show(ClipIdArgs),
    /// Distinct reciters, riwayat or translations
    Distinct(DistinctArgs),
    /// Public URLs for each variant of a clip
    Urls(ClipUrlArgs),
    /// Delete clips from metadata (dry-run unless --apply)
    Delete(ClipDeleteArgs),
}

#[derive(Args, Debug)]
pub struct ClipListArgs {
    #[arg(long)]
    pub surah: Option<u16>,
    #[arg(long)]
    pub reciter: Option<String>,
    #[arg(long)]
    pub riwayah: Option<String>,
    #[arg(long)]
    pub translation: Option<String>,
    /// Only clips overlapping this ayah range
    #[arg(long)]
    pub ayah_from: Option<u32>,
    #[arg(long)]
    pub ayah_to: Option<u32>,
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ClipIdArgs {
    pub id: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DistinctArg {
    Reciters,
    Riwayat,
    Translations,
}

#[derive(Args, Debug)]
pub struct DistinctArgs {
    #[arg(value_enum)]
    pub field: DistinctArg,
}

#[derive(Args, Debug)]
pub struct ClipUrlArgs {
    pub id: String,
    /// Send a HEAD request to each URL
    #[arg(long, default_value_t = false)]
    pub probe: bool,
}

#[derive(Args, Debug)]
pub struct ClipDeleteArgs {
    #[arg(required = true)]
    pub ids: Vec<String>,
    /// Also delete every stored object of the clip
    #[arg(long, default_value_t = false)]
    pub purge: bool,
    #[arg(long, default_value_t = false)]
    pub apply: bool,
}

impl ClipListArgs {
    fn filter(&self) -> ClipFilter {
        ClipFilter {
            surah: self.surah,
            reciter_slug: self.reciter.clone(),
            riwayah: self.riwayah.clone(),
            translation: self.translation.clone(),
            ayah_from: self.ayah_from,
            ayah_to: self.ayah_to,
        }
    }
}

fn matches_filter(filter: &ClipFilter, record: &ClipRecord) -> bool {
    let clip = &record.clip;
    filter.surah.map_or(true, |s| clip.surah == s)
        && filter.reciter_slug.as_deref().map_or(true, |r| clip.reciter_slug == r)
        && filter.riwayah.as_deref().map_or(true, |r| clip.riwayah == r)
        && filter.translation.as_deref().map_or(true, |t| clip.translation == t)
        && (filter.ayah_from.is_none() && filter.ayah_to.is_none()
            || clip.overlaps(filter.ayah_from.unwrap_or(1), filter.ayah_to.unwrap_or(u32::MAX)))
}

#[derive(Debug, Serialize)]
struct ClipList {
    rows: Vec<ClipRecord>,
}

impl DisplayFallback for ClipList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "no clips found".to_string();
        }
        self.rows
            .iter()
            .map(|record| {
                let qualities: Vec<String> = record
                    .variants
                    .iter()
                    .map(|v| v.quality.to_string())
                    .collect();
                format!(
                    "{} | {} | {} | [{}]",
                    record.clip.id,
                    record.clip.reciter_name,
                    record.clip.translation,
                    qualities.join(",")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for ClipRecord {
    fn display(&self) -> String {
        let clip = &self.clip;
        let mut lines = vec![
            clip.id.clone(),
            format!("  surah {} ayat {}-{}", clip.surah, clip.ayah_start, clip.ayah_end),
            format!("  reciter: {} ({})", clip.reciter_name, clip.reciter_slug),
            format!("  riwayah: {}", clip.riwayah),
            format!("  translation: {}", clip.translation),
            format!("  created: {}", clip.created_at.to_rfc3339()),
        ];
        for variant in &self.variants {
            lines.push(format!(
                "  - {}: {} (md5 {})",
                variant.quality,
                variant.r2_key,
                variant.md5.as_deref().unwrap_or("-")
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct DistinctList {
    field: &'static str,
    values: Vec<String>,
}

impl DisplayFallback for DistinctList {
    fn display(&self) -> String {
        let mut lines = vec![format!("{}:", self.field)];
        lines.extend(self.values.iter().map(|v| format!("  {v}")));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct VariantUrl {
    quality: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reachable: Option<bool>,
}

#[derive(Debug, Serialize)]
struct UrlList {
    clip_id: String,
    urls: Vec<VariantUrl>,
}

impl DisplayFallback for UrlList {
    fn display(&self) -> String {
        let mut lines = vec![self.clip_id.clone()];
        for entry in &self.urls {
            let status = match entry.reachable {
                Some(true) => " [reachable]",
                Some(false) => " [unreachable]",
                None => "",
            };
            lines.push(format!("  {}: {}{}", entry.quality, entry.url, status));
        }
        lines.join("\n")
    }
}

fn load_record(context: &AppContext, id: &str) -> Result<ClipRecord> {
    let record = match context.source_log() {
        Some(log) => log.read_records()?.into_iter().find(|r| r.clip.id == id),
        None => context.store()?.find_record(id)?,
    };
    record.ok_or_else(|| AppError::MissingResource(format!("clip {id}")))
}

pub async fn clips(context: &AppContext, command: &ClipCommands, format: OutputFormat) -> Result<i32> {
    match command {
        ClipCommands::List(args) => {
            let filter = args.filter();
            let mut rows = match context.source_log() {
                Some(log) => log
                    .read_records()?
                    .into_iter()
                    .filter(|record| matches_filter(&filter, record))
                    .collect(),
                None => context.store()?.list_records(&filter)?,
            };
            rows.truncate(args.limit);
            render(&ClipList { rows }, format)?;
        }
        ClipCommands::Show(args) => {
            let record = load_record(context, &args.id)?;
            render(&record, format)?;
        }
        ClipCommands::Distinct(args) => {
            let (field, label) = match args.field {
                DistinctArg::Reciters => (DistinctField::Reciters, "reciters"),
                DistinctArg::Riwayat => (DistinctField::Riwayat, "riwayat"),
                DistinctArg::Translations => (DistinctField::Translations, "translations"),
            };
            let values = context.store()?.list_distinct(field)?;
            render(&DistinctList { field: label, values }, format)?;
        }
        ClipCommands::Urls(args) => {
            let base = context
                .config()
                .storage
                .public_base_url
                .as_deref()
                .ok_or_else(|| AppError::MissingResource("storage.public_base_url".into()))?;
            let resolver = PublicUrlResolver::new(base)?;
            let record = load_record(context, &args.id)?;
            let mut urls = Vec::with_capacity(record.variants.len());
            for variant in &record.variants {
                let url = resolver.url_for(&variant.r2_key)?;
                let reachable = if args.probe {
                    Some(resolver.probe(&variant.r2_key).await?)
                } else {
                    None
                };
                urls.push(VariantUrl {
                    quality: variant.quality.to_string(),
                    url: url.to_string(),
                    reachable,
                });
            }
            let unreachable = urls.iter().any(|u| u.reachable == Some(false));
            render(
                &UrlList {
                    clip_id: record.clip.id,
                    urls,
                },
                format,
            )?;
            return Ok(i32::from(unreachable));
        }
        ClipCommands::Delete(args) => {
            let mut repair = context.repair_context(args.apply, args.purge).await?;
            let summary = delete_clips(&mut repair, &args.ids, args.purge).await?;
            render(&summary, format)?;
            return Ok(summary.exit_code());
        }
    }
    Ok(0)
}

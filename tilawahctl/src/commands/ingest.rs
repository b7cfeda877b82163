use std::path::PathBuf;

use clap::Args;
use tracing::info;
use tilawah_core::clip::{RawClipFields, RawClipInput};
use tilawah_core::{IngestOptions, IngestOutcome, IngestReport, IngestRequest, Ingestor};

use crate::{render, AppContext, DisplayFallback, OutputFormat, Result};

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Source audio or video file
    #[arg(long)]
    pub file: PathBuf,
    #[arg(long)]
    pub surah: i64,
    #[arg(long)]
    pub ayah_start: i64,
    #[arg(long)]
    pub ayah_end: i64,
    /// Canonical reciter slug, e.g. maher-al-muaiqly
    #[arg(long, conflicts_with = "reciter")]
    pub reciter_slug: Option<String>,
    /// Display name stored alongside the slug
    #[arg(long)]
    pub reciter_name: Option<String>,
    /// Free-text reciter name; the slug is derived from it
    #[arg(long)]
    pub reciter: Option<String>,
    #[arg(long)]
    pub riwayah: Option<String>,
    #[arg(long)]
    pub translation: Option<String>,
    /// Replace an existing clip or object with different content
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
    /// Accept content already committed under another clip id
    #[arg(long, default_value_t = false)]
    pub allow_shared_content: bool,
    #[arg(long, default_value_t = false)]
    pub no_low: bool,
    #[arg(long, default_value_t = false)]
    pub no_hls: bool,
    #[arg(long, default_value_t = false)]
    pub no_thumbnail: bool,
    #[arg(long, default_value_t = false)]
    pub no_blur: bool,
}

impl IngestArgs {
    pub fn options(&self) -> IngestOptions {
        IngestOptions {
            overwrite: self.overwrite,
            allow_shared_content: self.allow_shared_content,
            derive_low: !self.no_low,
            derive_hls: !self.no_hls,
            extract_thumbnail: !self.no_thumbnail,
            derive_blur: !self.no_blur,
        }
    }

    pub fn input(&self) -> RawClipInput {
        let fields = RawClipFields {
            surah: self.surah,
            ayah_start: self.ayah_start,
            ayah_end: self.ayah_end,
            riwayah: self.riwayah.clone(),
            translation: self.translation.clone(),
            ..RawClipFields::default()
        };
        match &self.reciter_slug {
            Some(slug) => RawClipInput::Current {
                fields,
                reciter_slug: Some(slug.clone()),
                reciter_name: self.reciter_name.clone(),
            },
            None => RawClipInput::Legacy {
                fields,
                reciter: self
                    .reciter
                    .clone()
                    .or_else(|| self.reciter_name.clone())
                    .unwrap_or_default(),
            },
        }
    }
}

pub async fn ingest(context: &AppContext, args: &IngestArgs, format: OutputFormat) -> Result<i32> {
    let ingestor = Ingestor::from_config(
        context.config(),
        context.storage().await,
        context.store()?,
        context.transcoder(),
    );
    let request = IngestRequest::new(&args.file, args.input()).with_options(args.options());
    info!(file = %args.file.display(), "starting ingest");
    let report = ingestor.ingest(&request).await?;
    render(&report, format)?;
    Ok(0)
}

impl DisplayFallback for IngestReport {
    fn display(&self) -> String {
        let headline = match self.outcome {
            IngestOutcome::Ingested => format!("ingested {}", self.clip_id),
            IngestOutcome::AlreadyIngested => format!("already ingested {}", self.clip_id),
        };
        let mut lines = vec![headline, format!("  md5: {}", self.digest)];
        for variant in &self.variants {
            lines.push(format!("  - {}: {}", variant.quality, variant.r2_key));
        }
        if self.thumbnail_blur.is_some() {
            lines.push("  blur placeholder: yes".to_string());
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(slug: Option<&str>, reciter: Option<&str>) -> IngestArgs {
        IngestArgs {
            file: PathBuf::from("video.mp4"),
            surah: 2,
            ayah_start: 255,
            ayah_end: 255,
            reciter_slug: slug.map(str::to_string),
            reciter_name: None,
            reciter: reciter.map(str::to_string),
            riwayah: None,
            translation: Some("khan-al-hilali".into()),
            overwrite: false,
            allow_shared_content: false,
            no_low: false,
            no_hls: false,
            no_thumbnail: false,
            no_blur: false,
        }
    }

    #[test]
    fn slug_selects_current_form() {
        assert!(matches!(
            args(Some("maher-al-muaiqly"), None).input(),
            RawClipInput::Current { .. }
        ));
    }

    #[test]
    fn free_text_reciter_selects_legacy_form() {
        match args(None, Some("Maher Al Muaiqly")).input() {
            RawClipInput::Legacy { reciter, .. } => assert_eq!(reciter, "Maher Al Muaiqly"),
            other => panic!("unexpected {other:?}"),
        }
    }
}

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clip::{ClipRecord, ClipVariant, MediaKind, Quality};
use crate::ingest::upload_hls_package;
use crate::store::RecordChange;
use crate::transcode::Transcoder;

use super::{BatchSummary, ItemReport, RepairContext, RepairError, RepairResult};

/// Per-clip results of HLS backfill runs, rewritten after every item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HlsProgress {
    #[serde(default)]
    pub completed: BTreeMap<String, String>,
    #[serde(default)]
    pub failed: BTreeMap<String, String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl HlsProgress {
    pub fn load(path: &Path) -> RepairResult<Self> {
        match std::fs::read(path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| RepairError::Progress {
                path: path.to_path_buf(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(RepairError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&mut self, path: &Path) -> RepairResult<()> {
        self.updated_at = Some(Utc::now());
        let io_err = |source| RepairError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let payload = serde_json::to_vec_pretty(self).map_err(|source| RepairError::Progress {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&payload).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        std::fs::rename(&tmp, path).map_err(io_err)
    }

    pub fn is_completed(&self, clip_id: &str) -> bool {
        self.completed.contains_key(clip_id)
    }
}

/// Clips whose only video is a plain file: a high video variant and no HLS.
pub fn needs_hls(record: &ClipRecord) -> bool {
    !record.has_variant(Quality::Hls)
        && record.variant(Quality::High).is_some_and(|variant| {
            Path::new(&variant.r2_key)
                .extension()
                .and_then(OsStr::to_str)
                .and_then(MediaKind::from_extension)
                == Some(MediaKind::Video)
        })
}

/// Segments plain video clips one at a time, persisting progress after each.
pub async fn backfill_hls(
    ctx: &mut RepairContext,
    transcoder: &Transcoder,
    progress_path: &Path,
    limit: Option<usize>,
) -> RepairResult<BatchSummary> {
    let records = ctx.load_records()?;
    let mut progress = HlsProgress::load(progress_path)?;
    let mut summary = BatchSummary::new("hls", ctx.mode());
    let mut attempted = 0usize;
    for record in records.iter().filter(|r| needs_hls(r)) {
        let clip_id = record.clip.id.clone();
        if progress.is_completed(&clip_id) {
            summary.record(ItemReport::skipped(clip_id, "completed in an earlier run"));
            continue;
        }
        if limit.is_some_and(|limit| attempted >= limit) {
            break;
        }
        attempted += 1;
        let item = match backfill_one(ctx, transcoder, record).await {
            Ok(item) => item,
            Err(err) => ItemReport::failed(clip_id.clone(), err.to_string()),
        };
        if ctx.mode().is_apply() {
            match item.status {
                super::ItemStatus::Ok => {
                    progress.failed.remove(&clip_id);
                    progress.completed.insert(clip_id, item.message.clone());
                }
                super::ItemStatus::Failed => {
                    progress.failed.insert(clip_id, item.message.clone());
                }
                super::ItemStatus::Skipped => {}
            }
            if let Err(err) = progress.save(progress_path) {
                warn!(path = %progress_path.display(), error = %err, "failed to persist progress");
            }
        }
        summary.record(item);
    }
    ctx.finish(summary)
}

async fn backfill_one(
    ctx: &mut RepairContext,
    transcoder: &Transcoder,
    record: &ClipRecord,
) -> RepairResult<ItemReport> {
    let Some(source) = record.variant(Quality::High) else {
        return Ok(ItemReport::skipped(record.clip.id.clone(), "no high quality source"));
    };
    let coordinates = record.clip.coordinates();
    let master_key = coordinates.hls_master_key(ctx.key_prefix());
    let hls_prefix = coordinates.hls_prefix(ctx.key_prefix());
    let actions = vec![
        format!("download {}", source.r2_key),
        format!("upload package under {hls_prefix}"),
    ];
    if !ctx.mode().is_apply() {
        return Ok(ItemReport::ok(record.clip.id.clone(), "dry-run", actions));
    }

    let workspace = ctx.scratch_dir("hls")?;
    let extension = Path::new(&source.r2_key)
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or("mp4");
    let local: PathBuf = workspace.path().join(format!("source.{extension}"));
    let storage = ctx.storage()?;
    storage.download(&source.r2_key, &local).await?;
    let package = transcoder
        .derive_adaptive_streaming(&local, workspace.path())
        .await?;
    let master_md5 = upload_hls_package(storage, &package, &hls_prefix, false).await?;

    let mut next = record.clone();
    next.variants
        .push(ClipVariant::new(Quality::Hls, master_key.clone(), Some(master_md5)));
    ctx.commit(&[RecordChange::Upsert(next)])?;
    info!(clip_id = %record.clip.id, master = %master_key, files = package.files.len(), "backfilled adaptive streaming");
    Ok(ItemReport::ok(record.clip.id.clone(), master_key, actions))
}

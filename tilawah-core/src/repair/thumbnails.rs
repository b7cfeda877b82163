use std::ffi::OsStr;
use std::path::Path;

use tracing::info;

use crate::clip::{ClipRecord, ClipVariant, MediaKind, Quality};
use crate::storage::UploadOptions;
use crate::store::RecordChange;
use crate::transcode::{encode_blur, Transcoder};

use super::{BatchSummary, ItemReport, RepairContext, RepairResult};

/// Fills missing blur placeholders and thumbnails.
///
/// The first pass only needs the small thumbnail object. The second pass
/// downloads the full source video for clips that have no thumbnail at all.
pub async fn backfill_thumbnails(
    ctx: &mut RepairContext,
    transcoder: &Transcoder,
) -> RepairResult<BatchSummary> {
    let records = ctx.load_records()?;
    let mut summary = BatchSummary::new("thumbnails", ctx.mode());

    for record in records
        .iter()
        .filter(|r| r.has_variant(Quality::Thumbnail) && r.clip.thumbnail_blur.is_none())
    {
        let item = match blur_from_thumbnail(ctx, transcoder, record).await {
            Ok(item) => item,
            Err(err) => ItemReport::failed(record.clip.id.clone(), err.to_string()),
        };
        summary.record(item);
    }

    for record in records.iter().filter(|r| !r.has_variant(Quality::Thumbnail)) {
        let item = match thumbnail_from_source(ctx, transcoder, record).await {
            Ok(item) => item,
            Err(err) => ItemReport::failed(record.clip.id.clone(), err.to_string()),
        };
        summary.record(item);
    }
    ctx.finish(summary)
}

async fn blur_from_thumbnail(
    ctx: &mut RepairContext,
    transcoder: &Transcoder,
    record: &ClipRecord,
) -> RepairResult<ItemReport> {
    let Some(thumbnail) = record.variant(Quality::Thumbnail) else {
        return Ok(ItemReport::skipped(record.clip.id.clone(), "no thumbnail"));
    };
    let actions = vec![format!("blur from {}", thumbnail.r2_key)];
    if !ctx.mode().is_apply() {
        return Ok(ItemReport::ok(record.clip.id.clone(), "dry-run", actions));
    }
    let bytes = ctx.storage()?.download_bytes(&thumbnail.r2_key).await?;
    let blur = encode_blur(&bytes, transcoder.settings().blur_size)?;
    let mut next = record.clone();
    next.clip.thumbnail_blur = Some(blur);
    ctx.commit(&[RecordChange::Upsert(next)])?;
    info!(clip_id = %record.clip.id, "computed blur placeholder from thumbnail");
    Ok(ItemReport::ok(record.clip.id.clone(), "blur placeholder added", actions))
}

fn video_source(record: &ClipRecord) -> Option<&ClipVariant> {
    record.variants.iter().find(|variant| {
        variant.quality == Quality::High
            && Path::new(&variant.r2_key)
                .extension()
                .and_then(OsStr::to_str)
                .and_then(MediaKind::from_extension)
                == Some(MediaKind::Video)
    })
}

async fn thumbnail_from_source(
    ctx: &mut RepairContext,
    transcoder: &Transcoder,
    record: &ClipRecord,
) -> RepairResult<ItemReport> {
    let Some(source) = video_source(record) else {
        return Ok(ItemReport::skipped(record.clip.id.clone(), "no high quality video source"));
    };
    let thumbnail_key = record
        .clip
        .coordinates()
        .variant_key(ctx.key_prefix(), Quality::Thumbnail, "jpg");
    let mut actions = vec![
        format!("extract frame from {}", source.r2_key),
        format!("upload {thumbnail_key}"),
    ];
    if record.clip.thumbnail_blur.is_none() {
        actions.push("blur from extracted frame".into());
    }
    if !ctx.mode().is_apply() {
        return Ok(ItemReport::ok(record.clip.id.clone(), "dry-run", actions));
    }

    let workspace = ctx.scratch_dir("thumbnail")?;
    let extension = Path::new(&source.r2_key)
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or("mp4");
    let local = workspace.path().join(format!("source.{extension}"));
    let storage = ctx.storage()?;
    storage.download(&source.r2_key, &local).await?;
    let frame = transcoder.extract_thumbnail(&local, workspace.path()).await?;
    let uploaded = storage
        .upload(&thumbnail_key, &frame, UploadOptions::default())
        .await?;

    let mut next = record.clone();
    next.variants.push(ClipVariant::new(
        Quality::Thumbnail,
        uploaded.key,
        Some(uploaded.md5),
    ));
    if next.clip.thumbnail_blur.is_none() {
        next.clip.thumbnail_blur = Some(
            transcoder
                .derive_blur_placeholder(&frame, workspace.path())
                .await?,
        );
    }
    ctx.commit(&[RecordChange::Upsert(next)])?;
    info!(clip_id = %record.clip.id, key = %thumbnail_key, "backfilled thumbnail");
    Ok(ItemReport::ok(record.clip.id.clone(), "thumbnail added", actions))
}

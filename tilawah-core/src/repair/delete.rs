use std::collections::BTreeSet;

use tracing::info;

use crate::clip::ClipRecord;
use crate::storage::StorageClient;
use crate::store::RecordChange;

use super::{BatchSummary, ItemReport, RepairContext, RepairResult};

/// Every stored key belonging to the clip, HLS packages expanded.
pub async fn stored_keys(storage: &StorageClient, record: &ClipRecord) -> RepairResult<Vec<String>> {
    let mut keys = BTreeSet::new();
    for variant in &record.variants {
        keys.insert(variant.r2_key.clone());
        if let Some(prefix) = variant.object_prefix() {
            keys.extend(storage.list_prefix(&prefix).await?);
        }
    }
    Ok(keys.into_iter().collect())
}

/// Removes clips from metadata and, with `purge_objects`, their stored media.
pub async fn delete_clips(
    ctx: &mut RepairContext,
    clip_ids: &[String],
    purge_objects: bool,
) -> RepairResult<BatchSummary> {
    let mut summary = BatchSummary::new("delete", ctx.mode());
    for clip_id in clip_ids {
        let item = match delete_one(ctx, clip_id, purge_objects).await {
            Ok(item) => item,
            Err(err) => ItemReport::failed(clip_id.clone(), err.to_string()),
        };
        summary.record(item);
    }
    ctx.finish(summary)
}

async fn delete_one(ctx: &mut RepairContext, clip_id: &str, purge_objects: bool) -> RepairResult<ItemReport> {
    let record = ctx.find_record(clip_id)?;
    let keys = if purge_objects {
        stored_keys(ctx.storage()?, &record).await?
    } else {
        Vec::new()
    };
    let mut actions = vec![format!("remove clip {clip_id}")];
    actions.extend(keys.iter().map(|key| format!("delete {key}")));
    if !ctx.mode().is_apply() {
        return Ok(ItemReport::ok(clip_id, "dry-run", actions));
    }
    ctx.commit(&[RecordChange::Remove {
        id: clip_id.to_string(),
    }])?;
    let deleted = if keys.is_empty() {
        0
    } else {
        ctx.storage()?.delete(&keys).await?.deleted_count
    };
    info!(clip_id, deleted, "deleted clip");
    Ok(ItemReport::ok(
        clip_id,
        format!("removed, {deleted} objects deleted"),
        actions,
    ))
}

use std::collections::BTreeSet;

use tracing::info;

use crate::clip::ClipRecord;
use crate::store::RecordChange;

use super::{BatchSummary, ItemReport, RepairContext, RepairResult};

/// Variants kept and object keys freed by dropping deprecated quality tags.
#[derive(Debug, Clone, PartialEq)]
pub struct PrunePlan {
    pub record: ClipRecord,
    pub removed_keys: Vec<String>,
}

/// `None` when nothing is deprecated, or when pruning would leave the clip
/// without a playable variant.
pub fn plan_prune(record: &ClipRecord) -> Option<PrunePlan> {
    let (deprecated, kept): (Vec<_>, Vec<_>) = record
        .variants
        .iter()
        .cloned()
        .partition(|variant| variant.quality.is_deprecated());
    if deprecated.is_empty() || !kept.iter().any(|v| v.quality.is_playable()) {
        return None;
    }
    let still_referenced: BTreeSet<&str> = kept.iter().map(|v| v.r2_key.as_str()).collect();
    let removed_keys: BTreeSet<String> = deprecated
        .iter()
        .map(|v| v.r2_key.clone())
        .filter(|key| !still_referenced.contains(key.as_str()))
        .collect();
    let mut next = record.clone();
    next.variants = kept;
    Some(PrunePlan {
        record: next,
        removed_keys: removed_keys.into_iter().collect(),
    })
}

/// Drops `low`, `1`, `2` and `3` variants. Metadata is committed before the
/// objects are deleted.
pub async fn prune_variants(ctx: &mut RepairContext) -> RepairResult<BatchSummary> {
    let records = ctx.load_records()?;
    let mut summary = BatchSummary::new("prune", ctx.mode());
    for record in &records {
        if !record.variants.iter().any(|v| v.quality.is_deprecated()) {
            continue;
        }
        let item = match prune_one(ctx, record).await {
            Ok(item) => item,
            Err(err) => ItemReport::failed(record.clip.id.clone(), err.to_string()),
        };
        summary.record(item);
    }
    ctx.finish(summary)
}

async fn prune_one(ctx: &mut RepairContext, record: &ClipRecord) -> RepairResult<ItemReport> {
    let Some(plan) = plan_prune(record) else {
        return Ok(ItemReport::skipped(
            record.clip.id.clone(),
            "no playable variant would remain",
        ));
    };
    let actions: Vec<String> = plan
        .removed_keys
        .iter()
        .map(|key| format!("delete {key}"))
        .collect();
    if !ctx.mode().is_apply() {
        return Ok(ItemReport::ok(record.clip.id.clone(), "dry-run", actions));
    }
    ctx.commit(&[RecordChange::Upsert(plan.record.clone())])?;
    let deleted = if plan.removed_keys.is_empty() {
        0
    } else {
        ctx.storage()?.delete(&plan.removed_keys).await?.deleted_count
    };
    info!(clip_id = %record.clip.id, deleted, "pruned deprecated variants");
    Ok(ItemReport::ok(
        record.clip.id.clone(),
        format!("kept {} variants, deleted {deleted} objects", plan.record.variants.len()),
        actions,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{Clip, ClipVariant, Quality};
    use chrono::Utc;

    fn record(qualities: &[Quality]) -> ClipRecord {
        let clip = Clip {
            id: "s1_a1-7__maher-al-muaiqly__hafs-an-asim__saheeh-international".into(),
            surah: 1,
            ayah_start: 1,
            ayah_end: 7,
            reciter_slug: "maher-al-muaiqly".into(),
            reciter_name: "Maher al-Mu'aiqly".into(),
            riwayah: "hafs-an-asim".into(),
            translation: "saheeh-international".into(),
            thumbnail_blur: None,
            created_at: Utc::now(),
        };
        let variants = qualities
            .iter()
            .map(|q| ClipVariant::new(*q, format!("clips/x/{q}.mp4"), None))
            .collect();
        ClipRecord::new(clip, variants)
    }

    #[test]
    fn keeps_high_and_frees_two_keys() {
        let plan = plan_prune(&record(&[Quality::Low, Quality::High, Quality::LegacyOne])).unwrap();
        assert_eq!(
            plan.record.variants.iter().map(|v| v.quality).collect::<Vec<_>>(),
            vec![Quality::High]
        );
        assert_eq!(plan.removed_keys.len(), 2);
    }

    #[test]
    fn refuses_to_strip_last_playable_variant() {
        assert!(plan_prune(&record(&[Quality::Low, Quality::Thumbnail])).is_none());
        assert!(plan_prune(&record(&[Quality::High, Quality::Hls])).is_none());
    }
}

use tracing::info;

use crate::clip::{ClipRecord, ClipVariant, Quality, VariantKey};
use crate::store::RecordChange;

use super::{BatchSummary, ItemReport, RepairContext, RepairError, RepairResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetagOptions {
    /// Copy stored objects to the re-tagged keys.
    pub apply_storage: bool,
    /// Delete the old keys once the new ones are confirmed present.
    pub delete_old: bool,
}

/// One object move, old key to new key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyMove {
    from: String,
    to: String,
}

/// Moves clips to another translation: new id, every variant key rewritten.
pub async fn retag_translation(
    ctx: &mut RepairContext,
    clip_ids: &[String],
    translation: &str,
    options: RetagOptions,
) -> RepairResult<BatchSummary> {
    let translation = ctx.catalog().resolve_translation(Some(translation))?;
    let mut summary = BatchSummary::new("retag", ctx.mode());
    for clip_id in clip_ids {
        let item = match retag_one(ctx, clip_id, &translation, options).await {
            Ok(item) => item,
            Err(err) => ItemReport::failed(clip_id.clone(), err.to_string()),
        };
        summary.record(item);
    }
    ctx.finish(summary)
}

/// The record as it looks under `translation`.
pub fn retagged_record(record: &ClipRecord, translation: &str) -> RepairResult<ClipRecord> {
    let mut next = record.clone();
    next.clip.translation = translation.to_string();
    next.clip.id = next.clip.derived_id();
    let coordinates = next.clip.coordinates();
    next.variants = record
        .variants
        .iter()
        .map(|variant| {
            let parsed = VariantKey::parse(&variant.r2_key).ok_or_else(|| {
                RepairError::UnrecognizedKey {
                    key: variant.r2_key.clone(),
                }
            })?;
            Ok(ClipVariant::new(
                variant.quality,
                parsed.rebase(&coordinates),
                variant.md5.clone(),
            ))
        })
        .collect::<RepairResult<Vec<_>>>()?;
    Ok(next)
}

async fn retag_one(
    ctx: &mut RepairContext,
    clip_id: &str,
    translation: &str,
    options: RetagOptions,
) -> RepairResult<ItemReport> {
    let records = ctx.load_records()?;
    let record = records
        .iter()
        .find(|record| record.clip.id == clip_id)
        .ok_or_else(|| RepairError::ClipNotFound {
            clip_id: clip_id.to_string(),
        })?;
    if record.clip.translation == translation {
        return Ok(ItemReport::skipped(clip_id, format!("already tagged {translation}")));
    }
    let next = retagged_record(record, translation)?;
    if records.iter().any(|other| other.clip.id == next.clip.id) {
        return Err(RepairError::Conflict {
            clip_id: clip_id.to_string(),
            reason: format!("target id {} already exists", next.clip.id),
        });
    }

    let mut actions = vec![format!("id {} -> {}", record.clip.id, next.clip.id)];
    for (old, new) in record.variants.iter().zip(&next.variants) {
        actions.push(format!("key {} -> {}", old.r2_key, new.r2_key));
    }

    let moves = if options.apply_storage {
        plan_moves(ctx, record, &next).await?
    } else {
        Vec::new()
    };
    for key_move in &moves {
        actions.push(format!("copy {} -> {}", key_move.from, key_move.to));
    }

    if !ctx.mode().is_apply() {
        return Ok(ItemReport::ok(next.clip.id, "dry-run", actions));
    }

    let mut copied = 0usize;
    if options.apply_storage {
        let storage = ctx.storage()?;
        for key_move in &moves {
            if storage.copy(&key_move.from, &key_move.to, false).await?.copied {
                copied += 1;
            }
        }
    }

    ctx.commit(&[RecordChange::Replace {
        old_id: record.clip.id.clone(),
        record: next.clone(),
    }])?;

    if options.apply_storage && options.delete_old {
        let storage = ctx.storage()?;
        let mut stale = Vec::new();
        for key_move in &moves {
            if storage.exists(&key_move.to).await? {
                stale.push(key_move.from.clone());
            }
        }
        if !stale.is_empty() {
            storage.delete(&stale).await?;
            actions.push(format!("deleted {} old keys", stale.len()));
        }
    }
    info!(from = %record.clip.id, to = %next.clip.id, copied, "retagged clip");
    Ok(ItemReport::ok(
        next.clip.id,
        format!("retagged, {copied} objects copied"),
        actions,
    ))
}

/// Pairs every stored old key with its new key. HLS variants move their
/// whole package. Sources that are missing, or whose destination already
/// exists, are left out.
async fn plan_moves(
    ctx: &RepairContext,
    old: &ClipRecord,
    new: &ClipRecord,
) -> RepairResult<Vec<KeyMove>> {
    let storage = ctx.storage()?;
    let coordinates = new.clip.coordinates();
    let mut candidates = Vec::new();
    for (old_variant, new_variant) in old.variants.iter().zip(&new.variants) {
        if old_variant.quality == Quality::Hls {
            if let Some(prefix) = old_variant.object_prefix() {
                for key in storage.list_prefix(&prefix).await? {
                    let parsed = VariantKey::parse(&key)
                        .ok_or_else(|| RepairError::UnrecognizedKey { key: key.clone() })?;
                    candidates.push(KeyMove {
                        to: parsed.rebase(&coordinates),
                        from: key,
                    });
                }
                continue;
            }
        }
        candidates.push(KeyMove {
            from: old_variant.r2_key.clone(),
            to: new_variant.r2_key.clone(),
        });
    }

    let mut moves = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if candidate.from == candidate.to {
            continue;
        }
        if !storage.exists(&candidate.from).await? {
            continue;
        }
        if storage.exists(&candidate.to).await? {
            continue;
        }
        moves.push(candidate);
    }
    Ok(moves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{normalize, Catalog, RawClipFields, RawClipInput, RawVariant};

    #[test]
    fn retagged_record_swaps_translation_everywhere() {
        let base = "clips/maher-al-muaiqly/hafs-an-asim/khan-al-hilali/s2/a255-255";
        let raw = RawClipInput::Current {
            fields: RawClipFields {
                surah: 2,
                ayah_start: 255,
                ayah_end: 255,
                translation: Some("khan-al-hilali".into()),
                variants: vec![
                    RawVariant {
                        quality: "high".into(),
                        r2_key: format!("{base}/high.mp4"),
                        md5: None,
                    },
                    RawVariant {
                        quality: "hls".into(),
                        r2_key: format!("{base}/hls/master.m3u8"),
                        md5: None,
                    },
                ],
                ..RawClipFields::default()
            },
            reciter_slug: Some("maher-al-muaiqly".into()),
            reciter_name: None,
        };
        let record = normalize(&raw, &Catalog::default()).unwrap();
        let next = retagged_record(&record, "saheeh-international").unwrap();
        assert_eq!(
            next.clip.id,
            "s2_a255-255__maher-al-muaiqly__hafs-an-asim__saheeh-international"
        );
        assert!(next
            .variants
            .iter()
            .all(|v| v.r2_key.contains("/saheeh-international/") && !v.r2_key.contains("khan-al-hilali")));
        assert_eq!(
            next.variants[1].r2_key,
            "clips/maher-al-muaiqly/hafs-an-asim/saheeh-international/s2/a255-255/hls/master.m3u8"
        );
    }
}

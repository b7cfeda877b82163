use tracing::{debug, info};

use crate::clip::{reciter_aliases, slugify, Catalog, ClipRecord, ClipVariant, Quality, VariantKey};
use crate::storage::StorageClient;

use super::{BatchSummary, ItemReport, RepairContext, RepairError, RepairResult};

/// Historical keys a variant may have been uploaded under, most likely first:
/// other translations (default first), legacy reciter spellings, then riwayah
/// misspellings.
pub fn candidate_keys(expected: &str, record: &ClipRecord, catalog: &Catalog) -> Vec<String> {
    let Some(parsed) = VariantKey::parse(expected) else {
        return Vec::new();
    };
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |candidate: VariantKey| {
        let key = candidate.render();
        if key != expected && !candidates.contains(&key) {
            candidates.push(key);
        }
    };

    let mut translations = vec![catalog.default_translation()];
    translations.extend(
        catalog
            .translations()
            .filter(|t| *t != catalog.default_translation()),
    );
    for translation in translations {
        if translation != parsed.translation {
            push(VariantKey {
                translation: translation.to_string(),
                ..parsed.clone()
            });
        }
    }

    let mut reciters = vec![slugify(&record.clip.reciter_name)];
    reciters.extend(reciter_aliases(&parsed.reciter_slug).iter().map(|a| a.to_string()));
    for reciter in reciters {
        if !reciter.is_empty() && reciter != parsed.reciter_slug {
            push(VariantKey {
                reciter_slug: reciter,
                ..parsed.clone()
            });
        }
    }

    for (alias, canonical) in catalog.riwayah_aliases() {
        if canonical == parsed.riwayah {
            push(VariantKey {
                riwayah: alias.to_string(),
                ..parsed.clone()
            });
        }
    }
    candidates
}

/// Copies misplaced objects to the keys the metadata expects.
pub async fn fix_keys(ctx: &mut RepairContext, only: &[String]) -> RepairResult<BatchSummary> {
    let records = ctx.load_records()?;
    let mut summary = BatchSummary::new("fix-keys", ctx.mode());
    for record in records
        .iter()
        .filter(|record| only.is_empty() || only.contains(&record.clip.id))
    {
        let item = match fix_record(ctx, record).await {
            Ok(item) => item,
            Err(err) => ItemReport::failed(record.clip.id.clone(), err.to_string()),
        };
        summary.record(item);
    }
    ctx.finish(summary)
}

enum Resolution {
    Present,
    Recovered(String),
    Missing,
    Ambiguous(Vec<String>),
}

async fn resolve(
    storage: &StorageClient,
    variant: &ClipVariant,
    record: &ClipRecord,
    catalog: &Catalog,
) -> RepairResult<Resolution> {
    if storage.exists(&variant.r2_key).await? {
        return Ok(Resolution::Present);
    }
    let mut found = Vec::new();
    for candidate in candidate_keys(&variant.r2_key, record, catalog) {
        if storage.exists(&candidate).await? {
            found.push(candidate);
        } else {
            debug!(candidate = %candidate, "candidate key absent");
        }
    }
    Ok(match found.len() {
        0 => Resolution::Missing,
        1 => Resolution::Recovered(found.remove(0)),
        _ => Resolution::Ambiguous(found),
    })
}

async fn fix_record(ctx: &RepairContext, record: &ClipRecord) -> RepairResult<ItemReport> {
    let storage = ctx.storage()?;
    let mut actions = Vec::new();
    let mut problems = Vec::new();
    for variant in &record.variants {
        match resolve(storage, variant, record, ctx.catalog()).await? {
            Resolution::Present => {}
            Resolution::Missing => problems.push(format!("{}: no candidate found", variant.r2_key)),
            Resolution::Ambiguous(found) => problems.push(format!(
                "{}: {} candidates exist ({})",
                variant.r2_key,
                found.len(),
                found.join(", ")
            )),
            Resolution::Recovered(source) => {
                let moves = package_moves(storage, variant, &source).await?;
                for (from, to) in &moves {
                    actions.push(format!("copy {from} -> {to}"));
                    if ctx.mode().is_apply() {
                        storage.copy(from, to, false).await?;
                    }
                }
                info!(clip_id = %record.clip.id, expected = %variant.r2_key, source = %source, "recovered variant key");
            }
        }
    }
    if !problems.is_empty() {
        let mut item = ItemReport::failed(record.clip.id.clone(), problems.join("; "));
        item.actions = actions;
        return Ok(item);
    }
    if actions.is_empty() {
        return Ok(ItemReport::skipped(record.clip.id.clone(), "all variant keys present"));
    }
    let message = if ctx.mode().is_apply() {
        "copied to expected keys"
    } else {
        "dry-run"
    };
    Ok(ItemReport::ok(record.clip.id.clone(), message, actions))
}

/// Single objects move alone; an HLS master drags its whole package along.
async fn package_moves(
    storage: &StorageClient,
    variant: &ClipVariant,
    source: &str,
) -> RepairResult<Vec<(String, String)>> {
    if variant.quality != Quality::Hls {
        return Ok(vec![(source.to_string(), variant.r2_key.clone())]);
    }
    let expected = VariantKey::parse(&variant.r2_key).ok_or_else(|| RepairError::UnrecognizedKey {
        key: variant.r2_key.clone(),
    })?;
    let source_variant = ClipVariant::new(Quality::Hls, source, None);
    let Some(prefix) = source_variant.object_prefix() else {
        return Ok(vec![(source.to_string(), variant.r2_key.clone())]);
    };
    let mut moves = Vec::new();
    for key in storage.list_prefix(&prefix).await? {
        let parsed = VariantKey::parse(&key).ok_or_else(|| RepairError::UnrecognizedKey { key: key.clone() })?;
        moves.push((key, parsed.rebase(&expected.coordinates())));
    }
    Ok(moves)
}

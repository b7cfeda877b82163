use tracing::debug;

use crate::clip::ClipRecord;

use super::{BatchSummary, ItemReport, RepairContext, RepairResult};

/// Read-only: checks that every committed variant exists in storage and that
/// its stored digest agrees with the recorded one.
pub async fn audit_storage(ctx: &mut RepairContext, only: &[String]) -> RepairResult<BatchSummary> {
    let records = ctx.load_records()?;
    let mut summary = BatchSummary::new("audit", ctx.mode());
    for record in records
        .iter()
        .filter(|record| only.is_empty() || only.contains(&record.clip.id))
    {
        let item = match audit_one(ctx, record).await {
            Ok(item) => item,
            Err(err) => ItemReport::failed(record.clip.id.clone(), err.to_string()),
        };
        summary.record(item);
    }
    ctx.finish(summary)
}

async fn audit_one(ctx: &RepairContext, record: &ClipRecord) -> RepairResult<ItemReport> {
    let storage = ctx.storage()?;
    let mut problems = Vec::new();
    for variant in &record.variants {
        match storage.head(&variant.r2_key).await? {
            None => problems.push(format!("missing {}", variant.r2_key)),
            Some(metadata) => {
                let stored = metadata.content_digest();
                match (&variant.md5, stored) {
                    (Some(expected), Some(found)) if !expected.eq_ignore_ascii_case(&found) => {
                        problems.push(format!(
                            "digest mismatch {} (recorded {expected}, stored {found})",
                            variant.r2_key
                        ));
                    }
                    _ => debug!(key = %variant.r2_key, "variant verified"),
                }
            }
        }
    }
    if record.variants.is_empty() {
        return Ok(ItemReport::skipped(record.clip.id.clone(), "no variants"));
    }
    if problems.is_empty() {
        Ok(ItemReport::ok(
            record.clip.id.clone(),
            format!("{} variants verified", record.variants.len()),
            Vec::new(),
        ))
    } else {
        Ok(ItemReport::failed(record.clip.id.clone(), problems.join("; ")))
    }
}

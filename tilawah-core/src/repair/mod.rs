//! Batch maintenance over committed clips.
//!
//! Every tool reads the whole clip source, plans its changes, and only acts
//! on them in [`RepairMode::Apply`]. Per-clip failures are reported in the
//! [`BatchSummary`] and do not stop the batch; an unreadable source or a
//! failed index rebuild aborts it.

mod audit;
mod context;
mod delete;
mod error;
mod fix_keys;
mod hls;
mod prune;
mod retag;
mod thumbnails;

pub use audit::audit_storage;
pub use context::{BatchSummary, ItemReport, ItemStatus, RepairContext, RepairMode};
pub use delete::{delete_clips, stored_keys};
pub use error::{RepairError, RepairResult};
pub use fix_keys::{candidate_keys, fix_keys};
pub use hls::{backfill_hls, needs_hls, HlsProgress};
pub use prune::{plan_prune, prune_variants, PrunePlan};
pub use retag::{retag_translation, retagged_record, RetagOptions};
pub use thumbnails::backfill_thumbnails;

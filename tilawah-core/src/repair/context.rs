use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::clip::{Catalog, ClipRecord};
use crate::index::{build_index, write_index, SourceLine};
use crate::storage::StorageClient;
use crate::store::{ClipRepository, RecordChange};

use super::{RepairError, RepairResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairMode {
    DryRun,
    Apply,
}

impl RepairMode {
    pub fn from_flag(apply: bool) -> Self {
        if apply {
            RepairMode::Apply
        } else {
            RepairMode::DryRun
        }
    }

    pub fn is_apply(&self) -> bool {
        matches!(self, RepairMode::Apply)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ok,
    Failed,
    Skipped,
}

/// Outcome line for one clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub clip_id: String,
    pub status: ItemStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

impl ItemReport {
    pub fn ok(clip_id: impl Into<String>, message: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            clip_id: clip_id.into(),
            status: ItemStatus::Ok,
            message: message.into(),
            actions,
        }
    }

    pub fn skipped(clip_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            clip_id: clip_id.into(),
            status: ItemStatus::Skipped,
            message: message.into(),
            actions: Vec::new(),
        }
    }

    pub fn failed(clip_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            clip_id: clip_id.into(),
            status: ItemStatus::Failed,
            message: message.into(),
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub tool: &'static str,
    pub mode: RepairMode,
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items: Vec<ItemReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_rebuilt: Option<usize>,
}

impl BatchSummary {
    pub fn new(tool: &'static str, mode: RepairMode) -> Self {
        Self {
            tool,
            mode,
            ok: 0,
            failed: 0,
            skipped: 0,
            items: Vec::new(),
            backup: None,
            index_rebuilt: None,
        }
    }

    pub fn record(&mut self, item: ItemReport) {
        match item.status {
            ItemStatus::Ok => self.ok += 1,
            ItemStatus::Failed => {
                warn!(tool = self.tool, clip_id = %item.clip_id, message = %item.message, "item failed");
                self.failed += 1;
            }
            ItemStatus::Skipped => self.skipped += 1,
        }
        self.items.push(item);
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Everything a repair tool needs: the authoritative clip source, optional
/// object storage and the naming context.
///
/// The first applied change takes a backup of the source. After a tool has
/// applied any change, [`RepairContext::finish`] rebuilds the JSON index.
pub struct RepairContext {
    repository: Box<dyn ClipRepository>,
    storage: Option<StorageClient>,
    catalog: Catalog,
    key_prefix: String,
    index_path: Option<PathBuf>,
    temp_dir: PathBuf,
    mode: RepairMode,
    backup: Option<PathBuf>,
    dirty: bool,
}

impl RepairContext {
    pub fn new(repository: Box<dyn ClipRepository>, catalog: Catalog, mode: RepairMode) -> Self {
        Self {
            repository,
            storage: None,
            catalog,
            key_prefix: "clips".into(),
            index_path: None,
            temp_dir: std::env::temp_dir(),
            mode,
            backup: None,
            dirty: false,
        }
    }

    pub fn with_storage(mut self, storage: StorageClient) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn mode(&self) -> RepairMode {
        self.mode
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn describe(&self) -> String {
        self.repository.describe()
    }

    pub fn storage(&self) -> RepairResult<&StorageClient> {
        self.storage.as_ref().ok_or(RepairError::StorageUnavailable)
    }

    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Whole-batch read; a duplicate id or invalid record aborts the tool.
    pub fn load_records(&self) -> RepairResult<Vec<ClipRecord>> {
        Ok(self.repository.load_all()?)
    }

    pub fn find_record(&self, clip_id: &str) -> RepairResult<ClipRecord> {
        self.load_records()?
            .into_iter()
            .find(|record| record.clip.id == clip_id)
            .ok_or_else(|| RepairError::ClipNotFound {
                clip_id: clip_id.to_string(),
            })
    }

    /// Private scratch directory, removed when dropped.
    pub fn scratch_dir(&self, label: &str) -> RepairResult<tempfile::TempDir> {
        let io_err = |source| RepairError::Io {
            path: self.temp_dir.clone(),
            source,
        };
        std::fs::create_dir_all(&self.temp_dir).map_err(io_err)?;
        tempfile::Builder::new()
            .prefix(&format!("{label}-"))
            .tempdir_in(&self.temp_dir)
            .map_err(io_err)
    }

    /// Applies metadata changes when running with `Apply`; a no-op in dry-run.
    pub fn commit(&mut self, changes: &[RecordChange]) -> RepairResult<()> {
        if changes.is_empty() || !self.mode.is_apply() {
            return Ok(());
        }
        if self.backup.is_none() {
            let path = self.repository.backup()?;
            info!(source = %self.repository.describe(), backup = %path.display(), "backed up clip source");
            self.backup = Some(path);
        }
        self.repository.apply(changes)?;
        self.dirty = true;
        Ok(())
    }

    /// Regenerates the JSON index from the current records.
    pub fn rebuild_index(&self) -> RepairResult<Option<usize>> {
        let Some(path) = &self.index_path else {
            return Ok(None);
        };
        let records = self.load_records()?;
        let index = build_index(&SourceLine::from_records(&records), &self.catalog)?;
        write_index(path, &index)?;
        Ok(Some(index.clip_count))
    }

    /// Attaches the backup path and rebuilds the index when anything was applied.
    pub fn finish(&mut self, mut summary: BatchSummary) -> RepairResult<BatchSummary> {
        summary.backup = self.backup.clone();
        if self.dirty {
            summary.index_rebuilt = self.rebuild_index()?;
            self.dirty = false;
        }
        info!(
            tool = summary.tool,
            mode = ?summary.mode,
            ok = summary.ok,
            failed = summary.failed,
            skipped = summary.skipped,
            "repair finished"
        );
        Ok(summary)
    }
}

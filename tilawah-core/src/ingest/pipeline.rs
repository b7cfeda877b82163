use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::clip::{normalize, Catalog, ClipRecord, ClipVariant, MediaKind, Quality, RawClipInput};
use crate::config::TilawahConfig;
use crate::hasher::digest_file;
use crate::index::JsonlLog;
use crate::storage::{StorageClient, UploadOptions};
use crate::store::SqliteClipStore;
use crate::transcode::{HlsPackage, Transcoder};

use super::{IngestError, IngestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Received,
    Validated,
    Hashed,
    DuplicateChecked,
    Transcoded,
    Uploaded,
    Committed,
    Failed,
}

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestState::Received => "received",
            IngestState::Validated => "validated",
            IngestState::Hashed => "hashed",
            IngestState::DuplicateChecked => "duplicate_checked",
            IngestState::Transcoded => "transcoded",
            IngestState::Uploaded => "uploaded",
            IngestState::Committed => "committed",
            IngestState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IngestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which derivations run and how collisions are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub overwrite: bool,
    /// Accept content whose digest is already committed under another clip id.
    pub allow_shared_content: bool,
    pub derive_low: bool,
    pub derive_hls: bool,
    pub extract_thumbnail: bool,
    pub derive_blur: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            allow_shared_content: false,
            derive_low: true,
            derive_hls: true,
            extract_thumbnail: true,
            derive_blur: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub source: PathBuf,
    pub input: RawClipInput,
    pub options: IngestOptions,
}

impl IngestRequest {
    pub fn new(source: impl Into<PathBuf>, input: RawClipInput) -> Self {
        Self {
            source: source.into(),
            input,
            options: IngestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Ingested,
    AlreadyIngested,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub clip_id: String,
    pub outcome: IngestOutcome,
    pub digest: String,
    pub variants: Vec<ClipVariant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_blur: Option<String>,
    pub transitions: Vec<IngestState>,
}

struct StateLog {
    source: String,
    clip_id: Option<String>,
    states: Vec<IngestState>,
}

impl StateLog {
    fn new(source: &Path) -> Self {
        Self {
            source: source.display().to_string(),
            clip_id: None,
            states: Vec::new(),
        }
    }

    fn enter(&mut self, state: IngestState) {
        info!(
            source = %self.source,
            clip_id = self.clip_id.as_deref().unwrap_or("-"),
            state = %state,
            "ingest transition"
        );
        self.states.push(state);
    }

    fn fail(&mut self, err: &IngestError) {
        let from = self.states.last().copied().unwrap_or(IngestState::Received);
        warn!(
            source = %self.source,
            clip_id = self.clip_id.as_deref().unwrap_or("-"),
            from = %from,
            error = %err,
            "ingest failed"
        );
        self.states.push(IngestState::Failed);
    }
}

#[derive(Default)]
struct Derived {
    low: Option<PathBuf>,
    hls: Option<HlsPackage>,
    thumbnail: Option<PathBuf>,
    blur: Option<String>,
}

/// Drives one source file from raw metadata to committed clip.
///
/// Metadata is committed only after every artifact is confirmed in storage,
/// so an interrupted run can leave orphaned objects but never rows pointing
/// at missing media.
#[derive(Clone)]
pub struct Ingestor {
    storage: StorageClient,
    store: SqliteClipStore,
    transcoder: Transcoder,
    catalog: Catalog,
    key_prefix: String,
    temp_dir: PathBuf,
    log: Option<JsonlLog>,
}

impl Ingestor {
    pub fn new(
        storage: StorageClient,
        store: SqliteClipStore,
        transcoder: Transcoder,
        catalog: Catalog,
    ) -> Self {
        Self {
            storage,
            store,
            transcoder,
            catalog,
            key_prefix: "clips".into(),
            temp_dir: std::env::temp_dir(),
            log: None,
        }
    }

    pub fn from_config(
        config: &TilawahConfig,
        storage: StorageClient,
        store: SqliteClipStore,
        transcoder: Transcoder,
    ) -> Self {
        let catalog = Catalog::from_config(&config.catalog);
        let mut ingestor = Self::new(storage, store, transcoder, catalog.clone())
            .with_key_prefix(config.storage.key_prefix.clone())
            .with_temp_dir(config.temp_dir());
        if let Some(path) = config.jsonl_log_path() {
            ingestor = ingestor.with_log(JsonlLog::new(path).with_catalog(catalog));
        }
        ingestor
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Also appends every committed record to a JSON-Lines log.
    pub fn with_log(mut self, log: JsonlLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn store(&self) -> &SqliteClipStore {
        &self.store
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn ingest(&self, request: &IngestRequest) -> IngestResult<IngestReport> {
        let mut states = StateLog::new(&request.source);
        states.enter(IngestState::Received);
        match self.run(request, &mut states).await {
            Ok(mut report) => {
                report.transitions = states.states;
                Ok(report)
            }
            Err(err) => {
                states.fail(&err);
                Err(err)
            }
        }
    }

    async fn run(&self, request: &IngestRequest, states: &mut StateLog) -> IngestResult<IngestReport> {
        let options = request.options;
        let mut input = request.input.clone();
        input.fields_mut().created_at.get_or_insert_with(Utc::now);
        let record = normalize(&input, &self.catalog)?;
        let (kind, extension) = media_kind(&request.source)?;
        tokio::fs::metadata(&request.source)
            .await
            .map_err(|source| IngestError::Io {
                path: request.source.clone(),
                source,
            })?;
        states.clip_id = Some(record.clip.id.clone());
        states.enter(IngestState::Validated);

        let digest = digest_file(&request.source).await?;
        states.enter(IngestState::Hashed);

        if let Some(existing_id) = self.store.find_by_content_digest(&digest)? {
            if existing_id == record.clip.id {
                if let Some(stored) = self.store.find_record(&existing_id)? {
                    info!(clip_id = %existing_id, md5 = %digest, "clip already ingested");
                    return Ok(IngestReport {
                        clip_id: existing_id,
                        outcome: IngestOutcome::AlreadyIngested,
                        digest,
                        thumbnail_blur: stored.clip.thumbnail_blur.clone(),
                        variants: stored.variants,
                        transitions: Vec::new(),
                    });
                }
            } else if options.allow_shared_content {
                warn!(
                    clip_id = %record.clip.id,
                    existing_id = %existing_id,
                    md5 = %digest,
                    "content shared with another clip, continuing by request"
                );
            } else {
                return Err(IngestError::Conflict {
                    existing_id,
                    digest,
                });
            }
        }
        if let Some(stored) = self.store.find_record(&record.clip.id)? {
            if !options.overwrite {
                return Err(IngestError::AlreadyPresent {
                    clip_id: record.clip.id.clone(),
                    stored: stored
                        .variant(Quality::High)
                        .and_then(|variant| variant.md5.clone()),
                    incoming: digest,
                });
            }
            warn!(clip_id = %record.clip.id, "replacing clip with different content");
        }
        states.enter(IngestState::DuplicateChecked);

        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|source| IngestError::Io {
                path: self.temp_dir.clone(),
                source,
            })?;
        let workspace = tempfile::Builder::new()
            .prefix("ingest-")
            .tempdir_in(&self.temp_dir)
            .map_err(|source| IngestError::Io {
                path: self.temp_dir.clone(),
                source,
            })?;

        let derived = self
            .transcode(&request.source, kind, &record, options, workspace.path())
            .await?;
        states.enter(IngestState::Transcoded);

        let variants = self
            .upload(&request.source, &extension, &digest, &record, &derived, options)
            .await?;
        states.enter(IngestState::Uploaded);

        let mut committed = record;
        committed.variants = variants;
        if derived.blur.is_some() {
            committed.clip.thumbnail_blur = derived.blur;
        }
        self.store.commit_clip(&committed)?;
        if let Some(log) = &self.log {
            if let Err(err) = log.append(&committed) {
                warn!(clip_id = %committed.clip.id, error = %err, "failed to append clip log");
            }
        }
        states.enter(IngestState::Committed);

        Ok(IngestReport {
            clip_id: committed.clip.id.clone(),
            outcome: IngestOutcome::Ingested,
            digest,
            thumbnail_blur: committed.clip.thumbnail_blur.clone(),
            variants: committed.variants,
            transitions: Vec::new(),
        })
    }

    async fn transcode(
        &self,
        source: &Path,
        kind: MediaKind,
        record: &ClipRecord,
        options: IngestOptions,
        workdir: &Path,
    ) -> IngestResult<Derived> {
        let mut derived = Derived::default();
        if options.derive_low {
            derived.low = Some(
                self.transcoder
                    .derive_low_quality(source, kind, workdir)
                    .await?,
            );
        }
        if kind != MediaKind::Video {
            return Ok(derived);
        }
        if options.derive_hls {
            derived.hls = Some(
                self.transcoder
                    .derive_adaptive_streaming(source, workdir)
                    .await?,
            );
        }
        if options.extract_thumbnail {
            derived.thumbnail = Some(self.transcoder.extract_thumbnail(source, workdir).await?);
        }
        if options.derive_blur && record.clip.thumbnail_blur.is_none() {
            let frame_source = derived.thumbnail.as_deref().unwrap_or(source);
            derived.blur = Some(
                self.transcoder
                    .derive_blur_placeholder(frame_source, workdir)
                    .await?,
            );
        }
        Ok(derived)
    }

    async fn upload(
        &self,
        source: &Path,
        extension: &str,
        digest: &str,
        record: &ClipRecord,
        derived: &Derived,
        options: IngestOptions,
    ) -> IngestResult<Vec<ClipVariant>> {
        let coordinates = record.clip.coordinates();
        let prefix = self.key_prefix.as_str();
        let mut variants = Vec::new();

        let high = self
            .storage
            .upload(
                &coordinates.variant_key(prefix, Quality::High, extension),
                source,
                UploadOptions::with_md5(digest).overwrite(options.overwrite),
            )
            .await?;
        variants.push(ClipVariant::new(Quality::High, high.key, Some(high.md5)));

        if let Some(low) = &derived.low {
            let ext = low.extension().and_then(OsStr::to_str).unwrap_or("mp4");
            let outcome = self
                .storage
                .upload(
                    &coordinates.variant_key(prefix, Quality::Low, ext),
                    low,
                    UploadOptions::default().overwrite(options.overwrite),
                )
                .await?;
            variants.push(ClipVariant::new(Quality::Low, outcome.key, Some(outcome.md5)));
        }

        if let Some(thumbnail) = &derived.thumbnail {
            let outcome = self
                .storage
                .upload(
                    &coordinates.variant_key(prefix, Quality::Thumbnail, "jpg"),
                    thumbnail,
                    UploadOptions::default().overwrite(options.overwrite),
                )
                .await?;
            variants.push(ClipVariant::new(
                Quality::Thumbnail,
                outcome.key,
                Some(outcome.md5),
            ));
        }

        if let Some(package) = &derived.hls {
            let master_md5 = upload_hls_package(
                &self.storage,
                package,
                &coordinates.hls_prefix(prefix),
                options.overwrite,
            )
            .await?;
            variants.push(ClipVariant::new(
                Quality::Hls,
                coordinates.hls_master_key(prefix),
                Some(master_md5),
            ));
        }
        Ok(variants)
    }
}

/// Uploads segments and sub-playlists before the master playlist and
/// returns the master playlist digest.
pub async fn upload_hls_package(
    storage: &StorageClient,
    package: &HlsPackage,
    key_prefix: &str,
    overwrite: bool,
) -> IngestResult<String> {
    let master_relative = package
        .master
        .strip_prefix(&package.root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| PathBuf::from(crate::clip::HLS_MASTER_PLAYLIST));
    for relative in package.files.iter().filter(|f| **f != master_relative) {
        let key = format!("{key_prefix}{}", relative_key(relative));
        storage
            .upload(
                &key,
                &package.root.join(relative),
                UploadOptions::default().overwrite(overwrite),
            )
            .await?;
    }
    let master_key = format!("{key_prefix}{}", relative_key(&master_relative));
    let outcome = storage
        .upload(
            &master_key,
            &package.master,
            UploadOptions::default().overwrite(overwrite),
        )
        .await?;
    info!(prefix = key_prefix, files = package.files.len(), "uploaded adaptive streaming package");
    Ok(outcome.md5)
}

fn relative_key(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn media_kind(path: &Path) -> IngestResult<(MediaKind, String)> {
    let extension = path
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| IngestError::UnsupportedMedia {
            path: path.to_path_buf(),
        })?;
    let kind = MediaKind::from_extension(&extension).ok_or_else(|| IngestError::UnsupportedMedia {
        path: path.to_path_buf(),
    })?;
    Ok((kind, extension))
}

#![allow(dead_code)]

use std::ffi::OsStr;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Output;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{ImageBuffer, ImageOutputFormat, Rgb};
use tempfile::TempDir;
use tilawah_core::clip::{RawClipFields, RawClipInput};
use tilawah_core::config::TranscodeSection;
use tilawah_core::storage::memory::InMemoryObjectStore;
use tilawah_core::transcode::{TranscodeExecutor, TranscodeStage};
use tilawah_core::{Catalog, Ingestor, RetryPolicy, SqliteClipStore, StorageClient, Transcoder};
use tokio::process::Command;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

pub fn sample_jpeg() -> Vec<u8> {
    let img = ImageBuffer::from_fn(32, 24, |x, y| Rgb([(x * 7) as u8, (y * 9) as u8, 120]));
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut cursor, ImageOutputFormat::Jpeg(80))
        .unwrap();
    cursor.into_inner()
}

/// Stands in for ffmpeg: writes whatever output the command names last.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub stages: Mutex<Vec<TranscodeStage>>,
}

#[async_trait]
impl TranscodeExecutor for ScriptedExecutor {
    async fn run(&self, stage: TranscodeStage, command: &mut Command) -> std::io::Result<Output> {
        self.stages.lock().unwrap().push(stage);
        let target = PathBuf::from(command.as_std().get_args().last().unwrap());
        if stage == TranscodeStage::Hls {
            let root = target.parent().unwrap().parent().unwrap().to_path_buf();
            std::fs::write(root.join("master.m3u8"), b"#EXTM3U\n")?;
            for v in ["v0", "v1"] {
                std::fs::write(root.join(v).join("index.m3u8"), format!("#EXTM3U\n#{v}\n"))?;
                std::fs::write(root.join(v).join("init.mp4"), format!("init-{v}"))?;
                std::fs::write(root.join(v).join("seg_000.m4s"), format!("seg-{v}"))?;
            }
        } else if target.extension().and_then(OsStr::to_str) == Some("jpg") {
            std::fs::write(&target, sample_jpeg())?;
        } else {
            std::fs::write(&target, format!("{} rendition", stage.as_str()))?;
        }
        Ok(Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub objects: Arc<InMemoryObjectStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub store: SqliteClipStore,
    pub ingestor: Ingestor,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let objects = Arc::new(InMemoryObjectStore::new());
        let executor = Arc::new(ScriptedExecutor::default());
        let storage = StorageClient::new(objects.clone(), RetryPolicy::immediate(2));
        let store = SqliteClipStore::new(dir.path().join("clips.sqlite")).unwrap();
        store.initialize().unwrap();
        let transcoder = Transcoder::new(TranscodeSection::default()).with_executor(executor.clone());
        let ingestor = Ingestor::new(storage, store.clone(), transcoder, Catalog::default())
            .with_temp_dir(dir.path().join("tmp"));
        Self {
            dir,
            objects,
            executor,
            store,
            ingestor,
        }
    }

    pub fn storage(&self) -> StorageClient {
        StorageClient::new(self.objects.clone(), RetryPolicy::immediate(2))
    }

    pub fn write_source(&self, name: &str, body: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn ayat_al_kursi(translation: &str) -> RawClipInput {
    RawClipInput::Current {
        fields: RawClipFields {
            surah: 2,
            ayah_start: 255,
            ayah_end: 255,
            translation: Some(translation.into()),
            ..RawClipFields::default()
        },
        reciter_slug: Some("maher-al-muaiqly".into()),
        reciter_name: None,
    }
}

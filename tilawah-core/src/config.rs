use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TilawahConfig {
    pub paths: PathsSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub transcode: TranscodeSection,
    #[serde(default)]
    pub catalog: CatalogSection,
}

impl TilawahConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.data_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.database)
    }

    pub fn index_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.index_path)
    }

    pub fn jsonl_log_path(&self) -> Option<PathBuf> {
        self.paths.jsonl_log.as_ref().map(|path| self.resolve_path(path))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.temp_dir)
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.progress_dir)
    }

    fn validate(&self) -> Result<()> {
        if self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "storage.bucket",
                reason: "bucket name must not be empty".into(),
            });
        }
        if self.transcode.hls_renditions.len() < 2 {
            return Err(ConfigError::Invalid {
                field: "transcode.hls_renditions",
                reason: "at least two renditions are required".into(),
            });
        }
        if self.storage.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "storage.retry.max_attempts",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub data_dir: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_index_path")]
    pub index_path: String,
    #[serde(default)]
    pub jsonl_log: Option<String>,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    #[serde(default = "default_progress_dir")]
    pub progress_dir: String,
}

fn default_database() -> String {
    "clips.sqlite".into()
}

fn default_index_path() -> String {
    "clips-index.json".into()
}

fn default_temp_dir() -> String {
    "tmp".into()
}

fn default_progress_dir() -> String {
    "progress".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default = "default_multipart_threshold_mb")]
    pub multipart_threshold_mb: u64,
    #[serde(default = "default_multipart_part_size_mb")]
    pub multipart_part_size_mb: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,
    #[serde(default)]
    pub retry: StorageRetrySection,
}

impl StorageSection {
    pub fn multipart_threshold_bytes(&self) -> u64 {
        self.multipart_threshold_mb * 1024 * 1024
    }

    pub fn multipart_part_size_bytes(&self) -> u64 {
        // S3 rejects parts under 5 MiB except for the last one.
        self.multipart_part_size_mb.max(5) * 1024 * 1024
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

fn default_region() -> String {
    "auto".into()
}

fn default_key_prefix() -> String {
    "clips".into()
}

fn default_multipart_threshold_mb() -> u64 {
    64
}

fn default_multipart_part_size_mb() -> u64 {
    16
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageRetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

impl Default for StorageRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeSection {
    pub ffmpeg_path: String,
    pub audio_low_bitrate_kbps: u32,
    pub audio_sample_rate: u32,
    pub video_low_height: u32,
    pub video_low_crf: u8,
    pub video_preset: String,
    pub video_low_audio_bitrate_kbps: u32,
    pub hls_segment_seconds: u32,
    pub thumbnail_offset_seconds: f64,
    pub blur_size: u32,
    pub hls_renditions: Vec<HlsRenditionEntry>,
}

impl Default for TranscodeSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            audio_low_bitrate_kbps: 48,
            audio_sample_rate: 44_100,
            video_low_height: 720,
            video_low_crf: 30,
            video_preset: "veryfast".into(),
            video_low_audio_bitrate_kbps: 64,
            hls_segment_seconds: 6,
            thumbnail_offset_seconds: 1.0,
            blur_size: 20,
            hls_renditions: vec![
                HlsRenditionEntry {
                    height: 720,
                    video_bitrate: "1500k".into(),
                    audio_bitrate: "96k".into(),
                },
                HlsRenditionEntry {
                    height: 1080,
                    video_bitrate: "3000k".into(),
                    audio_bitrate: "128k".into(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HlsRenditionEntry {
    pub height: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSection {
    #[serde(default = "default_riwayah")]
    pub default_riwayah: String,
    #[serde(default = "default_translation")]
    pub default_translation: String,
    #[serde(default)]
    pub extra_translations: Vec<String>,
    #[serde(default)]
    pub riwayah_aliases: BTreeMap<String, String>,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            default_riwayah: default_riwayah(),
            default_translation: default_translation(),
            extra_translations: Vec::new(),
            riwayah_aliases: BTreeMap::new(),
        }
    }
}

fn default_riwayah() -> String {
    crate::clip::DEFAULT_RIWAYAH.into()
}

fn default_translation() -> String {
    crate::clip::DEFAULT_TRANSLATION.into()
}

pub fn load_tilawah_config<P: AsRef<Path>>(path: P) -> Result<TilawahConfig> {
    let config: TilawahConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/tilawah.toml");
        let config = load_tilawah_config(path).expect("config should parse");
        assert_eq!(config.storage.key_prefix, "clips");
        assert_eq!(config.transcode.hls_renditions.len(), 2);
        assert_eq!(config.transcode.hls_segment_seconds, 6);
        assert_eq!(config.catalog.default_translation, "saheeh-international");
        assert!(config.database_path().ends_with("clips.sqlite"));
    }

    #[test]
    fn rejects_single_rendition() {
        let raw = r#"
            [paths]
            data_dir = "/tmp/tilawah"

            [storage]
            bucket = "clips"

            [transcode]
            ffmpeg_path = "ffmpeg"
            audio_low_bitrate_kbps = 48
            audio_sample_rate = 44100
            video_low_height = 720
            video_low_crf = 30
            video_preset = "veryfast"
            video_low_audio_bitrate_kbps = 64
            hls_segment_seconds = 6
            thumbnail_offset_seconds = 1.0
            blur_size = 20

            [[transcode.hls_renditions]]
            height = 720
            video_bitrate = "1500k"
            audio_bitrate = "96k"
        "#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tilawah.toml");
        std::fs::write(&path, raw).unwrap();
        let err = load_tilawah_config(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "transcode.hls_renditions",
                ..
            }
        ));
    }
}

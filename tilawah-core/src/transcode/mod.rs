mod error;
mod executor;

pub use error::{TranscodeError, TranscodeResult, TranscodeStage};
pub use executor::{SystemTranscodeExecutor, TranscodeExecutor};

use std::ffi::OsStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::ImageOutputFormat;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::clip::{MediaKind, HLS_DIR, HLS_MASTER_PLAYLIST};
use crate::config::TranscodeSection;

const BLUR_SIGMA: f32 = 2.5;
const BLUR_JPEG_QUALITY: u8 = 60;

/// Segmented output ready for upload; `files` are relative to `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlsPackage {
    pub root: PathBuf,
    pub master: PathBuf,
    pub files: Vec<PathBuf>,
}

#[derive(Clone)]
pub struct Transcoder {
    settings: Arc<TranscodeSection>,
    executor: Arc<dyn TranscodeExecutor>,
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcoder")
            .field("ffmpeg_path", &self.settings.ffmpeg_path)
            .field("renditions", &self.settings.hls_renditions.len())
            .finish()
    }
}

impl Transcoder {
    pub fn new(settings: TranscodeSection) -> Self {
        Self {
            settings: Arc::new(settings),
            executor: Arc::new(SystemTranscodeExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn TranscodeExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn settings(&self) -> &TranscodeSection {
        &self.settings
    }

    fn ffmpeg(&self) -> Command {
        let mut command = Command::new(&self.settings.ffmpeg_path);
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error");
        command
    }

    async fn execute(&self, stage: TranscodeStage, mut command: Command) -> TranscodeResult<()> {
        debug!(stage = %stage, command = ?command.as_std(), "running encoder");
        let output = match self.executor.run(stage, &mut command).await {
            Ok(output) => output,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TranscodeError::ExecutableNotFound {
                    stage,
                    program: self.settings.ffmpeg_path.clone(),
                })
            }
            Err(source) => {
                return Err(TranscodeError::Io {
                    stage,
                    path: PathBuf::from(&self.settings.ffmpeg_path),
                    source,
                })
            }
        };
        if !output.status.success() {
            return Err(TranscodeError::ProcessFailed {
                stage,
                status: output.status.code(),
                diagnostics: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn prepare_dir(&self, stage: TranscodeStage, dir: &Path) -> TranscodeResult<()> {
        fs::create_dir_all(dir)
            .await
            .map_err(|source| TranscodeError::Io {
                stage,
                path: dir.to_path_buf(),
                source,
            })
    }

    async fn ensure_output(&self, stage: TranscodeStage, path: &Path) -> TranscodeResult<()> {
        match fs::metadata(path).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(TranscodeError::MissingOutput {
                stage,
                path: path.to_path_buf(),
            }),
        }
    }

    /// Bandwidth-reduced rendition: mono fixed-rate audio, or scaled CRF video.
    pub async fn derive_low_quality(
        &self,
        input: &Path,
        kind: MediaKind,
        out_dir: &Path,
    ) -> TranscodeResult<PathBuf> {
        let stage = TranscodeStage::Low;
        self.prepare_dir(stage, out_dir).await?;
        let output = out_dir.join(format!("low.{}", kind.low_extension()));
        let settings = &self.settings;
        let mut command = self.ffmpeg();
        command.arg("-i").arg(input);
        match kind {
            MediaKind::Audio => {
                command
                    .arg("-vn")
                    .arg("-ac")
                    .arg("1")
                    .arg("-ar")
                    .arg(settings.audio_sample_rate.to_string())
                    .arg("-c:a")
                    .arg("libmp3lame")
                    .arg("-b:a")
                    .arg(format!("{}k", settings.audio_low_bitrate_kbps));
            }
            MediaKind::Video => {
                command
                    .arg("-vf")
                    .arg(format!("scale=-2:{}", settings.video_low_height))
                    .arg("-c:v")
                    .arg("libx264")
                    .arg("-preset")
                    .arg(&settings.video_preset)
                    .arg("-crf")
                    .arg(settings.video_low_crf.to_string())
                    .arg("-c:a")
                    .arg("aac")
                    .arg("-b:a")
                    .arg(format!("{}k", settings.video_low_audio_bitrate_kbps))
                    .arg("-movflags")
                    .arg("+faststart");
            }
        }
        command.arg(&output);
        self.execute(stage, command).await?;
        self.ensure_output(stage, &output).await?;
        info!(input = %input.display(), output = %output.display(), "derived low quality rendition");
        Ok(output)
    }

    /// Fragmented-MP4 HLS package with one sub-playlist per configured rendition.
    pub async fn derive_adaptive_streaming(
        &self,
        input: &Path,
        out_dir: &Path,
    ) -> TranscodeResult<HlsPackage> {
        let stage = TranscodeStage::Hls;
        let root = out_dir.join(HLS_DIR);
        let renditions = &self.settings.hls_renditions;
        for index in 0..renditions.len() {
            self.prepare_dir(stage, &root.join(format!("v{index}"))).await?;
        }

        let count = renditions.len();
        let mut filter = format!("[0:v]split={count}");
        for index in 0..count {
            filter.push_str(&format!("[s{index}]"));
        }
        for (index, rendition) in renditions.iter().enumerate() {
            filter.push_str(&format!(";[s{index}]scale=-2:{}[v{index}out]", rendition.height));
        }

        let segment = self.settings.hls_segment_seconds;
        let mut command = self.ffmpeg();
        command
            .arg("-i")
            .arg(input)
            .arg("-filter_complex")
            .arg(filter);
        let mut stream_map = Vec::with_capacity(count);
        for (index, rendition) in renditions.iter().enumerate() {
            command
                .arg("-map")
                .arg(format!("[v{index}out]"))
                .arg(format!("-c:v:{index}"))
                .arg("libx264")
                .arg(format!("-b:v:{index}"))
                .arg(&rendition.video_bitrate)
                .arg("-map")
                .arg("0:a:0")
                .arg(format!("-c:a:{index}"))
                .arg("aac")
                .arg(format!("-b:a:{index}"))
                .arg(&rendition.audio_bitrate);
            stream_map.push(format!("v:{index},a:{index}"));
        }
        command
            .arg("-preset")
            .arg(&self.settings.video_preset)
            .arg("-ac")
            .arg("2")
            .arg("-force_key_frames")
            .arg(format!("expr:gte(t,n_forced*{segment})"))
            .arg("-f")
            .arg("hls")
            .arg("-hls_time")
            .arg(segment.to_string())
            .arg("-hls_playlist_type")
            .arg("vod")
            .arg("-hls_segment_type")
            .arg("fmp4")
            .arg("-hls_flags")
            .arg("independent_segments")
            .arg("-hls_fmp4_init_filename")
            .arg("init.mp4")
            .arg("-hls_segment_filename")
            .arg(root.join("v%v").join("seg_%03d.m4s"))
            .arg("-master_pl_name")
            .arg(HLS_MASTER_PLAYLIST)
            .arg("-var_stream_map")
            .arg(stream_map.join(" "))
            .arg(root.join("v%v").join("index.m3u8"));
        self.execute(stage, command).await?;

        let master = root.join(HLS_MASTER_PLAYLIST);
        self.ensure_output(stage, &master).await?;
        for index in 0..count {
            self.ensure_output(stage, &root.join(format!("v{index}")).join("index.m3u8"))
                .await?;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|err| TranscodeError::Io {
                stage,
                path: root.clone(),
                source: err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walkdir loop detected")),
            })?;
            if entry.file_type().is_file() {
                if let Ok(relative) = entry.path().strip_prefix(&root) {
                    files.push(relative.to_path_buf());
                }
            }
        }
        info!(input = %input.display(), files = files.len(), "derived adaptive streaming package");
        Ok(HlsPackage {
            root,
            master,
            files,
        })
    }

    /// One still frame near the configured offset; falls back to the first frame for short clips.
    pub async fn extract_thumbnail(&self, input: &Path, out_dir: &Path) -> TranscodeResult<PathBuf> {
        let stage = TranscodeStage::Thumbnail;
        self.prepare_dir(stage, out_dir).await?;
        let output = out_dir.join("thumbnail.jpg");
        self.extract_frame(stage, input, &output, self.settings.thumbnail_offset_seconds)
            .await?;
        if self.ensure_output(stage, &output).await.is_err() {
            debug!(input = %input.display(), "no frame at offset, retrying from start");
            self.extract_frame(stage, input, &output, 0.0).await?;
            self.ensure_output(stage, &output).await?;
        }
        Ok(output)
    }

    async fn extract_frame(
        &self,
        stage: TranscodeStage,
        input: &Path,
        output: &Path,
        offset: f64,
    ) -> TranscodeResult<()> {
        let mut command = self.ffmpeg();
        command
            .arg("-ss")
            .arg(format!("{offset:.3}"))
            .arg("-i")
            .arg(input)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg("2")
            .arg(output);
        self.execute(stage, command).await
    }

    /// Tiny blurred JPEG as a `data:image/jpeg;base64,...` URI.
    pub async fn derive_blur_placeholder(&self, input: &Path, out_dir: &Path) -> TranscodeResult<String> {
        let stage = TranscodeStage::Blur;
        let is_image = matches!(
            input
                .extension()
                .and_then(OsStr::to_str)
                .map(str::to_ascii_lowercase)
                .as_deref(),
            Some("jpg" | "jpeg" | "png")
        );
        let frame = if is_image {
            input.to_path_buf()
        } else {
            self.prepare_dir(stage, out_dir).await?;
            let frame = out_dir.join("blur-source.jpg");
            self.extract_frame(stage, input, &frame, self.settings.thumbnail_offset_seconds)
                .await?;
            self.ensure_output(stage, &frame).await?;
            frame
        };
        let size = self.settings.blur_size;
        let bytes = fs::read(&frame)
            .await
            .map_err(|source| TranscodeError::Io {
                stage,
                path: frame.clone(),
                source,
            })?;
        encode_blur(&bytes, size)
    }
}

pub fn encode_blur(image_bytes: &[u8], size: u32) -> TranscodeResult<String> {
    let image = image::load_from_memory(image_bytes)?;
    let small = image
        .resize_exact(size, size, FilterType::Triangle)
        .blur(BLUR_SIGMA);
    let mut buffer = Cursor::new(Vec::new());
    small
        .to_rgb8()
        .write_to(&mut buffer, ImageOutputFormat::Jpeg(BLUR_JPEG_QUALITY))?;
    Ok(format!(
        "data:image/jpeg;base64,{}",
        STANDARD.encode(buffer.into_inner())
    ))
}

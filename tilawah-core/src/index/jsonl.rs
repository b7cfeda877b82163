use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use flate2::{write::GzEncoder, Compression};
use tracing::{debug, info};

use crate::clip::{Catalog, ClipRecord, RawClipInput};
use crate::store::{ClipRepository, RecordChange, RepositoryResult};

use super::build::{validate_all, SourceLine};
use super::{IndexError, IndexResult};

/// A JSON-Lines file with one clip record per line.
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
    catalog: Catalog,
    backup: Option<PathBuf>,
}

impl JsonlLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            catalog: Catalog::default(),
            backup: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> IndexError {
        IndexError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Parses every non-blank line. A missing file reads as empty.
    pub fn read_lines(&self) -> IndexResult<Vec<SourceLine>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(self.io_err(err)),
        };
        let mut lines = Vec::new();
        for (position, line) in BufReader::new(file).lines().enumerate() {
            let line_no = position + 1;
            let line = line.map_err(|err| self.io_err(err))?;
            if line.trim().is_empty() {
                continue;
            }
            let input: RawClipInput =
                serde_json::from_str(&line).map_err(|source| IndexError::Parse {
                    line: line_no,
                    source,
                })?;
            lines.push(SourceLine {
                line: line_no,
                input,
            });
        }
        debug!(path = %self.path.display(), records = lines.len(), "read clip log");
        Ok(lines)
    }

    pub fn read_records(&self) -> IndexResult<Vec<ClipRecord>> {
        validate_all(&self.read_lines()?, &self.catalog)
    }

    pub fn append(&self, record: &ClipRecord) -> IndexResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| self.io_err(err))?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.io_err(err))?;
        file.write_all(&line).map_err(|err| self.io_err(err))?;
        Ok(())
    }

    /// Gzipped copy next to the log, taken at most once per instance.
    pub fn backup(&mut self) -> IndexResult<PathBuf> {
        if let Some(existing) = &self.backup {
            return Ok(existing.clone());
        }
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clips.jsonl".into());
        let destination = self
            .path
            .with_file_name(format!("{file_name}.{stamp}.bak.gz"));
        let contents = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(self.io_err(err)),
        };
        let out_err = |source| IndexError::Io {
            path: destination.clone(),
            source,
        };
        let file = File::create(&destination).map_err(out_err)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&contents).map_err(out_err)?;
        encoder.finish().map_err(out_err)?;
        info!(log = %self.path.display(), backup = %destination.display(), "backed up clip log");
        self.backup = Some(destination.clone());
        Ok(destination)
    }

    /// Replaces the whole log through a temp file and rename.
    pub fn rewrite(&mut self, records: &[ClipRecord]) -> IndexResult<()> {
        self.backup()?;
        let tmp = self.path.with_extension("jsonl.tmp");
        let tmp_err = |source| IndexError::Io {
            path: tmp.clone(),
            source,
        };
        {
            let mut file = File::create(&tmp).map_err(tmp_err)?;
            for record in records {
                let mut line = serde_json::to_vec(record)?;
                line.push(b'\n');
                file.write_all(&line).map_err(tmp_err)?;
            }
            file.sync_all().map_err(tmp_err)?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|err| self.io_err(err))?;
        info!(path = %self.path.display(), records = records.len(), "rewrote clip log");
        Ok(())
    }
}

fn apply_in_memory(records: &mut Vec<ClipRecord>, changes: &[RecordChange]) -> IndexResult<()> {
    for change in changes {
        match change {
            RecordChange::Upsert(record) => {
                match records.iter_mut().find(|r| r.clip.id == record.clip.id) {
                    Some(slot) => *slot = record.clone(),
                    None => records.push(record.clone()),
                }
            }
            RecordChange::Replace { old_id, record } => {
                let position = records
                    .iter()
                    .position(|r| &r.clip.id == old_id)
                    .ok_or_else(|| IndexError::NotFound { id: old_id.clone() })?;
                if record.clip.id != *old_id {
                    if let Some(taken) = records.iter().position(|r| r.clip.id == record.clip.id) {
                        return Err(IndexError::Consistency {
                            id: record.clip.id.clone(),
                            first: taken + 1,
                            duplicate: position + 1,
                        });
                    }
                }
                records[position] = record.clone();
            }
            RecordChange::Remove { id } => {
                let before = records.len();
                records.retain(|r| &r.clip.id != id);
                if records.len() == before {
                    return Err(IndexError::NotFound { id: id.clone() });
                }
            }
        }
    }
    let mut ids = HashSet::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        if !ids.insert(record.clip.id.as_str()) {
            let first = records
                .iter()
                .position(|r| r.clip.id == record.clip.id)
                .unwrap_or(position);
            return Err(IndexError::Consistency {
                id: record.clip.id.clone(),
                first: first + 1,
                duplicate: position + 1,
            });
        }
    }
    Ok(())
}

impl ClipRepository for JsonlLog {
    fn describe(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }

    fn load_all(&self) -> RepositoryResult<Vec<ClipRecord>> {
        Ok(self.read_records()?)
    }

    fn apply(&mut self, changes: &[RecordChange]) -> RepositoryResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut records = self.read_records()?;
        apply_in_memory(&mut records, changes)?;
        self.rewrite(&records)?;
        Ok(())
    }

    fn backup(&mut self) -> RepositoryResult<PathBuf> {
        Ok(JsonlLog::backup(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{normalize, RawClipFields, RawVariant};
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn record(surah: i64, start: i64, end: i64) -> ClipRecord {
        let raw = RawClipInput::Legacy {
            fields: RawClipFields {
                surah,
                ayah_start: start,
                ayah_end: end,
                variants: vec![RawVariant {
                    quality: "high".into(),
                    r2_key: format!("clips/maher-al-muaiqly/hafs-an-asim/saheeh-international/s{surah}/a{start}-{end}/high.mp4"),
                    md5: None,
                }],
                ..RawClipFields::default()
            },
            reciter: "Maher Al Muaiqly".into(),
        };
        normalize(&raw, &Catalog::default()).unwrap()
    }

    #[test]
    fn reads_legacy_and_current_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clips.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"surah":1,"ayahStart":1,"ayahEnd":7,"reciter":"Maher Al-Mu'aiqly"}"#,
                "\n\n",
                r#"{"surah":2,"ayahStart":255,"ayahEnd":255,"reciterSlug":"maher-al-muaiqly","translation":"khan-al-hilali"}"#,
                "\n"
            ),
        )
        .unwrap();
        let log = JsonlLog::new(&path);
        let lines = log.read_lines().unwrap();
        assert_eq!(lines.iter().map(|l| l.line).collect::<Vec<_>>(), vec![1, 3]);
        let records = log.read_records().unwrap();
        assert_eq!(records[0].clip.reciter_slug, "maher-al-muaiqly");
        assert_eq!(
            records[1].clip.id,
            "s2_a255-255__maher-al-muaiqly__hafs-an-asim__khan-al-hilali"
        );
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clips.jsonl");
        std::fs::write(&path, "{\"surah\":1,\"ayahStart\":1,\"ayahEnd\":7,\"reciter\":\"x\"}\nnot json\n").unwrap();
        let err = JsonlLog::new(&path).read_lines().unwrap_err();
        assert!(matches!(err, IndexError::Parse { line: 2, .. }));
    }

    #[test]
    fn apply_backs_up_once_and_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clips.jsonl");
        let mut log = JsonlLog::new(&path);
        log.append(&record(1, 1, 7)).unwrap();
        log.append(&record(2, 1, 5)).unwrap();

        let remove = RecordChange::Remove {
            id: record(1, 1, 7).clip.id,
        };
        ClipRepository::apply(&mut log, &[remove]).unwrap();
        ClipRepository::apply(&mut log, &[RecordChange::Upsert(record(3, 1, 3))]).unwrap();

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".bak.gz"))
            .collect();
        assert_eq!(backups.len(), 1);
        let mut restored = String::new();
        GzDecoder::new(File::open(backups[0].path()).unwrap())
            .read_to_string(&mut restored)
            .unwrap();
        assert_eq!(restored.lines().count(), 2);

        let ids: Vec<_> = log
            .read_records()
            .unwrap()
            .into_iter()
            .map(|r| r.clip.surah)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn replace_onto_existing_id_is_rejected() {
        let mut records = vec![record(1, 1, 7), record(2, 1, 5)];
        let change = RecordChange::Replace {
            old_id: records[0].clip.id.clone(),
            record: record(2, 1, 5),
        };
        let err = apply_in_memory(&mut records, &[change]).unwrap_err();
        assert!(matches!(err, IndexError::Consistency { .. }));
    }
}

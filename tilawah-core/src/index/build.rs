use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clip::{normalize, Catalog, ClipRecord, RawClipInput};

use super::{IndexError, IndexResult};

pub const INDEX_VERSION: u32 = 3;

/// One input record and its 1-based position in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLine {
    pub line: usize,
    pub input: RawClipInput,
}

impl SourceLine {
    pub fn from_records(records: &[ClipRecord]) -> Vec<SourceLine> {
        records
            .iter()
            .enumerate()
            .map(|(position, record)| SourceLine {
                line: position + 1,
                input: RawClipInput::from(record),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexTables {
    pub by_surah: BTreeMap<u16, Vec<String>>,
    pub by_reciter_slug: BTreeMap<String, Vec<String>>,
    pub by_riwayah: BTreeMap<String, Vec<String>>,
    pub by_translation: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipIndex {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub clip_count: usize,
    pub clips_by_id: BTreeMap<String, ClipRecord>,
    pub indexes: IndexTables,
}

/// Validates every input and only then assembles the index.
pub fn build_index(inputs: &[SourceLine], catalog: &Catalog) -> IndexResult<ClipIndex> {
    let records = validate_all(inputs, catalog)?;
    let mut tables = IndexTables::default();
    let mut clips_by_id = BTreeMap::new();
    for record in records {
        let id = record.clip.id.clone();
        tables
            .by_surah
            .entry(record.clip.surah)
            .or_default()
            .push(id.clone());
        tables
            .by_reciter_slug
            .entry(record.clip.reciter_slug.clone())
            .or_default()
            .push(id.clone());
        tables
            .by_riwayah
            .entry(record.clip.riwayah.clone())
            .or_default()
            .push(id.clone());
        tables
            .by_translation
            .entry(record.clip.translation.clone())
            .or_default()
            .push(id.clone());
        clips_by_id.insert(id, record);
    }
    Ok(ClipIndex {
        version: INDEX_VERSION,
        generated_at: Utc::now(),
        clip_count: clips_by_id.len(),
        clips_by_id,
        indexes: tables,
    })
}

/// Normalizes every input, rejecting the batch on the first invalid record or duplicate id.
pub fn validate_all(inputs: &[SourceLine], catalog: &Catalog) -> IndexResult<Vec<ClipRecord>> {
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(inputs.len());
    let mut records = Vec::with_capacity(inputs.len());
    for source in inputs {
        let record = normalize(&source.input, catalog).map_err(|err| IndexError::Validation {
            line: source.line,
            source: err,
        })?;
        if let Some(first) = seen.insert(record.clip.id.clone(), source.line) {
            return Err(IndexError::Consistency {
                id: record.clip.id,
                first,
                duplicate: source.line,
            });
        }
        records.push(record);
    }
    Ok(records)
}

/// Writes through a sibling temp file and renames it into place.
pub fn write_index(path: &Path, index: &ClipIndex) -> IndexResult<()> {
    let io_err = |source: std::io::Error| IndexError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let payload = serde_json::to_vec_pretty(index)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&payload).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    std::fs::rename(&tmp, path).map_err(io_err)?;
    info!(path = %path.display(), clips = index.clip_count, "wrote clip index");
    Ok(())
}

pub fn read_index(path: &Path) -> IndexResult<ClipIndex> {
    let raw = std::fs::read(path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{RawClipFields, RawVariant};

    fn line(line: usize, surah: i64, start: i64, end: i64, translation: &str) -> SourceLine {
        SourceLine {
            line,
            input: RawClipInput::Current {
                fields: RawClipFields {
                    surah,
                    ayah_start: start,
                    ayah_end: end,
                    translation: Some(translation.into()),
                    variants: vec![RawVariant {
                        quality: "high".into(),
                        r2_key: format!("clips/r/hafs-an-asim/{translation}/s{surah}/a{start}-{end}/high.mp4"),
                        md5: None,
                    }],
                    ..RawClipFields::default()
                },
                reciter_slug: Some("yasser-al-dosari".into()),
                reciter_name: None,
            },
        }
    }

    #[test]
    fn builds_lookup_tables() {
        let inputs = vec![
            line(1, 1, 1, 7, "saheeh-international"),
            line(2, 2, 255, 255, "khan-al-hilali"),
            line(3, 2, 1, 5, "saheeh-international"),
        ];
        let index = build_index(&inputs, &Catalog::default()).unwrap();
        assert_eq!(index.version, 3);
        assert_eq!(index.clip_count, 3);
        assert_eq!(index.indexes.by_surah[&2].len(), 2);
        assert_eq!(index.indexes.by_translation["saheeh-international"].len(), 2);
        assert_eq!(index.indexes.by_reciter_slug["yasser-al-dosari"].len(), 3);
        let json = serde_json::to_value(&index).unwrap();
        assert!(json["clipsById"]["s1_a1-7__yasser-al-dosari__hafs-an-asim__saheeh-international"].is_object());
        assert!(json["indexes"]["bySurah"]["2"].is_array());
    }

    #[test]
    fn inverted_range_fails_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let inputs = vec![line(1, 1, 1, 7, "saheeh-international"), line(2, 2, 9, 3, "saheeh-international")];
        let result = build_index(&inputs, &Catalog::default()).and_then(|index| write_index(&path, &index));
        assert!(matches!(result, Err(IndexError::Validation { line: 2, .. })));
        assert!(!path.exists());
    }

    #[test]
    fn duplicate_id_is_a_consistency_error() {
        let inputs = vec![line(1, 1, 1, 7, "saheeh-international"), line(4, 1, 1, 7, "saheeh-international")];
        let err = build_index(&inputs, &Catalog::default()).unwrap_err();
        match err {
            IndexError::Consistency { first, duplicate, .. } => {
                assert_eq!((first, duplicate), (1, 4));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn write_then_read_is_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/index.json");
        let index = build_index(&[line(1, 1, 1, 7, "saheeh-international")], &Catalog::default()).unwrap();
        write_index(&path, &index).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(read_index(&path).unwrap(), index);
    }
}

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tilawah_core::clip::{normalize, Quality, RawClipFields, RawClipInput, RawVariant};
use tilawah_core::index::JsonlLog;
use tilawah_core::store::DistinctField;
use tilawah_core::{Catalog, ClipFilter, ClipRecord, ClipRepository, RecordChange, SqliteClipStore};

fn clip(surah: i64, start: i64, end: i64, reciter: &str, translation: &str) -> ClipRecord {
    let raw = RawClipInput::Current {
        fields: RawClipFields {
            surah,
            ayah_start: start,
            ayah_end: end,
            translation: Some(translation.into()),
            created_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            variants: vec![RawVariant {
                quality: "high".into(),
                r2_key: format!("clips/{reciter}/hafs-an-asim/{translation}/s{surah}/a{start}-{end}/high.mp4"),
                md5: None,
            }],
            ..RawClipFields::default()
        },
        reciter_slug: Some(reciter.into()),
        reciter_name: None,
    };
    normalize(&raw, &Catalog::default()).unwrap()
}

/// Both sources must agree on change semantics.
fn exercise(repository: &mut dyn ClipRepository) {
    let fatiha = clip(1, 1, 7, "maher-al-muaiqly", "saheeh-international");
    let kursi = clip(2, 255, 255, "maher-al-muaiqly", "khan-al-hilali");
    repository
        .apply(&[
            RecordChange::Upsert(kursi.clone()),
            RecordChange::Upsert(fatiha.clone()),
        ])
        .unwrap();
    let ids: Vec<String> = repository
        .load_all()
        .unwrap()
        .into_iter()
        .map(|r| r.clip.id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&kursi.clip.id));

    let mut moved = kursi.clone();
    moved.clip.translation = "yusuf-ali".into();
    moved.clip.id = moved.clip.derived_id();
    repository
        .apply(&[RecordChange::Replace {
            old_id: kursi.clip.id.clone(),
            record: moved.clone(),
        }])
        .unwrap();
    let records = repository.load_all().unwrap();
    assert!(records.iter().any(|r| r.clip.id == moved.clip.id));
    assert!(!records.iter().any(|r| r.clip.id == kursi.clip.id));

    let collision = RecordChange::Replace {
        old_id: moved.clip.id.clone(),
        record: ClipRecord {
            clip: fatiha.clip.clone(),
            variants: moved.variants.clone(),
        },
    };
    assert!(repository.apply(&[collision]).is_err());
    assert!(repository
        .apply(&[RecordChange::Remove {
            id: "s9_a1-1__nobody__hafs-an-asim__yusuf-ali".into(),
        }])
        .is_err());

    repository
        .apply(&[RecordChange::Remove {
            id: fatiha.clip.id.clone(),
        }])
        .unwrap();
    assert_eq!(repository.load_all().unwrap().len(), 1);

    let backup = repository.backup().unwrap();
    assert!(backup.exists());
}

#[test]
fn sqlite_repository_change_semantics() {
    let dir = TempDir::new().unwrap();
    let store = SqliteClipStore::new(dir.path().join("clips.sqlite")).unwrap();
    store.initialize().unwrap();
    let mut repository = store.clone();
    exercise(&mut repository);
    assert!(repository.describe().starts_with("sqlite:"));
}

#[test]
fn jsonl_repository_change_semantics() {
    let dir = TempDir::new().unwrap();
    let mut log = JsonlLog::new(dir.path().join("clips.jsonl"));
    exercise(&mut log);
    assert_eq!(log.read_records().unwrap().len(), 1);
}

#[test]
fn filters_and_distinct_values() {
    let dir = TempDir::new().unwrap();
    let store = SqliteClipStore::new(dir.path().join("clips.sqlite")).unwrap();
    store.initialize().unwrap();
    for record in [
        clip(2, 250, 256, "maher-al-muaiqly", "saheeh-international"),
        clip(2, 1, 5, "mishary-alafasy", "khan-al-hilali"),
        clip(3, 1, 9, "mishary-alafasy", "saheeh-international"),
    ] {
        store.commit_clip(&record).unwrap();
    }

    let overlapping = store
        .list_records(&ClipFilter {
            surah: Some(2),
            ayah_from: Some(255),
            ayah_to: Some(255),
            ..ClipFilter::default()
        })
        .unwrap();
    assert_eq!(overlapping.len(), 1);
    assert_eq!(overlapping[0].clip.reciter_slug, "maher-al-muaiqly");

    let ordered: Vec<(u16, u32)> = store
        .list_records(&ClipFilter::default())
        .unwrap()
        .iter()
        .map(|r| (r.clip.surah, r.clip.ayah_start))
        .collect();
    assert_eq!(ordered, vec![(2, 1), (2, 250), (3, 1)]);

    assert_eq!(
        store.list_distinct(DistinctField::Reciters).unwrap(),
        vec!["maher-al-muaiqly".to_string(), "mishary-alafasy".to_string()]
    );
    assert_eq!(
        store.list_distinct(DistinctField::Translations).unwrap(),
        vec!["khan-al-hilali".to_string(), "saheeh-international".to_string()]
    );
    let stored = store
        .find_record("s3_a1-9__mishary-alafasy__hafs-an-asim__saheeh-international")
        .unwrap()
        .unwrap();
    assert_eq!(stored.variant(Quality::High).map(|v| v.quality), Some(Quality::High));
}

#[test]
fn replacing_with_an_empty_set_leaves_no_variants() {
    let dir = TempDir::new().unwrap();
    let store = SqliteClipStore::new(dir.path().join("clips.sqlite")).unwrap();
    store.initialize().unwrap();
    let record = clip(1, 1, 7, "maher-al-muaiqly", "saheeh-international");
    store.commit_clip(&record).unwrap();

    store.replace_variants(&record.clip.id, &[]).unwrap();
    assert!(store.variants(&record.clip.id).unwrap().is_empty());
    assert!(store.find_by_id(&record.clip.id).unwrap().is_some());
}

mod common;

use std::io::Read;

use common::{sample_jpeg, Harness, ScriptedExecutor};
use flate2::read::GzDecoder;
use std::sync::Arc;
use tilawah_core::clip::{normalize, Quality, RawClipFields, RawClipInput, RawVariant};
use tilawah_core::config::TranscodeSection;
use tilawah_core::hasher::digest_bytes;
use tilawah_core::index::{read_index, JsonlLog};
use tilawah_core::repair::{
    audit_storage, backfill_hls, backfill_thumbnails, delete_clips, fix_keys, prune_variants,
    retag_translation, HlsProgress, ItemStatus, RetagOptions,
};
use tilawah_core::{Catalog, ClipRecord, ClipRepository, RepairContext, RepairMode, Transcoder};

const KHAN_DIR: &str = "clips/maher-al-muaiqly/hafs-an-asim/khan-al-hilali/s2/a255-255";
const SAHEEH_DIR: &str = "clips/maher-al-muaiqly/hafs-an-asim/saheeh-international/s2/a255-255";

fn record(translation: &str, variants: &[(&str, &str)], md5: Option<&str>) -> ClipRecord {
    let dir = format!("clips/maher-al-muaiqly/hafs-an-asim/{translation}/s2/a255-255");
    let raw = RawClipInput::Current {
        fields: RawClipFields {
            surah: 2,
            ayah_start: 255,
            ayah_end: 255,
            translation: Some(translation.into()),
            variants: variants
                .iter()
                .map(|(quality, file)| RawVariant {
                    quality: quality.to_string(),
                    r2_key: format!("{dir}/{file}"),
                    md5: md5.map(str::to_string),
                })
                .collect(),
            ..RawClipFields::default()
        },
        reciter_slug: Some("maher-al-muaiqly".into()),
        reciter_name: None,
    };
    normalize(&raw, &Catalog::default()).unwrap()
}

fn transcoder(executor: Arc<ScriptedExecutor>) -> Transcoder {
    Transcoder::new(TranscodeSection::default()).with_executor(executor)
}

#[tokio::test]
async fn prune_keeps_high_and_deletes_deprecated_objects() {
    let harness = Harness::new();
    let clip = record("khan-al-hilali", &[("low", "low.mp4"), ("high", "high.mp4"), ("1", "1.mp4")], None);
    harness.store.commit_clip(&clip).unwrap();
    for file in ["low.mp4", "high.mp4", "1.mp4"] {
        harness.objects.insert(format!("{KHAN_DIR}/{file}"), file.as_bytes().to_vec());
    }
    let index_path = harness.path("index/clips.json");

    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::Apply,
    )
    .with_storage(harness.storage())
    .with_index_path(&index_path);
    let summary = prune_variants(&mut ctx).await.unwrap();

    assert_eq!(summary.ok, 1);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.items[0].actions.len(), 2);
    assert!(summary.backup.as_ref().is_some_and(|path| path.exists()));
    assert_eq!(summary.index_rebuilt, Some(1));

    let stored = harness.store.find_record(&clip.clip.id).unwrap().unwrap();
    assert_eq!(
        stored.variants.iter().map(|v| v.quality).collect::<Vec<_>>(),
        vec![Quality::High]
    );
    assert_eq!(harness.objects.keys(), vec![format!("{KHAN_DIR}/high.mp4")]);

    let index = read_index(&index_path).unwrap();
    assert_eq!(index.clip_count, 1);
    assert!(index.clips_by_id.contains_key(&clip.clip.id));
}

#[tokio::test]
async fn prune_dry_run_changes_nothing() {
    let harness = Harness::new();
    let clip = record("khan-al-hilali", &[("low", "low.mp4"), ("high", "high.mp4")], None);
    harness.store.commit_clip(&clip).unwrap();
    harness.objects.insert(format!("{KHAN_DIR}/low.mp4"), b"low".to_vec());

    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::DryRun,
    );
    let summary = prune_variants(&mut ctx).await.unwrap();
    assert_eq!(summary.ok, 1);
    assert_eq!(summary.items[0].message, "dry-run");
    assert!(summary.backup.is_none());
    assert_eq!(harness.store.find_record(&clip.clip.id).unwrap().unwrap().variants.len(), 2);
    assert!(harness.objects.contains(&format!("{KHAN_DIR}/low.mp4")));
}

#[tokio::test]
async fn retag_copies_only_missing_objects_and_rewrites_the_log() {
    let harness = Harness::new();
    let log_path = harness.path("clips.jsonl");
    let original = record(
        "khan-al-hilali",
        &[("high", "high.mp4"), ("thumbnail", "thumbnail.jpg")],
        None,
    );
    let log = JsonlLog::new(&log_path);
    log.append(&original).unwrap();
    harness.objects.insert(format!("{KHAN_DIR}/high.mp4"), b"video".to_vec());
    harness.objects.insert(format!("{KHAN_DIR}/thumbnail.jpg"), b"thumb".to_vec());
    harness
        .objects
        .insert(format!("{SAHEEH_DIR}/thumbnail.jpg"), b"already there".to_vec());
    let index_path = harness.path("clips-index.json");

    let mut ctx = RepairContext::new(Box::new(log), Catalog::default(), RepairMode::Apply)
        .with_storage(harness.storage())
        .with_index_path(&index_path);
    let options = RetagOptions {
        apply_storage: true,
        delete_old: false,
    };
    let summary = retag_translation(
        &mut ctx,
        &[original.clip.id.clone()],
        "saheeh-international",
        options,
    )
    .await
    .unwrap();

    assert_eq!(summary.ok, 1, "{:?}", summary.items);
    let new_id = "s2_a255-255__maher-al-muaiqly__hafs-an-asim__saheeh-international";
    assert_eq!(summary.items[0].clip_id, new_id);
    assert_eq!(summary.items[0].message, "retagged, 1 objects copied");
    assert_eq!(
        harness.objects.object(&format!("{SAHEEH_DIR}/high.mp4")).unwrap().body,
        b"video".to_vec()
    );
    assert_eq!(
        harness.objects.object(&format!("{SAHEEH_DIR}/thumbnail.jpg")).unwrap().body,
        b"already there".to_vec()
    );
    assert!(harness.objects.contains(&format!("{KHAN_DIR}/high.mp4")));

    let records = JsonlLog::new(&log_path).read_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].clip.id, new_id);
    assert_eq!(records[0].variants[0].r2_key, format!("{SAHEEH_DIR}/high.mp4"));

    let backup = summary.backup.expect("backup taken");
    let mut decoded = String::new();
    GzDecoder::new(std::fs::File::open(&backup).unwrap())
        .read_to_string(&mut decoded)
        .unwrap();
    assert!(decoded.contains(&original.clip.id));
    assert_eq!(summary.index_rebuilt, Some(1));
    assert!(read_index(&index_path).unwrap().clips_by_id.contains_key(new_id));
}

#[tokio::test]
async fn retag_refuses_to_collide_with_existing_clip() {
    let harness = Harness::new();
    let khan = record("khan-al-hilali", &[("high", "high.mp4")], None);
    let saheeh = record("saheeh-international", &[("high", "high.mp4")], None);
    harness.store.commit_clip(&khan).unwrap();
    harness.store.commit_clip(&saheeh).unwrap();

    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::Apply,
    );
    let summary = retag_translation(
        &mut ctx,
        &[khan.clip.id.clone()],
        "saheeh-international",
        RetagOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), 1);
    assert!(summary.backup.is_none());
    assert_eq!(harness.store.count().unwrap(), 2);
}

#[tokio::test]
async fn fix_keys_recovers_object_under_default_translation() {
    let harness = Harness::new();
    let clip = record("khan-al-hilali", &[("high", "high.mp4")], None);
    harness.store.commit_clip(&clip).unwrap();
    harness.objects.insert(format!("{SAHEEH_DIR}/high.mp4"), b"video".to_vec());

    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::Apply,
    )
    .with_storage(harness.storage());
    let summary = fix_keys(&mut ctx, &[]).await.unwrap();
    assert_eq!(summary.ok, 1);
    assert_eq!(
        summary.items[0].actions,
        vec![format!("copy {SAHEEH_DIR}/high.mp4 -> {KHAN_DIR}/high.mp4")]
    );
    assert!(harness.objects.contains(&format!("{KHAN_DIR}/high.mp4")));

    let again = fix_keys(&mut ctx, &[]).await.unwrap();
    assert_eq!(again.skipped, 1);
}

#[tokio::test]
async fn fix_keys_reports_missing_objects() {
    let harness = Harness::new();
    let clip = record("khan-al-hilali", &[("high", "high.mp4")], None);
    harness.store.commit_clip(&clip).unwrap();

    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::DryRun,
    )
    .with_storage(harness.storage());
    let summary = fix_keys(&mut ctx, &[]).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(summary.items[0].message.contains("no candidate found"));
}

#[tokio::test]
async fn delete_with_purge_removes_metadata_then_objects() {
    let harness = Harness::new();
    let clip = record(
        "khan-al-hilali",
        &[("high", "high.mp4"), ("hls", "hls/master.m3u8")],
        None,
    );
    harness.store.commit_clip(&clip).unwrap();
    for file in ["high.mp4", "hls/master.m3u8", "hls/v0/index.m3u8", "hls/v0/seg_000.m4s"] {
        harness.objects.insert(format!("{KHAN_DIR}/{file}"), file.as_bytes().to_vec());
    }
    harness.objects.insert("clips/unrelated.mp4", b"keep".to_vec());

    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::Apply,
    )
    .with_storage(harness.storage());
    let summary = delete_clips(&mut ctx, &[clip.clip.id.clone()], true)
        .await
        .unwrap();
    assert_eq!(summary.ok, 1);
    assert_eq!(summary.items[0].message, "removed, 4 objects deleted");
    assert_eq!(harness.store.count().unwrap(), 0);
    assert_eq!(harness.objects.keys(), vec!["clips/unrelated.mp4".to_string()]);
}

#[tokio::test]
async fn delete_unknown_clip_fails_item() {
    let harness = Harness::new();
    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::Apply,
    );
    let summary = delete_clips(&mut ctx, &["s1_a1-1__x__hafs-an-asim__yusuf-ali".into()], false)
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn thumbnails_backfill_adds_blur_and_missing_thumbnail() {
    let harness = Harness::new();
    let with_thumb = record("khan-al-hilali", &[("high", "high.mp4"), ("thumbnail", "thumbnail.jpg")], None);
    let without_thumb = record("saheeh-international", &[("high", "high.mp4")], None);
    harness.store.commit_clip(&with_thumb).unwrap();
    harness.store.commit_clip(&without_thumb).unwrap();
    harness.objects.insert(format!("{KHAN_DIR}/thumbnail.jpg"), sample_jpeg());
    harness.objects.insert(format!("{SAHEEH_DIR}/high.mp4"), b"video".to_vec());

    let executor = Arc::new(ScriptedExecutor::default());
    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::Apply,
    )
    .with_storage(harness.storage())
    .with_temp_dir(harness.path("tmp"));
    let summary = backfill_thumbnails(&mut ctx, &transcoder(executor)).await.unwrap();
    assert_eq!(summary.ok, 2, "{:?}", summary.items);

    let first = harness.store.find_record(&with_thumb.clip.id).unwrap().unwrap();
    assert!(first
        .clip
        .thumbnail_blur
        .as_deref()
        .is_some_and(|uri| uri.starts_with("data:image/jpeg;base64,")));

    let second = harness.store.find_record(&without_thumb.clip.id).unwrap().unwrap();
    assert_eq!(
        second.variant(Quality::Thumbnail).unwrap().r2_key,
        format!("{SAHEEH_DIR}/thumbnail.jpg")
    );
    assert!(second.clip.thumbnail_blur.is_some());
    assert!(harness.objects.contains(&format!("{SAHEEH_DIR}/thumbnail.jpg")));
}

#[tokio::test]
async fn hls_backfill_resumes_from_progress_file() {
    let harness = Harness::new();
    let video = record("khan-al-hilali", &[("high", "high.mp4")], None);
    let audio = record("saheeh-international", &[("high", "high.m4a")], None);
    harness.store.commit_clip(&video).unwrap();
    harness.store.commit_clip(&audio).unwrap();
    harness.objects.insert(format!("{KHAN_DIR}/high.mp4"), b"video".to_vec());
    let progress_path = harness.path("progress/hls.json");

    let executor = Arc::new(ScriptedExecutor::default());
    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::Apply,
    )
    .with_storage(harness.storage())
    .with_temp_dir(harness.path("tmp"));
    let summary = backfill_hls(&mut ctx, &transcoder(executor.clone()), &progress_path, None)
        .await
        .unwrap();
    assert_eq!(summary.ok, 1, "{:?}", summary.items);
    assert_eq!(summary.items.len(), 1);

    let stored = harness.store.find_record(&video.clip.id).unwrap().unwrap();
    assert_eq!(
        stored.variant(Quality::Hls).unwrap().r2_key,
        format!("{KHAN_DIR}/hls/master.m3u8")
    );
    assert!(harness.objects.contains(&format!("{KHAN_DIR}/hls/v0/seg_000.m4s")));
    let progress = HlsProgress::load(&progress_path).unwrap();
    assert!(progress.is_completed(&video.clip.id));

    let rerun = backfill_hls(&mut ctx, &transcoder(executor.clone()), &progress_path, None)
        .await
        .unwrap();
    assert!(rerun.items.is_empty());
    assert_eq!(executor.stages.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn hls_limit_counts_only_attempted_clips() {
    let harness = Harness::new();
    let done = record("khan-al-hilali", &[("high", "high.mp4")], None);
    let pending = record("saheeh-international", &[("high", "high.mp4")], None);
    harness.store.commit_clip(&done).unwrap();
    harness.store.commit_clip(&pending).unwrap();
    harness.objects.insert(format!("{SAHEEH_DIR}/high.mp4"), b"video".to_vec());

    let progress_path = harness.path("progress/hls.json");
    let mut progress = HlsProgress::default();
    progress
        .completed
        .insert(done.clip.id.clone(), format!("{KHAN_DIR}/hls/master.m3u8"));
    progress.save(&progress_path).unwrap();

    let executor = Arc::new(ScriptedExecutor::default());
    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::Apply,
    )
    .with_storage(harness.storage())
    .with_temp_dir(harness.path("tmp"));
    let summary = backfill_hls(&mut ctx, &transcoder(executor.clone()), &progress_path, Some(1))
        .await
        .unwrap();

    assert_eq!((summary.ok, summary.skipped), (1, 1), "{:?}", summary.items);
    let stored = harness.store.find_record(&pending.clip.id).unwrap().unwrap();
    assert!(stored.variant(Quality::Hls).is_some());
    assert!(HlsProgress::load(&progress_path)
        .unwrap()
        .is_completed(&pending.clip.id));
}

#[tokio::test]
async fn audit_flags_missing_and_mismatched_objects() {
    let harness = Harness::new();
    let good_md5 = digest_bytes(b"video");
    let good = record("khan-al-hilali", &[("high", "high.mp4")], Some(good_md5.as_str()));
    let bad = record("saheeh-international", &[("high", "high.mp4"), ("thumbnail", "thumbnail.jpg")], Some(good_md5.as_str()));
    harness.store.commit_clip(&good).unwrap();
    harness.store.commit_clip(&bad).unwrap();
    harness.objects.insert(format!("{KHAN_DIR}/high.mp4"), b"video".to_vec());
    harness.objects.insert(format!("{SAHEEH_DIR}/high.mp4"), b"tampered".to_vec());

    let mut ctx = RepairContext::new(
        Box::new(harness.store.clone()),
        Catalog::default(),
        RepairMode::DryRun,
    )
    .with_storage(harness.storage());
    let summary = audit_storage(&mut ctx, &[]).await.unwrap();
    assert_eq!(summary.ok, 1);
    assert_eq!(summary.failed, 1);
    let failed = summary
        .items
        .iter()
        .find(|item| item.status == ItemStatus::Failed)
        .unwrap();
    assert!(failed.message.contains("digest mismatch"));
    assert!(failed.message.contains("missing"));
}

#[test]
fn sqlite_repository_backup_is_a_copy() {
    let harness = Harness::new();
    harness
        .store
        .commit_clip(&record("khan-al-hilali", &[("high", "high.mp4")], None))
        .unwrap();
    let mut repository = harness.store.clone();
    let backup = ClipRepository::backup(&mut repository).unwrap();
    let copy = tilawah_core::SqliteClipStore::new(&backup).unwrap();
    assert_eq!(copy.count().unwrap(), 1);
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clip::{Clip, ClipRecord, ClipVariant, Quality};
use crate::sqlite::configure_connection;

use super::{ClipStoreError, ClipStoreResult, RecordChange};

const CLIP_SCHEMA: &str = include_str!("../../../sql/clips.sql");

const CLIP_COLUMNS: &str = "id, surah, ayah_start, ayah_end, reciter_slug, reciter_name, riwayah, \
                            translation, thumbnail_blur, created_at";

/// Equality filters plus an ayah-range overlap filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipFilter {
    pub surah: Option<u16>,
    pub reciter_slug: Option<String>,
    pub riwayah: Option<String>,
    pub translation: Option<String>,
    pub ayah_from: Option<u32>,
    pub ayah_to: Option<u32>,
}

impl ClipFilter {
    fn where_clause(&self) -> (String, Vec<rusqlite::types::Value>) {
        use rusqlite::types::Value;
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(surah) = self.surah {
            clauses.push("surah = ?");
            values.push(Value::Integer(i64::from(surah)));
        }
        if let Some(slug) = &self.reciter_slug {
            clauses.push("reciter_slug = ?");
            values.push(Value::Text(slug.clone()));
        }
        if let Some(riwayah) = &self.riwayah {
            clauses.push("riwayah = ?");
            values.push(Value::Text(riwayah.clone()));
        }
        if let Some(translation) = &self.translation {
            clauses.push("translation = ?");
            values.push(Value::Text(translation.clone()));
        }
        if self.ayah_from.is_some() || self.ayah_to.is_some() {
            let from = self.ayah_from.unwrap_or(1);
            let to = self.ayah_to.unwrap_or(u32::MAX);
            clauses.push("ayah_start <= ? AND ayah_end >= ?");
            values.push(Value::Integer(i64::from(to)));
            values.push(Value::Integer(i64::from(from)));
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistinctField {
    Reciters,
    Riwayat,
    Translations,
}

impl DistinctField {
    fn column(&self) -> &'static str {
        match self {
            DistinctField::Reciters => "reciter_slug",
            DistinctField::Riwayat => "riwayah",
            DistinctField::Translations => "translation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteClipStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteClipStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteClipStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> ClipStoreResult<SqliteClipStore> {
        let path = self.path.ok_or(ClipStoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteClipStore { path, flags })
    }
}

/// Authoritative clip and variant metadata.
#[derive(Debug, Clone)]
pub struct SqliteClipStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteClipStore {
    pub fn builder() -> SqliteClipStoreBuilder {
        SqliteClipStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> ClipStoreResult<Self> {
        SqliteClipStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> ClipStoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            ClipStoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| ClipStoreError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> ClipStoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ClipStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = self.open()?;
        conn.execute_batch(CLIP_SCHEMA)?;
        Ok(())
    }

    /// Upserts the clip and replaces its variant rows in one transaction.
    pub fn commit_clip(&self, record: &ClipRecord) -> ClipStoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        upsert_clip_tx(&tx, &record.clip)?;
        replace_variants_tx(&tx, &record.clip.id, &record.variants)?;
        tx.commit()?;
        info!(clip_id = %record.clip.id, variants = record.variants.len(), "committed clip");
        Ok(())
    }

    pub fn upsert_clip(&self, clip: &Clip) -> ClipStoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        upsert_clip_tx(&tx, clip)?;
        tx.commit()?;
        Ok(())
    }

    /// Leaves exactly `variants` attached to the clip, even when empty.
    pub fn replace_variants(&self, clip_id: &str, variants: &[ClipVariant]) -> ClipStoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        ensure_clip_exists(&tx, clip_id)?;
        replace_variants_tx(&tx, clip_id, variants)?;
        tx.commit()?;
        debug!(clip_id, variants = variants.len(), "replaced variants");
        Ok(())
    }

    /// Adds a variant, displacing any existing variant of the same quality.
    pub fn put_variant(&self, clip_id: &str, variant: &ClipVariant) -> ClipStoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        ensure_clip_exists(&tx, clip_id)?;
        tx.execute(
            "DELETE FROM clip_variants WHERE clip_id = ?1 AND (quality = ?2 OR r2_key = ?3)",
            params![clip_id, variant.quality.as_str(), variant.r2_key],
        )?;
        insert_variant_tx(&tx, clip_id, variant)?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_thumbnail_blur(&self, clip_id: &str, blur: Option<&str>) -> ClipStoreResult<()> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE clips SET thumbnail_blur = ?2 WHERE id = ?1",
            params![clip_id, blur],
        )?;
        if updated == 0 {
            return Err(ClipStoreError::NotFound {
                clip_id: clip_id.to_string(),
            });
        }
        Ok(())
    }

    /// Applies a batch of changes in a single transaction.
    pub fn apply_changes(&self, changes: &[RecordChange]) -> ClipStoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        for change in changes {
            match change {
                RecordChange::Upsert(record) => {
                    upsert_clip_tx(&tx, &record.clip)?;
                    replace_variants_tx(&tx, &record.clip.id, &record.variants)?;
                }
                RecordChange::Replace { old_id, record } => {
                    ensure_clip_exists(&tx, old_id)?;
                    if *old_id != record.clip.id {
                        let taken: Option<String> = tx
                            .query_row(
                                "SELECT id FROM clips WHERE id = ?1",
                                params![record.clip.id],
                                |row| row.get(0),
                            )
                            .optional()?;
                        if taken.is_some() {
                            return Err(ClipStoreError::AlreadyExists {
                                clip_id: record.clip.id.clone(),
                            });
                        }
                        tx.execute("DELETE FROM clips WHERE id = ?1", params![old_id])?;
                    }
                    upsert_clip_tx(&tx, &record.clip)?;
                    replace_variants_tx(&tx, &record.clip.id, &record.variants)?;
                }
                RecordChange::Remove { id } => {
                    if tx.execute("DELETE FROM clips WHERE id = ?1", params![id])? == 0 {
                        return Err(ClipStoreError::NotFound { clip_id: id.clone() });
                    }
                }
            }
        }
        tx.commit()?;
        debug!(changes = changes.len(), "applied clip changes");
        Ok(())
    }

    /// Removes the clip; variant rows cascade. Returns what was removed.
    pub fn delete_clip(&self, clip_id: &str) -> ClipStoreResult<Option<ClipRecord>> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let record = load_record(&tx, clip_id)?;
        if record.is_some() {
            tx.execute("DELETE FROM clips WHERE id = ?1", params![clip_id])?;
        }
        tx.commit()?;
        Ok(record)
    }

    pub fn find_by_content_digest(&self, md5: &str) -> ClipStoreResult<Option<String>> {
        let conn = self.open()?;
        let clip_id = conn
            .query_row(
                "SELECT clip_id FROM clip_variants WHERE md5 = ?1 ORDER BY id LIMIT 1",
                params![md5.to_ascii_lowercase()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(clip_id)
    }

    pub fn find_by_id(&self, clip_id: &str) -> ClipStoreResult<Option<Clip>> {
        let conn = self.open()?;
        let sql = format!("SELECT {CLIP_COLUMNS} FROM clips WHERE id = ?1");
        let clip = conn
            .query_row(&sql, params![clip_id], |row| clip_from_row(row))
            .optional()?;
        Ok(clip)
    }

    pub fn find_record(&self, clip_id: &str) -> ClipStoreResult<Option<ClipRecord>> {
        let conn = self.open()?;
        load_record(&conn, clip_id)
    }

    pub fn variants(&self, clip_id: &str) -> ClipStoreResult<Vec<ClipVariant>> {
        let conn = self.open()?;
        load_variants(&conn, clip_id)
    }

    /// Ordered by surah, ayah_start, ayah_end, reciter_slug.
    pub fn list(&self, filter: &ClipFilter) -> ClipStoreResult<Vec<Clip>> {
        let conn = self.open()?;
        list_tx(&conn, filter)
    }

    pub fn list_records(&self, filter: &ClipFilter) -> ClipStoreResult<Vec<ClipRecord>> {
        let conn = self.open()?;
        let clips = list_tx(&conn, filter)?;
        let mut variants = all_variants(&conn)?;
        Ok(clips
            .into_iter()
            .map(|clip| {
                let attached = variants.remove(&clip.id).unwrap_or_default();
                ClipRecord::new(clip, attached)
            })
            .collect())
    }

    pub fn list_distinct(&self, field: DistinctField) -> ClipStoreResult<Vec<String>> {
        let conn = self.open()?;
        let column = field.column();
        let sql = format!("SELECT DISTINCT {column} FROM clips ORDER BY {column}");
        let mut stmt = conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }

    pub fn count(&self) -> ClipStoreResult<usize> {
        let conn = self.open()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM clips", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Online copy of the whole database, safe while other connections are open.
    pub fn backup_to(&self, destination: impl AsRef<Path>) -> ClipStoreResult<()> {
        let destination = destination.as_ref();
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ClipStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let source = self.open()?;
        let mut dest = Connection::open(destination).map_err(|source| ClipStoreError::OpenDatabase {
            path: destination.to_path_buf(),
            source,
        })?;
        let backup = Backup::new(&source, &mut dest)?;
        backup.run_to_completion(10, Duration::from_millis(50), None)?;
        info!(destination = %destination.display(), "backed up clip store");
        Ok(())
    }
}

fn ensure_clip_exists(conn: &Connection, clip_id: &str) -> ClipStoreResult<()> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM clips WHERE id = ?1", params![clip_id], |row| {
            row.get(0)
        })
        .optional()?;
    if found.is_none() {
        return Err(ClipStoreError::NotFound {
            clip_id: clip_id.to_string(),
        });
    }
    Ok(())
}

fn upsert_clip_tx(tx: &Transaction<'_>, clip: &Clip) -> ClipStoreResult<()> {
    tx.execute(
        "INSERT INTO clips (id, surah, ayah_start, ayah_end, reciter_slug, reciter_name,
                            riwayah, translation, thumbnail_blur, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            surah = excluded.surah,
            ayah_start = excluded.ayah_start,
            ayah_end = excluded.ayah_end,
            reciter_slug = excluded.reciter_slug,
            reciter_name = excluded.reciter_name,
            riwayah = excluded.riwayah,
            translation = excluded.translation,
            thumbnail_blur = COALESCE(excluded.thumbnail_blur, clips.thumbnail_blur)",
        params![
            clip.id,
            clip.surah,
            clip.ayah_start,
            clip.ayah_end,
            clip.reciter_slug,
            clip.reciter_name,
            clip.riwayah,
            clip.translation,
            clip.thumbnail_blur,
            clip.created_at,
        ],
    )?;
    Ok(())
}

fn replace_variants_tx(tx: &Transaction<'_>, clip_id: &str, variants: &[ClipVariant]) -> ClipStoreResult<()> {
    tx.execute("DELETE FROM clip_variants WHERE clip_id = ?1", params![clip_id])?;
    for variant in variants {
        insert_variant_tx(tx, clip_id, variant)?;
    }
    Ok(())
}

fn insert_variant_tx(tx: &Transaction<'_>, clip_id: &str, variant: &ClipVariant) -> ClipStoreResult<()> {
    tx.execute(
        "INSERT INTO clip_variants (clip_id, quality, r2_key, md5) VALUES (?1, ?2, ?3, ?4)",
        params![clip_id, variant.quality.as_str(), variant.r2_key, variant.md5],
    )?;
    Ok(())
}

fn list_tx(conn: &Connection, filter: &ClipFilter) -> ClipStoreResult<Vec<Clip>> {
    let (where_sql, values) = filter.where_clause();
    let sql = format!(
        "SELECT {CLIP_COLUMNS} FROM clips{where_sql}
         ORDER BY surah ASC, ayah_start ASC, ayah_end ASC, reciter_slug ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let clips = stmt
        .query_map(params_from_iter(values.iter()), |row| clip_from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(clips)
}

fn load_record(conn: &Connection, clip_id: &str) -> ClipStoreResult<Option<ClipRecord>> {
    let sql = format!("SELECT {CLIP_COLUMNS} FROM clips WHERE id = ?1");
    let clip = conn
        .query_row(&sql, params![clip_id], |row| clip_from_row(row))
        .optional()?;
    match clip {
        Some(clip) => {
            let variants = load_variants(conn, &clip.id)?;
            Ok(Some(ClipRecord::new(clip, variants)))
        }
        None => Ok(None),
    }
}

fn load_variants(conn: &Connection, clip_id: &str) -> ClipStoreResult<Vec<ClipVariant>> {
    let mut stmt = conn.prepare(
        "SELECT quality, r2_key, md5 FROM clip_variants WHERE clip_id = ?1 ORDER BY id",
    )?;
    let variants = stmt
        .query_map(params![clip_id], |row| variant_from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(variants)
}

fn all_variants(conn: &Connection) -> ClipStoreResult<BTreeMap<String, Vec<ClipVariant>>> {
    let mut stmt = conn.prepare("SELECT clip_id, quality, r2_key, md5 FROM clip_variants ORDER BY id")?;
    let mut rows = stmt.query([])?;
    let mut grouped: BTreeMap<String, Vec<ClipVariant>> = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let clip_id: String = row.get("clip_id")?;
        grouped.entry(clip_id).or_default().push(variant_from_row(row)?);
    }
    Ok(grouped)
}

fn clip_from_row(row: &Row<'_>) -> rusqlite::Result<Clip> {
    Ok(Clip {
        id: row.get("id")?,
        surah: row.get("surah")?,
        ayah_start: row.get("ayah_start")?,
        ayah_end: row.get("ayah_end")?,
        reciter_slug: row.get("reciter_slug")?,
        reciter_name: row.get("reciter_name")?,
        riwayah: row.get("riwayah")?,
        translation: row.get("translation")?,
        thumbnail_blur: row.get("thumbnail_blur")?,
        created_at: row.get("created_at")?,
    })
}

fn variant_from_row(row: &Row<'_>) -> rusqlite::Result<ClipVariant> {
    let quality: String = row.get("quality")?;
    let quality: Quality = quality.parse().map_err(|err: String| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, err.into())
    })?;
    Ok(ClipVariant {
        quality,
        r2_key: row.get("r2_key")?,
        md5: row.get("md5")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn record(surah: u16, start: u32, end: u32, slug: &str) -> ClipRecord {
        let mut clip = Clip {
            id: String::new(),
            surah,
            ayah_start: start,
            ayah_end: end,
            reciter_slug: slug.into(),
            reciter_name: slug.into(),
            riwayah: "hafs-an-asim".into(),
            translation: "saheeh-international".into(),
            thumbnail_blur: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        clip.id = clip.derived_id();
        let key = clip
            .coordinates()
            .variant_key("clips", Quality::High, "mp4");
        ClipRecord::new(clip, vec![ClipVariant::new(Quality::High, key, Some(format!("{:032x}", start)))])
    }

    fn store() -> (tempfile::TempDir, SqliteClipStore) {
        let dir = tempdir().unwrap();
        let store = SqliteClipStore::new(dir.path().join("clips.sqlite")).unwrap();
        store.initialize().unwrap();
        (dir, store)
    }

    #[test]
    fn commit_and_read_back() {
        let (_dir, store) = store();
        let rec = record(2, 255, 255, "maher-al-muaiqly");
        store.commit_clip(&rec).unwrap();
        let loaded = store.find_record(rec.id()).unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(
            store.find_by_content_digest(rec.variants[0].md5.as_deref().unwrap()).unwrap(),
            Some(rec.id().to_string())
        );
    }

    #[test]
    fn list_orders_and_filters_by_overlap() {
        let (_dir, store) = store();
        for rec in [
            record(2, 10, 12, "b-reciter"),
            record(1, 1, 7, "z-reciter"),
            record(2, 1, 5, "a-reciter"),
            record(2, 1, 5, "0-reciter"),
        ] {
            store.commit_clip(&rec).unwrap();
        }
        let all = store.list(&ClipFilter::default()).unwrap();
        let order: Vec<_> = all
            .iter()
            .map(|c| (c.surah, c.ayah_start, c.reciter_slug.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, 1, "z-reciter"),
                (2, 1, "0-reciter"),
                (2, 1, "a-reciter"),
                (2, 10, "b-reciter")
            ]
        );
        let overlap = store
            .list(&ClipFilter {
                surah: Some(2),
                ayah_from: Some(4),
                ayah_to: Some(10),
                ..ClipFilter::default()
            })
            .unwrap();
        assert_eq!(overlap.len(), 3);
        let distinct = store.list_distinct(DistinctField::Reciters).unwrap();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn put_variant_displaces_same_quality() {
        let (_dir, store) = store();
        let rec = record(1, 1, 7, "a");
        store.commit_clip(&rec).unwrap();
        let thumb = ClipVariant::new(Quality::Thumbnail, "clips/x/thumbnail.jpg", None);
        store.put_variant(rec.id(), &thumb).unwrap();
        let thumb2 = ClipVariant::new(Quality::Thumbnail, "clips/x/thumbnail-2.jpg", None);
        store.put_variant(rec.id(), &thumb2).unwrap();
        let variants = store.variants(rec.id()).unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[1], thumb2);
    }

    #[test]
    fn replace_change_moves_clip_and_variants() {
        let (_dir, store) = store();
        let rec = record(1, 1, 7, "a");
        store.commit_clip(&rec).unwrap();
        let mut renamed = rec.clone();
        renamed.clip.translation = "khan-al-hilali".into();
        renamed.clip.id = renamed.clip.derived_id();
        store
            .apply_changes(&[RecordChange::Replace {
                old_id: rec.id().to_string(),
                record: renamed.clone(),
            }])
            .unwrap();
        assert!(store.find_by_id(rec.id()).unwrap().is_none());
        let loaded = store.find_record(renamed.id()).unwrap().unwrap();
        assert_eq!(loaded.clip.created_at, rec.clip.created_at);
        assert_eq!(loaded.variants.len(), 1);
    }

    #[test]
    fn delete_cascades_and_backup_copies() {
        let (dir, store) = store();
        let rec = record(1, 1, 7, "a");
        store.commit_clip(&rec).unwrap();
        let backup_path = dir.path().join("backups/clips.sqlite");
        store.backup_to(&backup_path).unwrap();

        let removed = store.delete_clip(rec.id()).unwrap().unwrap();
        assert_eq!(removed.variants.len(), 1);
        assert!(store.variants(rec.id()).unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);

        let restored = SqliteClipStore::new(&backup_path).unwrap();
        assert_eq!(restored.count().unwrap(), 1);
    }

    #[test]
    fn replace_variants_on_missing_clip_fails() {
        let (_dir, store) = store();
        let err = store.replace_variants("nope", &[]).unwrap_err();
        assert!(matches!(err, ClipStoreError::NotFound { .. }));
    }
}

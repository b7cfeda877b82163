use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;

use crate::config::CatalogSection;

use super::models::{Clip, ClipRecord, ClipVariant, Quality, RawClipInput};
use super::naming::{derive_reciter_fields, slugify, ClipCoordinates};
use super::{DEFAULT_RIWAYAH, DEFAULT_TRANSLATION, KNOWN_TRANSLATIONS};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("surah {value} is outside 1..=114")]
    SurahOutOfRange { value: i64 },
    #[error("ayahStart {value} must be at least 1")]
    AyahStartOutOfRange { value: i64 },
    #[error("ayahEnd {end} is before ayahStart {start}")]
    AyahRangeInverted { start: i64, end: i64 },
    #[error("reciter cannot be derived from reciter, reciterSlug or reciterName")]
    MissingReciter,
    #[error("{field} '{value}' is not a valid slug")]
    InvalidSlug { field: &'static str, value: String },
    #[error("unknown translation '{value}'")]
    UnknownTranslation { value: String },
    #[error("unknown quality tag '{value}'")]
    UnknownQuality { value: String },
    #[error("md5 '{value}' is not 32 lowercase hex characters")]
    MalformedDigest { value: String },
    #[error("id '{found}' does not match derived id '{expected}'")]
    MalformedId { expected: String, found: String },
    #[error("variant key '{key}' appears more than once")]
    DuplicateVariantKey { key: String },
}

pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

fn slug_regex() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid regex"))
}

fn md5_regex() -> &'static Regex {
    static MD5: OnceLock<Regex> = OnceLock::new();
    MD5.get_or_init(|| Regex::new(r"^[0-9a-f]{32}$").expect("valid regex"))
}

pub fn validate_digest(value: &str) -> ValidationResult<()> {
    if md5_regex().is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::MalformedDigest {
            value: value.to_string(),
        })
    }
}

pub fn validate_slug(field: &'static str, value: &str) -> ValidationResult<()> {
    if slug_regex().is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidSlug {
            field,
            value: value.to_string(),
        })
    }
}

pub fn validate_range(surah: i64, ayah_start: i64, ayah_end: i64) -> ValidationResult<(u16, u32, u32)> {
    if !(1..=114).contains(&surah) {
        return Err(ValidationError::SurahOutOfRange { value: surah });
    }
    if ayah_start < 1 || ayah_start > i64::from(u32::MAX) {
        return Err(ValidationError::AyahStartOutOfRange { value: ayah_start });
    }
    if ayah_end < ayah_start || ayah_end > i64::from(u32::MAX) {
        return Err(ValidationError::AyahRangeInverted {
            start: ayah_start,
            end: ayah_end,
        });
    }
    Ok((surah as u16, ayah_start as u32, ayah_end as u32))
}

/// Known translations, riwayah aliases and defaults applied to raw input.
#[derive(Debug, Clone)]
pub struct Catalog {
    translations: BTreeSet<String>,
    riwayah_aliases: BTreeMap<String, String>,
    default_riwayah: String,
    default_translation: String,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            translations: KNOWN_TRANSLATIONS.iter().map(|t| t.to_string()).collect(),
            riwayah_aliases: BTreeMap::new(),
            default_riwayah: DEFAULT_RIWAYAH.to_string(),
            default_translation: DEFAULT_TRANSLATION.to_string(),
        }
    }
}

impl Catalog {
    pub fn from_config(section: &CatalogSection) -> Self {
        let mut catalog = Self::default();
        catalog
            .translations
            .extend(section.extra_translations.iter().cloned());
        catalog.translations.insert(section.default_translation.clone());
        catalog.riwayah_aliases = section.riwayah_aliases.clone();
        catalog.default_riwayah = section.default_riwayah.clone();
        catalog.default_translation = section.default_translation.clone();
        catalog
    }

    pub fn with_translation(mut self, slug: impl Into<String>) -> Self {
        self.translations.insert(slug.into());
        self
    }

    pub fn with_riwayah_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.riwayah_aliases.insert(alias.into(), canonical.into());
        self
    }

    pub fn translations(&self) -> impl Iterator<Item = &str> {
        self.translations.iter().map(String::as_str)
    }

    pub fn riwayah_aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.riwayah_aliases
            .iter()
            .map(|(alias, canonical)| (alias.as_str(), canonical.as_str()))
    }

    pub fn default_riwayah(&self) -> &str {
        &self.default_riwayah
    }

    pub fn default_translation(&self) -> &str {
        &self.default_translation
    }

    pub fn resolve_translation(&self, value: Option<&str>) -> ValidationResult<String> {
        let translation = value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.default_translation);
        if self.translations.contains(translation) {
            Ok(translation.to_string())
        } else {
            Err(ValidationError::UnknownTranslation {
                value: translation.to_string(),
            })
        }
    }

    pub fn resolve_riwayah(&self, value: Option<&str>) -> ValidationResult<String> {
        let riwayah = value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.default_riwayah);
        let riwayah = self
            .riwayah_aliases
            .get(riwayah)
            .map(String::as_str)
            .unwrap_or(riwayah);
        validate_slug("riwayah", riwayah)?;
        Ok(riwayah.to_string())
    }
}

/// Creation time given to historical records that never carried one. Fixed
/// so that repeated index builds agree on it.
pub const UNRECORDED_CREATED_AT: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Ids a historical record may carry: the spellings it states before reciter
/// and riwayah canonicalization.
fn historical_ids(clip: &Clip, stated_reciter: Option<&str>, stated_riwayah: Option<&str>) -> Vec<String> {
    let canonical = clip.coordinates();
    let reciters = [Some(clip.reciter_slug.clone()), stated_reciter.map(slugify)];
    let riwayat = [Some(clip.riwayah.as_str()), stated_riwayah];
    let mut ids = Vec::new();
    for reciter in reciters.iter().flatten() {
        for riwayah in riwayat.iter().flatten() {
            let id = ClipCoordinates {
                reciter_slug: reciter.as_str(),
                riwayah: *riwayah,
                ..canonical
            }
            .canonical_id();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Turns any accepted input form into one validated clip record.
///
/// A stored id is accepted when it matches the canonical id or the id built
/// from the record's own historical spellings; the result always carries the
/// canonical id.
pub fn normalize(raw: &RawClipInput, catalog: &Catalog) -> ValidationResult<ClipRecord> {
    let fields = raw.fields();
    let (surah, ayah_start, ayah_end) =
        validate_range(fields.surah, fields.ayah_start, fields.ayah_end)?;

    let reciter = match raw {
        RawClipInput::Current {
            reciter_slug,
            reciter_name,
            ..
        } => derive_reciter_fields(reciter_slug.as_deref(), reciter_name.as_deref()),
        RawClipInput::Legacy { reciter, .. } => derive_reciter_fields(None, Some(reciter)),
    }
    .ok_or(ValidationError::MissingReciter)?;
    let stated_reciter = match raw {
        RawClipInput::Current {
            reciter_slug,
            reciter_name,
            ..
        } => reciter_slug.as_deref().or(reciter_name.as_deref()),
        RawClipInput::Legacy { reciter, .. } => Some(reciter.as_str()),
    };
    validate_slug("reciterSlug", &reciter.slug)?;

    let riwayah = catalog.resolve_riwayah(fields.riwayah.as_deref())?;
    let translation = catalog.resolve_translation(fields.translation.as_deref())?;

    let mut clip = Clip {
        id: String::new(),
        surah,
        ayah_start,
        ayah_end,
        reciter_slug: reciter.slug,
        reciter_name: reciter.name,
        riwayah,
        translation,
        thumbnail_blur: fields.thumbnail_blur.clone(),
        created_at: fields.created_at.unwrap_or(UNRECORDED_CREATED_AT),
    };
    let derived = clip.derived_id();
    if let Some(found) = fields.id.as_deref().filter(|found| *found != derived) {
        let stated_riwayah = fields.riwayah.as_deref().map(str::trim);
        if !historical_ids(&clip, stated_reciter, stated_riwayah).iter().any(|id| id == found) {
            return Err(ValidationError::MalformedId {
                expected: derived,
                found: found.to_string(),
            });
        }
    }
    clip.id = derived;

    let mut seen = HashSet::new();
    let mut variants = Vec::with_capacity(fields.variants.len());
    for raw_variant in &fields.variants {
        let quality: Quality =
            raw_variant
                .quality
                .parse()
                .map_err(|_| ValidationError::UnknownQuality {
                    value: raw_variant.quality.clone(),
                })?;
        if let Some(md5) = raw_variant.md5.as_deref() {
            validate_digest(md5)?;
        }
        if !seen.insert(raw_variant.r2_key.clone()) {
            return Err(ValidationError::DuplicateVariantKey {
                key: raw_variant.r2_key.clone(),
            });
        }
        variants.push(ClipVariant::new(
            quality,
            raw_variant.r2_key.clone(),
            raw_variant.md5.clone(),
        ));
    }

    Ok(ClipRecord::new(clip, variants))
}

/// Re-checks a record that is already typed, e.g. one loaded from SQLite.
pub fn validate_record(record: &ClipRecord, catalog: &Catalog) -> ValidationResult<()> {
    normalize(&RawClipInput::from(record), catalog).map(|_| ())
}

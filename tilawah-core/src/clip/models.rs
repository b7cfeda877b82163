use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::naming::ClipCoordinates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quality {
    Low,
    High,
    Thumbnail,
    Hls,
    LegacyOne,
    LegacyTwo,
    LegacyThree,
    LegacyFour,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::High => "high",
            Quality::Thumbnail => "thumbnail",
            Quality::Hls => "hls",
            Quality::LegacyOne => "1",
            Quality::LegacyTwo => "2",
            Quality::LegacyThree => "3",
            Quality::LegacyFour => "4",
        }
    }

    /// Tags removed by the redundant-variant pruner.
    pub fn is_deprecated(&self) -> bool {
        matches!(
            self,
            Quality::Low | Quality::LegacyOne | Quality::LegacyTwo | Quality::LegacyThree
        )
    }

    pub fn is_playable(&self) -> bool {
        !matches!(self, Quality::Thumbnail)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Quality::Low),
            "high" => Ok(Quality::High),
            "thumbnail" => Ok(Quality::Thumbnail),
            "hls" => Ok(Quality::Hls),
            "1" => Ok(Quality::LegacyOne),
            "2" => Ok(Quality::LegacyTwo),
            "3" => Ok(Quality::LegacyThree),
            "4" => Ok(Quality::LegacyFour),
            other => Err(format!("unknown quality tag: {other}")),
        }
    }
}

impl Serialize for Quality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Quality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" | "m4a" | "aac" | "wav" | "ogg" | "opus" | "flac" => Some(MediaKind::Audio),
            "mp4" | "mov" | "mkv" | "webm" | "m4v" => Some(MediaKind::Video),
            _ => None,
        }
    }

    pub fn low_extension(&self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }
}

pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "m4a" | "aac" => "audio/mp4",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "m3u8" => "application/vnd.apple.mpegurl",
        "m4s" => "video/iso.segment",
        "ts" => "video/mp2t",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipVariant {
    pub quality: Quality,
    pub r2_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

impl ClipVariant {
    pub fn new(quality: Quality, r2_key: impl Into<String>, md5: Option<String>) -> Self {
        Self {
            quality,
            r2_key: r2_key.into(),
            md5,
        }
    }

    /// HLS variants point at a master playlist; the whole package lives under its directory.
    pub fn object_prefix(&self) -> Option<String> {
        if self.quality != Quality::Hls {
            return None;
        }
        self.r2_key
            .rsplit_once('/')
            .map(|(dir, _)| format!("{dir}/"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: String,
    pub surah: u16,
    pub ayah_start: u32,
    pub ayah_end: u32,
    pub reciter_slug: String,
    pub reciter_name: String,
    pub riwayah: String,
    pub translation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_blur: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Clip {
    pub fn coordinates(&self) -> ClipCoordinates<'_> {
        ClipCoordinates {
            surah: self.surah,
            ayah_start: self.ayah_start,
            ayah_end: self.ayah_end,
            reciter_slug: &self.reciter_slug,
            riwayah: &self.riwayah,
            translation: &self.translation,
        }
    }

    pub fn derived_id(&self) -> String {
        self.coordinates().canonical_id()
    }

    pub fn overlaps(&self, ayah_from: u32, ayah_to: u32) -> bool {
        self.ayah_start <= ayah_to && self.ayah_end >= ayah_from
    }
}

/// A clip together with its variants, the unit persisted and indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    #[serde(flatten)]
    pub clip: Clip,
    #[serde(default)]
    pub variants: Vec<ClipVariant>,
}

impl ClipRecord {
    pub fn new(clip: Clip, variants: Vec<ClipVariant>) -> Self {
        Self { clip, variants }
    }

    pub fn id(&self) -> &str {
        &self.clip.id
    }

    pub fn variant(&self, quality: Quality) -> Option<&ClipVariant> {
        self.variants.iter().find(|v| v.quality == quality)
    }

    pub fn has_variant(&self, quality: Quality) -> bool {
        self.variant(quality).is_some()
    }

    pub fn has_playable_variant(&self) -> bool {
        self.variants.iter().any(|v| v.quality.is_playable())
    }
}

/// Clip fields shared by every accepted input form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClipFields {
    #[serde(default)]
    pub id: Option<String>,
    pub surah: i64,
    pub ayah_start: i64,
    pub ayah_end: i64,
    #[serde(default)]
    pub riwayah: Option<String>,
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub thumbnail_blur: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variants: Vec<RawVariant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVariant {
    pub quality: String,
    pub r2_key: String,
    #[serde(default)]
    pub md5: Option<String>,
}

/// Input as found in forms, CLI flags and historical log lines.
///
/// Older records carry a single free-text `reciter`; current ones carry
/// `reciterSlug` and/or `reciterName`. Both collapse into one [`ClipRecord`]
/// through [`super::validation::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawClipInput {
    #[serde(rename_all = "camelCase")]
    Current {
        #[serde(flatten)]
        fields: RawClipFields,
        #[serde(skip_serializing_if = "Option::is_none")]
        reciter_slug: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reciter_name: Option<String>,
    },
    Legacy {
        #[serde(flatten)]
        fields: RawClipFields,
        reciter: String,
    },
}

/// Every reciter field any record shape has used, read in one pass so that
/// field-level errors reach the caller intact.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClipLine {
    #[serde(flatten)]
    fields: RawClipFields,
    #[serde(default)]
    reciter_slug: Option<String>,
    #[serde(default)]
    reciter_name: Option<String>,
    #[serde(default)]
    reciter: Option<String>,
}

impl From<RawClipLine> for RawClipInput {
    fn from(line: RawClipLine) -> Self {
        match (line.reciter_slug, line.reciter_name, line.reciter) {
            (None, None, Some(reciter)) => RawClipInput::Legacy {
                fields: line.fields,
                reciter,
            },
            (reciter_slug, reciter_name, _) => RawClipInput::Current {
                fields: line.fields,
                reciter_slug,
                reciter_name,
            },
        }
    }
}

impl<'de> Deserialize<'de> for RawClipInput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawClipLine::deserialize(deserializer).map(RawClipInput::from)
    }
}

impl RawClipInput {
    pub fn fields(&self) -> &RawClipFields {
        match self {
            RawClipInput::Current { fields, .. } | RawClipInput::Legacy { fields, .. } => fields,
        }
    }

    pub fn fields_mut(&mut self) -> &mut RawClipFields {
        match self {
            RawClipInput::Current { fields, .. } | RawClipInput::Legacy { fields, .. } => fields,
        }
    }
}

impl From<&ClipRecord> for RawClipInput {
    fn from(record: &ClipRecord) -> Self {
        let clip = &record.clip;
        RawClipInput::Current {
            fields: RawClipFields {
                id: Some(clip.id.clone()),
                surah: i64::from(clip.surah),
                ayah_start: i64::from(clip.ayah_start),
                ayah_end: i64::from(clip.ayah_end),
                riwayah: Some(clip.riwayah.clone()),
                translation: Some(clip.translation.clone()),
                thumbnail_blur: clip.thumbnail_blur.clone(),
                created_at: Some(clip.created_at),
                variants: record
                    .variants
                    .iter()
                    .map(|v| RawVariant {
                        quality: v.quality.to_string(),
                        r2_key: v.r2_key.clone(),
                        md5: v.md5.clone(),
                    })
                    .collect(),
            },
            reciter_slug: Some(clip.reciter_slug.clone()),
            reciter_name: Some(clip.reciter_name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_reciter_field_is_accepted() {
        let line = r#"{"surah":1,"ayahStart":1,"ayahEnd":7,"reciter":"Maher Al Muaiqly","variants":[{"quality":"high","r2Key":"a/high.mp4"}]}"#;
        let raw: RawClipInput = serde_json::from_str(line).unwrap();
        match raw {
            RawClipInput::Legacy { fields, reciter } => {
                assert_eq!(reciter, "Maher Al Muaiqly");
                assert_eq!(fields.ayah_end, 7);
                assert_eq!(fields.variants.len(), 1);
            }
            other => panic!("expected legacy form, got {other:?}"),
        }
    }

    #[test]
    fn current_form_wins_when_slug_present() {
        let line = r#"{"surah":2,"ayahStart":255,"ayahEnd":255,"reciterSlug":"maher-al-muaiqly","reciter":"ignored"}"#;
        let raw: RawClipInput = serde_json::from_str(line).unwrap();
        assert!(matches!(raw, RawClipInput::Current { .. }));
    }

    #[test]
    fn name_only_record_takes_current_form() {
        let line = r#"{"surah":1,"ayahStart":1,"ayahEnd":7,"reciterName":"Maher Al Muaiqly","variants":[]}"#;
        let raw: RawClipInput = serde_json::from_str(line).unwrap();
        match raw {
            RawClipInput::Current {
                reciter_slug,
                reciter_name,
                ..
            } => {
                assert_eq!(reciter_slug, None);
                assert_eq!(reciter_name.as_deref(), Some("Maher Al Muaiqly"));
            }
            other => panic!("expected current form, got {other:?}"),
        }
    }

    #[test]
    fn field_type_errors_are_reported() {
        let line = r#"{"surah":"2","ayahStart":255,"ayahEnd":255,"reciterSlug":"maher-al-muaiqly"}"#;
        let err = serde_json::from_str::<RawClipInput>(line).unwrap_err();
        assert!(err.to_string().contains("invalid type"), "{err}");
    }

    #[test]
    fn quality_tags_parse_including_legacy_aliases() {
        assert_eq!("hls".parse::<Quality>().unwrap(), Quality::Hls);
        assert_eq!("3".parse::<Quality>().unwrap(), Quality::LegacyThree);
        assert!("medium".parse::<Quality>().is_err());
        assert!(Quality::LegacyOne.is_deprecated());
        assert!(!Quality::LegacyFour.is_deprecated());
        assert!(!Quality::High.is_deprecated());
    }

    #[test]
    fn hls_variant_exposes_package_prefix() {
        let variant = ClipVariant::new(Quality::Hls, "clips/x/y/z/s1/a1-7/hls/master.m3u8", None);
        assert_eq!(
            variant.object_prefix().as_deref(),
            Some("clips/x/y/z/s1/a1-7/hls/")
        );
        let high = ClipVariant::new(Quality::High, "clips/x/high.mp4", None);
        assert!(high.object_prefix().is_none());
    }
}

//! Canonical ids, storage keys and reciter names.
//!
//! Ingestion and every repair tool derive keys through this module only, so
//! identical inputs always land on identical keys.

use std::sync::OnceLock;

use regex::Regex;

use super::models::Quality;

pub const HLS_DIR: &str = "hls";
pub const HLS_MASTER_PLAYLIST: &str = "master.m3u8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipCoordinates<'a> {
    pub surah: u16,
    pub ayah_start: u32,
    pub ayah_end: u32,
    pub reciter_slug: &'a str,
    pub riwayah: &'a str,
    pub translation: &'a str,
}

impl<'a> ClipCoordinates<'a> {
    pub fn canonical_id(&self) -> String {
        format!(
            "s{}_a{}-{}__{}__{}__{}",
            self.surah,
            self.ayah_start,
            self.ayah_end,
            self.reciter_slug,
            self.riwayah,
            self.translation
        )
    }

    /// Directory holding every variant of the clip, without a trailing slash.
    pub fn variant_dir(&self, prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        let tail = format!(
            "{}/{}/{}/s{}/a{}-{}",
            self.reciter_slug,
            self.riwayah,
            self.translation,
            self.surah,
            self.ayah_start,
            self.ayah_end
        );
        if prefix.is_empty() {
            tail
        } else {
            format!("{prefix}/{tail}")
        }
    }

    pub fn variant_key(&self, prefix: &str, quality: Quality, ext: &str) -> String {
        if quality == Quality::Hls {
            return self.hls_master_key(prefix);
        }
        format!(
            "{}/{}.{}",
            self.variant_dir(prefix),
            quality.as_str(),
            ext.trim_start_matches('.')
        )
    }

    pub fn hls_master_key(&self, prefix: &str) -> String {
        format!("{}/{HLS_DIR}/{HLS_MASTER_PLAYLIST}", self.variant_dir(prefix))
    }

    pub fn hls_prefix(&self, prefix: &str) -> String {
        format!("{}/{HLS_DIR}/", self.variant_dir(prefix))
    }

    pub fn with_translation(&self, translation: &'a str) -> Self {
        Self {
            translation,
            ..*self
        }
    }

    pub fn with_reciter(&self, reciter_slug: &'a str) -> Self {
        Self {
            reciter_slug,
            ..*self
        }
    }

    pub fn with_riwayah(&self, riwayah: &'a str) -> Self {
        Self { riwayah, ..*self }
    }
}

/// A storage key split back into its naming segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantKey {
    pub prefix: String,
    pub reciter_slug: String,
    pub riwayah: String,
    pub translation: String,
    pub surah: u16,
    pub ayah_start: u32,
    pub ayah_end: u32,
    /// Path below the clip directory, e.g. `high.mp4` or `hls/v0/index.m3u8`.
    pub file: String,
}

fn key_regex() -> &'static Regex {
    static KEY: OnceLock<Regex> = OnceLock::new();
    KEY.get_or_init(|| {
        Regex::new(
            r"^(?:(?P<prefix>.+)/)?(?P<slug>[^/]+)/(?P<riwayah>[^/]+)/(?P<translation>[^/]+)/s(?P<surah>\d+)/a(?P<start>\d+)-(?P<end>\d+)/(?P<file>.+)$",
        )
        .expect("valid regex")
    })
}

impl VariantKey {
    pub fn parse(key: &str) -> Option<Self> {
        let caps = key_regex().captures(key.trim_start_matches('/'))?;
        Some(Self {
            prefix: caps
                .name("prefix")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            reciter_slug: caps["slug"].to_string(),
            riwayah: caps["riwayah"].to_string(),
            translation: caps["translation"].to_string(),
            surah: caps["surah"].parse().ok()?,
            ayah_start: caps["start"].parse().ok()?,
            ayah_end: caps["end"].parse().ok()?,
            file: caps["file"].to_string(),
        })
    }

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

    pub fn render(&self) -> String {
        format!("{}/{}", self.coordinates().variant_dir(&self.prefix), self.file)
    }

    /// Re-renders the key under different coordinates, keeping prefix and file.
    pub fn rebase(&self, coordinates: &ClipCoordinates<'_>) -> String {
        format!("{}/{}", coordinates.variant_dir(&self.prefix), self.file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReciterFields {
    pub slug: String,
    pub name: String,
}

struct CanonicalReciter {
    slug: &'static str,
    name: &'static str,
    aliases: &'static [&'static str],
}

const CANONICAL_RECITERS: &[CanonicalReciter] = &[
    CanonicalReciter {
        slug: "maher-al-muaiqly",
        name: "Maher al-Mu'aiqly",
        aliases: &[
            "maher-almuaiqly",
            "maher-al-muaiqli",
            "maher-al-mueaqly",
            "maher-al-mu-aiqly",
            "maher-muaiqly",
        ],
    },
    CanonicalReciter {
        slug: "mishary-rashid-alafasy",
        name: "Mishary Rashid Alafasy",
        aliases: &["mishari-rashid-alafasy", "mishary-alafasy", "mishary-al-afasy"],
    },
    CanonicalReciter {
        slug: "abdul-rahman-al-sudais",
        name: "Abdul Rahman al-Sudais",
        aliases: &[
            "abdulrahman-al-sudais",
            "abdur-rahman-as-sudais",
            "abdul-rahman-alsudais",
        ],
    },
    CanonicalReciter {
        slug: "saad-al-ghamdi",
        name: "Saad al-Ghamdi",
        aliases: &["saad-alghamdi", "sa-ad-al-ghamdi"],
    },
];

fn canonical_for(slug: &str) -> Option<&'static CanonicalReciter> {
    CANONICAL_RECITERS
        .iter()
        .find(|entry| entry.slug == slug || entry.aliases.contains(&slug))
}

fn fold_char(c: char) -> Option<char> {
    let folded = match c {
        '\'' | '\u{2018}' | '\u{2019}' | '`' | '\u{02BF}' | '\u{02BE}' => return None,
        'á' | 'à' | 'â' | 'ä' | 'ā' | 'Á' | 'Ā' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'ē' | 'É' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'ī' | 'Ī' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'ō' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'ū' | 'Ū' => 'u',
        'ḥ' | 'Ḥ' => 'h',
        'ṣ' | 'Ṣ' => 's',
        'ḍ' | 'Ḍ' => 'd',
        'ṭ' | 'Ṭ' => 't',
        'ẓ' | 'Ẓ' => 'z',
        other => other.to_ascii_lowercase(),
    };
    Some(folded)
}

/// Lowercase-hyphen form of free text. Apostrophes vanish, every other
/// non-alphanumeric run becomes a single hyphen.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_hyphen = false;
    for c in input.chars().filter_map(fold_char) {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

/// Historical spellings recorded for a canonical reciter slug.
pub fn reciter_aliases(slug: &str) -> &'static [&'static str] {
    canonical_for(slug).map(|entry| entry.aliases).unwrap_or(&[])
}

pub fn canonical_reciter_slug(input: &str) -> String {
    let slug = slugify(input);
    match canonical_for(&slug) {
        Some(entry) => entry.slug.to_string(),
        None => slug,
    }
}

/// Title-cases tokens split on spaces and hyphens, keeping the separators.
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_token_start = true;
    for c in input.trim().chars() {
        if c == ' ' || c == '-' {
            out.push(c);
            at_token_start = true;
        } else if at_token_start {
            out.extend(c.to_uppercase());
            at_token_start = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

pub fn display_name_for_slug(slug: &str) -> String {
    match canonical_for(slug) {
        Some(entry) => entry.name.to_string(),
        None => title_case(&slug.replace('-', " ")),
    }
}

/// Resolves slug and display name from whichever of the two is present.
pub fn derive_reciter_fields(slug: Option<&str>, name: Option<&str>) -> Option<ReciterFields> {
    let slug = slug.map(str::trim).filter(|s| !s.is_empty());
    let name = name.map(str::trim).filter(|s| !s.is_empty());
    let canonical_slug = match (slug, name) {
        (Some(slug), _) => canonical_reciter_slug(slug),
        (None, Some(name)) => canonical_reciter_slug(name),
        (None, None) => return None,
    };
    if canonical_slug.is_empty() {
        return None;
    }
    let display = match (canonical_for(&canonical_slug), name) {
        (Some(entry), _) => entry.name.to_string(),
        (None, Some(name)) => title_case(name),
        (None, None) => display_name_for_slug(&canonical_slug),
    };
    Some(ReciterFields {
        slug: canonical_slug,
        name: display,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ayat_al_kursi() -> (String, String, String) {
        (
            "maher-al-muaiqly".to_string(),
            "hafs-an-asim".to_string(),
            "khan-al-hilali".to_string(),
        )
    }

    #[test]
    fn canonical_id_and_high_key_match_convention() {
        let (slug, riwayah, translation) = ayat_al_kursi();
        let coords = ClipCoordinates {
            surah: 2,
            ayah_start: 255,
            ayah_end: 255,
            reciter_slug: &slug,
            riwayah: &riwayah,
            translation: &translation,
        };
        assert_eq!(
            coords.canonical_id(),
            "s2_a255-255__maher-al-muaiqly__hafs-an-asim__khan-al-hilali"
        );
        assert_eq!(
            coords.variant_key("clips", Quality::High, "mp4"),
            "clips/maher-al-muaiqly/hafs-an-asim/khan-al-hilali/s2/a255-255/high.mp4"
        );
        assert_eq!(
            coords.variant_key("clips", Quality::Hls, "m3u8"),
            "clips/maher-al-muaiqly/hafs-an-asim/khan-al-hilali/s2/a255-255/hls/master.m3u8"
        );
        assert_eq!(
            coords.canonical_id(),
            coords.canonical_id(),
            "id derivation is deterministic"
        );
    }

    #[test]
    fn parse_and_rebase_swaps_translation_segment() {
        let key = "clips/maher-al-muaiqly/hafs-an-asim/khan-al-hilali/s2/a255-255/hls/v1/index.m3u8";
        let parsed = VariantKey::parse(key).unwrap();
        assert_eq!(parsed.prefix, "clips");
        assert_eq!(parsed.file, "hls/v1/index.m3u8");
        assert_eq!(parsed.render(), key);
        let swapped = parsed.rebase(&parsed.coordinates().with_translation("saheeh-international"));
        assert_eq!(
            swapped,
            "clips/maher-al-muaiqly/hafs-an-asim/saheeh-international/s2/a255-255/hls/v1/index.m3u8"
        );
    }

    #[test]
    fn parse_rejects_foreign_keys() {
        assert!(VariantKey::parse("uploads/random/file.mp4").is_none());
    }

    #[test]
    fn maher_spellings_converge() {
        let spellings = [
            "Maher al-Mu'aiqly",
            "Maher Al Muaiqly",
            "maher-almuaiqly",
            "MAHER AL-MU’AIQLY",
            "Maher al Muaiqli",
        ];
        for spelling in spellings {
            let fields = derive_reciter_fields(None, Some(spelling)).unwrap();
            assert_eq!(fields.slug, "maher-al-muaiqly", "slug for {spelling}");
            assert_eq!(fields.name, "Maher al-Mu'aiqly", "name for {spelling}");
            let again = derive_reciter_fields(Some(&slugify(&fields.name)), None).unwrap();
            assert_eq!(again, fields);
        }
    }

    #[test]
    fn title_case_splits_on_hyphens_and_spaces() {
        assert_eq!(title_case("yasser al-dosari"), "Yasser Al-Dosari");
        assert_eq!(slugify("  Yasser  Al-Dosari! "), "yasser-al-dosari");
        assert_eq!(display_name_for_slug("yasser-al-dosari"), "Yasser Al Dosari");
    }

    #[test]
    fn missing_reciter_yields_none() {
        assert!(derive_reciter_fields(None, None).is_none());
        assert!(derive_reciter_fields(Some("  "), Some("'")).is_none());
    }
}

pub mod models;
pub mod naming;
pub mod validation;

pub use models::{
    content_type_for, Clip, ClipRecord, ClipVariant, MediaKind, Quality, RawClipFields,
    RawClipInput, RawVariant,
};
pub use naming::{
    canonical_reciter_slug, derive_reciter_fields, display_name_for_slug, reciter_aliases, slugify,
    title_case, ClipCoordinates, ReciterFields, VariantKey, HLS_DIR, HLS_MASTER_PLAYLIST,
};
pub use validation::{
    normalize, validate_digest, validate_range, validate_record, validate_slug, Catalog,
    ValidationError, ValidationResult, UNRECORDED_CREATED_AT,
};

pub const DEFAULT_RIWAYAH: &str = "hafs-an-asim";
pub const DEFAULT_TRANSLATION: &str = "saheeh-international";

pub const KNOWN_TRANSLATIONS: &[&str] = &[
    "saheeh-international",
    "khan-al-hilali",
    "yusuf-ali",
    "pickthall",
    "abdel-haleem",
    "mustafa-khattab",
];

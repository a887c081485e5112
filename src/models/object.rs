//! Represents an object (file) stored in a bin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::derived::{DerivedAssets, DerivedVariant};

/// Hash algorithm recorded alongside every checksum.
pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// Represents a single object (file) within a bin.
///
/// An object corresponds to one file on disk at `{root}/{bin}/{filename}`.
/// The `Object` struct carries its metadata, not the content bytes. Size and
/// checksum never change once published; a re-upload under the same name
/// produces a new `Object` that replaces this one wholesale.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Object {
    /// Id of the parent bin.
    pub bin: String,

    /// Sanitised filename, unique within the bin.
    pub filename: String,

    /// Size in bytes.
    pub bytes: u64,

    /// Lowercase hex digest of the full content.
    pub checksum: String,

    /// Name of the digest algorithm used for `checksum`.
    pub algorithm: String,

    /// Content type sniffed from the leading bytes.
    pub mime: String,

    /// Modification time of the published file.
    pub created_at: DateTime<Utc>,

    /// Capture time from embedded EXIF metadata, images only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,

    /// GPS latitude in decimal degrees, images only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    /// GPS longitude in decimal degrees, images only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    /// Which derived variants are known to exist on disk.
    #[serde(default)]
    pub derived: DerivedAssets,
}

impl Object {
    /// Top-level media type, e.g. `image` for `image/png`.
    pub fn media_type(&self) -> &str {
        self.mime.split('/').next().unwrap_or_default()
    }

    pub fn is_image(&self) -> bool {
        self.media_type() == "image"
    }

    /// Timestamp used to order files inside a bin.
    pub fn sort_time(&self) -> DateTime<Utc> {
        self.captured_at.unwrap_or(self.created_at)
    }

    pub fn has_derived(&self, variant: DerivedVariant) -> bool {
        self.derived.contains(variant)
    }
}

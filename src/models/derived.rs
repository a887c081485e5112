//! Derived image variants generated from stored originals.

use serde::{Deserialize, Serialize};

/// Directory inside each bin that holds derived assets.
pub const CACHE_DIR: &str = ".cache";

/// The fixed set of variants produced for every image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DerivedVariant {
    /// 115x115, cropped to fill.
    Thumbnail,
    /// 1140 wide, height proportional to the source.
    Preview,
}

impl DerivedVariant {
    /// Variants in the order the pipeline generates them.
    pub const ALL: [DerivedVariant; 2] = [DerivedVariant::Thumbnail, DerivedVariant::Preview];

    /// Target width in pixels.
    pub fn width(self) -> u32 {
        match self {
            DerivedVariant::Thumbnail => 115,
            DerivedVariant::Preview => 1140,
        }
    }

    /// Target height in pixels; `0` means "keep the aspect ratio".
    pub fn height(self) -> u32 {
        match self {
            DerivedVariant::Thumbnail => 115,
            DerivedVariant::Preview => 0,
        }
    }

    /// Crop to fill the exact box instead of fitting proportionally.
    pub fn crop(self) -> bool {
        matches!(self, DerivedVariant::Thumbnail)
    }

    /// On-disk name of this variant for `filename`, e.g. `115x115-cat.jpg`.
    pub fn file_name(self, filename: &str) -> String {
        format!("{}x{}-{}", self.width(), self.height(), filename)
    }

    /// Map requested dimensions onto a variant.
    ///
    /// A missing height matches the proportional preview.
    pub fn from_dimensions(width: u32, height: Option<u32>) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.width() == width && height.unwrap_or(0) == v.height())
    }
}

/// Presence flags for derived variants of one object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DerivedAssets {
    pub thumbnail: bool,
    pub preview: bool,
}

impl DerivedAssets {
    pub fn contains(&self, variant: DerivedVariant) -> bool {
        match variant {
            DerivedVariant::Thumbnail => self.thumbnail,
            DerivedVariant::Preview => self.preview,
        }
    }

    pub fn insert(&mut self, variant: DerivedVariant) {
        match variant {
            DerivedVariant::Thumbnail => self.thumbnail = true,
            DerivedVariant::Preview => self.preview = true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.thumbnail && self.preview
    }
}

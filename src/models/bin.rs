//! Represents a bin: a named, expiring group of objects.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::object::Object;

/// Aggregated view of one bin, computed from live index entries.
///
/// Nothing here is persisted. `updated_at` and `expires_at` are derived on
/// every access so that a new upload resets the TTL and a changed TTL applies
/// retroactively to every existing bin.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct BinSummary {
    /// Bin id.
    pub bin: String,

    /// Sum of all object sizes.
    pub bytes: u64,

    /// Latest `created_at` among the bin's objects.
    pub updated_at: DateTime<Utc>,

    /// `updated_at` plus the configured TTL.
    pub expires_at: DateTime<Utc>,

    /// True when any object is an image.
    pub album: bool,

    /// Objects ordered by capture time (falling back to creation time).
    pub files: Vec<Object>,
}

impl BinSummary {
    /// Build a summary from objects given in insertion order.
    ///
    /// Returns `None` for an empty list: a bin without objects does not exist.
    pub fn from_objects(bin: &str, mut objects: Vec<Object>, ttl: Duration) -> Option<Self> {
        let updated_at = objects.iter().map(|o| o.created_at).max()?;
        let bytes = objects.iter().map(|o| o.bytes).sum();
        let album = objects.iter().any(Object::is_image);

        // stable: equal timestamps keep insertion order
        objects.sort_by_key(Object::sort_time);

        Some(Self {
            bin: bin.to_string(),
            bytes,
            updated_at,
            expires_at: updated_at + ttl,
            album,
            files: objects,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Totals across every bin, most recently updated bin first.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Overview {
    pub bytes: u64,
    pub files: usize,
    pub bins: Vec<BinSummary>,
}

impl Overview {
    pub fn from_bins(mut bins: Vec<BinSummary>) -> Self {
        bins.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Self {
            bytes: bins.iter().map(|b| b.bytes).sum(),
            files: bins.iter().map(|b| b.files.len()).sum(),
            bins,
        }
    }
}

//! Per-bin aggregates computed from the metadata index.

use super::{
    metadata_index::MetadataIndex,
    storage_service::{StorageError, StorageResult},
};
use crate::models::bin::{BinSummary, Overview};
use chrono::{DateTime, Duration, Utc};

/// Read-only view over the index that groups objects into bins.
///
/// Holds no state of its own besides the TTL: every call recomputes sizes,
/// update times and expiry from the entries live at that moment.
#[derive(Clone)]
pub struct BinView {
    index: MetadataIndex,
    ttl: Duration,
}

impl BinView {
    pub fn new(index: MetadataIndex, ttl: Duration) -> Self {
        Self { index, ttl }
    }

    /// Summary of one bin; BinNotFound when it holds no objects, even if
    /// its directory still exists.
    pub fn describe(&self, bin: &str) -> StorageResult<BinSummary> {
        BinSummary::from_objects(bin, self.index.list_by_bin(bin), self.ttl)
            .ok_or_else(|| StorageError::BinNotFound(bin.to_string()))
    }

    /// One summary per bin, most recently updated first.
    pub fn list(&self) -> Vec<BinSummary> {
        let mut bins: Vec<BinSummary> = self
            .index
            .snapshot_by_bin()
            .into_iter()
            .filter_map(|(bin, objects)| BinSummary::from_objects(&bin, objects, self.ttl))
            .collect();
        bins.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        bins
    }

    /// Totals and summaries for every bin.
    pub fn overview(&self) -> Overview {
        Overview::from_bins(self.list())
    }

    /// Expiry of a bin without building the full summary.
    pub fn expires_at(&self, bin: &str) -> Option<DateTime<Utc>> {
        self.index.last_update(bin).map(|updated| updated + self.ttl)
    }

    /// Fail with BinExpired when the bin's TTL has run out at `now`.
    pub fn ensure_live(&self, bin: &str, now: DateTime<Utc>) -> StorageResult<()> {
        match self.expires_at(bin) {
            Some(expires_at) if now >= expires_at => Err(StorageError::BinExpired(bin.to_string())),
            _ => Ok(()),
        }
    }
}

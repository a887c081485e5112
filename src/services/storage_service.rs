//! src/services/storage_service.rs
//!
//! StorageService: the single entry point HTTP handlers talk to. Combines the
//! on-disk ObjectStore, the in-memory MetadataIndex, the bin view, the
//! archive builder and the derived-asset queue, and keeps the index in step
//! with every mutation it performs on disk.

use super::{
    archive::{ArchiveEntry, ArchiveFormat, ArchivePlan},
    bin_view::BinView,
    derived_assets::{EnqueueOutcome, JobQueue},
    metadata_index::MetadataIndex,
    naming,
    object_store::ObjectStore,
    triggers::{TriggerEvent, Triggers},
};
use crate::models::{
    bin::{BinSummary, Overview},
    derived::DerivedVariant,
    object::Object,
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::io;
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bin `{bin}` invalid: {reason}")]
    InvalidBin { bin: String, reason: String },
    #[error("filename `{0}` is invalid")]
    InvalidFilename(String),
    #[error("upload is empty")]
    EmptyUpload,
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("bin `{0}` not found")]
    BinNotFound(String),
    #[error("file `{filename}` not found in bin `{bin}`")]
    ObjectNotFound { bin: String, filename: String },
    #[error("bin `{0}` has expired")]
    BinExpired(String),
    #[error("archive format `{0}` is not supported")]
    UnsupportedFormat(String),
    #[error("storage root unusable: {0}")]
    InvalidRoot(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the bin operations:
/// - Ingest an object (streams to disk, records it in the index, queues
///   derived assets for images)
/// - Fetch an object or one of its derived variants
/// - Describe, list and delete bins
/// - Stream a bin as a tar or zip archive
///
/// Reads are answered from the index; the filesystem is only touched for
/// payload bytes. Clones share the same index and queue.
#[derive(Clone)]
pub struct StorageService {
    store: ObjectStore,
    index: MetadataIndex,
    bins: BinView,
    jobs: JobQueue,
    triggers: Triggers,
    /// Public base URL used when rendering links.
    base_url: String,
}

impl StorageService {
    pub fn new(
        store: ObjectStore,
        index: MetadataIndex,
        jobs: JobQueue,
        ttl: chrono::Duration,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            bins: BinView::new(index.clone(), ttl),
            store,
            index,
            jobs,
            triggers: Triggers::default(),
            base_url: base_url.into(),
        }
    }

    /// Run `triggers` on bin events.
    pub fn with_triggers(mut self, triggers: Triggers) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn index(&self) -> &MetadataIndex {
        &self.index
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stream an upload into `bin` under a sanitised `filename`.
    ///
    /// An empty name after sanitising is replaced by a generated one. The
    /// object is visible to readers as soon as this returns; derived assets
    /// follow asynchronously.
    pub async fn ingest_object<S>(
        &self,
        bin: &str,
        filename: &str,
        expected_checksum: Option<&str>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        naming::ensure_bin_id_valid(bin)?;
        let mut filename = naming::sanitize_filename(filename);
        if filename.is_empty() {
            filename = naming::generate_id();
            debug!(bin, filename = %filename, "generated filename for upload");
        }

        let new_bin = self.index.last_update(bin).is_none();
        let object = self
            .store
            .ingest(bin, &filename, expected_checksum, stream)
            .await?;
        let replaced = self.index.put(object.clone());
        self.triggers.bin_revived(bin);

        info!(
            bin,
            filename = %object.filename,
            bytes = object.bytes,
            checksum = %object.checksum,
            mime = %object.mime,
            replaced = replaced.is_some(),
            "Object stored"
        );

        if new_bin && replaced.is_none() {
            self.triggers.fire(TriggerEvent::NewBin { bin });
        }
        self.triggers.fire(TriggerEvent::UploadedFile {
            bin,
            filename: &object.filename,
        });

        if object.is_image() {
            self.enqueue_derived_asset_job(bin, &object.filename);
        }
        Ok(object)
    }

    /// Metadata plus an open handle for streaming the payload.
    pub async fn fetch_object(&self, bin: &str, filename: &str) -> StorageResult<(Object, File)> {
        let object = self.live_object(bin, filename)?;
        let file = self.store.open_object(bin, filename).await?;
        Ok((object, file))
    }

    /// Open a derived variant of an object.
    ///
    /// Fails with ObjectNotFound until the pipeline has produced it.
    pub async fn fetch_derived_asset(
        &self,
        bin: &str,
        filename: &str,
        variant: DerivedVariant,
    ) -> StorageResult<(Object, File)> {
        let object = self.live_object(bin, filename)?;
        if !object.has_derived(variant) {
            return Err(object_not_found(bin, filename));
        }
        let file = self.store.open_derived(bin, filename, variant).await?;
        Ok((object, file))
    }

    /// Remove one object. Allowed on expired bins.
    pub async fn delete_object(&self, bin: &str, filename: &str) -> StorageResult<Object> {
        naming::ensure_bin_id_valid(bin)?;
        naming::ensure_filename_valid(filename)?;

        match self.store.remove(bin, filename).await {
            Ok(()) => {}
            Err(err @ StorageError::ObjectNotFound { .. }) => {
                // gone from disk behind our back; stop advertising it
                self.index.delete(bin, filename);
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        let object = self
            .index
            .delete(bin, filename)
            .ok_or_else(|| object_not_found(bin, filename))?;
        info!(bin, filename, "Object deleted");
        Ok(object)
    }

    pub fn describe_bin(&self, bin: &str) -> StorageResult<BinSummary> {
        naming::ensure_bin_id_valid(bin)?;
        let summary = self.bins.describe(bin)?;
        if summary.is_expired(Utc::now()) {
            return Err(self.expired(bin));
        }
        Ok(summary)
    }

    /// Every bin with totals, most recently updated first. Expired bins are
    /// included; they are only hidden from per-bin reads.
    pub fn list_bins(&self) -> Overview {
        self.bins.overview()
    }

    /// Remove a bin and everything in it. Allowed on expired bins.
    pub async fn delete_bin(&self, bin: &str) -> StorageResult<usize> {
        naming::ensure_bin_id_valid(bin)?;
        self.store.remove_bin(bin).await?;
        let removed = self.index.delete_bin(bin);
        self.triggers.bin_revived(bin);
        info!(bin, objects = removed, "Bin deleted");
        Ok(removed)
    }

    /// Validate an archive request and snapshot the bin's files.
    ///
    /// Everything that can fail before the first archive byte is written
    /// fails here.
    pub fn prepare_archive(&self, bin: &str, format: &str) -> StorageResult<ArchivePlan> {
        let format: ArchiveFormat = format.parse()?;
        let summary = self.describe_bin(bin)?;

        let entries = summary
            .files
            .into_iter()
            .map(|object| ArchiveEntry {
                path: self.store.object_path(bin, &object.filename),
                name: object.filename,
            })
            .collect();

        Ok(ArchivePlan {
            bin: bin.to_string(),
            format,
            entries,
        })
    }

    /// Queue derived-asset generation for an object. Never blocks.
    pub fn enqueue_derived_asset_job(&self, bin: &str, filename: &str) -> EnqueueOutcome {
        let outcome = self.jobs.enqueue(bin, filename);
        debug!(bin, filename, ?outcome, "derived asset job submitted");
        outcome
    }

    /// Queue every indexed image that is missing a variant.
    ///
    /// Returns how many jobs were accepted.
    pub fn backfill_derived_assets(&self) -> usize {
        let mut queued = 0;
        for object in self.index.snapshot_by_bin().into_values().flatten() {
            if !object.is_image() || object.derived.is_complete() {
                continue;
            }
            if self.enqueue_derived_asset_job(&object.bin, &object.filename)
                == EnqueueOutcome::Queued
            {
                queued += 1;
            }
        }
        info!(queued, "Derived asset backfill submitted");
        queued
    }

    /// Look up an object in a bin that has not expired.
    fn live_object(&self, bin: &str, filename: &str) -> StorageResult<Object> {
        naming::ensure_bin_id_valid(bin)?;
        naming::ensure_filename_valid(filename)?;
        self.bins
            .ensure_live(bin, Utc::now())
            .map_err(|err| match err {
                StorageError::BinExpired(_) => self.expired(bin),
                err => err,
            })?;
        self.index
            .get(bin, filename)
            .ok_or_else(|| object_not_found(bin, filename))
    }

    /// The error for an expired bin. Reports the expiry the first time.
    fn expired(&self, bin: &str) -> StorageError {
        if self.triggers.bin_expired(bin).is_some() {
            info!(bin, "Bin expired");
        }
        StorageError::BinExpired(bin.to_string())
    }
}

fn object_not_found(bin: &str, filename: &str) -> StorageError {
    StorageError::ObjectNotFound {
        bin: bin.to_string(),
        filename: filename.to_string(),
    }
}

//! Background generation of resized image variants.
//!
//! Uploads enqueue a job per image; a fixed pool of workers drains the queue,
//! writes every [`DerivedVariant`] into the bin's `.cache` directory and then
//! refreshes the object's index entry so the new variants become linkable.
//! The pipeline is best-effort: failures are logged and the job is dropped.

use super::{
    metadata_index::{MetadataIndex, ObjectKey},
    object_store::ObjectStore,
    storage_service::StorageError,
};
use crate::models::derived::{DerivedAssets, DerivedVariant};
use image::{DynamicImage, ImageFormat, ImageReader, imageops::FilterType};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    io::{self, Cursor},
    path::Path,
    sync::Arc,
    time::Instant,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DerivedAssetError {
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("unrecognised image format")]
    UnknownFormat,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A request to derive variants for one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedAssetJob {
    pub bin: String,
    pub filename: String,
}

/// What happened to an enqueue request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The same object is already queued, or is being processed and will be
    /// processed once more afterwards.
    AlreadyPending,
    /// The queue is full; the job was dropped.
    QueueFull,
    /// The workers have shut down.
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobState {
    Queued,
    /// `rerun` is set when the object was re-uploaded during processing.
    Running { rerun: bool },
}

/// Objects with a job queued or running.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashMap<ObjectKey, JobState>>>);

impl InFlight {
    /// Returns `true` when a new job must be sent for `key`.
    fn claim(&self, key: &ObjectKey) -> bool {
        let mut jobs = self.0.lock();
        match jobs.get_mut(key) {
            None => {
                jobs.insert(key.clone(), JobState::Queued);
                true
            }
            Some(JobState::Queued) => false,
            Some(JobState::Running { rerun }) => {
                *rerun = true;
                false
            }
        }
    }

    fn release(&self, key: &ObjectKey) {
        self.0.lock().remove(key);
    }

    fn start(&self, key: &ObjectKey) {
        self.0
            .lock()
            .insert(key.clone(), JobState::Running { rerun: false });
    }

    /// Returns `true` when the job has to run again.
    fn finish(&self, key: &ObjectKey) -> bool {
        let mut jobs = self.0.lock();
        match jobs.get_mut(key) {
            Some(JobState::Running { rerun }) if *rerun => {
                *rerun = false;
                true
            }
            _ => {
                jobs.remove(key);
                false
            }
        }
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// Producer side of the pipeline. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<DerivedAssetJob>,
    in_flight: InFlight,
}

impl JobQueue {
    /// Enqueue a job without waiting.
    ///
    /// A request for an object that is still queued is folded into the queued
    /// job. A request for an object being processed makes the worker process
    /// it again once it is done. When the queue is full the job is dropped.
    pub fn enqueue(&self, bin: &str, filename: &str) -> EnqueueOutcome {
        let key = ObjectKey::new(bin, filename);
        if !self.in_flight.claim(&key) {
            debug!(bin, filename, "derived asset job already pending");
            return EnqueueOutcome::AlreadyPending;
        }

        let job = DerivedAssetJob {
            bin: key.bin.clone(),
            filename: key.filename.clone(),
        };
        match self.tx.try_send(job) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(err) => {
                self.in_flight.release(&key);
                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!(bin, filename, "derived asset queue full, dropping job");
                        EnqueueOutcome::QueueFull
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        warn!(bin, filename, "derived asset workers stopped, dropping job");
                        EnqueueOutcome::Closed
                    }
                }
            }
        }
    }

    /// Jobs waiting in the queue (excludes jobs being processed).
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Jobs queued or being processed.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// True once every worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Variants written for one version of an object.
#[derive(Debug)]
pub struct RenderedVariants {
    /// SHA-256 of the bytes that were decoded.
    pub source_checksum: String,
}

/// Consumer side: turns jobs into files under `.cache`.
#[derive(Clone)]
pub struct DerivedAssetPipeline {
    store: ObjectStore,
    index: MetadataIndex,
}

impl DerivedAssetPipeline {
    pub fn new(store: ObjectStore, index: MetadataIndex) -> Self {
        Self { store, index }
    }

    /// Start `workers` worker tasks sharing one queue of `capacity` jobs.
    ///
    /// Workers exit once every [`JobQueue`] clone has been dropped and the
    /// queue is drained.
    pub fn spawn(self, workers: usize, capacity: usize) -> (JobQueue, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let in_flight = InFlight::default();

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let pipeline = self.clone();
                let rx = rx.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move { pipeline.run_worker(worker_id, rx, in_flight).await })
            })
            .collect();

        info!(workers, capacity, "Derived asset pipeline started");
        (JobQueue { tx, in_flight }, handles)
    }

    async fn run_worker(
        &self,
        worker_id: usize,
        rx: Arc<AsyncMutex<mpsc::Receiver<DerivedAssetJob>>>,
        in_flight: InFlight,
    ) {
        loop {
            // the guard is released as soon as one job is taken
            let job = rx.lock().await.recv().await;
            let Some(job) = job else {
                break;
            };

            let key = ObjectKey::new(&job.bin, &job.filename);
            in_flight.start(&key);
            loop {
                self.run_job(worker_id, &job).await;
                if !in_flight.finish(&key) {
                    break;
                }
                debug!(
                    worker_id,
                    bin = %job.bin,
                    filename = %job.filename,
                    "Derived asset job repeated for replaced object"
                );
            }
        }
        debug!(worker_id, "Derived asset worker stopped");
    }

    async fn run_job(&self, worker_id: usize, job: &DerivedAssetJob) {
        let started = Instant::now();
        match self.process(job).await {
            Ok(Some(assets)) => info!(
                worker_id,
                bin = %job.bin,
                filename = %job.filename,
                thumbnail = assets.thumbnail,
                preview = assets.preview,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Derived asset job completed"
            ),
            Ok(None) => debug!(
                worker_id,
                bin = %job.bin,
                filename = %job.filename,
                "Derived asset job skipped"
            ),
            Err(err) => error!(
                worker_id,
                bin = %job.bin,
                filename = %job.filename,
                error = %err,
                "Derived asset job failed"
            ),
        }
    }

    /// Run one job to completion.
    ///
    /// Returns `Ok(None)` when there is nothing to do: the object is gone, is
    /// not an image, or was replaced while its variants were rendered. On
    /// success the index entry has been refreshed.
    pub async fn process(
        &self,
        job: &DerivedAssetJob,
    ) -> Result<Option<DerivedAssets>, DerivedAssetError> {
        match self.render(job).await? {
            Some(rendered) => self.commit(job, rendered).await,
            None => Ok(None),
        }
    }

    /// Write every variant of the object's current bytes into `.cache`.
    pub async fn render(
        &self,
        job: &DerivedAssetJob,
    ) -> Result<Option<RenderedVariants>, DerivedAssetError> {
        let Some(object) = self.index.get(&job.bin, &job.filename) else {
            return Ok(None);
        };
        if !object.is_image() {
            return Ok(None);
        }

        let source = self.store.object_path(&job.bin, &job.filename);
        let cache_dir = self.store.ensure_cache_dir(&job.bin)?;
        let filename = job.filename.clone();
        let source_checksum = tokio::task::spawn_blocking(move || {
            render_variants(&source, &cache_dir, &filename, &DerivedVariant::ALL)
        })
        .await??;

        Ok(Some(RenderedVariants { source_checksum }))
    }

    /// Record rendered variants in the index, provided the object still has
    /// the bytes they were rendered from. Otherwise the variants are removed.
    pub async fn commit(
        &self,
        job: &DerivedAssetJob,
        rendered: RenderedVariants,
    ) -> Result<Option<DerivedAssets>, DerivedAssetError> {
        // re-read from disk so the entry reflects exactly what is there now
        let refreshed = match self.store.probe(&job.bin, &job.filename).await {
            Ok(object) => object,
            Err(StorageError::ObjectNotFound { .. }) => {
                self.store.remove_derived(&job.bin, &job.filename).await;
                debug!(bin = %job.bin, filename = %job.filename, "object removed while deriving assets");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        if refreshed.checksum != rendered.source_checksum {
            self.store.remove_derived(&job.bin, &job.filename).await;
            debug!(bin = %job.bin, filename = %job.filename, "object replaced while deriving assets");
            return Ok(None);
        }

        let assets = refreshed.derived;
        if !self.index.refresh(refreshed) {
            debug!(bin = %job.bin, filename = %job.filename, "index entry changed while deriving assets");
            return Ok(None);
        }

        Ok(Some(assets))
    }
}

/// Decode `source` once and write each variant into `cache_dir`.
///
/// Returns the SHA-256 of the decoded bytes.
fn render_variants(
    source: &Path,
    cache_dir: &Path,
    filename: &str,
    variants: &[DerivedVariant],
) -> Result<String, DerivedAssetError> {
    let data = std::fs::read(source)?;
    let checksum = hex::encode(Sha256::digest(&data));
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    let format = reader.format().ok_or(DerivedAssetError::UnknownFormat)?;
    let image = reader.decode()?;

    for &variant in variants {
        let resized = resize(&image, variant);
        let encodable = match format {
            // jpeg has no alpha channel
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
            _ => resized,
        };

        // write then rename, so a reader never sees a partial file
        let dst = cache_dir.join(variant.file_name(filename));
        let staging = cache_dir.join(format!(".staging-{}", Uuid::new_v4()));
        if let Err(err) = encodable.save_with_format(&staging, format) {
            let _ = std::fs::remove_file(&staging);
            return Err(err.into());
        }
        if let Err(err) = std::fs::rename(&staging, &dst) {
            let _ = std::fs::remove_file(&staging);
            return Err(err.into());
        }
    }
    Ok(checksum)
}

fn resize(image: &DynamicImage, variant: DerivedVariant) -> DynamicImage {
    let width = variant.width();
    if variant.crop() {
        return image.resize_to_fill(width, variant.height(), FilterType::Lanczos3);
    }

    let height = match variant.height() {
        0 => proportional_height(image.width(), image.height(), width),
        h => h,
    };
    image.resize_exact(width, height, FilterType::Lanczos3)
}

fn proportional_height(src_width: u32, src_height: u32, width: u32) -> u32 {
    if src_width == 0 {
        return 1;
    }
    let height = (u64::from(src_height) * u64::from(width) + u64::from(src_width) / 2)
        / u64::from(src_width);
    height.clamp(1, u64::from(u32::MAX)) as u32
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::object_store::tests::{CONTENT, body, new_store};
    use bytes::Bytes;
    use futures::stream;
    use image::{ImageBuffer, Rgb};
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    async fn ingest_png(store: &ObjectStore, index: &MetadataIndex, bin: &str, name: &str) {
        ingest_png_sized(store, index, bin, name, 300, 200).await;
    }

    async fn ingest_png_sized(
        store: &ObjectStore,
        index: &MetadataIndex,
        bin: &str,
        name: &str,
        width: u32,
        height: u32,
    ) {
        let data = Bytes::from(png_bytes(width, height));
        let object = store
            .ingest(bin, name, None, stream::iter(vec![Ok(data)]))
            .await
            .unwrap();
        assert_eq!(object.mime, "image/png");
        index.put(object);
    }

    #[test]
    fn proportional_heights() {
        assert_eq!(proportional_height(300, 200, 1140), 760);
        assert_eq!(proportional_height(4000, 1, 1140), 1);
        assert_eq!(proportional_height(0, 10, 1140), 1);
    }

    #[tokio::test]
    async fn process_writes_variants_and_refreshes_index() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);
        let index = MetadataIndex::new();
        ingest_png(&store, &index, "testbin1", "pic.png").await;

        let pipeline = DerivedAssetPipeline::new(store.clone(), index.clone());
        let job = DerivedAssetJob {
            bin: "testbin1".into(),
            filename: "pic.png".into(),
        };
        let assets = pipeline.process(&job).await.unwrap().unwrap();
        assert!(assets.is_complete());
        assert!(index.get("testbin1", "pic.png").unwrap().derived.is_complete());

        let thumb = image::open(store.derived_path("testbin1", "pic.png", DerivedVariant::Thumbnail))
            .unwrap();
        assert_eq!((thumb.width(), thumb.height()), (115, 115));
        let preview = image::open(store.derived_path("testbin1", "pic.png", DerivedVariant::Preview))
            .unwrap();
        assert_eq!((preview.width(), preview.height()), (1140, 760));

        // regenerating yields identical bytes
        let first = std::fs::read(store.derived_path("testbin1", "pic.png", DerivedVariant::Thumbnail))
            .unwrap();
        pipeline.process(&job).await.unwrap();
        let second = std::fs::read(store.derived_path("testbin1", "pic.png", DerivedVariant::Thumbnail))
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn non_images_and_missing_objects_are_skipped() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);
        let index = MetadataIndex::new();
        let object = store
            .ingest("testbin1", "notes", None, body(&[CONTENT]))
            .await
            .unwrap();
        index.put(object);

        let pipeline = DerivedAssetPipeline::new(store, index);
        let notes = DerivedAssetJob {
            bin: "testbin1".into(),
            filename: "notes".into(),
        };
        let missing = DerivedAssetJob {
            bin: "testbin1".into(),
            filename: "missing".into(),
        };
        assert!(pipeline.process(&notes).await.unwrap().is_none());
        assert!(pipeline.process(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_image_fails_without_marking_index() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);
        let index = MetadataIndex::new();
        // valid PNG signature, garbage afterwards
        let mut data = png_bytes(10, 10);
        data.truncate(40);
        let object = store
            .ingest("testbin1", "broken.png", None, stream::iter(vec![Ok(Bytes::from(data))]))
            .await
            .unwrap();
        index.put(object);

        let pipeline = DerivedAssetPipeline::new(store, index.clone());
        let job = DerivedAssetJob {
            bin: "testbin1".into(),
            filename: "broken.png".into(),
        };
        assert!(pipeline.process(&job).await.is_err());
        assert!(!index.get("testbin1", "broken.png").unwrap().derived.thumbnail);
    }

    #[tokio::test]
    async fn workers_drain_queue_and_deduplicate() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);
        let index = MetadataIndex::new();
        ingest_png(&store, &index, "testbin1", "a.png").await;
        ingest_png(&store, &index, "testbin1", "b.png").await;

        let (queue, handles) =
            DerivedAssetPipeline::new(store.clone(), index.clone()).spawn(2, 8);

        assert_eq!(queue.enqueue("testbin1", "a.png"), EnqueueOutcome::Queued);
        assert_eq!(
            queue.enqueue("testbin1", "a.png"),
            EnqueueOutcome::AlreadyPending
        );
        assert_eq!(queue.enqueue("testbin1", "b.png"), EnqueueOutcome::Queued);

        let deadline = Instant::now() + Duration::from_secs(30);
        while queue.pending() > 0 {
            assert!(Instant::now() < deadline, "derived asset jobs did not finish");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for name in ["a.png", "b.png"] {
            assert!(index.get("testbin1", name).unwrap().derived.is_complete());
        }

        drop(queue);
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[test]
    fn full_queue_drops_jobs() {
        // no workers are reading from this queue
        let (tx, rx) = mpsc::channel(1);
        let queue = JobQueue {
            tx,
            in_flight: InFlight::default(),
        };

        assert_eq!(queue.enqueue("testbin1", "a"), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue("testbin1", "b"), EnqueueOutcome::QueueFull);
        assert_eq!(queue.queued(), 1);
        assert_eq!(queue.pending(), 1);

        drop(rx);
        assert!(queue.is_closed());
        assert_eq!(queue.enqueue("testbin1", "c"), EnqueueOutcome::Closed);
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn reupload_during_render_discards_stale_variants() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);
        let index = MetadataIndex::new();
        ingest_png(&store, &index, "testbin1", "pic.png").await;

        let pipeline = DerivedAssetPipeline::new(store.clone(), index.clone());
        let job = DerivedAssetJob {
            bin: "testbin1".into(),
            filename: "pic.png".into(),
        };
        let rendered = pipeline.render(&job).await.unwrap().unwrap();

        // replaced by a taller image before the variants are recorded
        ingest_png_sized(&store, &index, "testbin1", "pic.png", 300, 600).await;
        assert!(pipeline.commit(&job, rendered).await.unwrap().is_none());

        let current = index.get("testbin1", "pic.png").unwrap();
        assert!(!current.derived.thumbnail);
        assert!(!current.derived.preview);
        for variant in DerivedVariant::ALL {
            assert!(!store.derived_path("testbin1", "pic.png", variant).exists());
        }

        // the repeated job renders the new bytes
        assert!(pipeline.process(&job).await.unwrap().unwrap().is_complete());
        let preview = image::open(store.derived_path("testbin1", "pic.png", DerivedVariant::Preview))
            .unwrap();
        assert_eq!((preview.width(), preview.height()), (1140, 2280));
    }

    #[test]
    fn enqueue_while_running_repeats_job() {
        let (tx, _rx) = mpsc::channel(4);
        let queue = JobQueue {
            tx,
            in_flight: InFlight::default(),
        };
        let key = ObjectKey::new("testbin1", "pic.png");

        assert_eq!(queue.enqueue("testbin1", "pic.png"), EnqueueOutcome::Queued);
        // still queued: folded into the queued job
        assert_eq!(
            queue.enqueue("testbin1", "pic.png"),
            EnqueueOutcome::AlreadyPending
        );
        queue.in_flight.start(&key);
        assert!(!queue.in_flight.finish(&key));
        assert_eq!(queue.pending(), 0);

        assert_eq!(queue.enqueue("testbin1", "pic.png"), EnqueueOutcome::Queued);
        queue.in_flight.start(&key);
        // re-upload while the worker is busy with the old bytes
        assert_eq!(
            queue.enqueue("testbin1", "pic.png"),
            EnqueueOutcome::AlreadyPending
        );
        assert!(queue.in_flight.finish(&key));
        assert_eq!(queue.pending(), 1);
        assert!(!queue.in_flight.finish(&key));
        assert_eq!(queue.pending(), 0);
    }
}

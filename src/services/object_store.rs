//! src/services/object_store.rs
//!
//! ObjectStore: raw filesystem primitives for bins and objects. Payloads live
//! at `{root}/{bin}/{filename}`, derived assets at
//! `{root}/{bin}/.cache/{width}x{height}-{filename}`. This layer knows nothing
//! about the in-memory index; callers decide what to record.

use super::{
    capture,
    naming,
    storage_service::{StorageError, StorageResult},
};
use crate::models::{
    derived::{CACHE_DIR, DerivedAssets, DerivedVariant},
    object::{CHECKSUM_ALGORITHM, Object},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use sha2::{Digest, Sha256};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Number of leading bytes inspected for content-type detection.
const SNIFF_LEN: usize = 512;
const FALLBACK_MIME: &str = "application/octet-stream";
const READ_BUF_LEN: usize = 64 * 1024;

/// Bytes, digest and leading bytes of a fully written payload.
struct Digested {
    bytes: u64,
    checksum: String,
    head: Vec<u8>,
}

/// Filesystem-backed store for object payloads.
///
/// Cheap to clone; holds only paths. Correctness under concurrency relies on
/// filesystem atomicity of `link` and `rename`, not on in-process locks.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    /// Directory holding one sub-directory per bin.
    root: PathBuf,

    /// Scratch directory for in-progress uploads.
    temp_dir: PathBuf,
}

impl ObjectStore {
    /// Open a store rooted at `root`.
    ///
    /// Fails fast when the root is missing or is not a directory. The scratch
    /// directory is created if needed.
    pub fn open(root: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        let temp_dir = temp_dir.into();

        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StorageError::InvalidRoot(format!(
                    "path is not a directory: {}",
                    root.display()
                )));
            }
            Err(err) => {
                return Err(StorageError::InvalidRoot(format!(
                    "{}: {}",
                    root.display(),
                    err
                )));
            }
        }

        std::fs::create_dir_all(&temp_dir)?;

        Ok(Self { root, temp_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    fn bin_root(&self, bin: &str) -> PathBuf {
        self.root.join(bin)
    }

    /// Path of an object payload. Does not check for existence.
    pub fn object_path(&self, bin: &str, filename: &str) -> PathBuf {
        self.bin_root(bin).join(filename)
    }

    fn cache_dir(&self, bin: &str) -> PathBuf {
        self.bin_root(bin).join(CACHE_DIR)
    }

    /// Path of a derived asset. Does not check for existence.
    pub fn derived_path(&self, bin: &str, filename: &str, variant: DerivedVariant) -> PathBuf {
        self.cache_dir(bin).join(variant.file_name(filename))
    }

    /// Create the bin's derived-asset directory if needed and return it.
    pub fn ensure_cache_dir(&self, bin: &str) -> io::Result<PathBuf> {
        let dir = self.cache_dir(bin);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Stream an upload into the store.
    ///
    /// - Writes bytes incrementally to a temporary file in the scratch dir.
    /// - Computes the SHA-256 and captures the leading bytes while streaming.
    /// - Flushes and fsyncs before anything becomes visible.
    /// - Rejects empty uploads and, when given, checksum mismatches.
    /// - Publishes under the final name atomically (see [`publish`]).
    ///
    /// The temporary file is removed on every path out of this function.
    pub async fn ingest<S>(
        &self,
        bin: &str,
        filename: &str,
        expected_checksum: Option<&str>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let tmp_path = self.temp_dir.join(format!("upload-{}", Uuid::new_v4()));

        let digested = match write_temp(&tmp_path, stream).await {
            Ok(digested) => digested,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        };
        debug!(bin, filename, bytes = digested.bytes, "upload spooled to {}", tmp_path.display());

        if digested.bytes == 0 {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::EmptyUpload);
        }

        if let Some(expected) = expected_checksum {
            if !expected.eq_ignore_ascii_case(&digested.checksum) {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual: digested.checksum,
                });
            }
        }

        let file_path = self.object_path(bin, filename);
        let published = async {
            fs::create_dir_all(self.bin_root(bin)).await?;
            publish(&tmp_path, &file_path).await
        }
        .await;
        // the temp file is ours to clean up either way
        if let Err(err) = fs::remove_file(&tmp_path).await {
            warn!("failed to remove temp file {}: {}", tmp_path.display(), err);
        }
        published?;

        // derived assets of a replaced object are stale now
        self.remove_derived(bin, filename).await;

        let mime = sniff_mime(&digested.head);
        self.describe_published(bin, filename, digested.bytes, digested.checksum, mime)
            .await
    }

    /// Open an object for sequential reading. The caller owns the handle.
    pub async fn open_object(&self, bin: &str, filename: &str) -> StorageResult<File> {
        File::open(self.object_path(bin, filename))
            .await
            .map_err(|err| not_found_or_io(err, bin, filename))
    }

    /// Open a derived asset for reading.
    pub async fn open_derived(
        &self,
        bin: &str,
        filename: &str,
        variant: DerivedVariant,
    ) -> StorageResult<File> {
        File::open(self.derived_path(bin, filename, variant))
            .await
            .map_err(|err| not_found_or_io(err, bin, filename))
    }

    /// Remove one object and, best-effort, its derived assets.
    ///
    /// Directories are never objects: removing one fails with ObjectNotFound.
    pub async fn remove(&self, bin: &str, filename: &str) -> StorageResult<()> {
        let path = self.object_path(bin, filename);
        match fs::symlink_metadata(&path).await {
            Ok(meta) if !meta.is_dir() => {}
            Ok(_) => return Err(object_not_found(bin, filename)),
            Err(err) => return Err(not_found_or_io(err, bin, filename)),
        }

        fs::remove_file(&path).await?;
        debug!("removed physical file {}", path.display());

        self.remove_derived(bin, filename).await;
        Ok(())
    }

    /// Recursively delete a bin directory.
    pub async fn remove_bin(&self, bin: &str) -> StorageResult<()> {
        let path = self.bin_root(bin);
        match fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(StorageError::BinNotFound(bin.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::BinNotFound(bin.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        fs::remove_dir_all(&path).await?;
        debug!("removed bin directory {}", path.display());
        Ok(())
    }

    /// Read the full metadata of an already published object from disk.
    ///
    /// Hashes the whole file, so cost is proportional to its size.
    pub async fn probe(&self, bin: &str, filename: &str) -> StorageResult<Object> {
        let path = self.object_path(bin, filename);
        match fs::symlink_metadata(&path).await {
            Ok(meta) if !meta.is_dir() => {}
            Ok(_) => return Err(object_not_found(bin, filename)),
            Err(err) => return Err(not_found_or_io(err, bin, filename)),
        }

        let file = File::open(&path)
            .await
            .map_err(|err| not_found_or_io(err, bin, filename))?;
        let digested = digest_reader(file).await?;
        let mime = sniff_mime(&digested.head);

        self.describe_published(bin, filename, digested.bytes, digested.checksum, mime)
            .await
    }

    /// Names of every bin directory under the root.
    ///
    /// Plain files and directories that are not valid bin ids (such as a
    /// scratch directory placed inside the root) are skipped.
    pub async fn list_bins(&self) -> StorageResult<Vec<String>> {
        let mut bins = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if naming::ensure_bin_id_valid(&name).is_err() {
                debug!("skipping non-bin directory {}", entry.path().display());
                continue;
            }
            bins.push(name);
        }
        bins.sort();
        Ok(bins)
    }

    /// Names of every object in a bin.
    ///
    /// Sub-directories (the derived-asset cache) and hidden staging files
    /// are never objects.
    pub async fn list_objects(&self, bin: &str) -> StorageResult<Vec<String>> {
        let mut entries = match fs::read_dir(self.bin_root(bin)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::BinNotFound(bin.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Attributes that come from the published file itself: mtime, EXIF and
    /// which derived variants are present.
    async fn describe_published(
        &self,
        bin: &str,
        filename: &str,
        bytes: u64,
        checksum: String,
        mime: String,
    ) -> StorageResult<Object> {
        let path = self.object_path(bin, filename);
        let modified = fs::metadata(&path).await?.modified()?;

        let mut object = Object {
            bin: bin.to_string(),
            filename: filename.to_string(),
            bytes,
            checksum,
            algorithm: CHECKSUM_ALGORITHM.to_string(),
            mime,
            created_at: DateTime::<Utc>::from(modified),
            captured_at: None,
            latitude: None,
            longitude: None,
            derived: self.derived_presence(bin, filename).await,
        };

        if object.is_image() {
            let info = tokio::task::spawn_blocking(move || capture::read_capture_info(&path))
                .await
                .map_err(io::Error::other)?;
            object.captured_at = info.taken_at;
            object.latitude = info.latitude;
            object.longitude = info.longitude;
        }

        Ok(object)
    }

    async fn derived_presence(&self, bin: &str, filename: &str) -> DerivedAssets {
        let mut assets = DerivedAssets::default();
        for variant in DerivedVariant::ALL {
            let path = self.derived_path(bin, filename, variant);
            if fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                assets.insert(variant);
            }
        }
        assets
    }

    /// Best-effort removal of every derived asset of an object.
    pub async fn remove_derived(&self, bin: &str, filename: &str) {
        for variant in DerivedVariant::ALL {
            let path = self.derived_path(bin, filename, variant);
            match fs::remove_file(&path).await {
                Ok(_) => debug!("removed derived asset {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!("failed to remove derived asset {}: {}", path.display(), err),
            }
        }
    }
}

/// Spool `stream` into a new file at `path`, hashing as it goes.
async fn write_temp<S>(path: &Path, stream: S) -> io::Result<Digested>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut file = File::create(path).await?;
    let mut hasher = Sha256::new();
    let mut head = Vec::with_capacity(SNIFF_LEN);
    let mut bytes: u64 = 0;

    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        bytes += chunk.len() as u64;
        hasher.update(&chunk);
        capture_head(&mut head, &chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok(Digested {
        bytes,
        checksum: hex::encode(hasher.finalize()),
        head,
    })
}

/// Hash everything readable from `file`.
async fn digest_reader(mut file: File) -> io::Result<Digested> {
    let mut hasher = Sha256::new();
    let mut head = Vec::with_capacity(SNIFF_LEN);
    let mut bytes: u64 = 0;
    let mut buf = vec![0u8; READ_BUF_LEN];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        bytes += n as u64;
        hasher.update(&buf[..n]);
        capture_head(&mut head, &buf[..n]);
    }

    Ok(Digested {
        bytes,
        checksum: hex::encode(hasher.finalize()),
        head,
    })
}

fn capture_head(head: &mut Vec<u8>, chunk: &[u8]) {
    let wanted = SNIFF_LEN.saturating_sub(head.len());
    head.extend_from_slice(&chunk[..wanted.min(chunk.len())]);
}

/// Detect a content type from the leading bytes of a payload.
///
/// Known signatures (markup included) win over plain text. The sniff window
/// is always `SNIFF_LEN` bytes, zero-padded, so payloads shorter than the
/// window never count as plain text.
pub fn sniff_mime(head: &[u8]) -> String {
    let head = &head[..head.len().min(SNIFF_LEN)];
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }
    if head.len() == SNIFF_LEN && head.iter().all(|&b| !is_binary_byte(b)) {
        return "text/plain; charset=utf-8".to_string();
    }
    FALLBACK_MIME.to_string()
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

/// Make a fully written temp file visible under `dst`.
///
/// The temp file is hard-linked into the destination directory under a
/// hidden staging name, or copied and fsynced there when linking fails
/// (e.g. across filesystems). The staging file is then renamed over `dst`,
/// so readers see either the previous object or the complete new one.
///
/// Leaves `tmp` in place; removing it is the caller's job.
async fn publish(tmp: &Path, dst: &Path) -> io::Result<()> {
    let parent = dst
        .parent()
        .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
    let staging = parent.join(format!(".staging-{}", Uuid::new_v4()));

    if let Err(err) = fs::hard_link(tmp, &staging).await {
        debug!("hard link into {} failed ({}), copying", parent.display(), err);
        if let Err(err) = copy_synced(tmp, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err);
        }
    }

    if let Err(err) = fs::rename(&staging, dst).await {
        let _ = fs::remove_file(&staging).await;
        return Err(err);
    }

    Ok(())
}

async fn copy_synced(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).await?;
    OpenOptions::new()
        .write(true)
        .open(dst)
        .await?
        .sync_all()
        .await
}

fn object_not_found(bin: &str, filename: &str) -> StorageError {
    StorageError::ObjectNotFound {
        bin: bin.to_string(),
        filename: filename.to_string(),
    }
}

fn not_found_or_io(err: io::Error, bin: &str, filename: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        object_not_found(bin, filename)
    } else {
        StorageError::Io(err)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    pub(crate) const CONTENT: &[u8] = b"Some content";
    pub(crate) const CONTENT_SHA256: &str =
        "9c6609fc5111405ea3f5bb3d1f6b5a5efd19a0cec53d85893fd96d265439cd5b";

    pub(crate) fn body(
        chunks: &[&'static [u8]],
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let chunks: Vec<io::Result<Bytes>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        stream::iter(chunks)
    }

    pub(crate) fn new_store(temp: &TempDir) -> ObjectStore {
        let root = temp.path().join("files");
        std::fs::create_dir_all(&root).unwrap();
        ObjectStore::open(root, temp.path().join("tmp")).unwrap()
    }

    fn temp_dir_is_empty(store: &ObjectStore) -> bool {
        std::fs::read_dir(store.temp_dir()).unwrap().next().is_none()
    }

    #[test]
    fn open_requires_existing_directory() {
        let temp = TempDir::new().unwrap();

        let missing = ObjectStore::open(temp.path().join("missing"), temp.path().join("tmp"));
        assert!(matches!(missing, Err(StorageError::InvalidRoot(_))));

        let file = temp.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let not_dir = ObjectStore::open(&file, temp.path().join("tmp"));
        assert!(matches!(not_dir, Err(StorageError::InvalidRoot(_))));
    }

    #[test]
    fn sniffing() {
        assert_eq!(sniff_mime(CONTENT), "application/octet-stream");
        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), "image/png");
        assert_eq!(sniff_mime(b"\xFF\xD8\xFF\xE0"), "image/jpeg");
        assert_eq!(sniff_mime(b""), "application/octet-stream");

        let text = "plain words\n".repeat(50);
        assert_eq!(sniff_mime(text.as_bytes()), "text/plain; charset=utf-8");
        let mut binary = text.clone().into_bytes();
        binary[100] = 0x01;
        assert_eq!(sniff_mime(&binary), "application/octet-stream");

        assert_eq!(sniff_mime(b"  <!doctype html>\n<title>x</title>"), "text/html");
    }

    #[tokio::test]
    async fn ingest_computes_golden_checksum() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);

        let object = store
            .ingest("testbin1", "testfile", None, body(&[b"Some ", b"content"]))
            .await
            .unwrap();

        assert_eq!(object.filename, "testfile");
        assert_eq!(object.bytes, 12);
        assert_eq!(object.checksum, CONTENT_SHA256);
        assert_eq!(object.algorithm, "sha256");
        assert_eq!(object.mime, "application/octet-stream");
        assert_eq!(
            std::fs::read(store.object_path("testbin1", "testfile")).unwrap(),
            CONTENT
        );
        assert!(temp_dir_is_empty(&store));
    }

    #[tokio::test]
    async fn empty_upload_is_rejected_without_side_effects() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);

        let result = store.ingest("testbin1", "empty", None, body(&[])).await;

        assert!(matches!(result, Err(StorageError::EmptyUpload)));
        assert!(!store.object_path("testbin1", "empty").exists());
        assert!(temp_dir_is_empty(&store));
    }

    #[tokio::test]
    async fn checksum_mismatch_is_rejected() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);

        let result = store
            .ingest("testbin1", "testfile", Some(&"0".repeat(64)), body(&[CONTENT]))
            .await;
        assert!(matches!(result, Err(StorageError::ChecksumMismatch { .. })));
        assert!(!store.object_path("testbin1", "testfile").exists());

        let upper = CONTENT_SHA256.to_uppercase();
        let ok = store
            .ingest("testbin1", "testfile", Some(&upper), body(&[CONTENT]))
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn stream_error_discards_upload() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);

        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ]);
        let result = store.ingest("testbin1", "partial", None, broken).await;

        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(!store.object_path("testbin1", "partial").exists());
        assert!(temp_dir_is_empty(&store));
    }

    #[tokio::test]
    async fn reupload_replaces_content_and_stale_derived_assets() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);

        store
            .ingest("testbin1", "file", None, body(&[b"first version"]))
            .await
            .unwrap();
        let cache = store.ensure_cache_dir("testbin1").unwrap();
        std::fs::write(cache.join("115x115-file"), b"stale").unwrap();

        let second = store
            .ingest("testbin1", "file", None, body(&[b"second"]))
            .await
            .unwrap();

        assert_eq!(second.bytes, 6);
        assert!(!second.derived.thumbnail);
        assert!(!cache.join("115x115-file").exists());
        assert_eq!(
            std::fs::read(store.object_path("testbin1", "file")).unwrap(),
            b"second"
        );
        assert_eq!(store.list_objects("testbin1").await.unwrap(), ["file"]);
    }

    #[tokio::test]
    async fn probe_matches_ingest() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);

        let ingested = store
            .ingest("testbin1", "testfile", None, body(&[CONTENT]))
            .await
            .unwrap();
        let probed = store.probe("testbin1", "testfile").await.unwrap();

        assert_eq!(ingested, probed);
    }

    #[tokio::test]
    async fn probe_detects_derived_assets() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);
        store
            .ingest("testbin1", "pic", None, body(&[CONTENT]))
            .await
            .unwrap();

        let cache = store.ensure_cache_dir("testbin1").unwrap();
        std::fs::write(cache.join("115x115-pic"), b"thumb").unwrap();

        let probed = store.probe("testbin1", "pic").await.unwrap();
        assert!(probed.derived.thumbnail);
        assert!(!probed.derived.preview);
    }

    #[tokio::test]
    async fn remove_rejects_missing_and_directories() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);
        store
            .ingest("testbin1", "testfile", None, body(&[CONTENT]))
            .await
            .unwrap();
        store.ensure_cache_dir("testbin1").unwrap();

        assert!(matches!(
            store.remove("testbin1", "nope").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
        assert!(matches!(
            store.remove("testbin1", CACHE_DIR).await,
            Err(StorageError::ObjectNotFound { .. })
        ));

        store.remove("testbin1", "testfile").await.unwrap();
        assert!(!store.object_path("testbin1", "testfile").exists());
    }

    #[tokio::test]
    async fn remove_bin() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);
        store
            .ingest("testbin1", "testfile", None, body(&[CONTENT]))
            .await
            .unwrap();

        store.remove_bin("testbin1").await.unwrap();
        assert!(matches!(
            store.remove_bin("testbin1").await,
            Err(StorageError::BinNotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_skips_cache_hidden_and_invalid_entries() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);
        store
            .ingest("testbin1", "a", None, body(&[CONTENT]))
            .await
            .unwrap();
        store
            .ingest("testbin1", "b", None, body(&[CONTENT]))
            .await
            .unwrap();
        store.ensure_cache_dir("testbin1").unwrap();
        std::fs::write(store.object_path("testbin1", ".staging-leftover"), b"x").unwrap();
        std::fs::create_dir_all(store.root().join(".tmp")).unwrap();
        std::fs::write(store.root().join("stray-file"), b"x").unwrap();

        assert_eq!(store.list_bins().await.unwrap(), ["testbin1"]);
        assert_eq!(store.list_objects("testbin1").await.unwrap(), ["a", "b"]);
        assert!(matches!(
            store.list_objects("nosuchbin").await,
            Err(StorageError::BinNotFound(_))
        ));
    }

    #[tokio::test]
    async fn open_object_reads_back_content() {
        let temp = TempDir::new().unwrap();
        let store = new_store(&temp);
        store
            .ingest("testbin1", "testfile", None, body(&[CONTENT]))
            .await
            .unwrap();

        let mut file = store.open_object("testbin1", "testfile").await.unwrap();
        let mut read_back = Vec::new();
        file.read_to_end(&mut read_back).await.unwrap();
        assert_eq!(read_back, CONTENT);

        assert!(matches!(
            store.open_object("testbin1", "missing").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
    }
}

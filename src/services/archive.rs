//! Streaming tar/zip archives of a bin.
//!
//! Archives are produced on the fly: each entry header comes from the file's
//! own metadata and its bytes are copied straight from disk into the archive
//! writer, which writes into the caller's sink. Memory use is bounded by one
//! copy buffer no matter how large the bin is.
//!
//! Once the first bytes have gone out there is no way to take them back: a
//! read error halfway through aborts the archive and the client is left
//! with a truncated file.

use super::storage_service::{StorageError, StorageResult};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::{
    fmt,
    fs::{File, Metadata},
    io::{self, Write},
    path::PathBuf,
    str::FromStr,
};
use tokio::io::AsyncWrite;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

/// Archive formats a bin can be downloaded as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    Zip,
}

impl ArchiveFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "application/x-tar",
            ArchiveFormat::Zip => "application/zip",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Zip => "zip",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tar" => Ok(ArchiveFormat::Tar),
            "zip" => Ok(ArchiveFormat::Zip),
            other => Err(StorageError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One file to place in an archive.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    /// Name inside the archive.
    pub name: String,
    /// Where the bytes live on disk.
    pub path: PathBuf,
}

/// A validated, snapshotted archive request that has not started writing.
#[derive(Debug)]
pub struct ArchivePlan {
    pub bin: String,
    pub format: ArchiveFormat,
    pub entries: Vec<ArchiveEntry>,
}

impl ArchivePlan {
    /// Suggested download name, e.g. `mybin123.zip`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.bin, self.format.extension())
    }

    /// Write the archive into an async sink and hand the sink back.
    ///
    /// The synchronous archive writers run on the blocking pool, bridged onto
    /// `sink`. Must be called from within a Tokio runtime.
    pub async fn stream_to<W>(self, sink: W) -> StorageResult<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut bridge = SyncIoBridge::new(sink);
        let sink = tokio::task::spawn_blocking(move || -> io::Result<W> {
            let count = write_archive(self.format, &self.entries, &mut bridge)?;
            bridge.flush()?;
            bridge.shutdown()?;
            info!(
                bin = %self.bin,
                format = %self.format,
                entries = count,
                "Archive generated successfully"
            );
            Ok(bridge.into_inner())
        })
        .await
        .map_err(io::Error::other)??;

        Ok(sink)
    }
}

/// Write `entries` as a `format` archive into `sink`.
///
/// Returns the number of entries written.
pub fn write_archive<W: Write>(
    format: ArchiveFormat,
    entries: &[ArchiveEntry],
    sink: &mut W,
) -> io::Result<usize> {
    match format {
        ArchiveFormat::Tar => write_tar(entries, sink),
        ArchiveFormat::Zip => write_zip(entries, sink),
    }
}

fn write_tar<W: Write>(entries: &[ArchiveEntry], sink: &mut W) -> io::Result<usize> {
    let mut builder = tar::Builder::new(sink);
    for entry in entries {
        let mut file = File::open(&entry.path)?;
        // header (size, mode, mtime) is taken from the file's metadata
        builder.append_file(&entry.name, &mut file)?;
        debug!(
            "Added {} bytes to the archive: {}",
            file.metadata()?.len(),
            entry.name
        );
    }
    builder.finish()?;
    Ok(entries.len())
}

fn write_zip<W: Write>(entries: &[ArchiveEntry], sink: &mut W) -> io::Result<usize> {
    let mut zip = ZipWriter::new_stream(sink);
    for entry in entries {
        let mut file = File::open(&entry.path)?;
        let meta = file.metadata()?;

        zip.start_file(entry.name.as_str(), zip_options(&meta))
            .map_err(io::Error::other)?;
        let copied = io::copy(&mut file, &mut zip)?;
        debug!("Added {} bytes to the archive: {}", copied, entry.name);
    }
    zip.finish().map_err(io::Error::other)?;
    Ok(entries.len())
}

fn zip_options(meta: &Metadata) -> SimpleFileOptions {
    let mut options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(1))
        .large_file(meta.len() >= u64::from(u32::MAX));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options = options.unix_permissions(meta.permissions().mode() & 0o777);
    }

    if let Some(modified) = meta.modified().ok().and_then(|m| zip_datetime(m.into())) {
        options = options.last_modified_time(modified);
    }
    options
}

// zip timestamps cannot represent anything before 1980
fn zip_datetime(dt: DateTime<Utc>) -> Option<zip::DateTime> {
    zip::DateTime::from_date_and_time(
        u16::try_from(dt.year()).ok()?,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;

    fn fixture(temp: &TempDir) -> Vec<ArchiveEntry> {
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        std::fs::write(&a, b"Some content").unwrap();
        std::fs::write(&b, vec![7u8; 100_000]).unwrap();
        vec![
            ArchiveEntry {
                name: "a".into(),
                path: a,
            },
            ArchiveEntry {
                name: "b".into(),
                path: b,
            },
        ]
    }

    #[test]
    fn format_parsing() {
        assert_eq!("tar".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Tar);
        assert_eq!("zip".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Zip);
        assert!(matches!(
            "rar".parse::<ArchiveFormat>(),
            Err(StorageError::UnsupportedFormat(f)) if f == "rar"
        ));
        assert_eq!(ArchiveFormat::Zip.content_type(), "application/zip");
    }

    #[test]
    fn tar_contains_exactly_the_files() {
        let temp = TempDir::new().unwrap();
        let entries = fixture(&temp);

        let mut out = Vec::new();
        assert_eq!(write_archive(ArchiveFormat::Tar, &entries, &mut out).unwrap(), 2);

        let mut archive = tar::Archive::new(Cursor::new(out));
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            seen.push((name, content.len()));
        }
        assert_eq!(seen, [("a".to_string(), 12), ("b".to_string(), 100_000)]);
    }

    #[test]
    fn zip_contains_exactly_the_files() {
        let temp = TempDir::new().unwrap();
        let entries = fixture(&temp);

        let mut out = Vec::new();
        write_archive(ArchiveFormat::Zip, &entries, &mut out).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(out)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut a = String::new();
        archive.by_name("a").unwrap().read_to_string(&mut a).unwrap();
        assert_eq!(a, "Some content");
        assert_eq!(archive.by_name("b").unwrap().size(), 100_000);
    }

    #[test]
    fn missing_file_aborts_archive() {
        let temp = TempDir::new().unwrap();
        let mut entries = fixture(&temp);
        entries.push(ArchiveEntry {
            name: "gone".into(),
            path: temp.path().join("gone"),
        });

        let mut out = Vec::new();
        assert!(write_archive(ArchiveFormat::Tar, &entries, &mut out).is_err());
    }

    #[tokio::test]
    async fn plan_streams_into_async_sink() {
        let temp = TempDir::new().unwrap();
        let plan = ArchivePlan {
            bin: "testbin1".into(),
            format: ArchiveFormat::Tar,
            entries: fixture(&temp),
        };
        assert_eq!(plan.file_name(), "testbin1.tar");

        let out = plan.stream_to(Vec::new()).await.unwrap();
        let mut archive = tar::Archive::new(Cursor::new(out));
        assert_eq!(archive.entries().unwrap().count(), 2);
    }

    #[test]
    fn zip_timestamps_before_1980_are_dropped() {
        let old = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        assert!(zip_datetime(old).is_none());
        let recent = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        assert!(zip_datetime(recent).is_some());
    }
}

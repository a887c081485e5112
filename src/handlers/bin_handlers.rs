//! HTTP handlers for whole bins: listing, album view, archives and deletion.

use super::object_handlers::ObjectResponse;
use crate::{
    errors::AppError,
    models::{
        bin::{BinSummary, Overview},
        link::Link,
    },
    services::{archive::ArchiveFormat, storage_service::StorageService},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::error;

/// Buffer between the archive writer and the response body.
const ARCHIVE_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct BinResponse {
    pub bin: String,
    pub bytes: u64,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub album: bool,
    pub files: Vec<ObjectResponse>,
    pub links: Vec<Link>,
}

impl BinResponse {
    fn new(base_url: &str, summary: BinSummary) -> Self {
        let base = base_url.trim_end_matches('/');
        let mut links: Vec<Link> = [ArchiveFormat::Tar, ArchiveFormat::Zip]
            .into_iter()
            .map(|format| Link {
                rel: format.extension().to_string(),
                href: format!("{}/archive/{}/{}", base, summary.bin, format),
            })
            .collect();
        if summary.album {
            links.push(Link {
                rel: "album".into(),
                href: format!("{}/album/{}", base, summary.bin),
            });
        }

        Self {
            files: summary
                .files
                .into_iter()
                .map(|object| ObjectResponse::new(base_url, object))
                .collect(),
            bin: summary.bin,
            bytes: summary.bytes,
            updated_at: summary.updated_at,
            expires_at: summary.expires_at,
            album: summary.album,
            links,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub bytes: u64,
    pub files: usize,
    pub bins: Vec<BinResponse>,
}

impl OverviewResponse {
    fn new(base_url: &str, overview: Overview) -> Self {
        Self {
            bytes: overview.bytes,
            files: overview.files,
            bins: overview
                .bins
                .into_iter()
                .map(|summary| BinResponse::new(base_url, summary))
                .collect(),
        }
    }
}

/// GET `/`: every bin, most recently updated first.
pub async fn list_bins(State(service): State<StorageService>) -> impl IntoResponse {
    Json(OverviewResponse::new(service.base_url(), service.list_bins()))
}

/// GET `/{bin}`
pub async fn get_bin(
    State(service): State<StorageService>,
    Path(bin): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let summary = service.describe_bin(&bin)?;
    Ok(Json(BinResponse::new(service.base_url(), summary)))
}

/// GET `/album/{bin}`: the bin restricted to its images.
pub async fn get_album(
    State(service): State<StorageService>,
    Path(bin): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let mut summary = service.describe_bin(&bin)?;
    if !summary.album {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            format!("bin `{}` contains no images", bin),
        ));
    }
    summary.files.retain(|object| object.is_image());
    Ok(Json(BinResponse::new(service.base_url(), summary)))
}

/// DELETE `/{bin}`
pub async fn delete_bin(
    State(service): State<StorageService>,
    Path(bin): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_bin(&bin).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/archive/{bin}/{format}`: the whole bin as a tar or zip attachment.
///
/// The archive is written while it is sent. Errors found before the first
/// byte produce a normal error response; later ones truncate the body.
pub async fn get_archive(
    State(service): State<StorageService>,
    Path((bin, format)): Path<(String, String)>,
) -> Result<Response, AppError> {
    // checked up front so these failures still get a proper status
    let plan = service.prepare_archive(&bin, &format)?;
    let content_type = plan.format.content_type();
    let disposition = format!("attachment; filename=\"{}\"", plan.file_name());

    // the plan that passed validation is the one that gets written
    let (writer, reader) = tokio::io::duplex(ARCHIVE_PIPE_CAPACITY);
    tokio::spawn(async move {
        if let Err(err) = plan.stream_to(writer).await {
            error!(bin = %bin, error = %err, "archive aborted");
        }
    });

    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

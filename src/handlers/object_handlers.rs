//! HTTP handlers for single files.
//! Streams bodies in both directions to avoid buffering in memory and
//! delegates storage concerns to `StorageService`.

use crate::{
    errors::AppError,
    models::{
        derived::DerivedVariant,
        link::{Link, links_for},
        object::Object,
    },
    services::{naming, storage_service::StorageService},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::ReaderStream;

const BIN_HEADER: &str = "bin";
const FILENAME_HEADER: &str = "filename";
const CHECKSUM_HEADER: &str = "content-sha256";

/// An object as rendered to clients: its metadata plus hypermedia links.
#[derive(Debug, Serialize)]
pub struct ObjectResponse {
    #[serde(flatten)]
    pub object: Object,
    pub links: Vec<Link>,
}

impl ObjectResponse {
    pub fn new(base_url: &str, object: Object) -> Self {
        let links = links_for(base_url, &object);
        Self { object, links }
    }
}

/// Query params for `GET /{bin}/{filename}`; a width selects a variant.
#[derive(Debug, Deserialize)]
pub struct VariantQuery {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Upload a file with `POST /`.
///
/// Target bin and name come from the `bin` and `filename` headers; both are
/// generated when absent. An optional `content-sha256` header is verified
/// against the received bytes.
pub async fn upload_object(
    State(service): State<StorageService>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let bin = header_str(&headers, BIN_HEADER)?
        .map(str::to_string)
        .unwrap_or_else(naming::generate_id);
    let filename = header_str(&headers, FILENAME_HEADER)?.unwrap_or_default();
    let expected = header_str(&headers, CHECKSUM_HEADER)?;

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = service
        .ingest_object(&bin, filename, expected, stream)
        .await?;

    let view = ObjectResponse::new(service.base_url(), object);
    let mut response = (StatusCode::CREATED, Json(&view)).into_response();
    if let Some(file_link) = view.links.first() {
        if let Ok(value) = HeaderValue::from_str(&file_link.href) {
            response.headers_mut().insert(header::LOCATION, value);
        }
    }
    Ok(response)
}

/// Download `/{bin}/{filename}` as a streaming response.
///
/// `?width=115&height=115` serves the thumbnail, `?width=1140` the preview.
pub async fn get_object(
    State(service): State<StorageService>,
    Path((bin, filename)): Path<(String, String)>,
    Query(q): Query<VariantQuery>,
) -> Result<Response, AppError> {
    let (object, file) = match q.width {
        None => service.fetch_object(&bin, &filename).await?,
        Some(width) => {
            let variant = DerivedVariant::from_dimensions(width, q.height).ok_or_else(|| {
                AppError::bad_request(format!(
                    "no variant of size {}x{}",
                    width,
                    q.height.unwrap_or(0)
                ))
            })?;
            service
                .fetch_derived_asset(&bin, &filename, variant)
                .await?
        }
    };

    // derived variants differ in size from the original
    let length = file
        .metadata()
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .len();
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &object, length, q.width.is_none());

    Ok(response)
}

/// DELETE `/{bin}/{filename}`
pub async fn delete_object(
    State(service): State<StorageService>,
    Path((bin, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let object = service.delete_object(&bin, &filename).await?;
    Ok(Json(ObjectResponse::new(service.base_url(), object)))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map(str::trim)
                .map_err(|_| AppError::bad_request(format!("header `{}` is not valid text", name)))
        })
        .transpose()
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object, length: u64, original: bool) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.mime)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{}\"", meta.filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(
            &meta
                .created_at
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        )
        .unwrap_or_else(|_| HeaderValue::from_static("")),
    );

    // checksum describes the original bytes only
    if original {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.checksum)) {
            headers.insert(header::ETAG, value);
        }
        if let Ok(value) = HeaderValue::from_str(&meta.checksum) {
            headers.insert(HeaderName::from_static(CHECKSUM_HEADER), value);
        }
    }
}

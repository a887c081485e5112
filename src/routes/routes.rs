//! Defines routes for all bin and file operations.
//!
//! ## Structure
//! - **Service-level endpoints**
//!   - `GET    /`: overview of every bin
//!   - `POST   /`: upload (headers `bin`, `filename`, `content-sha256`)
//!
//! - **Bin-level endpoints**
//!   - `GET    /{bin}`: bin summary with file links
//!   - `DELETE /{bin}`: delete bin
//!   - `GET    /album/{bin}`: images of a bin
//!   - `GET    /archive/{bin}/{format}`: tar or zip download
//!
//! - **File-level endpoints**
//!   - `GET    /{bin}/{filename}`: download (`?width=&height=` for variants)
//!   - `DELETE /{bin}/{filename}`: delete file

use crate::{
    handlers::{
        bin_handlers::{delete_bin, get_album, get_archive, get_bin, list_bins},
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, upload_object},
    },
    services::storage_service::StorageService,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use tower_http::trace::TraceLayer;

/// Build and return the router for every endpoint.
///
/// The router carries shared state (`StorageService`) to all handlers.
pub fn routes() -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(list_bins).post(upload_object))
        // static segments take precedence over `/{bin}/{filename}`
        .route("/album/{bin}", get(get_album))
        .route("/archive/{bin}/{format}", get(get_archive))
        .route("/{bin}", get(get_bin).delete(delete_bin))
        .route("/{bin}/{filename}", get(get_object).delete(delete_object))
        // uploads are streamed to disk, never buffered
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
}

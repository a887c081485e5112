//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks disk I/O, the index and the
//!   derived-asset queue

use crate::services::storage_service::StorageService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe: always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Performs a write/read/delete in the upload scratch directory.
/// 2. Reports how many objects the index holds.
/// 3. Checks that derived-asset workers are still running and reports the
///    queue depth.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    let disk = disk_check(&service).await;

    let index = CheckStatus {
        ok: true,
        error: None,
        detail: Some(format!("{} objects", service.index().len())),
    };

    let jobs = service.jobs();
    let queue = CheckStatus {
        ok: !jobs.is_closed(),
        error: jobs
            .is_closed()
            .then(|| "derived asset workers stopped".to_string()),
        detail: Some(format!(
            "{} pending, {}/{} queued",
            jobs.pending(),
            jobs.queued(),
            jobs.capacity()
        )),
    };

    let overall_ok = disk.ok && index.ok && queue.ok;
    let checks = HashMap::from([("disk", disk), ("index", index), ("queue", queue)]);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn disk_check(service: &StorageService) -> CheckStatus {
    let tmp_path = service
        .store()
        .temp_dir()
        .join(format!(".readyz-{}", Uuid::new_v4()));

    let (ok, error) = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(_) => (true, None),
                Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await;
                (false, Some("file content mismatch".to_string()))
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                (false, Some(format!("could not read tmp file: {}", e)))
            }
        },
        Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
    };

    CheckStatus {
        ok,
        error,
        detail: None,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

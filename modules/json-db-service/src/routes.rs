//! Axum route handlers for the document API.
//!
//! Parameters come from the JSON body when one is sent, otherwise from the
//! query string. Responses are plain text except where noted.

use crate::error::StoreError;
use crate::store::{DeleteOutcome, DocumentStore, display_value};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use json_db_types::*;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub start_time: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/status", get(status))
        .route("/file", get(get_file).post(create_file).delete(delete_file))
        .route(
            "/file/key",
            get(get_value).patch(set_value).delete(remove_key),
        )
        .route("/merge", post(merge))
        .route("/keys/union", get(keys_union))
        .route("/keys/intersect", get(keys_intersect))
        .route("/keys/difference", get(keys_difference))
        .fallback(not_found)
        .with_state(state)
}

/// Read request parameters from the body, falling back to the query string.
fn params<T: DeserializeOwned + Default>(uri: &Uri, body: &Bytes) -> Result<T, StoreError> {
    if !body.iter().all(u8::is_ascii_whitespace) {
        return serde_json::from_slice(body)
            .map_err(|e| StoreError::InvalidArgument(format!("Invalid request body: {}", e)));
    }
    if uri.query().is_some() {
        return Query::<T>::try_from_uri(uri)
            .map(|Query(p)| p)
            .map_err(|e| StoreError::InvalidArgument(e.body_text()));
    }
    Ok(T::default())
}

fn status_of(err: &StoreError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_REQUEST)
}

fn error_response(err: &StoreError) -> Response {
    (status_of(err), err.message().to_string()).into_response()
}

// GET /
pub async fn home() -> &'static str {
    "Welcome to the homepage!"
}

// GET /status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<ServiceStatus> {
    let document_count = match state.store.list_documents().await {
        Ok(names) => names.len(),
        Err(e) => {
            log::warn!("[JSON_DB] Failed to count documents: {}", e);
            0
        }
    };
    Json(ServiceStatus {
        up: true,
        uptime_secs: state.start_time.elapsed().as_secs(),
        document_count,
        active_lanes: state.store.lanes().stats().active_lanes,
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

// GET /file
pub async fn get_file(State(state): State<Arc<AppState>>, uri: Uri, body: Bytes) -> Response {
    let req: FileRequest = match params(&uri, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    match state.store.get_file(&req.file_name).await {
        Ok(content) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            content,
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

// POST /file
pub async fn create_file(State(state): State<Arc<AppState>>, uri: Uri, body: Bytes) -> Response {
    let req: FileRequest = match params(&uri, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    match state.store.create_file(&req.file_name).await {
        Ok(()) => (
            StatusCode::CREATED,
            format!("{} successfully created", req.file_name),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

// DELETE /file
pub async fn delete_file(State(state): State<Arc<AppState>>, uri: Uri, body: Bytes) -> Response {
    let req: FileRequest = match params(&uri, &body) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, e.message().to_string()).into_response(),
    };
    match state.store.delete_file(&req.file_name).await {
        Ok(DeleteOutcome::Deleted) => (
            StatusCode::OK,
            format!("{} successfully deleted", req.file_name),
        )
            .into_response(),
        Ok(DeleteOutcome::Missing) => {
            (StatusCode::OK, format!("{} does not exist", req.file_name)).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.message().to_string()).into_response(),
    }
}

// GET /file/key
pub async fn get_value(State(state): State<Arc<AppState>>, uri: Uri, body: Bytes) -> Response {
    let req: KeyRequest = match params(&uri, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    match state.store.get(&req.file_name, &req.key_name).await {
        Ok(Some(value)) => (StatusCode::OK, display_value(&value)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            format!("{} invalid key on {}", req.key_name, req.file_name),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

// PATCH /file/key
pub async fn set_value(State(state): State<Arc<AppState>>, uri: Uri, body: Bytes) -> Response {
    let req: SetRequest = match params(&uri, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    match state
        .store
        .set(&req.file_name, &req.key_name, req.value)
        .await
    {
        Ok(()) => (StatusCode::OK, "File Written").into_response(),
        Err(e) => error_response(&e),
    }
}

// DELETE /file/key
pub async fn remove_key(State(state): State<Arc<AppState>>, uri: Uri, body: Bytes) -> Response {
    let req: KeyRequest = match params(&uri, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    match state.store.remove(&req.file_name, &req.key_name).await {
        Ok(()) => (StatusCode::OK, "key removed").into_response(),
        Err(e) => error_response(&e),
    }
}

// POST /merge
pub async fn merge(State(state): State<Arc<AppState>>) -> Response {
    match state.store.merge_data().await {
        Ok(merged) => (StatusCode::OK, Json(merged)).into_response(),
        Err(e) => error_response(&e),
    }
}

// GET /keys/union
pub async fn keys_union(State(state): State<Arc<AppState>>, uri: Uri, body: Bytes) -> Response {
    let req: KeySetRequest = match params(&uri, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    keys_response(state.store.union(&req.file_a, &req.file_b).await)
}

// GET /keys/intersect
pub async fn keys_intersect(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    body: Bytes,
) -> Response {
    let req: KeySetRequest = match params(&uri, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    keys_response(state.store.intersect(&req.file_a, &req.file_b).await)
}

// GET /keys/difference
pub async fn keys_difference(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    body: Bytes,
) -> Response {
    let req: KeySetRequest = match params(&uri, &body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    keys_response(state.store.difference(&req.file_a, &req.file_b).await)
}

fn keys_response(result: Result<Vec<String>, StoreError>) -> Response {
    match result {
        Ok(keys) => (StatusCode::OK, Json(keys)).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn not_found() -> (StatusCode, Html<&'static str>) {
    (
        StatusCode::NOT_FOUND,
        Html("<!DOCTYPE html><html><head><title>404</title></head><body><h1>404 - Page Not Found</h1></body></html>"),
    )
}

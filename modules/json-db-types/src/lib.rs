//! Shared types for the JSON file database service and its HTTP clients.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// =====================================================
// Request Types
// =====================================================

/// Addresses a whole document: `GET /file`, `POST /file`, `DELETE /file`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    #[serde(default)]
    pub file_name: String,
}

/// Addresses one top-level property: `GET /file/key`, `DELETE /file/key`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub key_name: String,
}

/// `PATCH /file/key`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRequest {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub key_name: String,
    /// `None` when the field is absent. An explicit `null` is `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Compares the key sets of two documents: `GET /keys/{union,intersect,difference}`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySetRequest {
    #[serde(default)]
    pub file_a: String,
    #[serde(default)]
    pub file_b: String,
}

// =====================================================
// Service Status
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub up: bool,
    pub uptime_secs: u64,
    pub document_count: usize,
    /// Documents currently locked by an in-flight update.
    pub active_lanes: usize,
    /// Unix epoch milliseconds at the time of the request.
    pub timestamp: i64,
}

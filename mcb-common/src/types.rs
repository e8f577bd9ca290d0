//! Core data model shared between the store and the wire protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title verification state for a single item.
///
/// Drives whether the item may be included in an upload slice: only
/// `Available` titles are eligible. Local failures (`Invalid`,
/// `Blacklisted`, `Duplicate`) are assigned without a network round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleStatus {
    /// Remote existence check in flight
    Checking,
    /// Title is free on the repository
    Available,
    /// A page with this title already exists
    Taken,
    /// Not yet checked, or the lookup response could not be matched
    Unknown,
    /// Extension is not in the accepted media set
    Invalid,
    /// Denylist prefix or pattern match
    Blacklisted,
    /// Same effective title as another selected item
    Duplicate,
    /// Required metadata fields are missing
    MissingFields,
}

/// Server-assigned upload lifecycle state. Set only by server push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Duplicate,
    DuplicatedSdcUpdated,
    DuplicatedSdcNotUpdated,
    Cancelled,
}

impl UploadStatus {
    /// Whether no further server transition is expected for this status.
    ///
    /// Everything except `Queued`/`InProgress` is terminal: the server never
    /// moves an upload out of a duplicate or cancelled state either.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::Queued | UploadStatus::InProgress)
    }
}

/// Structured error payload attached to a failed upload update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code from the upload service
    pub code: Option<String>,
    /// Human-readable detail
    pub message: Option<String>,
    /// Raw extra detail, shape owned by the server
    pub info: Option<serde_json::Value>,
}

/// Geographic position of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
}

/// Capture timestamps. `taken` is materialized at ingestion; the wire form
/// is epoch milliseconds, never a string.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureDates {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub taken: DateTime<Utc>,
}

/// Creator attribution from the collection source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub username: String,
    pub id: Option<String>,
}

/// Media URLs for preview and original download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUrls {
    pub thumb: String,
    pub original: String,
}

/// Immutable-once-set descriptive payload for one photograph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSnapshot {
    /// Opaque key from the collection source
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub dates: CaptureDates,
    pub location: Option<GeoPoint>,
    pub creator: Creator,
    pub urls: MediaUrls,
}

/// One image record as delivered by the collection import path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionImage {
    /// Stable external identifier
    pub id: String,
    pub image: ImageSnapshot,
}

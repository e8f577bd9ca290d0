//! Wire protocol for the upload channel.
//!
//! One wire format multiplexes every message shape by a string tag:
//! `{"type": "<TAG>", "data": ...}`. Both directions are closed sum types so
//! dispatch is exhaustive-match checked at compile time; an unhandled tag is
//! a deserialization error, never a silent no-op.

use serde::{Deserialize, Serialize};

use crate::types::{CollectionImage, StructuredError, UploadStatus};

/// Messages sent client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Start a collection import for the given source handle
    #[serde(rename = "FETCH_IMAGES")]
    FetchImages { handler: String, input: String },

    /// Request creation of a new upload batch
    #[serde(rename = "CREATE_BATCH")]
    CreateBatch,

    /// One fixed-size slice of upload item payloads
    #[serde(rename = "UPLOAD_SLICE")]
    UploadSlice(UploadSlice),

    /// Subscribe to live status push for a batch
    #[serde(rename = "SUBSCRIBE_BATCH")]
    SubscribeBatch { batchid: i64 },

    /// Stop receiving status push updates
    #[serde(rename = "UNSUBSCRIBE_BATCH")]
    UnsubscribeBatch,

    /// Ask the server to retry the failed uploads of a batch
    #[serde(rename = "RETRY_UPLOADS")]
    RetryUploads { batchid: i64 },

    /// Page through the batch history
    #[serde(rename = "FETCH_BATCHES")]
    FetchBatches(BatchQuery),

    /// Page through the uploads of one batch
    #[serde(rename = "FETCH_BATCH_UPLOADS")]
    FetchBatchUploads(BatchUploadQuery),
}

/// Messages pushed server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// A batch was created for this client; carries the server-assigned id
    #[serde(rename = "BATCH_CREATED")]
    BatchCreated { batchid: i64 },

    /// Acknowledgment for one upload slice, by slice id
    #[serde(rename = "UPLOAD_SLICE_ACK")]
    UploadSliceAck { sliceid: i64 },

    /// Per-item status push; items may belong to any batch and arrive in
    /// any order
    #[serde(rename = "UPLOADS_UPDATE")]
    UploadsUpdate(Vec<UploadUpdate>),

    /// The named batch reached a terminal state for all its uploads
    #[serde(rename = "UPLOADS_COMPLETE")]
    UploadsComplete { batchid: i64 },

    /// Synchronous-create path: uploads were created directly with a batch id
    #[serde(rename = "UPLOAD_CREATED")]
    UploadCreated(Vec<CreatedUpload>),

    /// Full import result: every item fully populated
    #[serde(rename = "COLLECTION_IMAGES")]
    CollectionImages(Vec<CollectionImage>),

    /// Incremental import fill-in for previously announced ids
    #[serde(rename = "PARTIAL_COLLECTION_IMAGES")]
    PartialCollectionImages(Vec<CollectionImage>),

    /// Import announcement: ids only, image data to follow
    #[serde(rename = "COLLECTION_IMAGE_IDS")]
    CollectionImageIds(Vec<String>),

    /// Import-path failure; message may be absent or empty
    #[serde(rename = "ERROR")]
    Error { message: Option<String> },

    /// Server hint to re-request the batch list
    #[serde(rename = "TRY_BATCH_RETRIEVAL")]
    TryBatchRetrieval,
}

/// Payload of an `UPLOAD_SLICE` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSlice {
    pub batchid: i64,
    /// 0-based slice cursor; acknowledged by `UPLOAD_SLICE_ACK`
    pub sliceid: i64,
    /// Collection source handler (e.g. "mapillary")
    pub handler: String,
    /// Zero items signals that slicing is complete
    pub items: Vec<SliceItem>,
}

/// One serialized upload item inside a slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceItem {
    pub id: String,
    /// Shared free-text collection source handle
    pub input: String,
    /// Effective destination filename
    pub title: String,
    /// Fully rendered file description page
    pub wikitext: String,
    /// Structured caption label
    pub label: SliceLabel,
    /// True iff the item or batch-global license override is non-empty
    pub copyright_override: bool,
}

/// Structured caption attached to a slice item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceLabel {
    pub language: String,
    pub value: String,
}

/// One entry of an `UPLOADS_UPDATE` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadUpdate {
    /// Item id the update applies to
    pub id: String,
    /// Destination filename key, when known
    pub key: Option<String>,
    pub status: UploadStatus,
    /// Batch the update belongs to; used to reject cross-talk
    pub batchid: i64,
    pub handler: Option<String>,
    /// Present on terminal failure
    pub error: Option<StructuredError>,
    /// Landing page URL, present on completion
    pub success: Option<String>,
}

/// One entry of an `UPLOAD_CREATED` push (synchronous-create path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedUpload {
    pub id: String,
    pub key: Option<String>,
    pub batchid: i64,
    pub status: UploadStatus,
}

/// Pagination/filter payload for `FETCH_BATCHES`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchQuery {
    pub page: u32,
    pub per_page: u32,
    /// Restrict to one collection source handler
    pub handler: Option<String>,
}

impl Default for BatchQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 25,
            handler: None,
        }
    }
}

/// Pagination payload for `FETCH_BATCH_UPLOADS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUploadQuery {
    pub batchid: i64,
    pub page: u32,
    pub per_page: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_tag_shape() {
        let msg = ClientMessage::SubscribeBatch { batchid: 42 };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "SUBSCRIBE_BATCH");
        assert_eq!(json["data"]["batchid"], 42);
    }

    #[test]
    fn unit_variant_carries_only_tag() {
        let json = serde_json::to_value(&ClientMessage::CreateBatch).unwrap();
        assert_eq!(json["type"], "CREATE_BATCH");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn server_push_round_trips_through_tag() {
        let raw = r#"{"type":"UPLOAD_SLICE_ACK","data":{"sliceid":3}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg, ServerMessage::UploadSliceAck { sliceid: 3 });
    }

    #[test]
    fn unknown_tag_is_an_error_not_a_no_op() {
        let raw = r#"{"type":"SOMETHING_ELSE","data":{}}"#;
        assert!(serde_json::from_str::<ServerMessage>(raw).is_err());
    }

    #[test]
    fn uploads_update_parses_error_payload() {
        let raw = r#"{"type":"UPLOADS_UPDATE","data":[{
            "id":"abc","key":"File:Abc.jpg","status":"failed","batchid":7,
            "handler":"mapillary",
            "error":{"code":"duplicate-archive","message":"already uploaded","info":null},
            "success":null
        }]}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ServerMessage::UploadsUpdate(updates) => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].status, crate::types::UploadStatus::Failed);
                assert_eq!(
                    updates[0].error.as_ref().unwrap().code.as_deref(),
                    Some("duplicate-archive")
                );
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

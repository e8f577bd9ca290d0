//! Upload orchestrator
//!
//! Drives the batch lifecycle over the duplex channel: request batch
//! creation, stream fixed-size slices of the selected, title-verified items
//! on acknowledgment, subscribe to live status push, reconcile updates into
//! the store, and stop watching once every selected item is terminal.
//!
//! Sending is fire-and-forget; forward progress is driven entirely by
//! inbound push events. Acknowledgment-gated advancement is the sole flow
//! control: the client never has two unacknowledged slices in flight.

use tokio::sync::mpsc;

use mcb_common::messages::{
    BatchQuery, BatchUploadQuery, ClientMessage, ServerMessage, SliceItem, SliceLabel, UploadSlice,
    UploadUpdate,
};

use crate::store::{GlobalDefaults, Item, SharedStore};
use crate::verify::resolve_effective_title;

/// Fixed number of items per upload slice.
pub const SLICE_SIZE: usize = 10;

pub struct UploadOrchestrator {
    store: SharedStore,
    outbound: mpsc::UnboundedSender<ClientMessage>,
}

impl UploadOrchestrator {
    pub fn new(store: SharedStore, outbound: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self { store, outbound }
    }

    fn send(&self, message: ClientMessage) {
        if self.outbound.send(message).is_err() {
            tracing::warn!("outbound channel closed, message dropped");
        }
    }

    /// Start a collection import for the given source handle.
    pub async fn fetch_images(&self, input: &str) {
        let handler = {
            let mut store = self.store.write().await;
            store.globals.input = input.to_string();
            store.is_loading = true;
            store.error = None;
            store.globals.handler.clone()
        };
        self.send(ClientMessage::FetchImages {
            handler,
            input: input.to_string(),
        });
    }

    /// Begin the batch upload of the current selection.
    ///
    /// Requires at least one selected item; otherwise a user-facing error is
    /// recorded and nothing is sent. Re-entrant calls while a batch is
    /// already being created or sliced are no-ops.
    pub async fn start_upload(&self) {
        {
            let mut store = self.store.write().await;
            if store.selected_count() == 0 {
                store.error = Some("No items selected for upload".to_string());
                return;
            }
            if store.is_loading {
                tracing::debug!("upload already in progress");
                return;
            }
            store.error = None;
            store.is_loading = true;
            store.batch_id = None;
            store.upload_slice_index = 0;
        }
        self.send(ClientMessage::CreateBatch);
    }

    /// Explicit client-initiated exit from the status watch. Idempotent,
    /// legal from any state.
    pub async fn unsubscribe(&self) {
        self.store.write().await.is_status_checking = false;
        self.send(ClientMessage::UnsubscribeBatch);
    }

    /// Ask the server to retry the failed uploads of a batch and watch its
    /// status again.
    pub async fn retry_uploads(&self, batchid: i64) {
        self.store.write().await.batch_id = Some(batchid);
        self.send(ClientMessage::RetryUploads { batchid });

        let subscribe = {
            let mut store = self.store.write().await;
            if store.is_status_checking {
                false
            } else {
                store.is_status_checking = true;
                true
            }
        };
        if subscribe {
            self.send(ClientMessage::SubscribeBatch { batchid });
        }
    }

    /// Page through the batch history.
    pub fn fetch_batches(&self, query: BatchQuery) {
        self.send(ClientMessage::FetchBatches(query));
    }

    /// Page through the uploads of one batch.
    pub fn fetch_batch_uploads(&self, query: BatchUploadQuery) {
        self.send(ClientMessage::FetchBatchUploads(query));
    }

    /// Dispatch one inbound server push. Exhaustive over the wire protocol:
    /// an unhandled tag cannot compile.
    pub async fn handle_message(&self, message: ServerMessage) {
        match message {
            ServerMessage::BatchCreated { batchid } => self.on_batch_created(batchid).await,
            ServerMessage::UploadSliceAck { sliceid } => self.on_slice_ack(sliceid).await,
            ServerMessage::UploadsUpdate(updates) => self.on_uploads_update(&updates).await,
            ServerMessage::UploadsComplete { batchid } => self.on_uploads_complete(batchid).await,
            ServerMessage::UploadCreated(created) => {
                self.store.write().await.record_created(&created);
            }
            ServerMessage::CollectionImages(records) => {
                let mut store = self.store.write().await;
                store.replace_with_images(records);
                store.is_loading = false;
            }
            ServerMessage::PartialCollectionImages(records) => {
                let mut store = self.store.write().await;
                store.fill_skeletons(records);
                if store.items().iter().all(|i| !i.is_skeleton) {
                    store.is_loading = false;
                }
            }
            ServerMessage::CollectionImageIds(ids) => {
                self.store.write().await.replace_with_skeletons(ids);
            }
            ServerMessage::Error { message } => {
                self.store.write().await.record_error(message);
            }
            ServerMessage::TryBatchRetrieval => {
                self.fetch_batches(BatchQuery::default());
            }
        }
    }

    async fn on_batch_created(&self, batchid: i64) {
        {
            let mut store = self.store.write().await;
            if !store.is_loading {
                tracing::debug!(batchid, "batch created push outside an upload, ignored");
                return;
            }
            if store.batch_id.is_some() {
                tracing::debug!(batchid, "batch id already assigned, ignored");
                return;
            }
            store.batch_id = Some(batchid);
            store.upload_slice_index = 0;
        }
        self.send_next_slice().await;
    }

    /// Advance the cursor only for the acknowledgment that matches it.
    /// Stale, repeated or out-of-order acks produce no state change and no
    /// send.
    async fn on_slice_ack(&self, sliceid: i64) {
        {
            let mut store = self.store.write().await;
            if !store.is_loading {
                tracing::trace!(sliceid, "slice ack after completion, ignored");
                return;
            }
            if sliceid != store.upload_slice_index {
                tracing::debug!(
                    sliceid,
                    cursor = store.upload_slice_index,
                    "stale slice ack ignored"
                );
                return;
            }
            store.upload_slice_index += 1;
        }
        self.send_next_slice().await;
    }

    /// Build and send the slice at the current cursor over the currently
    /// selected items, in store order at call time. A zero-item slice is
    /// the completion signal: it is still sent, then the client subscribes
    /// to status push exactly once.
    async fn send_next_slice(&self) {
        let (slice, complete) = {
            let store = self.store.read().await;
            let Some(batchid) = store.batch_id else {
                tracing::warn!("slice requested without a batch id");
                return;
            };
            let sliceid = store.upload_slice_index;
            let start = sliceid as usize * SLICE_SIZE;
            let items: Vec<SliceItem> = store
                .selected_items()
                .into_iter()
                .skip(start)
                .take(SLICE_SIZE)
                .map(|item| build_slice_item(item, &store.globals))
                .collect();
            let complete = items.is_empty();
            (
                UploadSlice {
                    batchid,
                    sliceid,
                    handler: store.globals.handler.clone(),
                    items,
                },
                complete,
            )
        };

        self.send(ClientMessage::UploadSlice(slice));

        if complete {
            let subscribe = {
                let mut store = self.store.write().await;
                store.is_loading = false;
                if store.is_status_checking {
                    None
                } else {
                    store.is_status_checking = true;
                    store.batch_id
                }
            };
            if let Some(batchid) = subscribe {
                self.send(ClientMessage::SubscribeBatch { batchid });
            }
        }
    }

    /// Reconcile one status push into the store. Updates for a batch other
    /// than the one being watched are cross-talk and silently discarded.
    /// When every selected item is terminal the status watch ends.
    async fn on_uploads_update(&self, updates: &[UploadUpdate]) {
        let mut store = self.store.write().await;
        let watched = store.batch_id;
        for update in updates {
            if watched != Some(update.batchid) {
                tracing::trace!(
                    batchid = update.batchid,
                    id = %update.id,
                    "discarding status update for unwatched batch"
                );
                continue;
            }
            store.apply_upload_update(update);
        }
        if store.all_selected_terminal() {
            store.is_status_checking = false;
        }
    }

    /// Independent confirmation path for batch completion, since per-item
    /// updates can arrive fragmented.
    async fn on_uploads_complete(&self, batchid: i64) {
        let mut store = self.store.write().await;
        if store.batch_id == Some(batchid) {
            store.is_status_checking = false;
        }
    }
}

/// Serialize one selected item for an upload slice.
fn build_slice_item(item: &Item, globals: &GlobalDefaults) -> SliceItem {
    let description = item.effective_description(globals);
    SliceItem {
        id: item.id.clone(),
        input: globals.input.clone(),
        title: resolve_effective_title(item, globals),
        wikitext: build_wikitext(item, globals),
        label: SliceLabel {
            language: description.language,
            value: description.value,
        },
        copyright_override: item.copyright_override(globals),
    }
}

/// Render the file description page for one item: information block,
/// license section when a license applies, and category links. Per-item
/// values fall back to the globals at this point of use.
fn build_wikitext(item: &Item, globals: &GlobalDefaults) -> String {
    let description = item.effective_description(globals);
    let mut out = String::new();

    out.push_str("=={{int:filedesc}}==\n{{Information\n");
    out.push_str(&format!(
        "|description={{{{{}|1={}}}}}\n",
        description.language, description.value
    ));
    if let Some(image) = &item.image {
        out.push_str(&format!(
            "|date={}\n",
            image.dates.taken.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("|source={{{{Mapillary|{}}}}}\n", item.id));
        out.push_str(&format!(
            "|author=[https://www.mapillary.com/app/user/{} {}]\n",
            image.creator.username, image.creator.username
        ));
    } else {
        out.push_str(&format!("|source={{{{Mapillary|{}}}}}\n", item.id));
    }
    out.push_str("}}\n");

    if let Some(license) = item.effective_license(globals) {
        out.push_str(&format!(
            "\n=={{{{int:license-header}}}}==\n{{{{{license}}}}}\n"
        ));
    }

    let categories = item.effective_categories(globals);
    if !categories.is_empty() {
        out.push('\n');
        for category in categories.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            out.push_str(&format!("[[Category:{category}]]\n"));
        }
    }

    out
}

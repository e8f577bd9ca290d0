//! Collection/batch state store
//!
//! The authoritative mutable model of the current working set. The
//! orchestrator and the title verifier mutate it only through the operations
//! defined here; neither holds private copies of item state. The handle is
//! an explicit `Arc<RwLock<Store>>` threaded into constructors, never
//! ambient state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use mcb_common::messages::{CreatedUpload, UploadUpdate};
use mcb_common::types::{CollectionImage, ImageSnapshot, StructuredError, TitleStatus, UploadStatus};

/// Shared handle to the store.
pub type SharedStore = Arc<RwLock<Store>>;

/// Per-item description with language.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Description {
    pub language: String,
    pub value: String,
}

/// Mutable curation state for one item.
///
/// Empty per-item values fall back to the corresponding global default at
/// the point of use, never eagerly copied.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub selected: bool,
    /// Explicit user title override; effective title is computed when absent
    pub title: Option<String>,
    pub description: Description,
    /// Comma-separated category names
    pub categories: String,
    pub license: Option<String>,
    pub title_status: Option<TitleStatus>,
    /// Set only by server push
    pub status: Option<UploadStatus>,
    pub status_reason: Option<String>,
    pub error_info: Option<StructuredError>,
    pub success_url: Option<String>,
}

/// One unit of media being curated.
#[derive(Debug, Clone)]
pub struct Item {
    /// Stable external identifier from the collection source
    pub id: String,
    /// 1-based display position, monotonic, never reused
    pub index: u32,
    /// None while the item is a skeleton
    pub image: Option<ImageSnapshot>,
    /// Flips to false exactly once, when image data arrives
    pub is_skeleton: bool,
    pub meta: Metadata,
}

impl Item {
    fn skeleton(id: String, index: u32) -> Self {
        Self {
            id,
            index,
            image: None,
            is_skeleton: true,
            meta: Metadata::default(),
        }
    }

    fn populated(record: CollectionImage, index: u32) -> Self {
        Self {
            id: record.id,
            index,
            image: Some(record.image),
            is_skeleton: false,
            meta: Metadata::default(),
        }
    }

    /// License used at the point of use: item override, else global.
    pub fn effective_license<'a>(&'a self, globals: &'a GlobalDefaults) -> Option<&'a str> {
        match self.meta.license.as_deref().map(str::trim) {
            Some(license) if !license.is_empty() => Some(license),
            _ => {
                let global = globals.license.trim();
                (!global.is_empty()).then_some(global)
            }
        }
    }

    /// Description used at the point of use: item value, else global.
    pub fn effective_description<'a>(&'a self, globals: &'a GlobalDefaults) -> Description {
        if !self.meta.description.value.trim().is_empty() {
            self.meta.description.clone()
        } else {
            globals.description.clone()
        }
    }

    /// Categories used at the point of use: item value, else global.
    pub fn effective_categories<'a>(&'a self, globals: &'a GlobalDefaults) -> &'a str {
        let own = self.meta.categories.trim();
        if own.is_empty() {
            globals.categories.trim()
        } else {
            own
        }
    }

    /// True iff either the item's own or the global license override is a
    /// non-empty trimmed string.
    pub fn copyright_override(&self, globals: &GlobalDefaults) -> bool {
        self.effective_license(globals).is_some()
    }
}

/// Batch-global defaults and the current import context.
#[derive(Debug, Clone)]
pub struct GlobalDefaults {
    pub description: Description,
    pub categories: String,
    pub license: String,
    /// Filename token template applied when no explicit title is set
    pub template: String,
    /// Free-text collection source handle (sequence key, username, URL)
    pub input: String,
    /// Collection source handler name
    pub handler: String,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            description: Description {
                language: "en".to_string(),
                value: String::new(),
            },
            categories: String::new(),
            license: String::new(),
            template: String::new(),
            input: String::new(),
            handler: "mapillary".to_string(),
        }
    }
}

/// Mirror entry for the batch-history view.
#[derive(Debug, Clone)]
pub struct BatchUploadEntry {
    pub id: String,
    pub batchid: i64,
    pub key: Option<String>,
    pub status: UploadStatus,
    pub status_reason: Option<String>,
    pub success_url: Option<String>,
}

/// The working-set store. Single logical writer; no internal locking beyond
/// the shared `RwLock` handle.
#[derive(Debug, Default)]
pub struct Store {
    items: Vec<Item>,
    by_id: HashMap<String, usize>,
    next_index: u32,

    /// None before `BATCH_CREATED`; never reassigned mid-flight
    pub batch_id: Option<i64>,
    /// 0-based cursor over 10-item slices; monotonic, never skips
    pub upload_slice_index: i64,
    pub is_loading: bool,
    /// True exactly while subscribed to live status push
    pub is_status_checking: bool,
    pub error: Option<String>,

    pub globals: GlobalDefaults,
    /// Parallel representation for the batch-history view
    pub batch_uploads: Vec<BatchUploadEntry>,
}

impl Store {
    pub fn new(globals: GlobalDefaults) -> Self {
        Self {
            globals,
            ..Self::default()
        }
    }

    pub fn shared(globals: GlobalDefaults) -> SharedStore {
        Arc::new(RwLock::new(Self::new(globals)))
    }

    fn reindex(&mut self) {
        self.by_id = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.clone(), i))
            .collect();
    }

    /// Replace the working set with skeleton items for the given ids.
    /// Image data arrives later through `fill_skeletons`.
    pub fn replace_with_skeletons(&mut self, ids: Vec<String>) {
        self.next_index = 0;
        self.items = ids
            .into_iter()
            .map(|id| {
                self.next_index += 1;
                Item::skeleton(id, self.next_index)
            })
            .collect();
        self.reindex();
        self.error = None;
    }

    /// Replace the working set with fully populated items.
    pub fn replace_with_images(&mut self, records: Vec<CollectionImage>) {
        self.next_index = 0;
        self.items = records
            .into_iter()
            .map(|record| {
                self.next_index += 1;
                Item::populated(record, self.next_index)
            })
            .collect();
        self.reindex();
        self.error = None;
    }

    /// Fill in image data for previously announced skeletons. Each skeleton
    /// flips exactly once; repeated or unknown fill-ins are ignored.
    pub fn fill_skeletons(&mut self, records: Vec<CollectionImage>) {
        for record in records {
            match self.by_id.get(&record.id).copied() {
                Some(idx) => {
                    let item = &mut self.items[idx];
                    if item.is_skeleton {
                        item.image = Some(record.image);
                        item.is_skeleton = false;
                    } else {
                        tracing::debug!(id = %record.id, "duplicate image fill-in ignored");
                    }
                }
                None => {
                    tracing::warn!(id = %record.id, "image data for unknown item");
                }
            }
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.by_id.get(id).map(|&i| &self.items[i])
    }

    pub fn item_mut(&mut self, id: &str) -> Option<&mut Item> {
        let idx = self.by_id.get(id).copied()?;
        Some(&mut self.items[idx])
    }

    pub fn set_selected(&mut self, id: &str, selected: bool) {
        match self.item_mut(id) {
            Some(item) => item.meta.selected = selected,
            None => tracing::warn!(id, "selection change for unknown item"),
        }
    }

    pub fn select_all(&mut self, selected: bool) {
        for item in &mut self.items {
            item.meta.selected = selected;
        }
    }

    /// Selected items in store order. The upload slice range is taken over
    /// this view at call time.
    pub fn selected_items(&self) -> Vec<&Item> {
        self.items.iter().filter(|i| i.meta.selected).collect()
    }

    pub fn selected_count(&self) -> usize {
        self.items.iter().filter(|i| i.meta.selected).count()
    }

    pub fn set_title_status(&mut self, id: &str, status: Option<TitleStatus>) {
        match self.item_mut(id) {
            Some(item) => item.meta.title_status = status,
            None => tracing::warn!(id, "title status for unknown item"),
        }
    }

    /// Undo `checking` markers after a verification cancel.
    pub fn reset_checking_to_unknown(&mut self) {
        for item in &mut self.items {
            if item.meta.title_status == Some(TitleStatus::Checking) {
                item.meta.title_status = Some(TitleStatus::Unknown);
            }
        }
    }

    /// Apply one status-update push entry to the matching item and mirror it
    /// onto the batch-history view. Each update is a full overwrite of the
    /// fields it carries.
    pub fn apply_upload_update(&mut self, update: &UploadUpdate) {
        match self.item_mut(&update.id) {
            Some(item) => {
                item.meta.status = Some(update.status);
                match update.status {
                    UploadStatus::Failed => {
                        let reason = update
                            .error
                            .as_ref()
                            .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
                            .unwrap_or_else(|| "Failed".to_string());
                        item.meta.status_reason = Some(reason);
                        item.meta.error_info = update.error.clone();
                        item.meta.success_url = None;
                    }
                    UploadStatus::Completed => {
                        item.meta.success_url = update.success.clone();
                        item.meta.status_reason = None;
                        item.meta.error_info = None;
                    }
                    _ => {}
                }
            }
            None => tracing::warn!(id = %update.id, "status update for unknown item"),
        }

        // Mirror by id match only; unrelated history entries stay untouched.
        if let Some(entry) = self.batch_uploads.iter_mut().find(|e| e.id == update.id) {
            entry.status = update.status;
            entry.key = update.key.clone().or_else(|| entry.key.clone());
            entry.status_reason = update
                .error
                .as_ref()
                .and_then(|e| e.message.clone().or_else(|| e.code.clone()));
            entry.success_url = update.success.clone();
        }
    }

    /// Record uploads created through the synchronous-create path.
    pub fn record_created(&mut self, created: &[CreatedUpload]) {
        if let Some(first) = created.first() {
            if self.batch_id.is_none() {
                self.batch_id = Some(first.batchid);
            }
        }
        for upload in created {
            if let Some(item) = self.item_mut(&upload.id) {
                item.meta.status = Some(upload.status);
            }
            self.batch_uploads.push(BatchUploadEntry {
                id: upload.id.clone(),
                batchid: upload.batchid,
                key: upload.key.clone(),
                status: upload.status,
                status_reason: None,
                success_url: None,
            });
        }
    }

    /// Record a store-level protocol error. The server may supply no detail
    /// at all, in which case a generic message is shown.
    pub fn record_error(&mut self, message: Option<String>) {
        let message = match message {
            Some(m) if !m.trim().is_empty() => m,
            _ => "Failed".to_string(),
        };
        self.error = Some(message);
        // The interface must never be left in a permanent spinner state.
        self.is_loading = false;
        self.is_status_checking = false;
    }

    /// True when at least one item is selected and every selected item has
    /// reached a terminal upload status.
    pub fn all_selected_terminal(&self) -> bool {
        let mut any = false;
        for item in self.items.iter().filter(|i| i.meta.selected) {
            any = true;
            match item.meta.status {
                Some(status) if status.is_terminal() => {}
                _ => return false,
            }
        }
        any
    }
}

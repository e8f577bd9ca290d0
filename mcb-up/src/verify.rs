//! Title verification engine
//!
//! For a set of candidate items: applies local validation (extension,
//! denylist, intra-batch duplicates), then checks the surviving titles
//! against the repository lookup API in fixed-size chunks. Supports a
//! debounced per-item mode for interactive edits and a batched immediate
//! mode, plus a global cancel that aborts all in-flight work and undoes
//! `checking` markers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mcb_common::config::ApiConfig;
use mcb_common::types::TitleStatus;
use mcb_common::{Error, Result};

use crate::denylist::{Denylist, SharedDenylist};
use crate::store::{GlobalDefaults, Item, SharedStore, Store};
use crate::template;

/// Titles per lookup request in immediate mode.
pub const LOOKUP_CHUNK_SIZE: usize = 50;

/// Trailing debounce window for per-item checks.
pub const DEBOUNCE_MS: u64 = 100;

const USER_AGENT: &str = concat!("mcb-up/", env!("CARGO_PKG_VERSION"));

/// The title actually used for an item: explicit override, else the global
/// template rendered against the item, else a fixed fallback.
pub fn resolve_effective_title(item: &Item, globals: &GlobalDefaults) -> String {
    if let Some(title) = item.meta.title.as_deref() {
        let title = title.trim();
        if !title.is_empty() {
            return title.to_string();
        }
    }

    if !globals.template.is_empty() {
        let rendered = template::render(&globals.template, item);
        let rendered = rendered.trim();
        if !rendered.is_empty() {
            return rendered.to_string();
        }
    }

    format!("Photo {} uploaded from Mapillary.jpg", item.id)
}

/// Effective titles occurring at least twice among the selected items.
/// Single O(n) pass; stable regardless of call order.
pub fn find_duplicates(store: &Store) -> HashSet<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in store.items().iter().filter(|i| i.meta.selected) {
        *counts
            .entry(resolve_effective_title(item, &store.globals))
            .or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n >= 2)
        .map(|(title, _)| title)
        .collect()
}

/// Local-only validation. `None` means the candidate proceeds to the
/// remote existence check.
pub fn validate_local(
    title: &str,
    denylist: &Denylist,
    duplicates: &HashSet<String>,
) -> Option<TitleStatus> {
    if !template::has_accepted_extension(title) {
        return Some(TitleStatus::Invalid);
    }
    if denylist.is_blacklisted(title) {
        return Some(TitleStatus::Blacklisted);
    }
    if duplicates.contains(title) {
        return Some(TitleStatus::Duplicate);
    }
    None
}

struct VerifierInner {
    /// Single shared abort signal for all immediate-mode in-flight requests.
    /// Replaced with a fresh token on the first `verify` after a cancel;
    /// an aborted token is never reused.
    cancel: CancellationToken,
    /// Registry of pending trailing-debounce tasks, keyed by item id
    debounces: HashMap<String, JoinHandle<()>>,
}

/// Title verification engine handle. Cloneable; clones share the same
/// cancellation signal and debounce registry.
#[derive(Clone)]
pub struct TitleVerifier {
    store: SharedStore,
    denylist: SharedDenylist,
    http: reqwest::Client,
    api_base: String,
    inner: Arc<Mutex<VerifierInner>>,
}

impl TitleVerifier {
    pub fn new(store: SharedStore, denylist: SharedDenylist, api: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            store,
            denylist,
            http,
            api_base: api.base_url.clone(),
            inner: Arc::new(Mutex::new(VerifierInner {
                cancel: CancellationToken::new(),
                debounces: HashMap::new(),
            })),
        })
    }

    /// Verify the titles of the given items.
    ///
    /// Local failures are written to `title_status` immediately and skip the
    /// network. Survivors are marked `checking` before any network call,
    /// then checked remotely: in immediate mode as sequential fixed-size
    /// chunks under the shared cancellation signal, in debounced mode as an
    /// independent trailing 100 ms task per item id (re-invocation within
    /// the window replaces the pending task, so the latest title wins).
    pub async fn verify(&self, ids: &[String], debounce: bool) {
        let mut local: Vec<(String, TitleStatus)> = Vec::new();
        let mut remaining: Vec<(String, String)> = Vec::new();
        {
            let store = self.store.read().await;
            let denylist = self.denylist.read().await;
            let duplicates = find_duplicates(&store);
            for id in ids {
                let Some(item) = store.item(id) else {
                    tracing::warn!(id, "verify requested for unknown item");
                    continue;
                };
                let title = resolve_effective_title(item, &store.globals);
                match validate_local(&title, &denylist, &duplicates) {
                    Some(status) => local.push((id.clone(), status)),
                    None => remaining.push((id.clone(), title)),
                }
            }
        }

        {
            let mut store = self.store.write().await;
            for (id, status) in local {
                store.set_title_status(&id, Some(status));
            }
            for (id, _) in &remaining {
                store.set_title_status(id, Some(TitleStatus::Checking));
            }
        }

        if remaining.is_empty() {
            return;
        }

        let token = {
            let mut inner = self.inner.lock().await;
            if inner.cancel.is_cancelled() {
                inner.cancel = CancellationToken::new();
            }
            inner.cancel.clone()
        };

        if debounce {
            for (id, title) in remaining {
                let this = self.clone();
                let task_title = title.clone();
                let task_id = id.clone();
                let task = tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;
                    this.check_and_apply(&[(task_id, task_title)]).await;
                });
                let mut inner = self.inner.lock().await;
                // Drop handles of timers that already fired so the registry
                // only ever holds live tasks.
                inner.debounces.retain(|_, pending| !pending.is_finished());
                if let Some(previous) = inner.debounces.insert(id, task) {
                    previous.abort();
                }
            }
        } else {
            for chunk in remaining.chunks(LOOKUP_CHUNK_SIZE) {
                if token.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = self.check_and_apply(chunk) => {}
                }
            }
        }
    }

    /// Number of debounce timers currently registered. Finished timers are
    /// pruned when the next one is registered.
    pub async fn pending_debounces(&self) -> usize {
        self.inner.lock().await.debounces.len()
    }

    /// Cancel all verification work: fires the shared abort signal, cancels
    /// every pending debounce timer, clears the registry, and resets items
    /// still `checking` back to `unknown`. A no-op when nothing is in
    /// flight.
    pub async fn cancel(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.cancel.cancel();
            for (_, task) in inner.debounces.drain() {
                task.abort();
            }
        }
        self.store.write().await.reset_checking_to_unknown();
    }

    /// One lookup round trip plus store write-back. Transport failures are
    /// swallowed: affected items stay `checking` for the caller to retry.
    async fn check_and_apply(&self, pairs: &[(String, String)]) {
        match self.check_chunk(pairs).await {
            Ok(statuses) => {
                let mut store = self.store.write().await;
                for (id, status) in statuses {
                    let still_checking = store
                        .item(&id)
                        .map(|i| i.meta.title_status == Some(TitleStatus::Checking))
                        .unwrap_or(false);
                    if still_checking {
                        store.set_title_status(&id, Some(status));
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "title lookup failed, items remain checking");
            }
        }
    }

    /// Query existence for up to one chunk of titles. Each requested title
    /// is resolved through the response's normalization map before matching
    /// against the reported pages.
    async fn check_chunk(&self, pairs: &[(String, String)]) -> Result<Vec<(String, TitleStatus)>> {
        let requested: Vec<String> = pairs
            .iter()
            .map(|(_, title)| format!("File:{title}"))
            .collect();
        let titles = requested.join("|");

        let response = self
            .http
            .get(&self.api_base)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("formatversion", "2"),
                ("prop", "revisions"),
                ("rvprop", "ids"),
                ("titles", titles.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!("HTTP {}", response.status())));
        }

        // A malformed body yields unknown for every title, never an error
        // visible past this engine.
        let parsed = response
            .json::<LookupResponse>()
            .await
            .unwrap_or_default()
            .query
            .unwrap_or_default();

        let normalization: HashMap<&str, &str> = parsed
            .normalized
            .iter()
            .map(|n| (n.from.as_str(), n.to.as_str()))
            .collect();

        let mut statuses = Vec::with_capacity(pairs.len());
        for ((id, _), full_title) in pairs.iter().zip(requested.iter()) {
            let canonical = normalization
                .get(full_title.as_str())
                .copied()
                .unwrap_or(full_title.as_str());
            let status = match parsed.pages.iter().find(|p| p.title == canonical) {
                Some(page) if page.missing => TitleStatus::Available,
                Some(page) if !page.revisions.is_empty() => TitleStatus::Taken,
                _ => TitleStatus::Unknown,
            };
            statuses.push((id.clone(), status));
        }
        Ok(statuses)
    }
}

#[derive(Debug, Default, Deserialize)]
struct LookupResponse {
    query: Option<LookupBody>,
}

#[derive(Debug, Default, Deserialize)]
struct LookupBody {
    #[serde(default)]
    normalized: Vec<Normalization>,
    #[serde(default)]
    pages: Vec<LookupPage>,
}

#[derive(Debug, Deserialize)]
struct Normalization {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct LookupPage {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    revisions: Vec<serde_json::Value>,
}

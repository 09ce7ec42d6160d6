//! Non-visual glue that the browsing views run: feed loading with an empty
//! fallback, mount liveness, the continue-watching row, per-card state and
//! watch page resolution.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::{
    sync::{Notify, broadcast::error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

use crate::media::{
    MediaItem, PlaceholderMeta, ViewsPolicy, apply_views_policy, featured_placeholder,
    normalize_feed, normalize_single, trending_placeholders,
};
use crate::sync::WatchKey;
use crate::upstream::{UpstreamClient, UpstreamError};
use crate::watch_state::{StoreError, WatchProgressRecord, WatchStateStore};

pub const FEED_QUERY: &str = "anime";
pub const FEED_PAGE_SIZE: u32 = 5;

/// Liveness flag shared between a view and the work it started. Anything
/// finishing after `unmount` must be dropped instead of applied.
#[derive(Clone)]
pub struct MountGuard {
    mounted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for MountGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl MountGuard {
    pub fn new() -> Self {
        Self {
            mounted: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn apply_if_mounted<T>(&self, value: T) -> Option<T> {
        if self.is_mounted() {
            Some(value)
        } else {
            debug!("discarding result for unmounted view");
            None
        }
    }

    /// Resolves once `unmount` has been called.
    pub async fn unmounted(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_mounted() {
                return;
            }
            notified.await;
        }
    }
}

/// Feeds the home and watch pages render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// "Trending Now" rows on the home page.
    Trending,
    /// Hero carousel.
    Featured,
    /// Sidebar next to the player; excludes the video being watched.
    Related { current_id: u64 },
}

impl Feed {
    fn placeholders(self) -> Vec<PlaceholderMeta> {
        match self {
            Feed::Trending => trending_placeholders(),
            Feed::Featured => featured_placeholder(FEED_PAGE_SIZE as usize),
            Feed::Related { .. } => Vec::new(),
        }
    }

    fn views_policy(self) -> ViewsPolicy {
        match self {
            Feed::Trending => ViewsPolicy::Fabricate,
            Feed::Featured | Feed::Related { .. } => ViewsPolicy::Omit,
        }
    }

    fn fetch(self, client: &UpstreamClient) -> Result<Value, UpstreamError> {
        match self {
            Feed::Featured => client.fetch_popular_videos(FEED_PAGE_SIZE),
            Feed::Trending | Feed::Related { .. } => client.search_videos(FEED_QUERY, FEED_PAGE_SIZE),
        }
    }
}

async fn run_blocking<T, F>(client: Arc<UpstreamClient>, call: F) -> Result<T, UpstreamError>
where
    T: Send + 'static,
    F: FnOnce(&UpstreamClient) -> Result<T, UpstreamError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(&client))
        .await
        .map_err(|err| UpstreamError::Transport(err.to_string()))?
}

/// Fetches and normalises a feed. Upstream failures become an empty list;
/// `None` means the view went away while the fetch was outstanding.
pub async fn load_feed(
    client: Arc<UpstreamClient>,
    feed: Feed,
    guard: &MountGuard,
) -> Option<Vec<MediaItem>> {
    let result = run_blocking(client, move |client| feed.fetch(client)).await;
    let mut items = match result {
        Ok(payload) => normalize_feed(&payload, &feed.placeholders()),
        Err(err) => {
            error!(?feed, error = %err, "loading feed failed");
            Vec::new()
        }
    };
    if let Feed::Related { current_id } = feed {
        items.retain(|item| item.id != current_id);
    }
    apply_views_policy(&mut items, feed.views_policy());
    guard.apply_if_mounted(items)
}

/// The "Continue Watching" row. Holds a snapshot of the store and keeps it
/// current while mounted.
pub struct ContinueWatchingView {
    store: WatchStateStore,
    items: Arc<RwLock<Vec<WatchProgressRecord>>>,
    guard: MountGuard,
}

impl ContinueWatchingView {
    pub fn mount(store: WatchStateStore) -> Self {
        let view = Self {
            store,
            items: Arc::new(RwLock::new(Vec::new())),
            guard: MountGuard::new(),
        };
        view.reload();
        view
    }

    pub fn items(&self) -> Vec<WatchProgressRecord> {
        self.items.read().clone()
    }

    /// The row is hidden when there is nothing to continue.
    pub fn is_visible(&self) -> bool {
        !self.items.read().is_empty()
    }

    pub fn reload(&self) {
        reload_into(&self.store, &self.items);
    }

    pub fn remove(&self, id: u64) -> Result<bool, StoreError> {
        let removed = self.store.remove_from_continue_watching(id)?;
        self.reload();
        Ok(removed)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.clear_continue_watching()?;
        self.items.write().clear();
        Ok(())
    }

    pub fn guard(&self) -> &MountGuard {
        &self.guard
    }

    pub fn unmount(&self) {
        self.guard.unmount();
    }

    /// Reloads the snapshot on every continue-watching change, local or
    /// foreign, until the view unmounts.
    pub fn spawn_sync(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let items = self.items.clone();
        let guard = self.guard.clone();
        let mut changes = store.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = guard.unmounted() => break,
                    change = changes.recv() => match change {
                        Ok(change) if change.key == WatchKey::ContinueWatching => {
                            reload_into(&store, &items);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "continue-watching view lagged; reloading");
                            reload_into(&store, &items);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

fn reload_into(store: &WatchStateStore, items: &RwLock<Vec<WatchProgressRecord>>) {
    *items.write() = store.continue_watching_recent();
}

/// Per-card state: watch-later flag and, on continue-watching cards, the
/// stored progress.
#[derive(Debug, Clone)]
pub struct VideoCardState {
    pub item: MediaItem,
    pub is_watch_later: bool,
    pub progress: Option<u8>,
    show_progress: bool,
}

impl VideoCardState {
    pub fn load(store: &WatchStateStore, item: MediaItem, show_progress: bool) -> Self {
        let mut card = Self {
            item,
            is_watch_later: false,
            progress: None,
            show_progress,
        };
        card.refresh(store);
        card
    }

    pub fn refresh(&mut self, store: &WatchStateStore) {
        self.is_watch_later = store.is_watch_later(self.item.id);
        self.progress = if self.show_progress {
            store
                .continue_watching_entry(self.item.id)
                .map(|record| record.progress_percent)
                .filter(|progress| *progress > 0)
        } else {
            None
        };
    }

    pub fn toggle_watch_later(&mut self, store: &WatchStateStore) -> Result<bool, StoreError> {
        self.is_watch_later = store.toggle_watch_later(self.item.id)?;
        Ok(self.is_watch_later)
    }

    /// Opening a card records it as being watched at `progress` percent.
    pub fn open(
        &mut self,
        store: &WatchStateStore,
        progress: u8,
    ) -> Result<WatchProgressRecord, StoreError> {
        let record = store.record_progress(&self.item, progress)?;
        if self.show_progress {
            self.progress = Some(record.progress_percent).filter(|progress| *progress > 0);
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchPage {
    NotFound(String),
    Ready(MediaItem),
}

/// Resolves the `id` query parameter of the watch page. A ready page is also
/// upserted into continue watching, keeping any progress already stored.
/// Returns `None` when the page unmounted before the fetch finished.
pub async fn resolve_watch_page(
    client: Arc<UpstreamClient>,
    store: &WatchStateStore,
    id_param: Option<&str>,
    guard: &MountGuard,
) -> Option<WatchPage> {
    let Some(raw_id) = id_param.map(str::trim).filter(|id| !id.is_empty()) else {
        return Some(WatchPage::NotFound("No video ID provided".to_string()));
    };
    let Ok(id) = raw_id.parse::<u64>() else {
        return Some(WatchPage::NotFound("Invalid video ID".to_string()));
    };

    let result = run_blocking(client, move |client| client.fetch_video(id)).await;
    if !guard.is_mounted() {
        debug!(id, "watch page unmounted before video arrived");
        return None;
    }

    let page = match result {
        Ok(payload) => match normalize_single(&payload) {
            Some(item) => WatchPage::Ready(item),
            None => WatchPage::NotFound(
                "The video you're looking for doesn't exist.".to_string(),
            ),
        },
        Err(err) => {
            error!(id, error = %err, "fetching video failed");
            WatchPage::NotFound("Failed to fetch video".to_string())
        }
    };

    if let WatchPage::Ready(item) = &page {
        let progress = store
            .continue_watching_entry(item.id)
            .map(|record| record.progress_percent)
            .unwrap_or(0);
        if let Err(err) = store.record_progress(item, progress) {
            warn!(id, error = %err, "could not update continue watching");
        }
    }
    Some(page)
}

//! Process-wide query cache keyed by [`Descriptor`].
//!
//! Each entry holds the last known result, a loading flag and the last fetch
//! error. Concurrent requests for one descriptor share a single in-flight
//! fetch. Invalidation marks entries stale and refetches those that have a
//! live [`Subscription`]; stale data stays readable until the refetch lands.

use crate::error::CoreError;
use crate::model::{CatalogKind, Company, Folder, Message};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Identifies one query: entity kind plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Descriptor {
    Companies { user_id: String },
    Messages { company_id: String },
    Folders { user_id: String },
    Catalog { kind: CatalogKind, user_id: String },
}

impl Descriptor {
    pub fn companies(user_id: &str) -> Self {
        Descriptor::Companies {
            user_id: user_id.to_string(),
        }
    }

    pub fn messages(company_id: &str) -> Self {
        Descriptor::Messages {
            company_id: company_id.to_string(),
        }
    }

    pub fn folders(user_id: &str) -> Self {
        Descriptor::Folders {
            user_id: user_id.to_string(),
        }
    }

    pub fn catalog(kind: CatalogKind, user_id: &str) -> Self {
        Descriptor::Catalog {
            kind,
            user_id: user_id.to_string(),
        }
    }

    /// Key path used for prefix matching, most general segment first.
    pub fn segments(&self) -> Vec<&str> {
        match self {
            Descriptor::Companies { user_id } => vec!["companies", user_id.as_str()],
            Descriptor::Messages { company_id } => vec!["messages", company_id.as_str()],
            Descriptor::Folders { user_id } => vec!["folders", user_id.as_str()],
            Descriptor::Catalog { kind, user_id } => {
                vec!["catalog", kind.as_str(), user_id.as_str()]
            }
        }
    }
}

/// A descriptor or any leading part of one's key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPrefix(Vec<String>);

impl DescriptorPrefix {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, descriptor: &Descriptor) -> bool {
        let segments = descriptor.segments();
        self.0.len() <= segments.len() && self.0.iter().zip(segments).all(|(a, b)| a == b)
    }
}

impl From<&Descriptor> for DescriptorPrefix {
    fn from(d: &Descriptor) -> Self {
        DescriptorPrefix::new(d.segments())
    }
}

impl From<Descriptor> for DescriptorPrefix {
    fn from(d: Descriptor) -> Self {
        DescriptorPrefix::from(&d)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    Companies(Vec<Company>),
    Messages(Vec<Message>),
    Folders(Vec<Folder>),
    Catalog(Vec<String>),
}

impl QueryData {
    pub fn as_companies(&self) -> Option<&[Company]> {
        match self {
            QueryData::Companies(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_messages(&self) -> Option<&[Message]> {
        match self {
            QueryData::Messages(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_folders(&self) -> Option<&[Folder]> {
        match self {
            QueryData::Folders(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_catalog(&self) -> Option<&[String]> {
        match self {
            QueryData::Catalog(v) => Some(v),
            _ => None,
        }
    }
}

/// What a reader sees for a descriptor. Never an error value by itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub data: Option<QueryData>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Source of fresh data for a descriptor.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<QueryData, CoreError>;
}

type SharedFetch = Shared<BoxFuture<'static, Result<QueryData, CoreError>>>;

struct Entry {
    /// Distinguishes this entry from a later one under the same descriptor.
    id: u64,
    state: QueryState,
    stale: bool,
    generation: u64,
    in_flight: Option<SharedFetch>,
    observers: Arc<AtomicUsize>,
    tx: watch::Sender<QueryState>,
}

impl Entry {
    fn new(id: u64) -> Self {
        let (tx, _rx) = watch::channel(QueryState::default());
        Self {
            id,
            state: QueryState::default(),
            // Nothing fetched yet.
            stale: true,
            generation: 0,
            in_flight: None,
            observers: Arc::new(AtomicUsize::new(0)),
            tx,
        }
    }

    fn observed(&self) -> bool {
        self.observers.load(Ordering::SeqCst) > 0
    }

    fn publish(&self) {
        self.tx.send_replace(self.state.clone());
    }
}

struct Inner {
    fetcher: Arc<dyn Fetcher>,
    entries: Mutex<HashMap<Descriptor, Entry>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache").finish_non_exhaustive()
    }
}

impl QueryCache {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current state for `descriptor`. Starts a background fetch when the
    /// entry is missing or stale and nothing is in flight.
    pub async fn get(&self, descriptor: &Descriptor) -> QueryState {
        let mut entries = self.inner.entries.lock().await;
        let entry = self.inner.entry(&mut entries, descriptor);
        if entry.stale && entry.in_flight.is_none() {
            Inner::start(&self.inner, entry, descriptor);
        }
        entry.state.clone()
    }

    /// Current state without triggering any fetch.
    pub async fn peek(&self, descriptor: &Descriptor) -> Option<QueryState> {
        let entries = self.inner.entries.lock().await;
        entries.get(descriptor).map(|e| e.state.clone())
    }

    /// Waits for data at least as new as the latest invalidation. Joins an
    /// in-flight fetch, or starts one when the entry is missing, stale or
    /// failed last time. A joined fetch that started before an invalidation
    /// is followed by another one, so a caller that awaited a write always
    /// sees the store after it.
    pub async fn fetch(&self, descriptor: &Descriptor) -> QueryState {
        let mut entry_id = None;
        loop {
            let pending = {
                let mut entries = self.inner.entries.lock().await;
                let entry = match entry_id {
                    None => self.inner.entry(&mut entries, descriptor),
                    Some(id) => match entries.get_mut(descriptor) {
                        Some(entry) if entry.id == id => entry,
                        // Cleared while waiting.
                        _ => return QueryState::default(),
                    },
                };
                let first = entry_id.replace(entry.id).is_none();
                match entry.in_flight.clone() {
                    Some(fut) => {
                        debug!(
                            ?descriptor,
                            generation = entry.generation,
                            "joining in-flight fetch"
                        );
                        fut
                    }
                    None if entry.stale || (first && entry.state.error.is_some()) => {
                        Inner::start(&self.inner, entry, descriptor)
                    }
                    None => return entry.state.clone(),
                }
            };
            let _ = pending.await;
        }
    }

    /// Registers a live observer. While any subscription for a descriptor
    /// is alive, invalidation refetches it immediately.
    pub async fn subscribe(&self, descriptor: &Descriptor) -> Subscription {
        let mut entries = self.inner.entries.lock().await;
        let entry = self.inner.entry(&mut entries, descriptor);
        entry.observers.fetch_add(1, Ordering::SeqCst);
        let rx = entry.tx.subscribe();
        if entry.stale && entry.in_flight.is_none() {
            Inner::start(&self.inner, entry, descriptor);
        }
        Subscription {
            entry_id: entry.id,
            rx,
            observers: entry.observers.clone(),
        }
    }

    /// Marks every entry under `prefix` stale. Observed entries are
    /// refetched; the rest refetch on their next read. Returns the matched
    /// descriptors.
    pub async fn invalidate(&self, prefix: impl Into<DescriptorPrefix>) -> Vec<Descriptor> {
        let prefix = prefix.into();
        let mut entries = self.inner.entries.lock().await;
        let mut matched = Vec::new();
        for (descriptor, entry) in entries.iter_mut() {
            if !prefix.matches(descriptor) {
                continue;
            }
            entry.stale = true;
            entry.generation += 1;
            if entry.observed() && entry.in_flight.is_none() {
                Inner::start(&self.inner, entry, descriptor);
            }
            matched.push(descriptor.clone());
        }
        debug!(?prefix, count = matched.len(), "invalidated");
        matched
    }

    /// Drops every entry. Fetches still in flight finish but their results
    /// are discarded.
    pub async fn clear(&self) {
        self.inner.entries.lock().await.clear();
    }
}

impl Inner {
    fn entry<'a>(
        &self,
        entries: &'a mut HashMap<Descriptor, Entry>,
        descriptor: &Descriptor,
    ) -> &'a mut Entry {
        entries
            .entry(descriptor.clone())
            .or_insert_with(|| Entry::new(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    /// Spawns a fetch for `entry` and records it as in flight. Caller holds
    /// the table lock.
    fn start(this: &Arc<Self>, entry: &mut Entry, descriptor: &Descriptor) -> SharedFetch {
        let inner = Arc::clone(this);
        let descriptor = descriptor.clone();
        let entry_id = entry.id;
        let generation = entry.generation;
        debug!(?descriptor, generation, "starting fetch");

        let fut = async move {
            let result = inner.fetcher.fetch(&descriptor).await;
            inner.complete(&descriptor, entry_id, generation, &result).await;
            result
        }
        .boxed()
        .shared();

        entry.in_flight = Some(fut.clone());
        entry.state.is_loading = true;
        entry.publish();
        tokio::spawn(fut.clone());
        fut
    }

    async fn complete(
        self: &Arc<Self>,
        descriptor: &Descriptor,
        entry_id: u64,
        generation: u64,
        result: &Result<QueryData, CoreError>,
    ) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(descriptor) else {
            debug!(?descriptor, "entry gone; dropping fetch result");
            return;
        };
        if entry.id != entry_id {
            debug!(?descriptor, "entry replaced; dropping fetch result");
            return;
        }
        entry.in_flight = None;
        match result {
            Ok(data) => {
                entry.state.data = Some(data.clone());
                entry.state.error = None;
                entry.stale = entry.generation != generation;
            }
            Err(err) => {
                warn!(?descriptor, %err, "fetch failed; keeping previous data");
                entry.state.error = Some(err.to_string());
                entry.stale = entry.generation != generation;
            }
        }
        entry.state.is_loading = false;
        // Invalidated while this fetch was running: go again for observers.
        if entry.stale && entry.observed() {
            Self::start(self, entry, descriptor);
        } else {
            entry.publish();
        }
    }
}

/// Live interest in one descriptor. Dropping it stops delivery of any
/// result that resolves afterwards.
#[derive(Debug)]
pub struct Subscription {
    entry_id: u64,
    rx: watch::Receiver<QueryState>,
    observers: Arc<AtomicUsize>,
}

impl Subscription {
    pub fn current(&self) -> QueryState {
        self.rx.borrow().clone()
    }

    /// Waits for the next published state. `None` once the entry has been
    /// dropped from the cache.
    pub async fn changed(&mut self) -> Option<QueryState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Waits until the entry has settled (not loading).
    pub async fn settled(&mut self) -> Option<QueryState> {
        loop {
            let state = self.rx.borrow_and_update().clone();
            if !state.is_loading {
                return Some(state);
            }
            self.rx.changed().await.ok()?;
        }
    }

    pub fn entry_id(&self) -> u64 {
        self.entry_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.observers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    /// Counts calls, optionally blocks until released, optionally fails.
    #[derive(Default)]
    struct ScriptedFetcher {
        calls: AtomicUsize,
        fail: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, _descriptor: &Descriptor) -> Result<QueryData, CoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::Remote("boom".into()));
            }
            Ok(QueryData::Catalog(vec![format!("v{n}")]))
        }
    }

    fn desc() -> Descriptor {
        Descriptor::catalog(CatalogKind::Selectors, "u1")
    }

    #[test]
    fn prefix_matching() {
        let d = Descriptor::messages("c1");
        assert!(DescriptorPrefix::new(["messages"]).matches(&d));
        assert!(DescriptorPrefix::from(&d).matches(&d));
        assert!(!DescriptorPrefix::new(["messages", "c2"]).matches(&d));
        assert!(!DescriptorPrefix::new(["companies"]).matches(&d));
        assert!(!DescriptorPrefix::new(["messages", "c1", "extra"]).matches(&d));
    }

    #[tokio::test]
    async fn concurrent_fetches_are_coalesced() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let cache = QueryCache::new(fetcher.clone());

        let a = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(&desc()).await }
        });
        let b = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(&desc()).await }
        });
        // Let both callers register before releasing the single fetch.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        gate.notify_one();

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, b);
        assert_eq!(a.data, Some(QueryData::Catalog(vec!["v1".into()])));
    }

    #[tokio::test]
    async fn fresh_entries_are_served_without_fetching() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let cache = QueryCache::new(fetcher.clone());
        cache.fetch(&desc()).await;
        let state = cache.fetch(&desc()).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(!state.is_loading);

        let state = cache.get(&desc()).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.data, Some(QueryData::Catalog(vec!["v1".into()])));
    }

    #[tokio::test]
    async fn failed_refetch_keeps_previous_data() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let cache = QueryCache::new(fetcher.clone());
        cache.fetch(&desc()).await;

        fetcher.fail.store(true, Ordering::SeqCst);
        cache.invalidate(&desc()).await;
        let state = cache.fetch(&desc()).await;
        assert_eq!(state.data, Some(QueryData::Catalog(vec!["v1".into()])));
        assert!(state.error.as_deref().unwrap().contains("boom"));
        assert!(!state.is_loading);

        fetcher.fail.store(false, Ordering::SeqCst);
        let state = cache.fetch(&desc()).await;
        assert!(state.error.is_none());
        assert_eq!(state.data, Some(QueryData::Catalog(vec!["v3".into()])));
    }

    #[tokio::test]
    async fn stale_data_stays_visible_while_loading() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let cache = QueryCache::new(fetcher.clone());
        let mut sub = cache.subscribe(&desc()).await;
        gate.notify_one();
        let first = sub.settled().await.unwrap();
        assert_eq!(first.data, Some(QueryData::Catalog(vec!["v1".into()])));

        let matched = cache.invalidate(DescriptorPrefix::new(["catalog"])).await;
        assert_eq!(matched, vec![desc()]);
        let during = cache.peek(&desc()).await.unwrap();
        assert!(during.is_loading);
        assert_eq!(during.data, first.data);

        gate.notify_one();
        let after = sub.settled().await.unwrap();
        assert_eq!(after.data, Some(QueryData::Catalog(vec!["v2".into()])));
    }

    #[tokio::test]
    async fn unobserved_entries_refetch_lazily() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let cache = QueryCache::new(fetcher.clone());
        cache.fetch(&desc()).await;
        cache.invalidate(&desc()).await;
        tokio::task::yield_now().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let state = cache.fetch(&desc()).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.data, Some(QueryData::Catalog(vec!["v2".into()])));
    }

    #[tokio::test]
    async fn cleared_entries_ignore_late_results() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let cache = QueryCache::new(fetcher.clone());
        let first = cache.subscribe(&desc()).await;
        let first_id = first.entry_id();
        cache.clear().await;
        drop(first);

        // A new entry under the same descriptor must not see the old result.
        let _ = cache.get(&desc()).await;
        gate.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let mut second = cache.subscribe(&desc()).await;
        assert_ne!(second.entry_id(), first_id);
        gate.notify_one();
        let settled = second.settled().await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(settled.data, Some(QueryData::Catalog(vec!["v2".into()])));
    }

    #[tokio::test]
    async fn fetch_after_invalidation_does_not_settle_on_older_data() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let cache = QueryCache::new(fetcher.clone());

        // Started before the write, still running when it lands.
        let _ = cache.get(&desc()).await;
        tokio::task::yield_now().await;
        cache.invalidate(&desc()).await;

        let reader = tokio::spawn({
            let cache = cache.clone();
            async move { cache.fetch(&desc()).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        gate.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        gate.notify_one();

        let state = reader.await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.data, Some(QueryData::Catalog(vec!["v2".into()])));
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn invalidation_during_a_failing_fetch_is_not_lost() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher {
            gate: Some(gate.clone()),
            fail: AtomicBool::new(true),
            ..Default::default()
        });
        let cache = QueryCache::new(fetcher.clone());
        let mut sub = cache.subscribe(&desc()).await;
        tokio::task::yield_now().await;
        cache.invalidate(&desc()).await;

        gate.notify_one();
        let failed = loop {
            let state = sub.changed().await.unwrap();
            if state.error.is_some() {
                break state;
            }
        };
        // The failure is published together with the refetch it triggered.
        assert!(failed.is_loading);

        fetcher.fail.store(false, Ordering::SeqCst);
        gate.notify_one();
        let settled = sub.settled().await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(settled.error.is_none());
        assert_eq!(settled.data, Some(QueryData::Catalog(vec!["v2".into()])));
    }
}

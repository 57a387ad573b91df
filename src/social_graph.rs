//! In-network membership for a root user, derived from the follow graph.
//!
//! The cache publishes immutable [`GraphSnapshot`]s through a `watch`
//! channel. Follow-list changes near the root trigger a background
//! breadth-first recompute; a newer trigger aborts the one in flight.
//! Readers always see the last converged snapshot.

use crate::processor::GraphChange;
use event_store::{Author, EventRepository};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default traversal depth: direct follows and their follows.
pub const DEFAULT_MAX_HOPS: u8 = 2;

/// One converged traversal from the root.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub root: String,
    /// 0 until the first traversal completes.
    pub generation: u64,
    /// Hop distance of every reached pubkey; the root is at 0.
    pub distances: HashMap<String, u8>,
    /// Follow edges of every expanded node (distance below the hop limit).
    pub adjacency: HashMap<String, BTreeSet<String>>,
}

impl GraphSnapshot {
    fn empty(root: &str) -> Self {
        Self {
            root: root.to_string(),
            ..Default::default()
        }
    }

    pub fn distance(&self, pubkey: &str) -> Option<u8> {
        self.distances.get(pubkey).copied()
    }

    pub fn followed_keys(&self) -> BTreeSet<String> {
        self.distances
            .iter()
            .filter(|(pk, d)| **d == 1 && **pk != self.root)
            .map(|(pk, _)| pk.clone())
            .collect()
    }
}

struct Inner {
    repo: Arc<dyn EventRepository>,
    root: String,
    max_hops: u8,
    generation: AtomicU64,
    snapshot: watch::Sender<Arc<GraphSnapshot>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct SocialGraphCache {
    inner: Arc<Inner>,
}

impl SocialGraphCache {
    /// Create the cache and start the first traversal. Must be called from
    /// inside a tokio runtime.
    pub fn spawn(repo: Arc<dyn EventRepository>, root: impl Into<String>, max_hops: u8) -> Self {
        let root = root.into();
        let (snapshot, _) = watch::channel(Arc::new(GraphSnapshot::empty(&root)));
        let cache = Self {
            inner: Arc::new(Inner {
                repo,
                root,
                max_hops: max_hops.max(1),
                generation: AtomicU64::new(0),
                snapshot,
                task: Mutex::new(None),
            }),
        };
        cache.recompute();
        cache
    }

    pub fn root(&self) -> &str {
        &self.inner.root
    }

    pub fn max_hops(&self) -> u8 {
        self.inner.max_hops
    }

    /// The last converged snapshot.
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<GraphSnapshot>> {
        self.inner.snapshot.subscribe()
    }

    /// Wait until the most recently triggered traversal has been published.
    pub async fn converged(&self) -> Arc<GraphSnapshot> {
        let mut rx = self.subscribe();
        loop {
            let wanted = self.inner.generation.load(Ordering::SeqCst);
            let current = rx.borrow_and_update().clone();
            if current.generation >= wanted {
                return current;
            }
            if rx.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Pubkeys the root follows directly, never including the root.
    pub fn followed_keys(&self) -> BTreeSet<String> {
        self.snapshot().followed_keys()
    }

    /// Whether `pubkey` is within the hop limit of the root. The root itself
    /// is never in its own network.
    pub fn is_in_network(&self, pubkey: &str) -> bool {
        if pubkey == self.inner.root {
            return false;
        }
        self.snapshot()
            .distance(pubkey)
            .is_some_and(|d| d >= 1 && d <= self.inner.max_hops)
    }

    /// The root's direct follows who themselves follow `target`, most
    /// recently updated contact list first.
    pub fn known_followers(&self, target: &str) -> Vec<Author> {
        let followed = self.followed_keys();
        if followed.is_empty() {
            return Vec::new();
        }
        let followers = match self.inner.repo.followers(target) {
            Ok(followers) => followers,
            Err(e) => {
                warn!(target = %target, "failed to load followers: {}", e);
                return Vec::new();
            }
        };

        let mut authors: Vec<Author> = followers
            .into_iter()
            .map(|f| f.source)
            .filter(|source| followed.contains(source) && source != target)
            .filter_map(|source| match self.inner.repo.find_author(&source) {
                Ok(author) => Some(author.unwrap_or_else(|| Author::new(source))),
                Err(e) => {
                    warn!(author = %source, "failed to load author: {}", e);
                    None
                }
            })
            .collect();
        authors.sort_by(|a, b| {
            b.last_updated_contact_list()
                .cmp(&a.last_updated_contact_list())
                .then_with(|| a.pubkey.cmp(&b.pubkey))
        });
        authors
    }

    /// Known authors with no standing: outside the root's network, not
    /// muted, and with no stored events of their own.
    pub fn orphaned(&self) -> Vec<Author> {
        let authors = match self.inner.repo.authors() {
            Ok(authors) => authors,
            Err(e) => {
                warn!("failed to load authors: {}", e);
                return Vec::new();
            }
        };

        let snapshot = self.snapshot();
        let mut orphans: Vec<Author> = authors
            .into_iter()
            .filter(|a| a.pubkey != self.inner.root && !a.muted)
            .filter(|a| {
                !snapshot
                    .distance(&a.pubkey)
                    .is_some_and(|d| d <= self.inner.max_hops)
            })
            .filter(|a| match self.inner.repo.has_events_by(&a.pubkey) {
                Ok(has_events) => !has_events,
                Err(e) => {
                    warn!(author = %a.pubkey, "failed to check events: {}", e);
                    false
                }
            })
            .collect();
        orphans.sort_by_key(|a| Reverse(a.pubkey.clone()));
        orphans
    }

    // ── Recomputation ───────────────────────────────────────────

    /// React to a follow-list change. Only changes that can move the
    /// frontier trigger a recompute.
    pub fn notify(&self, change: GraphChange) {
        match change {
            GraphChange::FollowsChanged { source } => {
                let snapshot = self.snapshot();
                let pending = snapshot.generation < self.inner.generation.load(Ordering::SeqCst);
                let relevant = source == self.inner.root
                    || snapshot
                        .distance(&source)
                        .is_some_and(|d| d < self.inner.max_hops);
                if pending || relevant {
                    debug!(source = %source, "follow change inside frontier");
                    self.recompute();
                } else {
                    trace!(source = %source, "follow change outside frontier");
                }
            }
        }
    }

    /// Drain a processor's change channel until it closes.
    pub fn listen(&self, mut rx: mpsc::UnboundedReceiver<GraphChange>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                cache.notify(change);
            }
            debug!("graph change channel closed");
        })
    }

    /// Start a new traversal, superseding any in flight.
    pub fn recompute(&self) {
        let mut task = self.inner.task.lock();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = task.take() {
            previous.abort();
        }
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move {
            if let Some(snapshot) = traverse(&inner, generation).await {
                publish(&inner, snapshot);
            }
        }));
    }
}

fn is_current(inner: &Inner, generation: u64) -> bool {
    inner.generation.load(Ordering::SeqCst) == generation
}

/// Breadth-first walk from the root. Returns `None` once superseded.
async fn traverse(inner: &Inner, generation: u64) -> Option<GraphSnapshot> {
    let mut distances = HashMap::from([(inner.root.clone(), 0u8)]);
    let mut adjacency = HashMap::new();
    let mut frontier = vec![inner.root.clone()];

    for hop in 1..=inner.max_hops {
        let mut next = Vec::new();
        for node in frontier {
            tokio::task::yield_now().await;
            if !is_current(inner, generation) {
                trace!(generation, "traversal superseded");
                return None;
            }

            let destinations: BTreeSet<String> = match inner.repo.follows(&node) {
                Ok(follows) => follows.into_iter().map(|f| f.destination).collect(),
                Err(e) => {
                    warn!(node = %node, "failed to load follows: {}", e);
                    BTreeSet::new()
                }
            };
            for destination in &destinations {
                // The distance map doubles as the visited set.
                if !distances.contains_key(destination) {
                    distances.insert(destination.clone(), hop);
                    next.push(destination.clone());
                }
            }
            adjacency.insert(node, destinations);
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    Some(GraphSnapshot {
        root: inner.root.clone(),
        generation,
        distances,
        adjacency,
    })
}

fn publish(inner: &Inner, snapshot: GraphSnapshot) {
    let generation = snapshot.generation;
    let reached = snapshot.distances.len().saturating_sub(1);
    let published = inner.snapshot.send_if_modified(|current| {
        if current.generation < generation {
            *current = Arc::new(snapshot);
            true
        } else {
            false
        }
    });
    if published {
        info!(generation, reached, "social graph converged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{Follow, InMemoryRepository};
    use std::time::Duration;

    fn follow_all(repo: &InMemoryRepository, edges: &[(&str, &str)]) {
        let mut by_source: HashMap<&str, Vec<Follow>> = HashMap::new();
        for &(src, dst) in edges {
            repo.find_or_create_author(src).unwrap();
            repo.find_or_create_author(dst).unwrap();
            by_source.entry(src).or_default().push(Follow::new(src, dst));
        }
        for (src, follows) in by_source {
            repo.replace_follows(src, &follows).unwrap();
        }
    }

    fn cycle_repo() -> Arc<InMemoryRepository> {
        let repo = Arc::new(InMemoryRepository::new());
        follow_all(
            &repo,
            &[("alice", "bob"), ("bob", "carl"), ("carl", "eve"), ("eve", "alice")],
        );
        repo
    }

    #[tokio::test]
    async fn test_cycle_is_safe() {
        let cache = SocialGraphCache::spawn(cycle_repo(), "alice", DEFAULT_MAX_HOPS);
        let snapshot = cache.converged().await;
        assert_eq!(snapshot.generation, 1);

        assert_eq!(cache.followed_keys(), BTreeSet::from(["bob".to_string()]));
        assert!(cache.is_in_network("bob"));
        assert!(cache.is_in_network("carl"));
        assert!(!cache.is_in_network("eve"));
        assert!(!cache.is_in_network("alice"));

        let known: Vec<_> = cache.known_followers("carl").into_iter().map(|a| a.pubkey).collect();
        assert_eq!(known, vec!["bob"]);
        let orphans: Vec<_> = cache.orphaned().into_iter().map(|a| a.pubkey).collect();
        assert_eq!(orphans, vec!["eve"]);
    }

    #[tokio::test]
    async fn test_self_follow_has_no_effect() {
        let repo = Arc::new(InMemoryRepository::new());
        follow_all(&repo, &[("alice", "bob")]);
        let without = SocialGraphCache::spawn(repo.clone(), "alice", 2);
        without.converged().await;

        follow_all(&repo, &[("alice", "alice"), ("alice", "bob")]);
        let with = SocialGraphCache::spawn(repo, "alice", 2);
        with.converged().await;

        assert_eq!(without.followed_keys(), with.followed_keys());
        assert!(!with.is_in_network("alice"));
        assert!(with.is_in_network("bob"));
    }

    #[tokio::test]
    async fn test_uninitialized_cache_is_conservative() {
        let cache = SocialGraphCache::spawn(cycle_repo(), "alice", 2);
        // Nothing has run yet on the current-thread runtime.
        assert_eq!(cache.snapshot().generation, 0);
        assert!(cache.followed_keys().is_empty());
        assert!(!cache.is_in_network("bob"));
        assert!(cache.known_followers("carl").is_empty());

        cache.converged().await;
        assert!(cache.is_in_network("bob"));
    }

    #[tokio::test]
    async fn test_hop_limit_is_configurable() {
        let cache = SocialGraphCache::spawn(cycle_repo(), "alice", 3);
        cache.converged().await;
        assert!(cache.is_in_network("eve"));
        assert!(cache.orphaned().is_empty());

        let direct_only = SocialGraphCache::spawn(cycle_repo(), "alice", 1);
        direct_only.converged().await;
        assert!(direct_only.is_in_network("bob"));
        assert!(!direct_only.is_in_network("carl"));
    }

    #[tokio::test]
    async fn test_rapid_triggers_coalesce_to_latest_state() {
        let repo = cycle_repo();
        let cache = SocialGraphCache::spawn(repo.clone(), "alice", 2);

        for i in 0..10 {
            let friend = format!("friend{i}");
            follow_all(&repo, &[("alice", "bob"), ("alice", friend.as_str())]);
            cache.notify(GraphChange::FollowsChanged { source: "alice".into() });
        }

        let snapshot = cache.converged().await;
        assert_eq!(snapshot.generation, 11);
        assert!(cache.is_in_network("friend9"));
        assert!(!cache.is_in_network("friend0"));
    }

    #[tokio::test]
    async fn test_changes_outside_frontier_ignored() {
        let repo = cycle_repo();
        let cache = SocialGraphCache::spawn(repo, "alice", 2);
        cache.converged().await;

        cache.notify(GraphChange::FollowsChanged { source: "carl".into() });
        cache.notify(GraphChange::FollowsChanged { source: "zed".into() });
        assert_eq!(cache.converged().await.generation, 1);

        cache.notify(GraphChange::FollowsChanged { source: "bob".into() });
        assert_eq!(cache.converged().await.generation, 2);
    }

    #[tokio::test]
    async fn test_known_followers_ordered_by_contact_list_recency() {
        let repo = Arc::new(InMemoryRepository::new());
        follow_all(
            &repo,
            &[("alice", "bob"), ("alice", "dave"), ("bob", "carl"), ("dave", "carl")],
        );
        let mut dave = repo.find_author("dave").unwrap().unwrap();
        dave.contact_list = Some(event_store::ReplaceableStamp::new(50, "d"));
        repo.save_author(&dave).unwrap();
        let mut bob = repo.find_author("bob").unwrap().unwrap();
        bob.contact_list = Some(event_store::ReplaceableStamp::new(10, "b"));
        repo.save_author(&bob).unwrap();

        let cache = SocialGraphCache::spawn(repo, "alice", 2);
        cache.converged().await;
        let known: Vec<_> = cache.known_followers("carl").into_iter().map(|a| a.pubkey).collect();
        assert_eq!(known, vec!["dave", "bob"]);
    }

    #[tokio::test]
    async fn test_listen_follows_processor_notifications() {
        use crate::processor::tests::{pubkey, signed, NOW};
        use crate::processor::{EventProcessor, FixedClock};

        let repo = Arc::new(InMemoryRepository::new());
        let root = pubkey(1);
        let bob = pubkey(2);
        let cache = SocialGraphCache::spawn(repo.clone(), root.clone(), 2);
        cache.converged().await;

        let (tx, rx) = mpsc::unbounded_channel();
        let listener = cache.listen(rx);
        let processor = EventProcessor::new(repo)
            .with_clock(Arc::new(FixedClock(NOW)))
            .with_graph_notifier(tx);

        let mut updates = cache.subscribe();
        processor
            .process_raw(signed(1, 3, 100, vec![vec!["p", bob.as_str()]], ""), None)
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !updates.borrow_and_update().followed_keys().contains(&bob) {
                updates.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(cache.is_in_network(&bob));

        drop(processor);
        listener.await.unwrap();
    }
}

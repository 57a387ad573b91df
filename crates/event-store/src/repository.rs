//! The storage boundary used by the ingestion core.

use crate::error::Result;
use crate::model::{Author, AuthorList, Event, EventFilter, Follow};

/// Typed finders and upserts over events, authors and follow edges.
///
/// Implementations use interior mutability so one instance can be shared
/// as `Arc<dyn EventRepository>` between the single writer and any number
/// of readers. Readers may observe writes with a delay; no locking is
/// exposed through this trait.
pub trait EventRepository: Send + Sync {
    // ── Events ──────────────────────────────────────────────────

    /// The row with this identifier, stub or hydrated.
    fn find_by_id(&self, id: &str) -> Result<Option<Event>>;

    /// The row at a parameterized address `(replaceable_id, author, kind)`.
    fn find_stub(&self, replaceable_id: &str, author: &str, kind: u16) -> Result<Option<Event>>;

    /// Insert or update a row. Returns its `local_id`.
    fn save_event(&self, event: &Event) -> Result<i64>;

    /// Drop a row. A missing row is not an error.
    fn delete_event(&self, local_id: i64) -> Result<()>;

    /// Save `event` and drop the row at `retired` in one write.
    ///
    /// Used when a parameterized event is hydrated from an id stub while an
    /// older version still occupies its address.
    fn replace_event(&self, event: &Event, retired: i64) -> Result<i64> {
        self.delete_event(retired)?;
        self.save_event(event)
    }

    /// Delete every event whose expiration is at or before `now`.
    /// Returns how many rows went.
    fn purge_expired(&self, now: f64) -> Result<usize>;

    /// Predicate fetch, newest `created_at` first.
    fn events(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    /// Whether the author has at least one hydrated event.
    fn has_events_by(&self, pubkey: &str) -> Result<bool>;

    // ── Authors ─────────────────────────────────────────────────

    fn find_author(&self, pubkey: &str) -> Result<Option<Author>>;

    fn find_or_create_author(&self, pubkey: &str) -> Result<Author> {
        if let Some(author) = self.find_author(pubkey)? {
            return Ok(author);
        }
        let author = Author::new(pubkey);
        self.save_author(&author)?;
        Ok(author)
    }

    fn save_author(&self, author: &Author) -> Result<()>;

    fn authors(&self) -> Result<Vec<Author>>;

    fn muted_authors(&self) -> Result<Vec<Author>>;

    // ── Follow graph ────────────────────────────────────────────

    /// Edges where `source` is the follower.
    fn follows(&self, source: &str) -> Result<Vec<Follow>>;

    /// Edges where `destination` is followed.
    fn followers(&self, destination: &str) -> Result<Vec<Follow>>;

    /// Replace every edge out of `source` with `follows`.
    fn replace_follows(&self, source: &str, follows: &[Follow]) -> Result<()>;

    // ── Author lists ────────────────────────────────────────────

    fn find_author_list(&self, owner: &str, kind: u16, identifier: &str) -> Result<Option<AuthorList>>;

    fn save_author_list(&self, list: &AuthorList) -> Result<()>;
}

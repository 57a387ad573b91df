//! Heap-backed repository built on explicit adjacency maps.

use crate::error::{Result, StoreError};
use crate::model::{Author, AuthorList, Event, EventFilter, Follow};
use crate::repository::EventRepository;
use nostr_core::kind::Kind;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

type AddressKey = (u16, String, String);

#[derive(Default)]
struct State {
    next_local_id: i64,
    events: BTreeMap<i64, Event>,
    by_id: HashMap<String, i64>,
    by_address: HashMap<AddressKey, i64>,
    authors: BTreeMap<String, Author>,
    /// source -> destination -> edge
    follows: HashMap<String, BTreeMap<String, Follow>>,
    /// destination -> sources
    followers: HashMap<String, BTreeSet<String>>,
    author_lists: HashMap<AddressKey, AuthorList>,
}

fn address_of(event: &Event) -> Option<AddressKey> {
    let kind = event.kind?;
    if !Kind::from(kind).is_parameterized() {
        return None;
    }
    Some((kind, event.pubkey.clone()?, event.replaceable_id.clone()?))
}

impl State {
    fn unindex(&mut self, local_id: i64) {
        if let Some(old) = self.events.get(&local_id) {
            if let Some(id) = &old.id {
                if self.by_id.get(id) == Some(&local_id) {
                    self.by_id.remove(id);
                }
            }
            if let Some(addr) = address_of(old) {
                if self.by_address.get(&addr) == Some(&local_id) {
                    self.by_address.remove(&addr);
                }
            }
        }
    }

    fn index(&mut self, local_id: i64, event: &Event) {
        if let Some(id) = &event.id {
            self.by_id.insert(id.clone(), local_id);
        }
        if let Some(addr) = address_of(event) {
            self.by_address.insert(addr, local_id);
        }
    }

    fn upsert(&mut self, event: &Event) -> Result<i64> {
        let local_id = match event.local_id {
            Some(l) if self.events.contains_key(&l) => l,
            Some(l) => return Err(StoreError::MissingRow(l)),
            None => match event.id.as_ref().and_then(|id| self.by_id.get(id)).copied() {
                Some(existing) => existing,
                None => {
                    self.next_local_id += 1;
                    self.next_local_id
                }
            },
        };

        self.unindex(local_id);
        let mut stored = event.clone();
        stored.local_id = Some(local_id);
        self.index(local_id, &stored);
        self.events.insert(local_id, stored);
        Ok(local_id)
    }

    fn remove(&mut self, local_id: i64) {
        self.unindex(local_id);
        self.events.remove(&local_id);
    }
}

/// An [`EventRepository`] that lives entirely in memory.
///
/// Used by tests and by the CLI's `memory` backend.
#[derive(Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of event rows, stubs included.
    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }
}

impl EventRepository for InMemoryRepository {
    fn find_by_id(&self, id: &str) -> Result<Option<Event>> {
        let state = self.state.read();
        Ok(state.by_id.get(id).and_then(|l| state.events.get(l)).cloned())
    }

    fn find_stub(&self, replaceable_id: &str, author: &str, kind: u16) -> Result<Option<Event>> {
        let state = self.state.read();
        let key = (kind, author.to_string(), replaceable_id.to_string());
        Ok(state.by_address.get(&key).and_then(|l| state.events.get(l)).cloned())
    }

    fn save_event(&self, event: &Event) -> Result<i64> {
        self.state.write().upsert(event)
    }

    fn delete_event(&self, local_id: i64) -> Result<()> {
        self.state.write().remove(local_id);
        Ok(())
    }

    fn replace_event(&self, event: &Event, retired: i64) -> Result<i64> {
        let mut state = self.state.write();
        if event.local_id != Some(retired) {
            state.remove(retired);
        }
        state.upsert(event)
    }

    fn purge_expired(&self, now: f64) -> Result<usize> {
        let mut state = self.state.write();
        let expired: Vec<i64> = state
            .events
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(l, _)| *l)
            .collect();
        for local_id in &expired {
            state.remove(*local_id);
        }
        Ok(expired.len())
    }

    fn events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let state = self.state.read();
        let mut out: Vec<Event> = state
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.local_id.cmp(&a.local_id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn has_events_by(&self, pubkey: &str) -> Result<bool> {
        let state = self.state.read();
        Ok(state
            .events
            .values()
            .any(|e| !e.is_stub() && e.pubkey.as_deref() == Some(pubkey)))
    }

    fn find_author(&self, pubkey: &str) -> Result<Option<Author>> {
        Ok(self.state.read().authors.get(pubkey).cloned())
    }

    fn save_author(&self, author: &Author) -> Result<()> {
        self.state
            .write()
            .authors
            .insert(author.pubkey.clone(), author.clone());
        Ok(())
    }

    fn authors(&self) -> Result<Vec<Author>> {
        Ok(self.state.read().authors.values().cloned().collect())
    }

    fn muted_authors(&self) -> Result<Vec<Author>> {
        Ok(self
            .state
            .read()
            .authors
            .values()
            .filter(|a| a.muted)
            .cloned()
            .collect())
    }

    fn follows(&self, source: &str) -> Result<Vec<Follow>> {
        Ok(self
            .state
            .read()
            .follows
            .get(source)
            .map(|edges| edges.values().cloned().collect())
            .unwrap_or_default())
    }

    fn followers(&self, destination: &str) -> Result<Vec<Follow>> {
        let state = self.state.read();
        let Some(sources) = state.followers.get(destination) else {
            return Ok(Vec::new());
        };
        Ok(sources
            .iter()
            .filter_map(|s| state.follows.get(s).and_then(|edges| edges.get(destination)))
            .cloned()
            .collect())
    }

    fn replace_follows(&self, source: &str, follows: &[Follow]) -> Result<()> {
        let mut state = self.state.write();
        if let Some(old) = state.follows.remove(source) {
            for destination in old.keys() {
                if let Some(sources) = state.followers.get_mut(destination) {
                    sources.remove(source);
                    if sources.is_empty() {
                        state.followers.remove(destination);
                    }
                }
            }
        }

        let mut edges = BTreeMap::new();
        for follow in follows.iter().filter(|f| f.source == source) {
            edges.insert(follow.destination.clone(), follow.clone());
            state
                .followers
                .entry(follow.destination.clone())
                .or_default()
                .insert(source.to_string());
        }
        if !edges.is_empty() {
            state.follows.insert(source.to_string(), edges);
        }
        Ok(())
    }

    fn find_author_list(&self, owner: &str, kind: u16, identifier: &str) -> Result<Option<AuthorList>> {
        let key = (kind, owner.to_string(), identifier.to_string());
        Ok(self.state.read().author_lists.get(&key).cloned())
    }

    fn save_author_list(&self, list: &AuthorList) -> Result<()> {
        let key = (list.kind, list.owner.clone(), list.identifier.clone());
        self.state.write().author_lists.insert(key, list.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReplaceableStamp;

    fn full_event(id: &str, pubkey: &str, created_at: u64, kind: u16) -> Event {
        Event {
            id: Some(id.into()),
            pubkey: Some(pubkey.into()),
            created_at: Some(created_at),
            kind: Some(kind),
            ..Default::default()
        }
    }

    #[test]
    fn test_save_assigns_and_reuses_local_id() {
        let repo = InMemoryRepository::new();
        let first = repo.save_event(&Event::stub("aa")).unwrap();
        let again = repo.save_event(&full_event("aa", "alice", 10, 1)).unwrap();
        assert_eq!(first, again);
        assert_eq!(repo.event_count(), 1);
        assert!(!repo.find_by_id("aa").unwrap().unwrap().is_stub());
    }

    #[test]
    fn test_unknown_local_id_is_an_error() {
        let repo = InMemoryRepository::new();
        let mut ev = Event::stub("aa");
        ev.local_id = Some(42);
        assert!(matches!(repo.save_event(&ev), Err(StoreError::MissingRow(42))));
    }

    #[test]
    fn test_address_stub_rehydrates_in_place() {
        let repo = InMemoryRepository::new();
        let local = repo
            .save_event(&Event::address_stub(30000, "alice", "friends"))
            .unwrap();

        let mut stub = repo.find_stub("friends", "alice", 30000).unwrap().unwrap();
        assert!(stub.is_stub());
        stub.id = Some("bb".into());
        stub.created_at = Some(5);
        repo.save_event(&stub).unwrap();

        let found = repo.find_by_id("bb").unwrap().unwrap();
        assert_eq!(found.local_id, Some(local));
        assert_eq!(
            repo.find_stub("friends", "alice", 30000).unwrap().unwrap().id.as_deref(),
            Some("bb")
        );
        assert_eq!(repo.event_count(), 1);
    }

    #[test]
    fn test_replace_follows_updates_both_directions() {
        let repo = InMemoryRepository::new();
        repo.replace_follows("alice", &[Follow::new("alice", "bob"), Follow::new("alice", "carl")])
            .unwrap();
        assert_eq!(repo.followers("bob").unwrap().len(), 1);

        repo.replace_follows("alice", &[Follow::new("alice", "carl")]).unwrap();
        assert!(repo.followers("bob").unwrap().is_empty());
        let follows: Vec<_> = repo
            .follows("alice")
            .unwrap()
            .into_iter()
            .map(|f| f.destination)
            .collect();
        assert_eq!(follows, vec!["carl"]);
    }

    #[test]
    fn test_events_newest_first_with_limit() {
        let repo = InMemoryRepository::new();
        repo.save_event(&full_event("a", "alice", 10, 1)).unwrap();
        repo.save_event(&full_event("b", "alice", 30, 1)).unwrap();
        repo.save_event(&full_event("c", "alice", 20, 1)).unwrap();
        repo.save_event(&Event::stub("d")).unwrap();

        let ids: Vec<_> = repo
            .events(&EventFilter::new().author("alice").limit(2))
            .unwrap()
            .into_iter()
            .filter_map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(repo.has_events_by("alice").unwrap());
        assert!(!repo.has_events_by("bob").unwrap());
    }

    #[test]
    fn test_replace_event_retires_old_address_row() {
        let repo = InMemoryRepository::new();
        let mut v1 = full_event("v1", "alice", 100, 30023);
        v1.replaceable_id = Some("post".into());
        let old = repo.save_event(&v1).unwrap();
        let stub = repo.save_event(&Event::stub("v2")).unwrap();

        let mut v2 = full_event("v2", "alice", 200, 30023);
        v2.replaceable_id = Some("post".into());
        v2.local_id = Some(stub);
        assert_eq!(repo.replace_event(&v2, old).unwrap(), stub);

        assert_eq!(repo.event_count(), 1);
        assert!(repo.find_by_id("v1").unwrap().is_none());
        assert_eq!(
            repo.find_stub("post", "alice", 30023).unwrap().unwrap().local_id,
            Some(stub)
        );
    }

    #[test]
    fn test_purge_expired_drops_rows_and_index() {
        let repo = InMemoryRepository::new();
        let mut brief = full_event("brief", "alice", 10, 1);
        brief.expires_at = Some(100.5);
        repo.save_event(&brief).unwrap();
        repo.save_event(&full_event("lasting", "alice", 10, 1)).unwrap();

        assert_eq!(repo.purge_expired(100.0).unwrap(), 0);
        assert_eq!(repo.purge_expired(100.5).unwrap(), 1);
        assert!(repo.find_by_id("brief").unwrap().is_none());
        assert!(repo.find_by_id("lasting").unwrap().is_some());
        assert_eq!(repo.event_count(), 1);
    }

    #[test]
    fn test_author_lists_keyed_by_address() {
        let repo = InMemoryRepository::new();
        let list = AuthorList {
            owner: "alice".into(),
            kind: 30000,
            identifier: "friends".into(),
            title: Some("Friends".into()),
            image: None,
            description: None,
            members: vec!["bob".into()],
            stamp: ReplaceableStamp::new(1, "x"),
        };
        repo.save_author_list(&list).unwrap();
        assert_eq!(repo.find_author_list("alice", 30000, "friends").unwrap(), Some(list));
        assert!(repo.find_author_list("alice", 30000, "family").unwrap().is_none());
    }
}

//! Entities persisted by an [`EventRepository`](crate::EventRepository).
//!
//! Relationships are explicit: events point at other events by id or by
//! address, and follow edges are their own rows keyed by
//! `(source, destination)`. Nothing here keeps an inverse collection in
//! sync behind the caller's back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A pointer from one event to another, taken from its tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventReference {
    /// An `e` tag.
    Id {
        event_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relay: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        marker: Option<String>,
    },
    /// An `a` tag pointing at a parameterized-replaceable record.
    Address {
        kind: u16,
        pubkey: String,
        identifier: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relay: Option<String>,
    },
}

/// A stored event, possibly a stub that has only been referenced so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Row key assigned by the repository on first save.
    pub local_id: Option<i64>,
    /// Hex identifier. `None` for stubs created from an address reference.
    pub id: Option<String>,
    pub pubkey: Option<String>,
    pub created_at: Option<u64>,
    pub kind: Option<u16>,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: Option<String>,
    /// Local ingestion time in seconds.
    pub received_at: Option<f64>,
    pub expires_at: Option<f64>,
    /// The `d` tag of a parameterized-replaceable event.
    pub replaceable_id: Option<String>,
    pub references: Vec<EventReference>,
    /// Pubkeys from `p` tags.
    pub author_references: Vec<String>,
    pub seen_on_relays: BTreeSet<String>,
    pub deleted_on_relays: BTreeSet<String>,
    /// Deleted by a deletion event that arrived without relay context.
    pub deleted_everywhere: bool,
}

impl Event {
    /// A placeholder for an event known only by id.
    pub fn stub(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// A placeholder for a parameterized-replaceable record known only by address.
    pub fn address_stub(kind: u16, pubkey: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            pubkey: Some(pubkey.into()),
            replaceable_id: Some(identifier.into()),
            ..Default::default()
        }
    }

    pub fn is_stub(&self) -> bool {
        self.id.is_none() || self.pubkey.is_none() || self.created_at.is_none()
    }

    /// Whether a NIP-40 expiration has passed at `now`.
    pub fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_everywhere || !self.deleted_on_relays.is_empty()
    }

    /// Record delivery by `relay`. Returns true if the set changed.
    pub fn mark_seen(&mut self, relay: &str) -> bool {
        self.seen_on_relays.insert(relay.to_string())
    }

    /// Record a deletion, scoped to `relay` when one is known.
    pub fn mark_deleted(&mut self, relay: Option<&str>) {
        match relay {
            Some(r) => {
                self.deleted_on_relays.insert(r.to_string());
            }
            None => self.deleted_everywhere = true,
        }
    }

    pub fn referenced_event_ids(&self) -> impl Iterator<Item = &str> {
        self.references.iter().filter_map(|r| match r {
            EventReference::Id { event_id, .. } => Some(event_id.as_str()),
            EventReference::Address { .. } => None,
        })
    }
}

/// Which replaceable event currently defines a piece of author state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceableStamp {
    pub created_at: u64,
    pub event_id: String,
}

impl ReplaceableStamp {
    pub fn new(created_at: u64, event_id: impl Into<String>) -> Self {
        Self {
            created_at,
            event_id: event_id.into(),
        }
    }

    /// Whether an incoming event replaces the one this stamp records.
    ///
    /// Newer `created_at` wins. On a tie the lexicographically greater id
    /// wins, so the outcome does not depend on arrival order.
    pub fn is_superseded_by(&self, created_at: u64, event_id: &str) -> bool {
        created_at > self.created_at
            || (created_at == self.created_at && event_id > self.event_id.as_str())
    }
}

/// `true` when nothing is recorded yet or the stamp loses to the incoming event.
pub fn supersedes(current: Option<&ReplaceableStamp>, created_at: u64, event_id: &str) -> bool {
    current.map_or(true, |s| s.is_superseded_by(created_at, event_id))
}

/// Kind 0 profile fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
    /// The full metadata JSON, including fields not modelled above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Profile {
    /// Preferred human-readable name: display name, then name.
    pub fn best_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.name.as_deref().filter(|s| !s.is_empty()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub pubkey: String,
    pub profile: Profile,
    pub muted: bool,
    /// Relay URLs advertised in the author's contact list content.
    pub relays: Vec<String>,
    pub metadata: Option<ReplaceableStamp>,
    pub contact_list: Option<ReplaceableStamp>,
    pub mute_list: Option<ReplaceableStamp>,
}

impl Author {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            ..Default::default()
        }
    }

    pub fn last_updated_metadata(&self) -> Option<u64> {
        self.metadata.as_ref().map(|s| s.created_at)
    }

    pub fn last_updated_contact_list(&self) -> Option<u64> {
        self.contact_list.as_ref().map(|s| s.created_at)
    }

    pub fn last_updated_mute_list(&self) -> Option<u64> {
        self.mute_list.as_ref().map(|s| s.created_at)
    }
}

/// Directed follow edge from a contact list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Follow {
    pub source: String,
    pub destination: String,
    pub pet_name: Option<String>,
    pub relay: Option<String>,
}

impl Follow {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            pet_name: None,
            relay: None,
        }
    }
}

/// A named, parameterized-replaceable list of authors (follow set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorList {
    pub owner: String,
    pub kind: u16,
    pub identifier: String,
    pub title: Option<String>,
    pub image: Option<String>,
    pub description: Option<String>,
    pub members: Vec<String>,
    pub stamp: ReplaceableStamp,
}

/// Predicate for [`EventRepository::events`](crate::EventRepository::events).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub ids: Vec<String>,
    pub authors: Vec<String>,
    pub kinds: Vec<u16>,
    pub replaceable_id: Option<String>,
    /// Only events with `created_at <= until`.
    pub until: Option<u64>,
    pub include_deleted: bool,
    pub include_stubs: bool,
    /// Skip events whose expiration is at or before this instant.
    pub live_at: Option<f64>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors.push(pubkey.into());
        self
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    pub fn replaceable_id(mut self, d: impl Into<String>) -> Self {
        self.replaceable_id = Some(d.into());
        self
    }

    pub fn until(mut self, ts: u64) -> Self {
        self.until = Some(ts);
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn include_stubs(mut self) -> Self {
        self.include_stubs = true;
        self
    }

    pub fn live_at(mut self, now: f64) -> Self {
        self.live_at = Some(now);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Evaluate the predicate against one row.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.include_stubs && event.is_stub() {
            return false;
        }
        if !self.include_deleted && event.is_deleted() {
            return false;
        }
        if !self.ids.is_empty() && !event.id.as_ref().is_some_and(|id| self.ids.contains(id)) {
            return false;
        }
        if !self.authors.is_empty()
            && !event.pubkey.as_ref().is_some_and(|pk| self.authors.contains(pk))
        {
            return false;
        }
        if !self.kinds.is_empty() && !event.kind.is_some_and(|k| self.kinds.contains(&k)) {
            return false;
        }
        if let Some(d) = &self.replaceable_id {
            if event.replaceable_id.as_ref() != Some(d) {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at.is_some_and(|t| t > until) {
                return false;
            }
        }
        if self.live_at.is_some_and(|now| event.is_expired(now)) {
            return false;
        }
        true
    }
}

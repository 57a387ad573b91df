//! Latest-wins handling for metadata, contact lists, mute lists and
//! parameterized lists.

use super::{EventProcessor, GraphChange};
use crate::error::ProcessError;
use event_store::{supersedes, Author, AuthorList, Follow, ReplaceableStamp};
use nostr_core::event::TAG_PUBKEY;
use nostr_core::{is_hex64, Kind, RawEvent};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// Valid `p` tag pubkeys in order, without duplicates.
fn listed_pubkeys(raw: &RawEvent) -> Vec<&[String]> {
    let mut seen = HashSet::new();
    raw.tags_named(TAG_PUBKEY)
        .filter(|tag| match tag.get(1) {
            Some(pk) if is_hex64(pk) => seen.insert(pk.clone()),
            _ => {
                debug!(tag = ?tag, "skipping invalid p tag");
                false
            }
        })
        .collect()
}

impl EventProcessor {
    /// Whether `raw` replaces the state currently recorded for its scope.
    pub(super) fn accepts_replaceable(&self, kind: Kind, raw: &RawEvent) -> Result<bool, ProcessError> {
        if !kind.is_replaceable() {
            return Ok(true);
        }

        if kind.is_parameterized() {
            let d = raw.identifier_tag().unwrap_or_default();
            let current = self
                .repo
                .find_stub(d, &raw.pubkey, raw.kind)?
                .filter(|row| !row.is_stub())
                .and_then(|row| Some(ReplaceableStamp::new(row.created_at?, row.id?)));
            return Ok(supersedes(current.as_ref(), raw.created_at, &raw.id));
        }

        let Some(author) = self.repo.find_author(&raw.pubkey)? else {
            return Ok(true);
        };
        let current = match kind {
            Kind::Metadata => author.metadata.as_ref(),
            Kind::ContactList => author.contact_list.as_ref(),
            Kind::MuteList => author.mute_list.as_ref(),
            _ => None,
        };
        Ok(supersedes(current, raw.created_at, &raw.id))
    }

    /// Whether a stored event's author-level state was never recorded,
    /// because the write after its row failed.
    pub(super) fn author_state_pending(&self, kind: Kind, raw: &RawEvent) -> Result<bool, ProcessError> {
        match kind {
            Kind::Metadata | Kind::ContactList | Kind::MuteList => self.accepts_replaceable(kind, raw),
            Kind::FollowSet => {
                let d = raw.identifier_tag().unwrap_or_default();
                let current = self.repo.find_author_list(&raw.pubkey, raw.kind, d)?;
                Ok(supersedes(current.as_ref().map(|l| &l.stamp), raw.created_at, &raw.id))
            }
            _ => Ok(false),
        }
    }

    /// Record what `raw` says about its author. Every event makes sure its
    /// author exists.
    pub(super) fn apply_author_state(&self, kind: Kind, raw: &RawEvent) -> Result<(), ProcessError> {
        let mut author = self.repo.find_or_create_author(&raw.pubkey)?;
        match kind {
            Kind::Metadata => self.apply_metadata(raw, &mut author),
            Kind::ContactList => self.apply_contact_list(raw, &mut author)?,
            Kind::MuteList => self.apply_mute_list(raw, &mut author)?,
            Kind::FollowSet => return self.apply_follow_set(raw),
            _ => return Ok(()),
        }
        self.repo.save_author(&author)?;
        Ok(())
    }

    pub(super) fn apply_metadata(&self, raw: &RawEvent, author: &mut Author) {
        author.metadata = Some(ReplaceableStamp::new(raw.created_at, raw.id.clone()));

        let fields = match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&raw.content) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(author = %raw.pubkey, "metadata content is not a JSON object: {}", e);
                return;
            }
        };
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        author.profile.name = text("name");
        author.profile.display_name = text("display_name").or_else(|| text("displayName"));
        author.profile.about = text("about");
        author.profile.picture = text("picture");
        author.profile.nip05 = text("nip05");
        author.profile.website = text("website");
        author.profile.lud16 = text("lud16");
        author.profile.raw = Some(raw.content.clone());
        debug!(author = %raw.pubkey, "metadata applied");
    }

    /// Replace the author's follow set with the `p` tags of `raw`.
    pub(super) fn apply_contact_list(&self, raw: &RawEvent, author: &mut Author) -> Result<(), ProcessError> {
        let source = raw.pubkey.clone();
        let mut follows = Vec::new();
        for tag in listed_pubkeys(raw) {
            let destination = tag[1].clone();
            self.repo.find_or_create_author(&destination)?;
            follows.push(Follow {
                source: source.clone(),
                destination,
                relay: non_empty(tag.get(2)),
                pet_name: non_empty(tag.get(3)),
            });
        }
        self.repo.replace_follows(&source, &follows)?;

        if let Ok(serde_json::Value::Object(relays)) = serde_json::from_str(&raw.content) {
            author.relays = relays.keys().cloned().collect();
        }
        author.contact_list = Some(ReplaceableStamp::new(raw.created_at, raw.id.clone()));

        info!(author = %source, follows = follows.len(), "contact list applied");
        self.notify_graph(GraphChange::FollowsChanged { source });
        Ok(())
    }

    /// Make the muted set equal to the listed authors, never including the list author.
    pub(super) fn apply_mute_list(&self, raw: &RawEvent, author: &mut Author) -> Result<(), ProcessError> {
        let listed: BTreeSet<String> = listed_pubkeys(raw)
            .into_iter()
            .map(|tag| tag[1].clone())
            .filter(|pk| *pk != raw.pubkey)
            .collect();

        for mut muted in self.repo.muted_authors()? {
            if !listed.contains(&muted.pubkey) {
                muted.muted = false;
                self.repo.save_author(&muted)?;
            }
        }
        for pubkey in &listed {
            let mut target = self.repo.find_or_create_author(pubkey)?;
            if !target.muted {
                target.muted = true;
                self.repo.save_author(&target)?;
            }
        }

        author.muted = false;
        author.mute_list = Some(ReplaceableStamp::new(raw.created_at, raw.id.clone()));
        info!(author = %raw.pubkey, muted = listed.len(), "mute list applied");
        Ok(())
    }

    /// Materialize a follow set as an [`AuthorList`].
    pub(super) fn apply_follow_set(&self, raw: &RawEvent) -> Result<(), ProcessError> {
        let mut members = Vec::new();
        for tag in listed_pubkeys(raw) {
            self.repo.find_or_create_author(&tag[1])?;
            members.push(tag[1].clone());
        }

        let list = AuthorList {
            owner: raw.pubkey.clone(),
            kind: raw.kind,
            identifier: raw.identifier_tag().unwrap_or_default().to_string(),
            title: raw.tag_value("title").map(String::from),
            image: raw.tag_value("image").map(String::from),
            description: raw.tag_value("description").map(String::from),
            members,
            stamp: ReplaceableStamp::new(raw.created_at, raw.id.clone()),
        };
        self.repo.save_author_list(&list)?;
        debug!(owner = %list.owner, identifier = %list.identifier, members = list.members.len(), "follow set applied");
        Ok(())
    }
}

use super::EventProcessor;
use crate::error::ProcessError;
use event_store::{Event, EventReference};
use nostr_core::event::{TAG_ADDRESS, TAG_EVENT, TAG_PUBKEY};
use nostr_core::{is_hex64, Address, RawEvent};
use tracing::debug;

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

impl EventProcessor {
    /// Record the `e`, `a` and `p` tags of `raw` on `event`.
    ///
    /// With `create_stubs`, referenced events the store has never seen get a
    /// stub row so a later arrival hydrates it in place.
    pub(super) fn link_references(
        &self,
        raw: &RawEvent,
        event: &mut Event,
        create_stubs: bool,
    ) -> Result<(), ProcessError> {
        event.references.clear();
        event.author_references.clear();

        for tag in raw.tags_named(TAG_EVENT) {
            let Some(target) = tag.get(1).filter(|id| is_hex64(id)) else {
                debug!(event = %raw.id, tag = ?tag, "skipping invalid e tag");
                continue;
            };
            let target = target.to_lowercase();
            if target == raw.id {
                continue;
            }
            if create_stubs && self.repo.find_by_id(&target)?.is_none() {
                self.repo.save_event(&Event::stub(target.clone()))?;
            }
            event.references.push(EventReference::Id {
                event_id: target,
                relay: non_empty(tag.get(2)),
                marker: non_empty(tag.get(3)),
            });
        }

        for tag in raw.tags_named(TAG_ADDRESS) {
            let Some(address) = tag.get(1).and_then(|v| Address::parse(v)) else {
                debug!(event = %raw.id, tag = ?tag, "skipping invalid a tag");
                continue;
            };
            if create_stubs
                && self
                    .repo
                    .find_stub(&address.identifier, &address.pubkey, address.kind)?
                    .is_none()
            {
                self.repo.save_event(&Event::address_stub(
                    address.kind,
                    address.pubkey.clone(),
                    address.identifier.clone(),
                ))?;
            }
            event.references.push(EventReference::Address {
                kind: address.kind,
                pubkey: address.pubkey,
                identifier: address.identifier,
                relay: non_empty(tag.get(2)),
            });
        }

        for tag in raw.tags_named(TAG_PUBKEY) {
            let Some(pubkey) = tag.get(1).filter(|pk| is_hex64(pk)) else {
                debug!(event = %raw.id, tag = ?tag, "skipping invalid p tag");
                continue;
            };
            let pubkey = pubkey.to_lowercase();
            if event.author_references.contains(&pubkey) {
                continue;
            }
            self.repo.find_or_create_author(&pubkey)?;
            event.author_references.push(pubkey);
        }

        Ok(())
    }
}

use super::EventProcessor;
use crate::error::ProcessError;
use event_store::EventFilter;
use nostr_core::event::{TAG_ADDRESS, TAG_EVENT};
use nostr_core::{Address, RawEvent};
use tracing::{debug, info};

impl EventProcessor {
    /// Mark the targets of a deletion event as deleted.
    ///
    /// Only the deleter's own events are touched. Deletion is scoped to the
    /// relay that delivered it when one is known. Returns how many rows
    /// changed.
    pub(super) fn apply_deletion(&self, raw: &RawEvent, relay: Option<&str>) -> Result<usize, ProcessError> {
        let mut deleted = 0;

        for tag in raw.tags_named(TAG_EVENT) {
            let Some(target_id) = tag.get(1) else { continue };
            let Some(mut target) = self.repo.find_by_id(&target_id.to_lowercase())? else {
                debug!(target = %target_id, "deletion target unknown");
                continue;
            };
            if target.is_stub() {
                debug!(target = %target_id, "deletion target not yet hydrated");
                continue;
            }
            if target.pubkey.as_deref() != Some(raw.pubkey.as_str()) {
                debug!(target = %target_id, deleter = %raw.pubkey, "deletion by non-author ignored");
                continue;
            }
            target.mark_deleted(relay);
            self.repo.save_event(&target)?;
            deleted += 1;
        }

        for tag in raw.tags_named(TAG_ADDRESS) {
            let Some(address) = tag.get(1).and_then(|v| Address::parse(v)) else {
                continue;
            };
            if address.pubkey != raw.pubkey {
                debug!(address = %address, deleter = %raw.pubkey, "address deletion by non-author ignored");
                continue;
            }
            let filter = EventFilter::new()
                .author(address.pubkey.clone())
                .kind(address.kind)
                .replaceable_id(address.identifier.clone())
                .until(raw.created_at)
                .include_deleted();
            for mut target in self.repo.events(&filter)? {
                target.mark_deleted(relay);
                self.repo.save_event(&target)?;
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(deleter = %raw.pubkey, deleted, relay = relay.unwrap_or("*"), "deletion applied");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{processor, pubkey, signed};
    use event_store::{EventFilter, EventRepository};

    #[test]
    fn test_author_deletes_own_note_on_relay() {
        let (p, repo) = processor();
        let note = signed(1, 1, 100, vec![], "oops");
        p.process_raw(note.clone(), Some("wss://one")).unwrap();

        let deletion = signed(1, 5, 110, vec![vec!["e", note.id.as_str()]], "");
        p.process_raw(deletion, Some("wss://one")).unwrap();

        let stored = repo.find_by_id(&note.id).unwrap().unwrap();
        assert!(stored.deleted_on_relays.contains("wss://one"));
        assert!(!stored.deleted_everywhere);
        let visible = repo.events(&EventFilter::new().kind(1)).unwrap();
        assert!(visible.is_empty());
    }

    #[test]
    fn test_deletion_by_other_author_ignored() {
        let (p, repo) = processor();
        let note = signed(1, 1, 100, vec![], "mine");
        p.process_raw(note.clone(), None).unwrap();

        let forged = signed(2, 5, 110, vec![vec!["e", note.id.as_str()]], "");
        p.process_raw(forged, None).unwrap();
        assert!(!repo.find_by_id(&note.id).unwrap().unwrap().is_deleted());
    }

    #[test]
    fn test_deletion_does_not_create_stubs() {
        let (p, repo) = processor();
        let unknown = "cd".repeat(32);
        let deletion = signed(1, 5, 110, vec![vec!["e", unknown.as_str()]], "");
        let stored = p.process_raw(deletion, None).unwrap();

        assert_eq!(stored[0].referenced_event_ids().collect::<Vec<_>>(), vec![unknown.as_str()]);
        assert!(repo.find_by_id(&unknown).unwrap().is_none());
        assert_eq!(repo.event_count(), 1);
    }

    #[test]
    fn test_address_deletion_without_relay_is_global() {
        let (p, repo) = processor();
        let me = pubkey(1);
        let article = signed(1, 30023, 100, vec![vec!["d", "draft"]], "text");
        p.process_raw(article.clone(), Some("wss://one")).unwrap();

        let address = format!("30023:{}:draft", me);
        let deletion = signed(1, 5, 120, vec![vec!["a", address.as_str()]], "");
        p.process_raw(deletion, None).unwrap();

        let stored = repo.find_by_id(&article.id).unwrap().unwrap();
        assert!(stored.deleted_everywhere);
    }

    #[test]
    fn test_address_deletion_spares_newer_versions() {
        let (p, repo) = processor();
        let me = pubkey(1);
        let article = signed(1, 30023, 200, vec![vec!["d", "draft"]], "rewritten");
        p.process_raw(article.clone(), None).unwrap();

        let address = format!("30023:{}:draft", me);
        let deletion = signed(1, 5, 150, vec![vec!["a", address.as_str()]], "");
        p.process_raw(deletion, None).unwrap();
        assert!(!repo.find_by_id(&article.id).unwrap().unwrap().is_deleted());
    }
}

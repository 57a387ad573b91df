//! Note rendering backed by the event repository.

use crate::error::ProcessError;
use event_store::{Event, EventRepository};
use nostr_core::note_parser::{self, ParsedNote, ReferenceResolver};
use tracing::warn;

/// Answers reference lookups from stored authors and events. Never writes.
pub struct RepositoryResolver<'a> {
    repo: &'a dyn EventRepository,
}

impl<'a> RepositoryResolver<'a> {
    pub fn new(repo: &'a dyn EventRepository) -> Self {
        Self { repo }
    }
}

impl ReferenceResolver for RepositoryResolver<'_> {
    fn author_name(&self, pubkey: &str) -> Option<String> {
        match self.repo.find_author(pubkey) {
            Ok(author) => author.and_then(|a| a.profile.best_name().map(String::from)),
            Err(e) => {
                warn!(author = %pubkey, "author lookup failed: {}", e);
                None
            }
        }
    }

    fn has_event(&self, id: &str) -> bool {
        match self.repo.find_by_id(id) {
            Ok(event) => event.is_some_and(|e| !e.is_stub()),
            Err(e) => {
                warn!(event = %id, "event lookup failed: {}", e);
                false
            }
        }
    }
}

/// Parse a stored event's content.
pub fn parse_event(repo: &dyn EventRepository, event: &Event) -> ParsedNote {
    note_parser::parse(&event.content, &event.tags, &RepositoryResolver::new(repo))
}

/// Look up an event by id and parse it. `Ok(None)` when it is unknown or
/// only a stub.
pub fn parse_stored(repo: &dyn EventRepository, id: &str) -> Result<Option<ParsedNote>, ProcessError> {
    Ok(repo
        .find_by_id(id)?
        .filter(|e| !e.is_stub())
        .map(|e| parse_event(repo, &e)))
}

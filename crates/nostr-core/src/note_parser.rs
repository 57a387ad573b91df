//! Inline reference resolution and hashtag extraction for note content.
//!
//! Parsing is read-only: lookups go through [`ReferenceResolver`], which
//! only answers questions about what is already known.

use crate::event::is_hex64;
use nostr_sdk::nips::nip19::{FromBech32, Nip19};
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

/// Legacy NIP-08 `#[index]` references into the tag list.
static INDEX_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\[(\d+)\]").unwrap());

/// NIP-19/NIP-21 entities, with or without the `nostr:` scheme.
static ENTITY_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:nostr:)?((?:npub1|nprofile1|note1|nevent1)[qpzry9x8gf2tvdw0s3jn54khce6mua7l]+)")
        .unwrap()
});

static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)#([\p{L}\p{N}_]+)").unwrap());

/// Read-only lookups used while rendering references.
pub trait ReferenceResolver {
    /// Display name for a hex pubkey, if one is known.
    fn author_name(&self, pubkey: &str) -> Option<String>;
    /// Whether a hydrated event with this hex id is available locally.
    fn has_event(&self, id: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceTarget {
    Author { pubkey: String },
    Event { id: String, available: bool },
    /// Could not be decoded or pointed at a missing tag; rendered verbatim.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Byte range in the original content.
    pub range: Range<usize>,
    pub target: ReferenceTarget,
    /// Text substituted for the range in `ParsedNote::rendered`.
    pub display: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedNote {
    pub rendered: String,
    pub references: Vec<Reference>,
    /// Lowercased, deduplicated, in first-seen order.
    pub hashtags: Vec<String>,
}

/// Resolve every inline reference in `content` and collect hashtags.
pub fn parse(content: &str, tags: &[Vec<String>], resolver: &dyn ReferenceResolver) -> ParsedNote {
    let mut references = Vec::new();

    for cap in INDEX_REF.captures_iter(content) {
        let whole = cap.get(0).map(|m| m.range()).unwrap_or_default();
        let raw = &content[whole.clone()];
        let target = cap
            .get(1)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .and_then(|i| tags.get(i))
            .map(|tag| index_target(tag, resolver))
            .unwrap_or(ReferenceTarget::Unresolved);
        references.push(build_reference(whole, raw, target, resolver));
    }

    for cap in ENTITY_REF.captures_iter(content) {
        let (Some(whole), Some(entity)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let target = decode_entity(entity.as_str(), resolver);
        references.push(build_reference(whole.range(), entity.as_str(), target, resolver));
    }

    references.sort_by_key(|r| r.range.start);
    let mut last_end = 0;
    references.retain(|r| {
        let keep = r.range.start >= last_end;
        if keep {
            last_end = r.range.end;
        }
        keep
    });

    let mut rendered = String::with_capacity(content.len());
    let mut cursor = 0;
    for r in &references {
        rendered.push_str(&content[cursor..r.range.start]);
        rendered.push_str(&r.display);
        cursor = r.range.end;
    }
    rendered.push_str(&content[cursor..]);

    ParsedNote {
        rendered,
        references,
        hashtags: hashtags(content),
    }
}

/// `#word` tokens at a word boundary, lowercased and deduplicated.
pub fn hashtags(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    HASHTAG
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn index_target(tag: &[String], resolver: &dyn ReferenceResolver) -> ReferenceTarget {
    match (tag.first().map(String::as_str), tag.get(1)) {
        (Some("p"), Some(pk)) if is_hex64(pk) => ReferenceTarget::Author {
            pubkey: pk.to_lowercase(),
        },
        (Some("e"), Some(id)) if is_hex64(id) => {
            let id = id.to_lowercase();
            ReferenceTarget::Event {
                available: resolver.has_event(&id),
                id,
            }
        }
        _ => ReferenceTarget::Unresolved,
    }
}

fn decode_entity(entity: &str, resolver: &dyn ReferenceResolver) -> ReferenceTarget {
    let event_target = |id: String| ReferenceTarget::Event {
        available: resolver.has_event(&id),
        id,
    };
    match Nip19::from_bech32(entity) {
        Ok(Nip19::Pubkey(pk)) => ReferenceTarget::Author { pubkey: pk.to_hex() },
        Ok(Nip19::Profile(profile)) => ReferenceTarget::Author {
            pubkey: profile.public_key.to_hex(),
        },
        Ok(Nip19::EventId(id)) => event_target(id.to_hex()),
        Ok(Nip19::Event(ev)) => event_target(ev.event_id.to_hex()),
        _ => ReferenceTarget::Unresolved,
    }
}

fn build_reference(
    range: Range<usize>,
    raw: &str,
    target: ReferenceTarget,
    resolver: &dyn ReferenceResolver,
) -> Reference {
    let display = match &target {
        ReferenceTarget::Author { pubkey } => match resolver.author_name(pubkey) {
            Some(name) => format!("@{}", name),
            None => raw.to_string(),
        },
        _ => raw.to_string(),
    };
    Reference { range, target, display }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::{EventId, PublicKey, ToBech32};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Lookup {
        names: HashMap<String, String>,
        events: HashSet<String>,
    }

    impl ReferenceResolver for Lookup {
        fn author_name(&self, pubkey: &str) -> Option<String> {
            self.names.get(pubkey).cloned()
        }
        fn has_event(&self, id: &str) -> bool {
            self.events.contains(id)
        }
    }

    const NOTE: &str = "c7ffeb2e8d3ff8e8b1cf22d6ec4de6bbf7ab5e1c8c1e4d5a4f3f2e1d0c0b0a09";

    fn alice() -> String {
        crate::codec::public_key_hex(&crate::codec::keypair_from_secret(&[1u8; 32]).unwrap())
    }

    fn tag(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_npub_mention_resolves_to_name() {
        let alice = alice();
        let npub = PublicKey::from_hex(&alice).unwrap().to_bech32().unwrap();
        let content = format!("hello nostr:{} !", npub);
        let mut lookup = Lookup::default();
        lookup.names.insert(alice.clone(), "alice".into());

        let parsed = parse(&content, &[], &lookup);
        assert_eq!(parsed.rendered, "hello @alice !");
        assert_eq!(parsed.references.len(), 1);
        assert_eq!(
            parsed.references[0].target,
            ReferenceTarget::Author { pubkey: alice }
        );
        assert_eq!(&content[parsed.references[0].range.clone()], format!("nostr:{npub}"));
    }

    #[test]
    fn test_unknown_author_keeps_raw_identifier() {
        let npub = PublicKey::from_hex(&alice()).unwrap().to_bech32().unwrap();
        let content = format!("cc {}", npub);
        let parsed = parse(&content, &[], &Lookup::default());
        assert_eq!(parsed.rendered, content);
        assert!(matches!(parsed.references[0].target, ReferenceTarget::Author { .. }));
    }

    #[test]
    fn test_index_references_use_tags() {
        let alice = alice();
        let tags = vec![tag(&["p", &alice]), tag(&["e", NOTE])];
        let mut lookup = Lookup::default();
        lookup.names.insert(alice.clone(), "alice".into());
        lookup.events.insert(NOTE.into());

        let parsed = parse("ping #[0] about #[1] and #[7]", &tags, &lookup);
        assert_eq!(parsed.rendered, "ping @alice about #[1] and #[7]");
        assert_eq!(
            parsed.references[1].target,
            ReferenceTarget::Event { id: NOTE.into(), available: true }
        );
        assert_eq!(parsed.references[2].target, ReferenceTarget::Unresolved);
        assert!(parsed.hashtags.is_empty());
    }

    #[test]
    fn test_note_entity_reports_availability() {
        let note = EventId::from_hex(NOTE).unwrap().to_bech32().unwrap();
        let parsed = parse(&format!("quoting nostr:{note}"), &[], &Lookup::default());
        assert_eq!(
            parsed.references[0].target,
            ReferenceTarget::Event { id: NOTE.into(), available: false }
        );
    }

    #[test]
    fn test_garbage_bech32_is_unresolved() {
        let parsed = parse("see npub1qqqqqqqq", &[], &Lookup::default());
        assert_eq!(parsed.references.len(), 1);
        assert_eq!(parsed.references[0].target, ReferenceTarget::Unresolved);
        assert_eq!(parsed.rendered, "see npub1qqqqqqqq");
    }

    #[test]
    fn test_hashtags_dedup_lowercase() {
        let tags = hashtags("#Nostr is fun. #nostr #rust_lang\n#Rust_Lang a#b https://x.io/#frag");
        assert_eq!(tags, vec!["nostr", "rust_lang"]);
    }
}

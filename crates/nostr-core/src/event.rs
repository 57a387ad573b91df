//! Wire-level event records as they arrive from relays.
//!
//! `RawEvent` mirrors the NIP-01 JSON object one to one. Nothing here
//! touches storage; the processor maps a verified `RawEvent` onto the
//! persisted entities.

use serde::{Deserialize, Serialize};

/// Tag name carrying a NIP-40 expiration timestamp.
pub const TAG_EXPIRATION: &str = "expiration";
/// Tag name carrying the identifier of a parameterized-replaceable event.
pub const TAG_IDENTIFIER: &str = "d";
/// Event reference tag.
pub const TAG_EVENT: &str = "e";
/// Author reference tag.
pub const TAG_PUBKEY: &str = "p";
/// Parameterized address reference tag (`kind:pubkey:d`).
pub const TAG_ADDRESS: &str = "a";

/// A signed event exactly as received: `id, pubkey, created_at, kind, tags, content, sig`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// An event template awaiting an identifier and signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl RawEvent {
    /// Parse a single event object from JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Parse a single event object from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// First value of the first tag named `key`.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        tag_value(&self.tags, key)
    }

    /// All tags named `key`, in order.
    pub fn tags_named<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
        tags_named(&self.tags, key)
    }

    /// NIP-40 expiration in (possibly fractional) seconds.
    ///
    /// A value of zero or one that does not parse as a number counts as no expiration.
    pub fn expiration(&self) -> Option<f64> {
        let raw = self.tag_value(TAG_EXPIRATION)?;
        let secs = raw.trim().parse::<f64>().ok()?;
        if secs > 0.0 && secs.is_finite() {
            Some(secs)
        } else {
            None
        }
    }

    /// The `d` tag, if present.
    pub fn identifier_tag(&self) -> Option<&str> {
        self.tag_value(TAG_IDENTIFIER)
    }

    /// Strip the identifier and signature, keeping the signed fields.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }
}

pub fn tag_value<'a>(tags: &'a [Vec<String>], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.first().map(String::as_str) == Some(key))
        .and_then(|t| t.get(1))
        .map(String::as_str)
}

pub fn tags_named<'a>(
    tags: &'a [Vec<String>],
    key: &'a str,
) -> impl Iterator<Item = &'a [String]> + 'a {
    tags.iter()
        .filter(move |t| t.first().map(|v| v.as_str()) == Some(key))
        .map(|t| t.as_slice())
}

/// True for a 64-character lowercase or uppercase hex string (event ids, pubkeys).
pub fn is_hex64(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A parsed `a` tag value: `kind:pubkey:identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub kind: u16,
    pub pubkey: String,
    pub identifier: String,
}

impl Address {
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.splitn(3, ':');
        let kind = parts.next()?.parse::<u16>().ok()?;
        let pubkey = parts.next()?;
        if !is_hex64(pubkey) {
            return None;
        }
        let identifier = parts.next().unwrap_or_default();
        Some(Self {
            kind,
            pubkey: pubkey.to_lowercase(),
            identifier: identifier.to_string(),
        })
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.pubkey, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_tags(tags: Vec<Vec<&str>>) -> RawEvent {
        RawEvent {
            id: "00".repeat(32),
            pubkey: "11".repeat(32),
            created_at: 1_700_000_000,
            kind: 1,
            tags: tags
                .into_iter()
                .map(|t| t.into_iter().map(String::from).collect())
                .collect(),
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_parse_requires_all_fields() {
        let missing_sig = r#"{"id":"a","pubkey":"b","created_at":1,"kind":1,"tags":[],"content":""}"#;
        assert!(RawEvent::from_json(missing_sig).is_err());

        let ok = r#"{"id":"a","pubkey":"b","created_at":1,"kind":1,"tags":[["p","x"]],"content":"hi","sig":"c"}"#;
        let ev = RawEvent::from_json(ok).unwrap();
        assert_eq!(ev.tag_value("p"), Some("x"));
    }

    #[test]
    fn test_expiration_fractional_and_zero() {
        let ev = event_with_tags(vec![vec!["expiration", "2378572992.123"]]);
        assert_eq!(ev.expiration(), Some(2378572992.123));

        let zero = event_with_tags(vec![vec!["expiration", "0"]]);
        assert_eq!(zero.expiration(), None);

        let junk = event_with_tags(vec![vec!["expiration", "soon"]]);
        assert_eq!(junk.expiration(), None);
    }

    #[test]
    fn test_tags_named_skips_empty_tags() {
        let ev = event_with_tags(vec![vec![], vec!["e", "x"], vec!["p", "y"], vec!["e", "z"]]);
        let es: Vec<_> = ev.tags_named("e").map(|t| t[1].clone()).collect();
        assert_eq!(es, vec!["x", "z"]);
    }

    #[test]
    fn test_tag_value_first_matching_tag() {
        let ev = event_with_tags(vec![vec!["d"], vec!["title", "Friends"], vec!["title", "Old"]]);
        assert_eq!(ev.tag_value("title"), Some("Friends"));
        assert_eq!(tag_value(&ev.tags, "d"), None);
        assert_eq!(ev.identifier_tag(), None);
        assert_eq!(tag_value(&ev.tags, "p"), None);
    }

    #[test]
    fn test_address_parse() {
        let pk = "ab".repeat(32);
        let addr = Address::parse(&format!("30000:{pk}:friends")).unwrap();
        assert_eq!(addr.kind, 30000);
        assert_eq!(addr.identifier, "friends");
        assert_eq!(addr.to_string(), format!("30000:{pk}:friends"));

        let colon_in_d = Address::parse(&format!("30023:{pk}:a:b")).unwrap();
        assert_eq!(colon_in_d.identifier, "a:b");

        assert!(Address::parse("30000:nothex:friends").is_none());
        assert!(Address::parse("kind:abc").is_none());
    }
}

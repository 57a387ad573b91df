//! Protocol-level Nostr functionality for nosgraph.
//!
//! This crate knows how events look on the wire, how they are hashed and
//! signed, which kinds exist, and how note content references other
//! entities. It has no storage dependency.

pub mod codec;
pub mod event;
pub mod kind;
pub mod note_parser;

pub use codec::{canonical_serialize, identifier, sign, verify, InvalidEvent};
pub use event::{is_hex64, Address, RawEvent, UnsignedEvent};
pub use kind::Kind;
pub use note_parser::{ParsedNote, Reference, ReferenceResolver, ReferenceTarget};

// Re-export nostr-sdk and secp256k1 for convenience
pub use nostr_sdk;
pub use secp256k1;

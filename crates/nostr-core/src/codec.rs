//! Canonical serialization, identifier derivation and BIP-340 signatures.
//!
//! The identifier of an event is the SHA-256 of
//! `[0, pubkey, created_at, kind, tags, content]` serialized as compact JSON.
//! That array is the only serialization ever hashed or signed; a payload
//! whose `id` was computed any other way fails verification.

use crate::event::{RawEvent, UnsignedEvent};
use secp256k1::{schnorr::Signature, All, Keypair, Message, Secp256k1, XOnlyPublicKey};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

static SECP: LazyLock<Secp256k1<All>> = LazyLock::new(Secp256k1::new);

/// Why an event failed codec checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidEvent {
    MalformedHex { field: &'static str },
    WrongLength { field: &'static str, expected: usize, actual: usize },
    IdMismatch { expected: String, actual: String },
    BadSignature,
}

impl std::fmt::Display for InvalidEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidEvent::MalformedHex { field } => write!(f, "{} is not valid hex", field),
            InvalidEvent::WrongLength { field, expected, actual } => {
                write!(f, "{} must be {} bytes, got {}", field, expected, actual)
            }
            InvalidEvent::IdMismatch { expected, actual } => {
                write!(f, "id mismatch: computed {}, payload has {}", expected, actual)
            }
            InvalidEvent::BadSignature => write!(f, "schnorr signature does not verify"),
        }
    }
}

impl std::error::Error for InvalidEvent {}

fn canonical_array(pubkey: &str, created_at: u64, kind: u16, tags: &[Vec<String>], content: &str) -> Vec<u8> {
    let canonical = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    serde_json::to_vec(&canonical).unwrap_or_default()
}

/// The exact bytes hashed to form the identifier.
pub fn canonical_serialize(event: &RawEvent) -> Vec<u8> {
    canonical_array(&event.pubkey, event.created_at, event.kind, &event.tags, &event.content)
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Hex SHA-256 of the canonical serialization.
pub fn identifier(event: &RawEvent) -> String {
    hex::encode(digest(&canonical_serialize(event)))
}

impl UnsignedEvent {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_array(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)
    }

    pub fn compute_id(&self) -> String {
        hex::encode(digest(&self.canonical_bytes()))
    }
}

/// Wire hex is lowercase only; `hex::decode` alone would also take uppercase.
fn decode_fixed<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N], InvalidEvent> {
    if value.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(InvalidEvent::MalformedHex { field });
    }
    let bytes = hex::decode(value).map_err(|_| InvalidEvent::MalformedHex { field })?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| InvalidEvent::WrongLength { field, expected: N, actual })
}

/// Check the identifier and the Schnorr signature of `event`.
///
/// Never panics on hostile input: every malformed field maps to an
/// [`InvalidEvent`] variant.
pub fn verify(event: &RawEvent) -> Result<(), InvalidEvent> {
    let id: [u8; 32] = decode_fixed("id", &event.id)?;
    let pubkey: [u8; 32] = decode_fixed("pubkey", &event.pubkey)?;
    let sig: [u8; 64] = decode_fixed("sig", &event.sig)?;

    let computed = digest(&canonical_serialize(event));
    if computed != id {
        return Err(InvalidEvent::IdMismatch {
            expected: hex::encode(computed),
            actual: event.id.clone(),
        });
    }

    let pk = XOnlyPublicKey::from_slice(&pubkey).map_err(|_| InvalidEvent::BadSignature)?;
    let sig = Signature::from_slice(&sig).map_err(|_| InvalidEvent::BadSignature)?;
    let msg = Message::from_digest(computed);
    SECP.verify_schnorr(&sig, &msg, &pk)
        .map_err(|_| InvalidEvent::BadSignature)
}

/// Hex x-only public key for a keypair.
pub fn public_key_hex(keys: &Keypair) -> String {
    hex::encode(keys.x_only_public_key().0.serialize())
}

/// Build a keypair from a 32-byte secret key.
pub fn keypair_from_secret(secret: &[u8]) -> Result<Keypair, InvalidEvent> {
    Keypair::from_seckey_slice(&SECP, secret).map_err(|_| InvalidEvent::WrongLength {
        field: "secret key",
        expected: 32,
        actual: secret.len(),
    })
}

/// Compute the identifier of `template` and sign it with `keys`.
///
/// The template's `pubkey` is overwritten with the keypair's public key.
/// Signing uses fresh auxiliary randomness, so two signatures over the
/// same event differ.
pub fn sign(mut template: UnsignedEvent, keys: &Keypair) -> Result<RawEvent, InvalidEvent> {
    template.pubkey = public_key_hex(keys);
    let hash = digest(&template.canonical_bytes());
    let msg = Message::from_digest(hash);
    let sig = SECP.sign_schnorr(&msg, keys);

    Ok(RawEvent {
        id: hex::encode(hash),
        pubkey: template.pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags,
        content: template.content,
        sig: sig.to_string(),
    })
}

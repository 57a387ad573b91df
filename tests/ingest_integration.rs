//! End-to-end ingestion: concurrent relay feeds through the single-writer
//! queue into SQLite, with the social graph following along.

use event_store::{EventFilter, EventRepository, SqliteRepository};
use nosgraph::{EventProcessor, IngestQueue, SocialGraphCache};
use nostr_core::{codec, RawEvent, UnsignedEvent};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

const ALICE: u8 = 1;
const BOB: u8 = 2;
const CARL: u8 = 3;
const EVE: u8 = 4;

fn pubkey(secret: u8) -> String {
    codec::public_key_hex(&codec::keypair_from_secret(&[secret; 32]).unwrap())
}

fn signed(secret: u8, kind: u16, created_at: u64, tags: Vec<Vec<String>>, content: &str) -> RawEvent {
    let keys = codec::keypair_from_secret(&[secret; 32]).unwrap();
    let template = UnsignedEvent {
        pubkey: String::new(),
        created_at,
        kind,
        tags,
        content: content.to_string(),
    };
    codec::sign(template, &keys).unwrap()
}

fn contact_list(secret: u8, created_at: u64, follows: &[u8]) -> RawEvent {
    let tags = follows
        .iter()
        .map(|f| vec!["p".to_string(), pubkey(*f)])
        .collect();
    signed(secret, 3, created_at, tags, "")
}

fn cycle_feed() -> Vec<RawEvent> {
    vec![
        contact_list(ALICE, 1_700_000_000, &[EVE]),
        contact_list(ALICE, 1_700_000_100, &[BOB]),
        contact_list(BOB, 1_700_000_000, &[CARL]),
        contact_list(CARL, 1_700_000_000, &[EVE]),
        contact_list(EVE, 1_700_000_000, &[ALICE]),
        signed(BOB, 1, 1_700_000_200, vec![], "gm from bob"),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_relays_converge() {
    let tmp = TempDir::new().unwrap();
    let repo: Arc<dyn EventRepository> = Arc::new(SqliteRepository::open(&tmp.path().join("events.db")).unwrap());

    let (graph_tx, graph_rx) = mpsc::unbounded_channel();
    let cache = SocialGraphCache::spawn(repo.clone(), pubkey(ALICE), 2);
    let listener = cache.listen(graph_rx);
    let processor = EventProcessor::new(repo.clone()).with_graph_notifier(graph_tx);
    let (queue, writer) = IngestQueue::spawn(processor, 4);

    let feed = cycle_feed();
    let mut reversed = feed.clone();
    reversed.reverse();

    let mut relays = Vec::new();
    for (relay, events) in [("wss://one", feed.clone()), ("wss://two", reversed)] {
        let queue = queue.clone();
        relays.push(tokio::spawn(async move {
            for event in events {
                queue.submit(event.to_json(), Some(relay)).await.unwrap();
            }
        }));
    }
    for relay in relays {
        relay.await.unwrap();
    }
    drop(queue);
    writer.await.unwrap();
    listener.await.unwrap();

    // Latest contact list wins regardless of which relay delivered first.
    let follows: Vec<_> = repo
        .follows(&pubkey(ALICE))
        .unwrap()
        .into_iter()
        .map(|f| f.destination)
        .collect();
    assert_eq!(follows, vec![pubkey(BOB)]);

    // Each accepted event is stored once and attributed to both relays.
    let note = &feed[5];
    let stored = repo.find_by_id(&note.id).unwrap().unwrap();
    assert_eq!(stored.seen_on_relays.len(), 2);
    let notes = repo.events(&EventFilter::new().kind(1)).unwrap();
    assert_eq!(notes.len(), 1);

    cache.converged().await;
    assert_eq!(cache.followed_keys(), BTreeSet::from([pubkey(BOB)]));
    assert!(cache.is_in_network(&pubkey(CARL)));
    assert!(!cache.is_in_network(&pubkey(EVE)));
    assert!(!cache.is_in_network(&pubkey(ALICE)));
    let known: Vec<_> = cache
        .known_followers(&pubkey(CARL))
        .into_iter()
        .map(|a| a.pubkey)
        .collect();
    assert_eq!(known, vec![pubkey(BOB)]);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("events.db");

    {
        let repo = Arc::new(SqliteRepository::open(&path).unwrap());
        let processor = EventProcessor::new(repo);
        let (queue, writer) = IngestQueue::spawn(processor, 16);
        let mut payloads: Vec<String> = cycle_feed().iter().map(RawEvent::to_json).collect();
        let mute_self = signed(
            ALICE,
            10000,
            1_700_000_300,
            vec![
                vec!["p".to_string(), pubkey(ALICE)],
                vec!["p".to_string(), pubkey(EVE)],
            ],
            "",
        );
        payloads.push(mute_self.to_json());
        payloads.push("not an event".to_string());

        let report = queue.submit_batch(payloads, Some("wss://one")).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        drop(queue);
        writer.await.unwrap();
    }

    let repo: Arc<dyn EventRepository> = Arc::new(SqliteRepository::open(&path).unwrap());
    assert!(!repo.find_author(&pubkey(ALICE)).unwrap().unwrap().muted);
    assert!(repo.find_author(&pubkey(EVE)).unwrap().unwrap().muted);

    let cache = SocialGraphCache::spawn(repo, pubkey(ALICE), 2);
    cache.converged().await;
    assert_eq!(cache.followed_keys(), BTreeSet::from([pubkey(BOB)]));
    assert!(cache.is_in_network(&pubkey(CARL)));
    assert!(cache.orphaned().is_empty());
}

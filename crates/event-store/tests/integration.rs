use event_store::*;
use tempfile::TempDir;

fn event(id: &str, pubkey: &str, created_at: u64, kind: u16) -> Event {
    Event {
        id: Some(id.into()),
        pubkey: Some(pubkey.into()),
        created_at: Some(created_at),
        kind: Some(kind),
        sig: Some("sig".into()),
        ..Default::default()
    }
}

/// The same contract, exercised against every backend.
fn exercise_repository(repo: &dyn EventRepository) {
    // Stub first, then the full event: one row, references preserved.
    let mut reply = event("reply", "bob", 20, 1);
    reply.references.push(EventReference::Id {
        event_id: "root".into(),
        relay: None,
        marker: Some("root".into()),
    });
    repo.save_event(&reply).unwrap();
    repo.save_event(&Event::stub("root")).unwrap();

    let mut root = repo.find_by_id("root").unwrap().unwrap();
    assert!(root.is_stub());
    root.pubkey = Some("alice".into());
    root.created_at = Some(10);
    root.kind = Some(1);
    root.mark_seen("wss://relay.one");
    repo.save_event(&root).unwrap();

    let root = repo.find_by_id("root").unwrap().unwrap();
    assert!(!root.is_stub());
    assert!(root.seen_on_relays.contains("wss://relay.one"));
    let reply = repo.find_by_id("reply").unwrap().unwrap();
    assert_eq!(reply.referenced_event_ids().collect::<Vec<_>>(), vec!["root"]);

    // Deleted rows are hidden unless asked for.
    let mut gone = event("gone", "alice", 30, 1);
    gone.mark_deleted(None);
    repo.save_event(&gone).unwrap();
    let visible = repo.events(&EventFilter::new().author("alice")).unwrap();
    assert_eq!(visible.len(), 1);
    let all = repo
        .events(&EventFilter::new().author("alice").include_deleted())
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id.as_deref(), Some("gone"));

    // Follow graph with a cycle.
    for (src, dst) in [("alice", "bob"), ("bob", "carl"), ("carl", "eve"), ("eve", "alice")] {
        repo.find_or_create_author(src).unwrap();
        repo.find_or_create_author(dst).unwrap();
        repo.replace_follows(src, &[Follow::new(src, dst)]).unwrap();
    }
    assert_eq!(repo.follows("carl").unwrap()[0].destination, "eve");
    assert_eq!(repo.followers("alice").unwrap()[0].source, "eve");
    assert_eq!(repo.authors().unwrap().len(), 4);

    // Follows from someone else are ignored when replacing alice's set.
    repo.replace_follows("alice", &[Follow::new("bob", "eve")]).unwrap();
    assert!(repo.follows("alice").unwrap().is_empty());
    assert!(repo.follows("bob").unwrap().iter().all(|f| f.destination == "carl"));

    // A newer version hydrated from an id stub retires the old address row.
    let mut v1 = event("post-v1", "alice", 100, 30023);
    v1.replaceable_id = Some("post".into());
    let old = repo.save_event(&v1).unwrap();
    let stub = repo.save_event(&Event::stub("post-v2")).unwrap();
    let mut v2 = event("post-v2", "alice", 200, 30023);
    v2.replaceable_id = Some("post".into());
    v2.local_id = Some(stub);
    assert_eq!(repo.replace_event(&v2, old).unwrap(), stub);
    let versions: Vec<_> = repo
        .events(&EventFilter::new().kind(30023).replaceable_id("post").include_stubs())
        .unwrap()
        .into_iter()
        .filter_map(|e| e.id)
        .collect();
    assert_eq!(versions, vec!["post-v2"]);
    assert!(repo.find_by_id("post-v1").unwrap().is_none());

    // Expired rows are hidden by `live_at` and removed by a purge.
    let mut brief = event("brief", "dave", 40, 1);
    brief.expires_at = Some(1_000.5);
    repo.save_event(&brief).unwrap();
    let dave = EventFilter::new().author("dave");
    assert_eq!(repo.events(&dave.clone().live_at(1_000.0)).unwrap().len(), 1);
    assert!(repo.events(&dave.clone().live_at(1_000.5)).unwrap().is_empty());
    assert_eq!(repo.purge_expired(1_000.5).unwrap(), 1);
    assert!(repo.find_by_id("brief").unwrap().is_none());
    assert!(repo.find_by_id("post-v2").unwrap().is_some());
}

#[test]
fn test_in_memory_contract() {
    let repo = InMemoryRepository::new();
    exercise_repository(&repo);
}

#[test]
fn test_sqlite_contract() {
    let tmp = TempDir::new().unwrap();
    let repo = SqliteRepository::open(&tmp.path().join("events.db")).unwrap();
    exercise_repository(&repo);
}

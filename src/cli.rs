use anyhow::{Context, Result};
use clap::Subcommand;
use event_store::{EventRepository, InMemoryRepository, SqliteRepository};
use nosgraph::config::{parse_pubkey, Config, StoreBackend};
use nosgraph::{notes, split_payloads, EventProcessor, IngestQueue, SocialGraphCache};
use nostr_core::{codec, RawEvent};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a file of events (JSON array or one event per line)
    Ingest {
        file: String,
        /// Relay the events are attributed to
        #[clap(long)]
        relay: Option<String>,
        /// Accept events without checking ids and signatures
        #[clap(long)]
        skip_verification: bool,
    },
    /// Check ids and signatures without storing anything
    Verify { file: String },
    /// Query the root user's social graph
    Graph {
        #[clap(subcommand)]
        query: GraphQuery,
        /// Root pubkey (hex or npub), overrides graph.root
        #[clap(long)]
        root: Option<String>,
    },
    /// Render a stored note with resolved references
    Note { id: String },
}

#[derive(Subcommand, Debug)]
pub enum GraphQuery {
    /// Pubkeys the root follows directly
    Followed,
    /// Whether a pubkey is inside the root's network
    InNetwork { pubkey: String },
    /// The root's follows that also follow a pubkey
    KnownFollowers { pubkey: String },
    /// Known authors with no standing in the network
    Orphaned,
}

pub fn open_repository(config: &Config) -> Result<Arc<dyn EventRepository>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryRepository::new())),
        StoreBackend::Sqlite => {
            let path = Path::new(&config.store.path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let repo = SqliteRepository::open(path)
                .with_context(|| format!("Failed to open event store at {}", config.store.path))?;
            Ok(Arc::new(repo))
        }
    }
}

pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Ingest {
            file,
            relay,
            skip_verification,
        } => ingest(config, &file, relay.as_deref(), skip_verification).await,
        Commands::Verify { file } => verify(&file),
        Commands::Graph { query, root } => graph(config, query, root.as_deref()).await,
        Commands::Note { id } => note(config, &id),
    }
}

fn read_payloads(file: &str) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(shellexpand::tilde(file).as_ref())
        .with_context(|| format!("Failed to read {}", file))?;
    split_payloads(&text).with_context(|| format!("Failed to split {}", file))
}

async fn ingest(config: &Config, file: &str, relay: Option<&str>, skip_verification: bool) -> Result<()> {
    let payloads = read_payloads(file)?;
    let repo = open_repository(config)?;

    let mut options = config.processor_options();
    if skip_verification {
        options.verify_signatures = false;
    }
    let (graph_tx, graph_rx) = mpsc::unbounded_channel();
    let processor = EventProcessor::new(repo.clone())
        .with_options(options)
        .with_graph_notifier(graph_tx);

    let cache = config
        .root_pubkey()?
        .map(|root| SocialGraphCache::spawn(repo.clone(), root, config.graph.max_hops));
    let listener = cache.as_ref().map(|c| c.listen(graph_rx));

    let (queue, writer) = IngestQueue::spawn(processor, config.ingest.queue_capacity);
    let purged = queue.purge_expired().await?;
    let total = payloads.len();
    let report = queue.submit_batch(payloads, relay).await?;
    drop(queue);
    writer.await.context("Ingest writer failed")?;

    if purged > 0 {
        println!("Purged {} expired events", purged);
    }
    println!("Processed {} payloads", total);
    println!("  stored or updated: {}", report.events.len());
    let counts: BTreeMap<_, _> = report.failure_counts();
    for (label, count) in &counts {
        println!("  {}: {}", label, count);
    }
    for (index, err) in report.failures.iter().filter(|(_, e)| e.is_local_failure()) {
        println!("  payload {}: {}", index, err);
    }

    if let (Some(cache), Some(listener)) = (cache, listener) {
        listener.await.context("Graph listener failed")?;
        let snapshot = cache.converged().await;
        println!(
            "Social graph: {} followed, {} in network",
            snapshot.followed_keys().len(),
            snapshot.distances.len().saturating_sub(1)
        );
    }
    Ok(())
}

fn verify(file: &str) -> Result<()> {
    let payloads = read_payloads(file)?;
    let mut invalid = 0;
    for (index, payload) in payloads.iter().enumerate() {
        match RawEvent::from_json(payload) {
            Ok(event) => match codec::verify(&event) {
                Ok(()) => println!("✓ {}", event.id),
                Err(e) => {
                    invalid += 1;
                    println!("✗ {}: {}", event.id, e);
                }
            },
            Err(e) => {
                invalid += 1;
                println!("✗ payload {}: {}", index, e);
            }
        }
    }
    println!("\n{} of {} events valid", payloads.len() - invalid, payloads.len());
    if invalid > 0 {
        anyhow::bail!("{} invalid events", invalid);
    }
    Ok(())
}

async fn graph(config: &Config, query: GraphQuery, root: Option<&str>) -> Result<()> {
    let root = match root {
        Some(root) => parse_pubkey(root).with_context(|| format!("Invalid root: {}", root))?,
        None => config
            .root_pubkey()?
            .context("No root configured; set graph.root or pass --root")?,
    };
    let repo = open_repository(config)?;
    let cache = SocialGraphCache::spawn(repo, root, config.graph.max_hops);
    cache.converged().await;

    match query {
        GraphQuery::Followed => {
            for pubkey in cache.followed_keys() {
                println!("{}", pubkey);
            }
        }
        GraphQuery::InNetwork { pubkey } => {
            let pubkey = parse_pubkey(&pubkey)?;
            println!("{}", cache.is_in_network(&pubkey));
        }
        GraphQuery::KnownFollowers { pubkey } => {
            let pubkey = parse_pubkey(&pubkey)?;
            for author in cache.known_followers(&pubkey) {
                println!("{}  {}", author.pubkey, author.profile.best_name().unwrap_or(""));
            }
        }
        GraphQuery::Orphaned => {
            for author in cache.orphaned() {
                println!("{}", author.pubkey);
            }
        }
    }
    Ok(())
}

fn note(config: &Config, id: &str) -> Result<()> {
    let repo = open_repository(config)?;
    let parsed = notes::parse_stored(repo.as_ref(), &id.to_lowercase())?
        .with_context(|| format!("Event {} is not stored", id))?;

    println!("{}", parsed.rendered);
    if !parsed.hashtags.is_empty() {
        println!("\nHashtags: {}", parsed.hashtags.join(", "));
    }
    Ok(())
}

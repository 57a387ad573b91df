//! Ingestion state machine: raw relay payloads in, merged store state out.
//!
//! Every payload goes through the same steps: parse, verify, expiration,
//! duplicate lookup, stub resolution, kind dispatch, persist. All writes go
//! through the shared [`EventRepository`]; callers that receive events
//! concurrently should funnel them through [`crate::writer::IngestQueue`]
//! so a single task owns the processor.

mod deletion;
mod references;
mod replaceable;

use crate::error::ProcessError;
use event_store::{Event, EventRepository};
use nostr_core::{codec, Kind, RawEvent};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Tag on a zap receipt carrying the JSON of the zap request.
const TAG_ZAP_DESCRIPTION: &str = "description";

// ── Collaborators ───────────────────────────────────────────────

/// Source of "now" for expiration checks and `received_at`.
pub trait Clock: Send + Sync {
    /// Unix time in (fractional) seconds.
    fn now(&self) -> f64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

/// A clock frozen at a given instant.
pub struct FixedClock(pub f64);

impl Clock for FixedClock {
    fn now(&self) -> f64 {
        self.0
    }
}

/// A mutation to the follow relation, sent to the social graph cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphChange {
    FollowsChanged { source: String },
}

pub type GraphNotifier = mpsc::UnboundedSender<GraphChange>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// Skip codec verification. Only for fixtures with fake ids/signatures.
    pub verify_signatures: bool,
    /// How deep embedded events (reposts, zap requests) are followed.
    pub max_embedded_depth: u8,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            verify_signatures: true,
            max_embedded_depth: 2,
        }
    }
}

/// Outcome of processing many payloads.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Events created, hydrated or marked seen, in processing order.
    pub events: Vec<Event>,
    /// Index of the failing payload and why it failed.
    pub failures: Vec<(usize, ProcessError)>,
}

impl BatchReport {
    pub fn failure_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for (_, e) in &self.failures {
            *counts.entry(e.label()).or_insert(0) += 1;
        }
        counts
    }
}

/// Split a document into individual event payloads.
///
/// Accepts a JSON array of events or one event object per line.
pub fn split_payloads(text: &str) -> Result<Vec<String>, ProcessError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<serde_json::Value> = serde_json::from_str(trimmed)?;
        return Ok(values.into_iter().map(|v| v.to_string()).collect());
    }
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

fn log_failure(index: usize, err: &ProcessError) {
    match err {
        ProcessError::UnsupportedKind(kind) => trace!(index, kind, "unsupported kind ignored"),
        ProcessError::Expired { id, .. } => debug!(index, id = %id, "expired event dropped"),
        ProcessError::MalformedPayload(_) | ProcessError::InvalidSignature { .. } => {
            warn!(index, "event rejected: {}", err)
        }
        ProcessError::StorageFailure(_) | ProcessError::QueueClosed => {
            error!(index, "event not stored: {}", err)
        }
    }
}

// ── Processor ───────────────────────────────────────────────────

pub struct EventProcessor {
    repo: Arc<dyn EventRepository>,
    options: ProcessorOptions,
    clock: Arc<dyn Clock>,
    graph: Option<GraphNotifier>,
}

impl EventProcessor {
    pub fn new(repo: Arc<dyn EventRepository>) -> Self {
        Self {
            repo,
            options: ProcessorOptions::default(),
            clock: Arc::new(SystemClock),
            graph: None,
        }
    }

    pub fn with_options(mut self, options: ProcessorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_graph_notifier(mut self, notifier: GraphNotifier) -> Self {
        self.graph = Some(notifier);
        self
    }

    pub fn repository(&self) -> &Arc<dyn EventRepository> {
        &self.repo
    }

    pub fn options(&self) -> ProcessorOptions {
        self.options
    }

    /// Remove stored events whose NIP-40 expiration has passed.
    pub fn purge_expired(&self) -> Result<usize, ProcessError> {
        let purged = self.repo.purge_expired(self.clock.now())?;
        if purged > 0 {
            info!(purged, "expired events purged");
        }
        Ok(purged)
    }

    /// Process one JSON payload delivered by `relay`.
    ///
    /// Returns the events created or updated. Duplicates return the stored
    /// row; an older replaceable event returns nothing.
    pub fn process(&self, payload: &str, relay: Option<&str>) -> Result<Vec<Event>, ProcessError> {
        let raw = RawEvent::from_json(payload)?;
        self.process_raw(raw, relay)
    }

    pub fn process_raw(&self, raw: RawEvent, relay: Option<&str>) -> Result<Vec<Event>, ProcessError> {
        self.process_at_depth(raw, relay, 0)
    }

    /// Process each payload independently; failures are collected, not fatal.
    pub fn process_batch<I, S>(&self, payloads: I, relay: Option<&str>) -> BatchReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = BatchReport::default();
        for (index, payload) in payloads.into_iter().enumerate() {
            match self.process(payload.as_ref(), relay) {
                Ok(events) => report.events.extend(events),
                Err(e) => {
                    log_failure(index, &e);
                    report.failures.push((index, e));
                }
            }
        }
        debug!(
            stored = report.events.len(),
            failed = report.failures.len(),
            "batch processed"
        );
        report
    }

    fn process_at_depth(
        &self,
        mut raw: RawEvent,
        relay: Option<&str>,
        depth: u8,
    ) -> Result<Vec<Event>, ProcessError> {
        if raw.id.is_empty() || raw.pubkey.is_empty() {
            return Err(ProcessError::MalformedPayload("empty id or pubkey".into()));
        }
        // Stored as a signed SQL integer.
        if raw.created_at > i64::MAX as u64 {
            return Err(ProcessError::MalformedPayload(format!(
                "created_at {} out of range",
                raw.created_at
            )));
        }

        if self.options.verify_signatures {
            codec::verify(&raw).map_err(|reason| ProcessError::InvalidSignature {
                id: raw.id.clone(),
                reason,
            })?;
        }
        // Only reachable with verification off; ids are looked up lowercase.
        raw.id.make_ascii_lowercase();
        raw.pubkey.make_ascii_lowercase();

        let now = self.clock.now();
        if let Some(expires_at) = raw.expiration() {
            if expires_at <= now {
                return Err(ProcessError::Expired {
                    id: raw.id.clone(),
                    expires_at,
                });
            }
        }

        let kind = Kind::from(raw.kind);
        if let Kind::Unsupported(k) = kind {
            return Err(ProcessError::UnsupportedKind(k));
        }

        let existing = self.repo.find_by_id(&raw.id)?;
        if let Some(mut stored) = existing.clone().filter(|e| !e.is_stub()) {
            if let Some(r) = relay {
                if stored.mark_seen(r) {
                    self.repo.save_event(&stored)?;
                }
            }
            if self.author_state_pending(kind, &raw)? {
                warn!(id = %raw.id, kind = raw.kind, "completing author state of a stored event");
                self.apply_author_state(kind, &raw)?;
            }
            debug!(id = %raw.id, relay = relay.unwrap_or("-"), "duplicate event");
            return Ok(vec![stored]);
        }

        if !self.accepts_replaceable(kind, &raw)? {
            debug!(id = %raw.id, kind = raw.kind, "older replaceable event discarded");
            return Ok(Vec::new());
        }

        let (mut event, retired) = self.resolve_row(kind, &raw, existing)?;
        event.id = Some(raw.id.clone());
        event.pubkey = Some(raw.pubkey.clone());
        event.created_at = Some(raw.created_at);
        event.kind = Some(raw.kind);
        event.tags = raw.tags.clone();
        event.content = raw.content.clone();
        event.sig = Some(raw.sig.clone());
        event.received_at = Some(now);
        event.expires_at = raw.expiration();
        event.replaceable_id = kind
            .is_parameterized()
            .then(|| raw.identifier_tag().unwrap_or_default().to_string());
        if let Some(r) = relay {
            event.mark_seen(r);
        }

        // Effects that are safe to repeat run before the row exists, so a
        // failed save is retried in full.
        match kind {
            Kind::Metadata | Kind::ContactList | Kind::MuteList | Kind::FollowSet => {}
            Kind::Deletion => {
                self.link_references(&raw, &mut event, false)?;
                self.apply_deletion(&raw, relay)?;
            }
            Kind::Repost
            | Kind::ZapReceipt
            | Kind::Text
            | Kind::Reaction
            | Kind::Picture
            | Kind::Video
            | Kind::ShortVideo
            | Kind::Report
            | Kind::ZapRequest
            | Kind::LongForm
            | Kind::Parameterized(_) => self.link_references(&raw, &mut event, true)?,
            Kind::Unsupported(k) => return Err(ProcessError::UnsupportedKind(k)),
        }

        let local_id = match retired {
            Some(old) => self.repo.replace_event(&event, old)?,
            None => self.repo.save_event(&event)?,
        };
        event.local_id = Some(local_id);
        debug!(id = %raw.id, kind = raw.kind, local_id, "event stored");

        // Stamp-gated state follows the row; a redelivery completes it if
        // this step fails.
        self.apply_author_state(kind, &raw)?;

        let embedded = match kind {
            Kind::Repost if !raw.content.trim().is_empty() => {
                self.process_embedded(&raw.content, relay, depth, "repost")
            }
            Kind::ZapReceipt => match raw.tag_value(TAG_ZAP_DESCRIPTION) {
                Some(request) => self.process_embedded(request, relay, depth, "zap request"),
                None => {
                    debug!(id = %raw.id, "zap receipt without description");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };

        let mut out = Vec::with_capacity(1 + embedded.len());
        out.push(event);
        out.extend(embedded);
        Ok(out)
    }

    /// The row to hydrate, plus an older row at the same parameterized
    /// address that has to go once the new one is saved.
    fn resolve_row(
        &self,
        kind: Kind,
        raw: &RawEvent,
        by_id: Option<Event>,
    ) -> Result<(Event, Option<i64>), ProcessError> {
        if !kind.is_parameterized() {
            return Ok((by_id.unwrap_or_default(), None));
        }
        let d = raw.identifier_tag().unwrap_or_default();
        let at_address = self.repo.find_stub(d, &raw.pubkey, raw.kind)?;
        match (by_id, at_address) {
            (Some(stub), Some(row)) if row.local_id != stub.local_id => {
                // The id stub keeps its row; the address row is retired.
                debug!(old = ?row.id, new = %raw.id, "replacing parameterized event");
                Ok((stub, row.local_id))
            }
            (Some(stub), _) => Ok((stub, None)),
            (None, Some(row)) if row.is_stub() => Ok((row, None)),
            (None, Some(row)) => {
                // An older version at the same address: replace it wholesale.
                debug!(old = ?row.id, new = %raw.id, "replacing parameterized event");
                Ok((
                    Event {
                        local_id: row.local_id,
                        ..Default::default()
                    },
                    None,
                ))
            }
            (None, None) => Ok((Event::default(), None)),
        }
    }

    fn process_embedded(&self, json: &str, relay: Option<&str>, depth: u8, what: &str) -> Vec<Event> {
        if depth >= self.options.max_embedded_depth {
            debug!(depth, what, "embedded event beyond max depth");
            return Vec::new();
        }
        let raw = match RawEvent::from_json(json) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(what, "embedded payload is not an event: {}", e);
                return Vec::new();
            }
        };
        match self.process_at_depth(raw, relay, depth + 1) {
            Ok(events) => events,
            Err(e) => {
                warn!(what, "embedded event rejected: {}", e);
                Vec::new()
            }
        }
    }

    fn notify_graph(&self, change: GraphChange) {
        if let Some(tx) = &self.graph {
            if tx.send(change).is_err() {
                trace!("social graph listener is gone");
            }
        }
    }
}

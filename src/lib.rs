//! Ingestion and trust-graph core for a Nostr client.
//!
//! Raw relay payloads go through [`processor::EventProcessor`] (usually via
//! the single-writer [`writer::IngestQueue`]) into an
//! [`event_store::EventRepository`]. [`social_graph::SocialGraphCache`]
//! follows contact-list changes and answers in-network queries for a root
//! user.

pub mod config;
pub mod error;
pub mod logging;
pub mod notes;
pub mod processor;
pub mod social_graph;
pub mod writer;

pub use config::Config;
pub use error::ProcessError;
pub use processor::{
    split_payloads, BatchReport, Clock, EventProcessor, FixedClock, GraphChange, GraphNotifier,
    ProcessorOptions, SystemClock,
};
pub use social_graph::{GraphSnapshot, SocialGraphCache, DEFAULT_MAX_HOPS};
pub use writer::IngestQueue;

pub use event_store;
pub use nostr_core;

//! Entity storage for nosgraph.
//!
//! Defines the [`EventRepository`] boundary that the ingestion core writes
//! through, the entities it stores, and two implementations: an in-memory
//! adjacency-map store and a SQLite store.

pub mod error;
pub mod memory;
pub mod model;
pub mod repository;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use memory::InMemoryRepository;
pub use model::{
    supersedes, Author, AuthorList, Event, EventFilter, EventReference, Follow, Profile,
    ReplaceableStamp,
};
pub use repository::EventRepository;
pub use sqlite::SqliteRepository;

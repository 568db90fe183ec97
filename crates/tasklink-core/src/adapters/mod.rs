//! # Infrastructure Adapters
//!
//! In-memory implementations of the persistence traits, suitable for
//! testing, development, and single-process deployments.

pub mod memory;

pub use memory::{
    InMemoryEntityStore, InMemoryExecutionStore, InMemoryIntegrationStore, InMemoryLinkStore,
    InMemoryWebhookEventStore,
};

//! Document store for the Onflix backend.
//!
//! This crate provides:
//! - A backend-agnostic `DocumentStore` trait over JSON documents
//! - A filter/update/sort vocabulary shared by every backend
//! - MongoDB and in-memory backends
//! - Typed repositories per collection
//! - The content catalog query builder (browse, search, similar, categories)
//! - Retry with backoff for reads, and store metrics

pub mod content_query;
pub mod error;
pub mod filter;
pub mod memory;
pub mod metrics;
pub mod mongo;
pub mod repos;
pub mod retry;
pub mod store;

pub use content_query::{
    validate_search_query, CatalogCategory, ContentQuery, ContentSortField, SearchQueryError,
};
pub use error::{StoreError, StoreResult};
pub use filter::{Filter, FindOptions, SortDirection, Update};
pub use memory::MemoryStore;
pub use mongo::{MongoConfig, MongoStore};
pub use repos::{
    collections, Repositories, Repository, WebhookEventLog, UNIQUE_INDEXES,
    WEBHOOK_EVENT_RETENTION_DAYS,
};
pub use retry::RetryConfig;
pub use store::{DocumentStore, GroupCount, UniqueIndex};

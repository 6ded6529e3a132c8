//! The document store seam.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreResult;
use crate::filter::{Filter, FindOptions, Update};

/// Result row of a group-by-count aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupCount {
    pub key: Value,
    pub count: u64,
}

/// A unique constraint every backend enforces on top of `id`.
#[derive(Debug, Clone, Copy)]
pub struct UniqueIndex {
    pub collection: &'static str,
    /// Dotted paths forming the compound key.
    pub fields: &'static [&'static str],
    /// Only documents whose key fields are all strings are indexed.
    pub strings_only: bool,
}

impl UniqueIndex {
    /// Index name, stable across backends.
    pub fn name(&self) -> String {
        format!("{}_unique", self.fields.join("_").replace('.', "_"))
    }
}

/// A collection-oriented JSON document store.
///
/// Every document carries a string `id`. Single-document writes are atomic;
/// nothing spans documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs and readiness output.
    fn backend(&self) -> &'static str;

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Value>>;

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>>;

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;

    /// Insert a new document. Fails with `Duplicate` if the id or a
    /// unique key is taken.
    async fn insert_one(&self, collection: &str, document: Value) -> StoreResult<()>;

    /// Returns the number of matched documents (0 or 1).
    async fn update_one(&self, collection: &str, filter: &Filter, update: &Update)
        -> StoreResult<u64>;

    /// Returns the number of matched documents.
    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<u64>;

    /// Replace the first match wholesale. Returns the number matched.
    async fn replace_one(&self, collection: &str, filter: &Filter, document: Value)
        -> StoreResult<u64>;

    /// Returns the number of deleted documents.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;

    /// Count matching documents grouped by `field`, descending by count.
    ///
    /// Array fields are unwound so each element is its own group.
    async fn group_count(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
    ) -> StoreResult<Vec<GroupCount>>;

    /// Connectivity check.
    async fn ping(&self) -> StoreResult<()>;
}

//! In-memory document store.
//!
//! Used by tests and local development (`STORE_BACKEND=memory`). Semantics
//! follow the MongoDB backend closely enough for handler tests.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::filter::{lookup, sort_order, Filter, FindOptions, SortDirection, Update};
use crate::metrics::record_operation;
use crate::repos::UNIQUE_INDEXES;
use crate::store::{DocumentStore, GroupCount, UniqueIndex};

/// Collections of JSON documents behind a single lock.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn document_id(doc: &Value) -> Option<&str> {
    doc.get("id").and_then(|v| v.as_str())
}

/// Key of `doc` under `index`, or None when the document is not indexed.
fn unique_key(index: &UniqueIndex, doc: &Value) -> Option<Vec<Value>> {
    let key: Vec<Value> = index
        .fields
        .iter()
        .map(|field| {
            lookup(doc, field)
                .into_iter()
                .next()
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect();
    if index.strings_only && !key.iter().all(Value::is_string) {
        return None;
    }
    Some(key)
}

/// Reject `candidate` if it collides with a unique key of another document.
/// `position` is the candidate's own slot when it replaces an existing one.
fn check_unique(
    collection: &str,
    docs: &[Value],
    candidate: &Value,
    position: Option<usize>,
) -> StoreResult<()> {
    for index in UNIQUE_INDEXES.iter().filter(|i| i.collection == collection) {
        let Some(key) = unique_key(index, candidate) else {
            continue;
        };
        let taken = docs
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != position)
            .any(|(_, d)| unique_key(index, d).as_ref() == Some(&key));
        if taken {
            return Err(StoreError::Duplicate(format!(
                "{} {}",
                collection,
                index.name()
            )));
        }
    }
    Ok(())
}

/// Apply `update` to the document at `position` unless it breaks a unique key.
fn update_at(
    collection: &str,
    docs: &mut [Value],
    position: usize,
    update: &Update,
) -> StoreResult<()> {
    let mut updated = docs[position].clone();
    update.apply(&mut updated);
    check_unique(collection, docs, &updated, Some(position))?;
    docs[position] = updated;
    Ok(())
}

fn sort_documents(docs: &mut [Value], sort: &[(String, SortDirection)]) {
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let av = lookup(a, field).into_iter().next();
            let bv = lookup(b, field).into_iter().next();
            let ord = sort_order(av, bv);
            let ord = match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Value>> {
        let started = Instant::now();
        let collections = self.collections.read().await;
        let found = collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned());
        record_operation(collection, "find_one", true, started);
        Ok(found)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>> {
        let started = Instant::now();
        let collections = self.collections.read().await;
        let mut docs: Vec<Value> = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default();
        drop(collections);

        sort_documents(&mut docs, &options.sort);

        let docs = docs
            .into_iter()
            .skip(options.skip as usize)
            .take(options.limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .collect();
        record_operation(collection, "find", true, started);
        Ok(docs)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert_one(&self, collection: &str, document: Value) -> StoreResult<()> {
        let started = Instant::now();
        let id = document_id(&document)
            .ok_or_else(|| StoreError::serialization("document is missing a string id"))?
            .to_string();

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| document_id(d) == Some(id.as_str())) {
            record_operation(collection, "insert_one", false, started);
            return Err(StoreError::Duplicate(format!("{}/{}", collection, id)));
        }
        if let Err(e) = check_unique(collection, docs, &document, None) {
            record_operation(collection, "insert_one", false, started);
            return Err(e);
        }
        docs.push(document);
        record_operation(collection, "insert_one", true, started);
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<u64> {
        let started = Instant::now();
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            record_operation(collection, "update_one", true, started);
            return Ok(0);
        };
        let matched = match docs.iter().position(|d| filter.matches(d)) {
            Some(position) => {
                let result = update_at(collection, docs, position, update);
                record_operation(collection, "update_one", result.is_ok(), started);
                result?;
                1
            }
            None => {
                record_operation(collection, "update_one", true, started);
                0
            }
        };
        Ok(matched)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<u64> {
        let started = Instant::now();
        let mut collections = self.collections.write().await;
        let mut matched = 0;
        if let Some(docs) = collections.get_mut(collection) {
            let positions: Vec<usize> = docs
                .iter()
                .enumerate()
                .filter(|(_, d)| filter.matches(d))
                .map(|(i, _)| i)
                .collect();
            for position in positions {
                if let Err(e) = update_at(collection, docs, position, update) {
                    record_operation(collection, "update_many", false, started);
                    return Err(e);
                }
                matched += 1;
            }
        }
        record_operation(collection, "update_many", true, started);
        Ok(matched)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Value,
    ) -> StoreResult<u64> {
        let started = Instant::now();
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            record_operation(collection, "replace_one", true, started);
            return Ok(0);
        };
        let Some(position) = docs.iter().position(|d| filter.matches(d)) else {
            record_operation(collection, "replace_one", true, started);
            return Ok(0);
        };
        if let Err(e) = check_unique(collection, docs, &document, Some(position)) {
            record_operation(collection, "replace_one", false, started);
            return Err(e);
        }
        docs[position] = document;
        record_operation(collection, "replace_one", true, started);
        Ok(1)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(index) => {
                docs.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn group_count(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
    ) -> StoreResult<Vec<GroupCount>> {
        let collections = self.collections.read().await;
        let mut groups: Vec<GroupCount> = Vec::new();

        for doc in collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|d| filter.matches(d))
        {
            let mut keys = Vec::new();
            for value in lookup(doc, field) {
                match value {
                    Value::Array(items) => keys.extend(items.iter().cloned()),
                    other => keys.push(other.clone()),
                }
            }
            for key in keys {
                match groups.iter_mut().find(|g| g.key == key) {
                    Some(group) => group.count += 1,
                    None => groups.push(GroupCount { key, count: 1 }),
                }
            }
        }

        groups.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| sort_order(Some(&a.key), Some(&b.key)))
        });
        Ok(groups)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

//! MongoDB backend.
//!
//! Documents are stored with `_id` set to the model's string `id`. RFC 3339
//! strings are written as BSON dates so range queries and sorts on
//! timestamps use native date ordering, and are read back as strings.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::filter::{Filter, FindOptions, Update};
use crate::metrics::record_operation;
use crate::repos::{collections, UNIQUE_INDEXES, WEBHOOK_EVENT_RETENTION_DAYS};
use crate::retry::{with_retry, RetryConfig};
use crate::store::{DocumentStore, GroupCount, UniqueIndex};

const DUPLICATE_KEY_CODE: i32 = 11000;

// =============================================================================
// Configuration
// =============================================================================

/// MongoDB connection configuration.
#[derive(Debug, Clone)]
pub struct MongoConfig {
    /// Connection string
    pub uri: String,
    /// Database name
    pub database: String,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Server selection timeout
    pub server_selection_timeout: Duration,
    /// Retry configuration for reads
    pub retry: RetryConfig,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "onflix".to_string(),
            connect_timeout: Duration::from_secs(10),
            server_selection_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

impl MongoConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let connect_timeout_secs: u64 = std::env::var("MONGODB_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Self {
            uri: std::env::var("MONGODB_URI")
                .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
            database: std::env::var("MONGODB_DATABASE").unwrap_or_else(|_| "onflix".to_string()),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            server_selection_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Document store backed by a MongoDB database.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
    retry: RetryConfig,
}

impl MongoStore {
    /// Connect and select the configured database.
    pub async fn connect(config: MongoConfig) -> StoreResult<Self> {
        let mut options = ClientOptions::parse(&config.uri).await.map_err(map_error)?;
        options.app_name = Some(concat!("onflix/", env!("CARGO_PKG_VERSION")).to_string());
        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.server_selection_timeout);

        let client = Client::with_options(options).map_err(map_error)?;
        let db = client.database(&config.database);

        info!(database = %config.database, "Connected to MongoDB");

        Ok(Self {
            client,
            db,
            retry: config.retry,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StoreResult<Self> {
        Self::connect(MongoConfig::from_env()).await
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    /// Create the unique keys, the webhook event TTL and query indexes.
    pub async fn ensure_indexes(&self) -> StoreResult<()> {
        for index in UNIQUE_INDEXES {
            self.collection(index.collection)
                .create_index(unique_index_model(index))
                .await
                .map_err(map_error)?;
        }

        self.collection(collections::WEBHOOK_EVENTS)
            .create_index(webhook_event_ttl_model())
            .await
            .map_err(map_error)?;

        self.collection(collections::SUBSCRIPTIONS)
            .create_index(IndexModel::builder().keys(doc! { "user_id": 1, "created_at": -1 }).build())
            .await
            .map_err(map_error)?;
        self.collection(collections::SUBSCRIPTIONS)
            .create_index(IndexModel::builder().keys(doc! { "stripe_subscription_id": 1 }).build())
            .await
            .map_err(map_error)?;
        self.collection(collections::CONTENT)
            .create_index(IndexModel::builder().keys(doc! { "status": 1, "view_count": -1 }).build())
            .await
            .map_err(map_error)?;

        debug!("MongoDB indexes ensured");
        Ok(())
    }

    /// Underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Value>> {
        let started = Instant::now();
        let coll = self.collection(collection);
        let filter = filter_to_document(filter);

        let result = with_retry(&self.retry, "find_one", || {
            let coll = coll.clone();
            let filter = filter.clone();
            async move { coll.find_one(filter).await.map_err(map_error) }
        })
        .await;

        record_operation(collection, "find_one", result.is_ok(), started);
        Ok(result?.map(document_to_json))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>> {
        let started = Instant::now();
        let coll = self.collection(collection);
        let filter = filter_to_document(filter);
        let sort = sort_to_document(options);
        let skip = options.skip;
        let limit = options.limit.map(|l| l.min(i64::MAX as u64) as i64).unwrap_or(0);

        let result = with_retry(&self.retry, "find", || {
            let coll = coll.clone();
            let filter = filter.clone();
            let sort = sort.clone();
            async move {
                let cursor = coll
                    .find(filter)
                    .sort(sort)
                    .skip(skip)
                    .limit(limit)
                    .await
                    .map_err(map_error)?;
                cursor
                    .try_collect::<Vec<Document>>()
                    .await
                    .map_err(map_error)
            }
        })
        .await;

        record_operation(collection, "find", result.is_ok(), started);
        Ok(result?.into_iter().map(document_to_json).collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let started = Instant::now();
        let coll = self.collection(collection);
        let filter = filter_to_document(filter);

        let result = with_retry(&self.retry, "count", || {
            let coll = coll.clone();
            let filter = filter.clone();
            async move { coll.count_documents(filter).await.map_err(map_error) }
        })
        .await;

        record_operation(collection, "count", result.is_ok(), started);
        result
    }

    async fn insert_one(&self, collection: &str, document: Value) -> StoreResult<()> {
        let started = Instant::now();
        let doc = json_to_document(document)?;
        let result = self
            .collection(collection)
            .insert_one(doc)
            .await
            .map(|_| ())
            .map_err(map_error);
        record_operation(collection, "insert_one", result.is_ok(), started);
        result
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<u64> {
        let started = Instant::now();
        let result = self
            .collection(collection)
            .update_one(filter_to_document(filter), update_to_document(update))
            .await
            .map(|r| r.matched_count)
            .map_err(map_error);
        record_operation(collection, "update_one", result.is_ok(), started);
        result
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<u64> {
        let started = Instant::now();
        let result = self
            .collection(collection)
            .update_many(filter_to_document(filter), update_to_document(update))
            .await
            .map(|r| r.matched_count)
            .map_err(map_error);
        record_operation(collection, "update_many", result.is_ok(), started);
        result
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Value,
    ) -> StoreResult<u64> {
        let started = Instant::now();
        let doc = json_to_document(document)?;
        let result = self
            .collection(collection)
            .replace_one(filter_to_document(filter), doc)
            .await
            .map(|r| r.matched_count)
            .map_err(map_error);
        record_operation(collection, "replace_one", result.is_ok(), started);
        result
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let started = Instant::now();
        let result = self
            .collection(collection)
            .delete_one(filter_to_document(filter))
            .await
            .map(|r| r.deleted_count)
            .map_err(map_error);
        record_operation(collection, "delete_one", result.is_ok(), started);
        result
    }

    async fn group_count(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
    ) -> StoreResult<Vec<GroupCount>> {
        let started = Instant::now();
        let coll = self.collection(collection);
        let path = format!("${}", mongo_field(field));
        let pipeline = vec![
            doc! { "$match": filter_to_document(filter) },
            doc! { "$unwind": { "path": &path, "preserveNullAndEmptyArrays": false } },
            doc! { "$group": { "_id": &path, "count": { "$sum": 1 } } },
            doc! { "$sort": { "count": -1, "_id": 1 } },
        ];

        let result = with_retry(&self.retry, "group_count", || {
            let coll = coll.clone();
            let pipeline = pipeline.clone();
            async move {
                let cursor = coll.aggregate(pipeline).await.map_err(map_error)?;
                cursor
                    .try_collect::<Vec<Document>>()
                    .await
                    .map_err(map_error)
            }
        })
        .await;

        record_operation(collection, "group_count", result.is_ok(), started);

        Ok(result?
            .into_iter()
            .map(|row| {
                let count = match row.get("count") {
                    Some(Bson::Int32(n)) => *n as u64,
                    Some(Bson::Int64(n)) => *n as u64,
                    _ => 0,
                };
                let key = row.get("_id").cloned().map(bson_to_json).unwrap_or(Value::Null);
                GroupCount { key, count }
            })
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        let db = self.db.clone();
        with_retry(&RetryConfig::disabled(), "ping", || {
            let db = db.clone();
            async move {
                db.run_command(doc! { "ping": 1 })
                    .await
                    .map(|_| ())
                    .map_err(map_error)
            }
        })
        .await
    }
}

/// Processed webhook ids expire once redelivery is no longer possible.
fn webhook_event_ttl_model() -> IndexModel {
    let ttl = Duration::from_secs(WEBHOOK_EVENT_RETENTION_DAYS * 24 * 60 * 60);
    IndexModel::builder()
        .keys(doc! { "received_at": 1 })
        .options(IndexOptions::builder().expire_after(ttl).build())
        .build()
}

fn unique_index_model(index: &UniqueIndex) -> IndexModel {
    let mut keys = Document::new();
    for field in index.fields {
        keys.insert(mongo_field(field), 1);
    }
    let mut options = IndexOptions::builder()
        .name(index.name())
        .unique(true)
        .build();
    if index.strings_only {
        let mut partial = Document::new();
        for field in index.fields {
            partial.insert(mongo_field(field), doc! { "$type": "string" });
        }
        options.partial_filter_expression = Some(partial);
    }
    IndexModel::builder().keys(keys).options(options).build()
}

// =============================================================================
// Error mapping
// =============================================================================

fn map_error(e: mongodb::error::Error) -> StoreError {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY_CODE => {
            StoreError::Duplicate(we.message.clone())
        }
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => StoreError::Connection(e.to_string()),
        ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => {
            StoreError::Serialization(e.to_string())
        }
        _ => StoreError::Query(e.to_string()),
    }
}

// =============================================================================
// JSON <-> BSON
// =============================================================================

fn mongo_field(field: &str) -> String {
    if field == "id" {
        "_id".to_string()
    } else {
        field.to_string()
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.len() < 20 || !s.as_bytes().get(10).is_some_and(|b| *b == b'T') {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else if let Some(u) = n.as_u64() {
                Bson::Int64(u.min(i64::MAX as u64) as i64)
            } else {
                Bson::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => match parse_timestamp(s) {
            Some(dt) => Bson::DateTime(bson::DateTime::from_millis(dt.timestamp_millis())),
            None => Bson::String(s.clone()),
        },
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_bson(v)))
                .collect(),
        ),
    }
}

fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::from(i),
        Bson::Int64(i) => Value::from(i),
        Bson::Double(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s),
        Bson::DateTime(dt) => DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis())
            .map(|d| Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)))
            .unwrap_or(Value::Null),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(doc) => {
            Value::Object(doc.into_iter().map(|(k, v)| (k, bson_to_json(v))).collect::<Map<_, _>>())
        }
        other => Value::String(other.to_string()),
    }
}

fn json_to_document(value: Value) -> StoreResult<Document> {
    let Value::Object(mut map) = value else {
        return Err(StoreError::serialization("documents must be JSON objects"));
    };
    if let Some(id) = map.remove("id") {
        map.insert("_id".to_string(), id);
    }
    match json_to_bson(&Value::Object(map)) {
        Bson::Document(doc) => Ok(doc),
        _ => Err(StoreError::serialization("documents must be JSON objects")),
    }
}

fn document_to_json(mut doc: Document) -> Value {
    if let Some(id) = doc.remove("_id") {
        doc.insert("id", id);
    }
    bson_to_json(Bson::Document(doc))
}

fn field_document(field: &str, value: impl Into<Bson>) -> Document {
    let mut doc = Document::new();
    doc.insert(mongo_field(field), value);
    doc
}

fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn filter_to_document(filter: &Filter) -> Document {
    match filter {
        Filter::All => Document::new(),
        Filter::Eq(f, v) => field_document(f, json_to_bson(v)),
        Filter::Ne(f, v) => field_document(f, doc! { "$ne": json_to_bson(v) }),
        Filter::In(f, vs) => field_document(
            f,
            doc! { "$in": Bson::Array(vs.iter().map(json_to_bson).collect()) },
        ),
        Filter::Gt(f, v) => field_document(f, doc! { "$gt": json_to_bson(v) }),
        Filter::Gte(f, v) => field_document(f, doc! { "$gte": json_to_bson(v) }),
        Filter::Lt(f, v) => field_document(f, doc! { "$lt": json_to_bson(v) }),
        Filter::Lte(f, v) => field_document(f, doc! { "$lte": json_to_bson(v) }),
        Filter::Contains(f, s) => {
            field_document(f, doc! { "$regex": escape_regex(s), "$options": "i" })
        }
        Filter::StartsWith(f, s) => field_document(
            f,
            doc! { "$regex": format!("^{}", escape_regex(s)), "$options": "i" },
        ),
        Filter::Exists(f, true) => field_document(f, doc! { "$ne": Bson::Null }),
        Filter::Exists(f, false) => field_document(f, Bson::Null),
        Filter::And(fs) => doc! {
            "$and": fs.iter().map(|f| Bson::Document(filter_to_document(f))).collect::<Vec<_>>()
        },
        Filter::Or(fs) => doc! {
            "$or": fs.iter().map(|f| Bson::Document(filter_to_document(f))).collect::<Vec<_>>()
        },
    }
}

fn sort_to_document(options: &FindOptions) -> Document {
    let mut doc = Document::new();
    for (field, direction) in &options.sort {
        doc.insert(mongo_field(field), direction.as_i32());
    }
    doc
}

fn update_to_document(update: &Update) -> Document {
    let mut doc = Document::new();
    if !update.set.is_empty() {
        let set: Document = update
            .set
            .iter()
            .map(|(f, v)| (mongo_field(f), json_to_bson(v)))
            .collect();
        doc.insert("$set", set);
    }
    if !update.unset.is_empty() {
        let unset: Document = update
            .unset
            .iter()
            .map(|f| (mongo_field(f), Bson::String(String::new())))
            .collect();
        doc.insert("$unset", unset);
    }
    if !update.inc.is_empty() {
        let inc: Document = update
            .inc
            .iter()
            .map(|(f, by)| (mongo_field(f), Bson::Int64(*by)))
            .collect();
        doc.insert("$inc", inc);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_round_trip() {
        let doc = json_to_document(json!({"id": "u1", "email": "a@b.c"})).unwrap();
        assert_eq!(doc.get_str("_id").unwrap(), "u1");
        assert!(doc.get("id").is_none());

        let back = document_to_json(doc);
        assert_eq!(back["id"], "u1");
        assert!(back.get("_id").is_none());
    }

    #[test]
    fn test_timestamps_become_dates() {
        let bson = json_to_bson(&json!("2024-03-01T12:00:00Z"));
        assert!(matches!(bson, Bson::DateTime(_)));
        assert_eq!(bson_to_json(bson), json!("2024-03-01T12:00:00.000Z"));

        assert!(matches!(json_to_bson(&json!("2024")), Bson::String(_)));
        assert!(matches!(json_to_bson(&json!("The Matrix")), Bson::String(_)));
    }

    #[test]
    fn test_filter_translation() {
        let f = Filter::and([
            Filter::eq("id", "c1"),
            Filter::contains("title", "a.b"),
            Filter::is_in("genres", ["Drama"]),
        ]);
        let doc = filter_to_document(&f);
        let parts = doc.get_array("$and").unwrap();
        assert_eq!(parts.len(), 3);
        let regex = parts[1].as_document().unwrap().get_document("title").unwrap();
        assert_eq!(regex.get_str("$regex").unwrap(), "a\\.b");
        assert_eq!(regex.get_str("$options").unwrap(), "i");
        assert!(parts[0].as_document().unwrap().contains_key("_id"));
    }

    #[test]
    fn test_update_translation() {
        let doc = update_to_document(&Update::new().set("status", "active").inc("view_count", 1));
        assert!(doc.contains_key("$set"));
        assert!(doc.contains_key("$inc"));
        assert!(!doc.contains_key("$unset"));
    }

    #[test]
    fn test_unique_index_models() {
        let payments = UNIQUE_INDEXES
            .iter()
            .find(|i| i.collection == collections::PAYMENTS)
            .unwrap();
        let model = unique_index_model(payments);
        let options = model.options.unwrap();
        assert_eq!(options.unique, Some(true));
        assert!(options.partial_filter_expression.is_some());

        let usage = UNIQUE_INDEXES
            .iter()
            .find(|i| i.collection == collections::USAGE)
            .unwrap();
        let model = unique_index_model(usage);
        assert_eq!(model.keys.len(), 3);
        assert!(model.keys.contains_key("period.start"));
        assert!(model.options.unwrap().partial_filter_expression.is_none());
    }

    #[test]
    fn test_webhook_event_ttl_model() {
        let model = webhook_event_ttl_model();
        assert!(model.keys.contains_key("received_at"));
        let ttl = model.options.unwrap().expire_after.unwrap();
        assert_eq!(ttl, Duration::from_secs(30 * 24 * 60 * 60));
    }

    #[test]
    fn test_config_defaults() {
        let config = MongoConfig::default();
        assert_eq!(config.database, "onflix");
        assert_eq!(config.retry.max_retries, 3);
    }
}

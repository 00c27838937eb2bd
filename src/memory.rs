//! In-memory reference backend.
//!
//! [`MemoryStore`] implements [`DocumentStore`] entirely in process: namespaces
//! hold collections, collections hold documents keyed by (partition-key tuple,
//! id) plus an append-only change log. It exists so the harness contract is
//! executable -- the integration tests and the probe binary run against it --
//! and doubles as the behavioral reference for what the harness expects from a
//! real endpoint.
//!
//! All state lives behind one `RwLock`; every operation acquires the lock once
//! and applies its effect atomically, so a future dropped by cancellation
//! never leaves a partial write.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Error;
use crate::feed::FeedPage;
use crate::query::{QueryDefinition, compare_documents};
use crate::store::{DocumentStore, FeedPosition, QueryPage};
use crate::types::{
    ChangeRecord, CollectionPath, ContinuationToken, Document, FeedStart, PartitionKeySpec,
    PartitionKeyValue,
};

/// Well-known development master key accepted by default, analogous to the
/// fixed credential local store emulators ship with.
pub const WELL_KNOWN_KEY: &str = "docharness-local-master-key";

/// Storage identity of a document: (rendered partition-key tuple, id).
type DocKey = (String, String);

/// A collection: fixed partition-key spec, documents, and the change log.
struct CollectionData {
    /// Spec fixed at creation, never mutated.
    spec: PartitionKeySpec,
    /// Documents keyed by (partition-key tuple, id).
    documents: HashMap<DocKey, Document>,
    /// Append-only change log. Index `i` = change at lsn `i`.
    changes: Vec<ChangeRecord>,
}

#[derive(Default)]
struct NamespaceData {
    collections: HashMap<String, CollectionData>,
}

#[derive(Default)]
struct Registry {
    namespaces: HashMap<String, NamespaceData>,
}

/// In-memory document store with change-feed support.
pub struct MemoryStore {
    registry: RwLock<Registry>,
    /// Credential required at connect time, if any.
    master_key: Option<String>,
    /// Fault injection: when set, every operation fails with
    /// [`Error::StoreUnavailable`].
    offline: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store requiring the [`WELL_KNOWN_KEY`] credential.
    pub fn new() -> MemoryStore {
        MemoryStore {
            registry: RwLock::new(Registry::default()),
            master_key: Some(WELL_KNOWN_KEY.to_string()),
            offline: AtomicBool::new(false),
        }
    }

    /// Create an empty store requiring a specific master key.
    pub fn with_master_key(key: impl Into<String>) -> MemoryStore {
        MemoryStore {
            master_key: Some(key.into()),
            ..MemoryStore::open_access()
        }
    }

    /// Create an empty store that accepts any credential (or none).
    pub fn open_access() -> MemoryStore {
        MemoryStore {
            registry: RwLock::new(Registry::default()),
            master_key: None,
            offline: AtomicBool::new(false),
        }
    }

    /// Whether the given credential would be accepted at connect time. A store
    /// without a configured key accepts anything; one with a key requires an
    /// exact match.
    pub fn accepts_key(&self, presented: Option<&str>) -> bool {
        match &self.master_key {
            None => true,
            Some(required) => presented == Some(required.as_str()),
        }
    }

    /// Fault injection: toggle connectivity. While offline, every operation
    /// fails with [`Error::StoreUnavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self, operation: &str) -> Result<(), Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::unavailable(operation, "store is offline"));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> MemoryStore {
        MemoryStore::new()
    }
}

/// Current wall-clock time as Unix epoch milliseconds.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Look up a collection, failing when the namespace or collection is unknown.
/// Handles are only obtainable through `create_collection`, so an unknown
/// collection means the caller raced a namespace teardown -- a usage error.
fn collection<'a>(
    registry: &'a Registry,
    path: &CollectionPath,
) -> Result<&'a CollectionData, Error> {
    registry
        .namespaces
        .get(&path.namespace)
        .and_then(|ns| ns.collections.get(&path.collection))
        .ok_or_else(|| Error::InvalidSpec(format!("unknown collection {path}")))
}

fn collection_mut<'a>(
    registry: &'a mut Registry,
    path: &CollectionPath,
) -> Result<&'a mut CollectionData, Error> {
    registry
        .namespaces
        .get_mut(&path.namespace)
        .and_then(|ns| ns.collections.get_mut(&path.collection))
        .ok_or_else(|| Error::InvalidSpec(format!("unknown collection {path}")))
}

/// Validate a write against the collection's spec and return the storage key.
///
/// The provided key must match the spec's cardinality with non-null scalar
/// components, the document must carry an id, and the document's own
/// partition-key fields must equal the provided key.
fn validate_write(
    data: &CollectionData,
    path: &CollectionPath,
    document: &Document,
    key: &PartitionKeyValue,
) -> Result<DocKey, Error> {
    key.validate_for_spec(&data.spec)?;
    let id = document.require_id()?.to_string();
    let carried = document.partition_key(&data.spec)?;
    if &carried != key {
        return Err(Error::InvalidSpec(format!(
            "document {id} in {path} carries partition key {} but the operation supplied {}",
            carried.render(),
            key.render()
        )));
    }
    Ok((key.render(), id))
}

/// Append one change record for a write. Lsns are contiguous and zero-based.
fn record_change(data: &mut CollectionData, document: Document) {
    let lsn = data.changes.len() as u64;
    data.changes.push(ChangeRecord {
        lsn,
        recorded_at: now_millis(),
        document,
    });
}

#[derive(Deserialize)]
struct FeedToken {
    lsn: u64,
}

#[derive(Deserialize)]
struct QueryToken {
    offset: u64,
}

fn mint_feed_token(lsn: u64) -> ContinuationToken {
    ContinuationToken::new(format!(r#"{{"lsn":{lsn}}}"#))
}

fn parse_feed_token(token: &ContinuationToken) -> Result<u64, Error> {
    serde_json::from_str::<FeedToken>(token.as_str())
        .map(|t| t.lsn)
        .map_err(|e| Error::InvalidSpec(format!("malformed feed continuation token: {e}")))
}

fn mint_query_token(offset: u64) -> ContinuationToken {
    ContinuationToken::new(format!(r#"{{"offset":{offset}}}"#))
}

fn parse_query_token(token: &ContinuationToken) -> Result<u64, Error> {
    serde_json::from_str::<QueryToken>(token.as_str())
        .map(|t| t.offset)
        .map_err(|e| Error::InvalidSpec(format!("malformed query continuation token: {e}")))
}

/// Resolve a feed start position to an lsn against the current change log.
fn resolve_start(changes: &[ChangeRecord], start: FeedStart) -> u64 {
    match start {
        FeedStart::Beginning => 0,
        FeedStart::Now => changes.len() as u64,
        FeedStart::AtTime(t) => changes
            .iter()
            .position(|r| r.recorded_at >= t)
            .map(|i| i as u64)
            .unwrap_or(changes.len() as u64),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_namespace(&self, namespace: &str) -> Result<(), Error> {
        self.check_online("create_namespace")?;
        if namespace.is_empty() {
            return Err(Error::InvalidSpec(
                "namespace name must not be empty".to_string(),
            ));
        }
        let mut registry = self.registry.write().expect("registry RwLock poisoned");
        registry.namespaces.entry(namespace.to_string()).or_default();
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), Error> {
        self.check_online("delete_namespace")?;
        let mut registry = self.registry.write().expect("registry RwLock poisoned");
        // Recursive and idempotent: removing the namespace drops every
        // contained collection and document; absence is not an error.
        registry.namespaces.remove(namespace);
        Ok(())
    }

    async fn create_collection(
        &self,
        namespace: &str,
        name: &str,
        spec: &PartitionKeySpec,
    ) -> Result<(), Error> {
        self.check_online("create_collection")?;
        if name.is_empty() {
            return Err(Error::InvalidSpec(
                "collection name must not be empty".to_string(),
            ));
        }
        let mut registry = self.registry.write().expect("registry RwLock poisoned");
        let ns = registry
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| Error::InvalidSpec(format!("unknown namespace {namespace}")))?;

        match ns.collections.get(name) {
            // Idempotent by name when the spec is unchanged.
            Some(existing) if existing.spec == *spec => Ok(()),
            Some(existing) => Err(Error::InvalidSpec(format!(
                "collection {namespace}/{name} already exists with partition-key spec {:?}, \
                 cannot respecify as {:?}",
                existing.spec.paths(),
                spec.paths()
            ))),
            None => {
                ns.collections.insert(
                    name.to_string(),
                    CollectionData {
                        spec: spec.clone(),
                        documents: HashMap::new(),
                        changes: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn create_item(
        &self,
        path: &CollectionPath,
        document: Document,
        key: &PartitionKeyValue,
    ) -> Result<(), Error> {
        self.check_online("create_item")?;
        let mut registry = self.registry.write().expect("registry RwLock poisoned");
        let data = collection_mut(&mut registry, path)?;
        let doc_key = validate_write(data, path, &document, key)?;

        if data.documents.contains_key(&doc_key) {
            return Err(Error::conflict(path.to_string(), doc_key.1, key.render()));
        }
        data.documents.insert(doc_key, document.clone());
        record_change(data, document);
        Ok(())
    }

    async fn upsert_item(
        &self,
        path: &CollectionPath,
        document: Document,
        key: &PartitionKeyValue,
    ) -> Result<(), Error> {
        self.check_online("upsert_item")?;
        let mut registry = self.registry.write().expect("registry RwLock poisoned");
        let data = collection_mut(&mut registry, path)?;
        let doc_key = validate_write(data, path, &document, key)?;

        // Insert-or-replace; one change record either way, even when the
        // content is unchanged.
        data.documents.insert(doc_key, document.clone());
        record_change(data, document);
        Ok(())
    }

    async fn read_item(
        &self,
        path: &CollectionPath,
        id: &str,
        key: &PartitionKeyValue,
    ) -> Result<Document, Error> {
        self.check_online("read_item")?;
        let registry = self.registry.read().expect("registry RwLock poisoned");
        let data = collection(&registry, path)?;
        key.validate_for_spec(&data.spec)?;

        data.documents
            .get(&(key.render(), id.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(path.to_string(), id, key.render()))
    }

    async fn replace_item(
        &self,
        path: &CollectionPath,
        id: &str,
        document: Document,
        key: &PartitionKeyValue,
    ) -> Result<(), Error> {
        self.check_online("replace_item")?;
        let mut registry = self.registry.write().expect("registry RwLock poisoned");
        let data = collection_mut(&mut registry, path)?;
        let doc_key = validate_write(data, path, &document, key)?;
        if doc_key.1 != id {
            return Err(Error::InvalidSpec(format!(
                "replacement document carries id {} but the operation targets {id} in {path}",
                doc_key.1
            )));
        }

        // Whole-document replacement: the stored entry becomes exactly the new
        // document; fields omitted relative to the prior version are gone.
        match data.documents.get_mut(&doc_key) {
            Some(slot) => {
                *slot = document.clone();
                record_change(data, document);
                Ok(())
            }
            None => Err(Error::not_found(path.to_string(), id, key.render())),
        }
    }

    async fn delete_item(
        &self,
        path: &CollectionPath,
        id: &str,
        key: &PartitionKeyValue,
    ) -> Result<(), Error> {
        self.check_online("delete_item")?;
        let mut registry = self.registry.write().expect("registry RwLock poisoned");
        let data = collection_mut(&mut registry, path)?;
        key.validate_for_spec(&data.spec)?;

        match data.documents.remove(&(key.render(), id.to_string())) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(path.to_string(), id, key.render())),
        }
    }

    async fn query_page(
        &self,
        path: &CollectionPath,
        definition: &QueryDefinition,
        continuation: Option<&ContinuationToken>,
        page_size: u32,
    ) -> Result<QueryPage, Error> {
        self.check_online("query_page")?;
        if page_size == 0 {
            return Err(Error::InvalidSpec(
                "query page size must be greater than zero".to_string(),
            ));
        }
        let registry = self.registry.read().expect("registry RwLock poisoned");
        let data = collection(&registry, path)?;

        let scope = match &definition.partition_key {
            Some(key) => {
                key.validate_for_spec(&data.spec)?;
                Some(key.render())
            }
            None => None,
        };

        // Re-executing the scan per page keeps the result deterministic for a
        // stable collection, which is all the restartable contract promises.
        let mut matches: Vec<&Document> = data
            .documents
            .iter()
            .filter(|((partition, _id), _)| scope.as_ref().is_none_or(|s| s == partition))
            .map(|(_, document)| document)
            .filter(|document| definition.filter.matches(document))
            .collect();
        matches.sort_by(|a, b| compare_documents(a, b, definition.order_by.as_ref()));

        let offset = match continuation {
            Some(token) => parse_query_token(token)? as usize,
            None => 0,
        };
        let end = offset.saturating_add(page_size as usize).min(matches.len());
        let start = offset.min(matches.len());
        let documents: Vec<Document> = matches[start..end].iter().map(|d| (*d).clone()).collect();

        let continuation = if end < matches.len() {
            Some(mint_query_token(end as u64))
        } else {
            None
        };
        Ok(QueryPage {
            documents,
            continuation,
        })
    }

    async fn read_feed_page(
        &self,
        path: &CollectionPath,
        position: &FeedPosition,
        page_size_hint: u32,
    ) -> Result<FeedPage, Error> {
        self.check_online("read_feed_page")?;
        if page_size_hint == 0 {
            return Err(Error::InvalidSpec(
                "feed page-size hint must be greater than zero".to_string(),
            ));
        }
        let registry = self.registry.read().expect("registry RwLock poisoned");
        let data = collection(&registry, path)?;

        let from = match position {
            FeedPosition::Start(start) => resolve_start(&data.changes, *start),
            FeedPosition::Token(token) => parse_feed_token(token)?,
        };

        let len = data.changes.len() as u64;
        let start = from.min(len);
        let end = from.saturating_add(page_size_hint as u64).min(len);
        let records = data.changes[start as usize..end as usize].to_vec();

        // The token always points past the last delivered record so polling a
        // caught-up feed re-reads from the same position.
        let next = if records.is_empty() { start } else { end };
        Ok(FeedPage {
            up_to_date: records.is_empty(),
            continuation: mint_feed_token(next),
            records,
        })
    }
}

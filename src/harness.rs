//! The harness facade.
//!
//! [`Harness`] owns a connection to a document-store endpoint and hands out
//! [`NamespaceHandle`]s and [`CollectionHandle`]s -- thin, cheaply cloneable
//! wrappers that map backend results to domain types and enrich failures with
//! operation context. One request is outstanding per call; handles may be used
//! from multiple tasks, but each [`ChangeFeedCursor`] belongs to one caller.
//!
//! Every operation takes an optional [`CancelToken`]; a triggered token fails
//! the call promptly with [`Error::Cancelled`] and leaves store state as if the
//! call had not been issued.

use std::sync::Arc;

use crate::cancel::{CancelToken, run_cancellable};
use crate::config::HarnessConfig;
use crate::error::Error;
use crate::feed::ChangeFeedCursor;
use crate::memory::MemoryStore;
use crate::naming::NamingStrategy;
use crate::query::{QueryDefinition, run_query};
use crate::store::DocumentStore;
use crate::types::{
    CollectionPath, ContinuationToken, Document, FeedStart, PartitionKeySpec, PartitionKeyValue,
};

/// Client facade over a document store.
pub struct Harness {
    store: Arc<dyn DocumentStore>,
    config: HarnessConfig,
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Harness {
    /// Connect to the endpoint named in the config.
    ///
    /// The `memory:` scheme resolves to the built-in in-memory backend, which
    /// requires the credential to match [`crate::memory::WELL_KNOWN_KEY`].
    /// Transports for other schemes are external to this crate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthFailure`] when the credential is missing or
    /// rejected, and [`Error::StoreUnavailable`] when no transport exists for
    /// the endpoint scheme.
    pub async fn connect(config: HarnessConfig) -> Result<Harness, Error> {
        if config.endpoint.starts_with("memory:") {
            let store = MemoryStore::new();
            let presented = config.credential.as_ref().map(|c| c.key());
            if !store.accepts_key(presented) {
                return Err(Error::AuthFailure {
                    endpoint: config.endpoint.clone(),
                    detail: match presented {
                        Some(_) => "master key rejected".to_string(),
                        None => "credential required".to_string(),
                    },
                });
            }
            tracing::info!(
                endpoint = %config.endpoint,
                mode = ?config.connection_mode,
                tls = ?config.tls,
                "connected to in-memory store"
            );
            return Ok(Harness {
                store: Arc::new(store),
                config,
            });
        }

        Err(Error::unavailable(
            "connect",
            format!("no transport available for endpoint {}", config.endpoint),
        ))
    }

    /// Build a harness over an already-constructed backend. This is how
    /// external transports plug in.
    pub fn with_store(store: Arc<dyn DocumentStore>, config: HarnessConfig) -> Harness {
        Harness { store, config }
    }

    /// A harness over a fresh, credential-free in-memory store. Test shorthand.
    pub fn in_memory() -> Harness {
        Harness::with_store(
            Arc::new(MemoryStore::open_access()),
            HarnessConfig::new("memory:"),
        )
    }

    /// The configuration this harness was built with.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Create a namespace if absent and return a handle to it. Idempotent.
    pub async fn create_namespace(
        &self,
        name: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<NamespaceHandle, Error> {
        run_cancellable(
            "create_namespace",
            cancel,
            self.store.create_namespace(name),
        )
        .await?;
        tracing::debug!(namespace = name, "namespace ready");
        Ok(NamespaceHandle {
            store: Arc::clone(&self.store),
            name: name.to_string(),
            query_page_size: self.config.query_page_size,
            feed_page_size_hint: self.config.feed_page_size_hint,
        })
    }

    /// Create a namespace with a name drawn from the given strategy, wrapped in
    /// a guard that deletes it at teardown.
    pub async fn ephemeral_namespace(
        &self,
        prefix: &str,
        naming: &dyn NamingStrategy,
        cancel: Option<&CancelToken>,
    ) -> Result<EphemeralNamespace, Error> {
        let name = naming.next_name(prefix);
        let namespace = self.create_namespace(&name, cancel).await?;
        Ok(EphemeralNamespace {
            namespace,
            torn_down: false,
        })
    }

    /// Recursively delete a namespace. Idempotent: succeeds when absent.
    pub async fn delete_namespace(
        &self,
        name: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<(), Error> {
        run_cancellable(
            "delete_namespace",
            cancel,
            self.store.delete_namespace(name),
        )
        .await?;
        tracing::debug!(namespace = name, "namespace deleted");
        Ok(())
    }
}

/// Handle to one namespace.
#[derive(Clone)]
pub struct NamespaceHandle {
    store: Arc<dyn DocumentStore>,
    name: String,
    query_page_size: u32,
    feed_page_size_hint: u32,
}

impl NamespaceHandle {
    /// The namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a collection if absent, fixing its partition-key spec, and
    /// return a handle. Idempotent by name; respecifying an existing
    /// collection with a different spec fails with [`Error::InvalidSpec`].
    pub async fn create_collection(
        &self,
        name: &str,
        spec: PartitionKeySpec,
        cancel: Option<&CancelToken>,
    ) -> Result<CollectionHandle, Error> {
        run_cancellable(
            "create_collection",
            cancel,
            self.store.create_collection(&self.name, name, &spec),
        )
        .await?;
        let path = CollectionPath::new(self.name.clone(), name);
        tracing::debug!(collection = %path, paths = ?spec.paths(), "collection ready");
        Ok(CollectionHandle {
            store: Arc::clone(&self.store),
            path,
            spec,
            query_page_size: self.query_page_size,
            feed_page_size_hint: self.feed_page_size_hint,
        })
    }

    /// Recursively delete this namespace. Idempotent.
    pub async fn delete(&self, cancel: Option<&CancelToken>) -> Result<(), Error> {
        run_cancellable(
            "delete_namespace",
            cancel,
            self.store.delete_namespace(&self.name),
        )
        .await
    }
}

/// Handle to one collection. Cloning is cheap; clones address the same
/// collection.
#[derive(Clone)]
pub struct CollectionHandle {
    store: Arc<dyn DocumentStore>,
    path: CollectionPath,
    spec: PartitionKeySpec,
    query_page_size: u32,
    feed_page_size_hint: u32,
}

impl CollectionHandle {
    /// Fully-qualified collection path.
    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    /// The partition-key spec fixed at collection creation.
    pub fn partition_key_spec(&self) -> &PartitionKeySpec {
        &self.spec
    }

    /// Insert a new document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when a document with the same
    /// (id, partition-key tuple) exists, and [`Error::InvalidSpec`] when the
    /// key does not match the collection's spec cardinality or the document's
    /// own key fields.
    pub async fn create(
        &self,
        document: Document,
        key: &PartitionKeyValue,
        cancel: Option<&CancelToken>,
    ) -> Result<(), Error> {
        key.validate_for_spec(&self.spec)?;
        tracing::debug!(collection = %self.path, id = document.id(), "create document");
        run_cancellable(
            "create",
            cancel,
            self.store.create_item(&self.path, document, key),
        )
        .await
    }

    /// Insert the document if absent, else fully replace it. Always observable
    /// as one change record in the change feed, whether insert or replace.
    pub async fn upsert(
        &self,
        document: Document,
        key: &PartitionKeyValue,
        cancel: Option<&CancelToken>,
    ) -> Result<(), Error> {
        key.validate_for_spec(&self.spec)?;
        tracing::debug!(collection = %self.path, id = document.id(), "upsert document");
        run_cancellable(
            "upsert",
            cancel,
            self.store.upsert_item(&self.path, document, key),
        )
        .await
    }

    /// Read a document by (id, partition-key tuple).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no document matches. Hierarchical keys
    /// require the full tuple; a partial tuple is [`Error::InvalidSpec`].
    pub async fn read(
        &self,
        id: &str,
        key: &PartitionKeyValue,
        cancel: Option<&CancelToken>,
    ) -> Result<Document, Error> {
        key.validate_for_spec(&self.spec)?;
        run_cancellable("read", cancel, self.store.read_item(&self.path, id, key)).await
    }

    /// Fully replace an existing document. Fields omitted relative to the
    /// prior version are cleared, not merged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the document is absent.
    pub async fn replace(
        &self,
        id: &str,
        document: Document,
        key: &PartitionKeyValue,
        cancel: Option<&CancelToken>,
    ) -> Result<(), Error> {
        key.validate_for_spec(&self.spec)?;
        tracing::debug!(collection = %self.path, id, "replace document");
        run_cancellable(
            "replace",
            cancel,
            self.store.replace_item(&self.path, id, document, key),
        )
        .await
    }

    /// Delete a document by (id, partition-key tuple).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the document is absent.
    pub async fn delete(
        &self,
        id: &str,
        key: &PartitionKeyValue,
        cancel: Option<&CancelToken>,
    ) -> Result<(), Error> {
        key.validate_for_spec(&self.spec)?;
        tracing::debug!(collection = %self.path, id, "delete document");
        run_cancellable(
            "delete",
            cancel,
            self.store.delete_item(&self.path, id, key),
        )
        .await
    }

    /// Execute a query as a lazy, finite stream of documents.
    ///
    /// Pagination is internal and transparent; calling this again with the
    /// same definition re-executes the scan (the stream is restartable by
    /// re-issue). Backend errors are yielded once and end the stream.
    pub fn query(
        &self,
        definition: QueryDefinition,
    ) -> impl futures_core::Stream<Item = Result<Document, Error>> + use<> {
        tracing::debug!(collection = %self.path, ?definition, "query");
        run_query(
            Arc::clone(&self.store),
            self.path.clone(),
            definition,
            self.query_page_size,
        )
    }

    /// Open a change-feed cursor at a start position.
    ///
    /// `page_size_hint` is an advisory upper bound on records per page;
    /// `None` uses the configured default. `FeedStart::Now` resolves to the
    /// head of the change log at the first page read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] for a zero page-size hint.
    pub fn open_change_feed(
        &self,
        start: FeedStart,
        page_size_hint: Option<u32>,
    ) -> Result<ChangeFeedCursor, Error> {
        let hint = self.feed_hint(page_size_hint)?;
        tracing::debug!(collection = %self.path, ?start, hint, "open change feed");
        Ok(ChangeFeedCursor::new(
            Arc::clone(&self.store),
            self.path.clone(),
            start,
            hint,
        ))
    }

    /// Open a change-feed cursor resuming from a persisted continuation token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] for a zero page-size hint. A corrupted
    /// token surfaces as [`Error::InvalidSpec`] from the first read.
    pub fn resume_change_feed(
        &self,
        token: ContinuationToken,
        page_size_hint: Option<u32>,
    ) -> Result<ChangeFeedCursor, Error> {
        let hint = self.feed_hint(page_size_hint)?;
        tracing::debug!(collection = %self.path, hint, "resume change feed");
        Ok(ChangeFeedCursor::resume(
            Arc::clone(&self.store),
            self.path.clone(),
            token,
            hint,
        ))
    }

    fn feed_hint(&self, page_size_hint: Option<u32>) -> Result<u32, Error> {
        let hint = page_size_hint.unwrap_or(self.feed_page_size_hint);
        if hint == 0 {
            return Err(Error::InvalidSpec(
                "feed page-size hint must be greater than zero".to_string(),
            ));
        }
        Ok(hint)
    }
}

/// RAII-ish guard for an ephemeral namespace.
///
/// Call [`teardown`](EphemeralNamespace::teardown) on every exit path. A guard
/// dropped without teardown logs a warning and spawns a best-effort background
/// delete when a runtime is available, so failure paths do not leak test
/// namespaces.
pub struct EphemeralNamespace {
    namespace: NamespaceHandle,
    torn_down: bool,
}

impl EphemeralNamespace {
    /// Handle to the underlying namespace.
    pub fn handle(&self) -> &NamespaceHandle {
        &self.namespace
    }

    /// The generated namespace name.
    pub fn name(&self) -> &str {
        self.namespace.name()
    }

    /// Delete the namespace and consume the guard.
    pub async fn teardown(mut self, cancel: Option<&CancelToken>) -> Result<(), Error> {
        self.namespace.delete(cancel).await?;
        self.torn_down = true;
        Ok(())
    }
}

impl Drop for EphemeralNamespace {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        tracing::warn!(
            namespace = self.namespace.name(),
            "ephemeral namespace dropped without teardown"
        );
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let store = Arc::clone(&self.namespace.store);
            let name = self.namespace.name().to_string();
            runtime.spawn(async move {
                if let Err(e) = store.delete_namespace(&name).await {
                    tracing::warn!(
                        namespace = name,
                        error = %e,
                        "best-effort namespace cleanup failed"
                    );
                }
            });
        }
    }
}

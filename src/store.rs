//! The external document-store seam.
//!
//! [`DocumentStore`] carries exactly the operations the harness consumes from an
//! external endpoint: namespace create/delete, collection create-if-absent, item
//! operations keyed by (id, partition-key tuple), paged filtered/ordered query
//! execution, and change-feed page reads. The harness never implements a
//! document database of its own -- it drives whatever sits behind this trait.
//! The in-memory reference backend lives in [`crate::memory`]; real transports
//! are external to this crate.
//!
//! Implementations must not retry internally: transient connectivity failures
//! surface as [`Error::StoreUnavailable`] and retry policy stays with the caller.

use async_trait::async_trait;

use crate::error::Error;
use crate::feed::FeedPage;
use crate::query::QueryDefinition;
use crate::types::{
    CollectionPath, ContinuationToken, Document, FeedStart, PartitionKeySpec, PartitionKeyValue,
};

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    /// Documents in result order.
    pub documents: Vec<Document>,
    /// Token for the next page, or `None` when this page is the last.
    pub continuation: Option<ContinuationToken>,
}

/// Where a change-feed page read starts: a start position for the first read,
/// or a continuation token from a previous page thereafter.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPosition {
    /// First read of a cursor that has not produced a token yet.
    Start(FeedStart),
    /// Resume from a previously returned token, passed back verbatim.
    Token(ContinuationToken),
}

/// Operations the harness consumes from a document-store endpoint.
///
/// All operations are async and issue at most one request. Errors carry the
/// taxonomy of [`Error`] unchanged in kind.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a namespace if absent. Idempotent: succeeds when the namespace
    /// already exists.
    async fn create_namespace(&self, namespace: &str) -> Result<(), Error>;

    /// Recursively delete a namespace with all contained collections and
    /// documents. Idempotent: succeeds when the namespace is already absent.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), Error>;

    /// Create a collection if absent, fixing its partition-key spec.
    ///
    /// Idempotent by name when the spec matches; respecifying an existing
    /// collection with a different spec fails with [`Error::InvalidSpec`].
    async fn create_collection(
        &self,
        namespace: &str,
        collection: &str,
        spec: &PartitionKeySpec,
    ) -> Result<(), Error>;

    /// Insert a new document. Fails with [`Error::Conflict`] when a document
    /// with the same (id, partition-key tuple) already exists.
    async fn create_item(
        &self,
        path: &CollectionPath,
        document: Document,
        key: &PartitionKeyValue,
    ) -> Result<(), Error>;

    /// Insert the document if absent, else fully replace it. Always observable
    /// as one change record, whether insert or replace.
    async fn upsert_item(
        &self,
        path: &CollectionPath,
        document: Document,
        key: &PartitionKeyValue,
    ) -> Result<(), Error>;

    /// Read a document by (id, partition-key tuple).
    async fn read_item(
        &self,
        path: &CollectionPath,
        id: &str,
        key: &PartitionKeyValue,
    ) -> Result<Document, Error>;

    /// Fully replace an existing document. Fails with [`Error::NotFound`] when
    /// absent. Fields omitted relative to the prior version are cleared.
    async fn replace_item(
        &self,
        path: &CollectionPath,
        id: &str,
        document: Document,
        key: &PartitionKeyValue,
    ) -> Result<(), Error>;

    /// Delete a document by (id, partition-key tuple). Fails with
    /// [`Error::NotFound`] when absent.
    async fn delete_item(
        &self,
        path: &CollectionPath,
        id: &str,
        key: &PartitionKeyValue,
    ) -> Result<(), Error>;

    /// Execute one page of a filtered/ordered query.
    ///
    /// `continuation` is `None` for the first page and the previous page's
    /// token thereafter. Re-running the same definition from a `None`
    /// continuation re-executes the scan.
    async fn query_page(
        &self,
        path: &CollectionPath,
        definition: &QueryDefinition,
        continuation: Option<&ContinuationToken>,
        page_size: u32,
    ) -> Result<QueryPage, Error>;

    /// Read one change-feed page at the given position.
    ///
    /// `page_size_hint` is an advisory upper bound on records per page. The
    /// returned page always carries a continuation token, including caught-up
    /// (empty) pages, so polling can resume from the same position.
    async fn read_feed_page(
        &self,
        path: &CollectionPath,
        position: &FeedPosition,
        page_size_hint: u32,
    ) -> Result<FeedPage, Error>;
}

//! docharness: a test harness for document stores with change-feed semantics.
//!
//! The harness is a small client facade: it creates ephemeral namespaces,
//! performs CRUD and upsert operations keyed by a (possibly hierarchical)
//! partition key, runs lazy paged queries, and drains change feeds through
//! resumable cursors. The store behind it is pluggable via the
//! [`DocumentStore`] trait; an in-memory reference backend ships in
//! [`memory`].

pub mod cancel;
pub mod config;
pub mod error;
pub mod feed;
pub mod harness;
pub mod memory;
pub mod naming;
pub mod query;
pub mod store;
pub mod types;

pub use cancel::{CancelSource, CancelToken};
pub use config::{ConnectionMode, Credential, HarnessConfig, TlsPolicy};
pub use error::Error;
pub use feed::{ChangeFeedCursor, CursorState, FeedPage};
pub use harness::{CollectionHandle, EphemeralNamespace, Harness, NamespaceHandle};
pub use memory::MemoryStore;
pub use naming::{NamingStrategy, RandomSuffix, SequentialNames};
pub use query::{Direction, Filter, OrderBy, QueryDefinition};
pub use store::{DocumentStore, FeedPosition, QueryPage};
pub use types::{
    ChangeRecord, CollectionPath, ContinuationToken, Document, FeedStart, PartitionKeySpec,
    PartitionKeyValue,
};

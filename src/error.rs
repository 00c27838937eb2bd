//! Error types for the document-store harness.
//!
//! This module defines the unified error enum used throughout the crate. All fallible
//! operations return `Result<T, Error>`. The harness never swallows backend errors:
//! it surfaces them unchanged in kind, enriched with the operation context
//! (collection path, identifiers, key values) so a failure can be reproduced without
//! re-running the whole harness.

/// Unified error type for all harness operations.
///
/// Each variant represents a distinct failure mode:
///
/// - `StoreUnavailable` -- transport/connectivity failure. Never retried by the
///   harness; retry policy is a caller concern.
/// - `AuthFailure` -- the endpoint rejected the configured credential.
/// - `InvalidSpec` -- malformed partition-key spec, query spec, page-size hint,
///   or continuation token.
/// - `Conflict` -- `create` of a document whose (id, partition-key tuple) already
///   exists. A programming-logic error, never retried.
/// - `NotFound` -- read/replace/delete of an absent document.
/// - `Cancelled` -- the caller's cancellation signal fired while the operation was
///   suspended. Store state is unchanged.
/// - `CursorClosed` -- a read on an explicitly closed change-feed cursor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The store endpoint could not be reached or dropped the connection.
    #[error("store unavailable during {operation}: {detail}")]
    StoreUnavailable {
        /// Name of the operation that was in flight.
        operation: String,
        /// Human-readable description of the connectivity failure.
        detail: String,
    },

    /// The endpoint rejected the configured credential.
    #[error("authentication rejected by {endpoint}: {detail}")]
    AuthFailure {
        /// Endpoint address the credential was presented to.
        endpoint: String,
        /// Human-readable rejection reason.
        detail: String,
    },

    /// A partition-key spec, query spec, page-size hint, or continuation token
    /// is malformed.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// A document with the same identifier and partition-key tuple already exists.
    #[error(
        "conflict: document {id} already exists in {collection} (partition key {partition_key})"
    )]
    Conflict {
        /// Collection path the create was issued against.
        collection: String,
        /// Identifier of the conflicting document.
        id: String,
        /// Rendered partition-key tuple of the conflicting document.
        partition_key: String,
    },

    /// No document matched the given identifier and partition-key tuple.
    #[error("document {id} not found in {collection} (partition key {partition_key})")]
    NotFound {
        /// Collection path the operation was issued against.
        collection: String,
        /// Identifier that was looked up.
        id: String,
        /// Rendered partition-key tuple that was looked up.
        partition_key: String,
    },

    /// The caller's cancellation signal fired while the operation was suspended.
    #[error("operation {operation} was cancelled")]
    Cancelled {
        /// Name of the operation that was cancelled.
        operation: String,
    },

    /// The change-feed cursor has been explicitly closed.
    #[error("change-feed cursor is closed")]
    CursorClosed,
}

impl Error {
    /// Build a [`Error::Conflict`] with rendered context.
    pub(crate) fn conflict(
        collection: impl Into<String>,
        id: impl Into<String>,
        partition_key: impl Into<String>,
    ) -> Error {
        Error::Conflict {
            collection: collection.into(),
            id: id.into(),
            partition_key: partition_key.into(),
        }
    }

    /// Build a [`Error::NotFound`] with rendered context.
    pub(crate) fn not_found(
        collection: impl Into<String>,
        id: impl Into<String>,
        partition_key: impl Into<String>,
    ) -> Error {
        Error::NotFound {
            collection: collection.into(),
            id: id.into(),
            partition_key: partition_key.into(),
        }
    }

    /// Build a [`Error::StoreUnavailable`] with rendered context.
    pub(crate) fn unavailable(
        operation: impl Into<String>,
        detail: impl Into<String>,
    ) -> Error {
        Error::StoreUnavailable {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Display strings must carry enough context to reproduce the failure.

    #[test]
    fn store_unavailable_display_includes_operation_and_detail() {
        let err = Error::unavailable("connect", "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("connect"), "expected 'connect' in: {msg}");
        assert!(
            msg.contains("connection refused"),
            "expected detail in: {msg}"
        );
    }

    #[test]
    fn auth_failure_display_includes_endpoint() {
        let err = Error::AuthFailure {
            endpoint: "memory:".into(),
            detail: "master key mismatch".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("memory:"), "expected endpoint in: {msg}");
        assert!(
            msg.contains("master key mismatch"),
            "expected detail in: {msg}"
        );
    }

    #[test]
    fn invalid_spec_display_includes_reason() {
        let err = Error::InvalidSpec("partition-key spec must not be empty".into());
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn conflict_display_includes_collection_id_and_key() {
        let err = Error::conflict("db-1/items", "d1", r#"["p1","f1"]"#);
        let msg = err.to_string();
        assert!(msg.contains("db-1/items"), "expected collection in: {msg}");
        assert!(msg.contains("d1"), "expected id in: {msg}");
        assert!(msg.contains(r#"["p1","f1"]"#), "expected key in: {msg}");
    }

    #[test]
    fn not_found_display_includes_collection_id_and_key() {
        let err = Error::not_found("db-1/items", "d9", r#"["p1"]"#);
        let msg = err.to_string();
        assert!(msg.contains("not found"), "expected 'not found' in: {msg}");
        assert!(msg.contains("d9"), "expected id in: {msg}");
        assert!(msg.contains(r#"["p1"]"#), "expected key in: {msg}");
    }

    #[test]
    fn cancelled_display_includes_operation() {
        let err = Error::Cancelled {
            operation: "upsert".into(),
        };
        assert!(err.to_string().contains("upsert"));
    }

    #[test]
    fn cursor_closed_display() {
        let msg = Error::CursorClosed.to_string();
        assert!(msg.contains("closed"), "expected 'closed' in: {msg}");
    }

    #[test]
    fn all_variants_debug_non_empty() {
        let variants: Vec<Error> = vec![
            Error::unavailable("read", "timeout"),
            Error::AuthFailure {
                endpoint: "memory:".into(),
                detail: "rejected".into(),
            },
            Error::InvalidSpec("empty".into()),
            Error::conflict("c", "d", "[]"),
            Error::not_found("c", "d", "[]"),
            Error::Cancelled {
                operation: "delete".into(),
            },
            Error::CursorClosed,
        ];

        for (i, variant) in variants.iter().enumerate() {
            let debug_str = format!("{variant:?}");
            assert!(
                !debug_str.is_empty(),
                "variant {i} produced empty Debug output"
            );
        }
    }
}

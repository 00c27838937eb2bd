//! Core domain types for the document-store harness.
//!
//! This module defines the foundational data types that every other module depends on:
//! JSON documents, partition-key specs and values (single or hierarchical), change
//! records with log positions, opaque continuation tokens, and change-feed start
//! positions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Name of the mandatory identifier field on every document.
pub const ID_FIELD: &str = "id";

/// Maximum number of levels in a hierarchical partition key.
///
/// Point operations on a hierarchical key require all levels specified, so deep
/// hierarchies multiply the context every caller must thread through. Three levels
/// matches what hosted document stores support.
pub const MAX_PARTITION_KEY_DEPTH: usize = 3;

/// Partition-key specification for a collection: an ordered, non-empty list of
/// field paths.
///
/// A spec is fixed at collection creation and never mutated afterwards. Paths are
/// accepted with or without a leading slash (`"/pk"` and `"pk"` are equivalent)
/// and stored normalized without it. Nested paths are not supported: a path names
/// exactly one top-level document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKeySpec {
    /// Normalized field paths, one per hierarchy level, in order.
    paths: Vec<String>,
}

impl PartitionKeySpec {
    /// Build a single-level spec from one field path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] if the path is empty or contains an
    /// interior slash.
    pub fn single(path: impl AsRef<str>) -> Result<PartitionKeySpec, Error> {
        PartitionKeySpec::hierarchical([path.as_ref()])
    }

    /// Build a spec from an ordered list of field paths (hierarchical when more
    /// than one).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] if the list is empty, exceeds
    /// [`MAX_PARTITION_KEY_DEPTH`], contains a duplicate path, or any path is
    /// empty or contains an interior slash.
    pub fn hierarchical<I, S>(paths: I) -> Result<PartitionKeySpec, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = Vec::new();
        for path in paths {
            let path = normalize_path(path.as_ref())?;
            if normalized.contains(&path) {
                return Err(Error::InvalidSpec(format!(
                    "duplicate partition-key path: /{path}"
                )));
            }
            normalized.push(path);
        }

        if normalized.is_empty() {
            return Err(Error::InvalidSpec(
                "partition-key spec must contain at least one path".to_string(),
            ));
        }
        if normalized.len() > MAX_PARTITION_KEY_DEPTH {
            return Err(Error::InvalidSpec(format!(
                "partition-key spec has {} levels, maximum is {MAX_PARTITION_KEY_DEPTH}",
                normalized.len()
            )));
        }

        Ok(PartitionKeySpec { paths: normalized })
    }

    /// The normalized field paths, one per hierarchy level.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Number of hierarchy levels in the spec.
    pub fn depth(&self) -> usize {
        self.paths.len()
    }
}

/// Strip an optional leading slash and reject empty or nested paths.
fn normalize_path(raw: &str) -> Result<String, Error> {
    let path = raw.strip_prefix('/').unwrap_or(raw);
    if path.is_empty() {
        return Err(Error::InvalidSpec(
            "partition-key path must not be empty".to_string(),
        ));
    }
    if path.contains('/') {
        return Err(Error::InvalidSpec(format!(
            "partition-key path must name a top-level field, got: {raw}"
        )));
    }
    Ok(path.to_string())
}

/// A concrete partition-key value: one scalar component per spec level, in order.
///
/// For point operations (create/read/replace/upsert/delete) the value must match
/// the cardinality of the collection's spec exactly -- hierarchical keys require
/// all levels set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionKeyValue {
    /// Scalar component per hierarchy level.
    components: Vec<Value>,
}

impl PartitionKeyValue {
    /// Build a single-level key value.
    pub fn single(value: impl Into<Value>) -> PartitionKeyValue {
        PartitionKeyValue {
            components: vec![value.into()],
        }
    }

    /// Build a hierarchical key value from ordered components.
    pub fn hierarchical<I, V>(values: I) -> PartitionKeyValue
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        PartitionKeyValue {
            components: values.into_iter().map(Into::into).collect(),
        }
    }

    /// The scalar components, one per hierarchy level.
    pub fn components(&self) -> &[Value] {
        &self.components
    }

    /// Number of components in the value.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Validate this value against a collection's spec: cardinality must match
    /// and every component must be a non-null scalar.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] describing the first violation.
    pub fn validate_for_spec(&self, spec: &PartitionKeySpec) -> Result<(), Error> {
        if self.depth() != spec.depth() {
            return Err(Error::InvalidSpec(format!(
                "partition-key value has {} component(s), spec {:?} requires {}",
                self.depth(),
                spec.paths(),
                spec.depth()
            )));
        }
        for (component, path) in self.components.iter().zip(spec.paths()) {
            if component.is_null() {
                return Err(Error::InvalidSpec(format!(
                    "partition-key component for /{path} must not be null"
                )));
            }
            if component.is_array() || component.is_object() {
                return Err(Error::InvalidSpec(format!(
                    "partition-key component for /{path} must be a scalar"
                )));
            }
        }
        Ok(())
    }

    /// Canonical rendering of the key tuple, used for storage identity and for
    /// error context (e.g. `["p1","f1"]`).
    pub fn render(&self) -> String {
        serde_json::to_string(&self.components).unwrap_or_else(|_| "[]".to_string())
    }
}

impl fmt::Display for PartitionKeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A document: a JSON object always containing the [`ID_FIELD`] and the field(s)
/// referenced by the owning collection's partition-key spec.
///
/// The harness treats replacement as whole-document, not patch: fields omitted
/// relative to a prior version are cleared, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    /// Create a document with the given identifier and no other fields.
    pub fn new(id: impl Into<String>) -> Document {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.into()));
        Document { fields }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Document {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set or overwrite a field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Read a field, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The document identifier, if the [`ID_FIELD`] is present and a string.
    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The identifier, or [`Error::InvalidSpec`] when missing -- every write
    /// requires one.
    pub fn require_id(&self) -> Result<&str, Error> {
        self.id().ok_or_else(|| {
            Error::InvalidSpec(format!("document is missing the '{ID_FIELD}' field"))
        })
    }

    /// Extract the partition-key value this document carries for the given spec.
    ///
    /// Every level must be present and non-null at write time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] naming the first missing or null field.
    pub fn partition_key(&self, spec: &PartitionKeySpec) -> Result<PartitionKeyValue, Error> {
        let mut components = Vec::with_capacity(spec.depth());
        for path in spec.paths() {
            match self.fields.get(path) {
                Some(value) if !value.is_null() => components.push(value.clone()),
                _ => {
                    return Err(Error::InvalidSpec(format!(
                        "partition-key field /{path} is missing or null on document {}",
                        self.id().unwrap_or("<no id>")
                    )));
                }
            }
        }
        Ok(PartitionKeyValue { components })
    }

    /// The underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl TryFrom<Value> for Document {
    type Error = Error;

    /// Accept any JSON object as a document.
    fn try_from(value: Value) -> Result<Document, Error> {
        match value {
            Value::Object(fields) => Ok(Document { fields }),
            other => Err(Error::InvalidSpec(format!(
                "document must be a JSON object, got: {other}"
            ))),
        }
    }
}

/// An immutable entry in a collection's change log: one per observed
/// create/upsert/replace, in log order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Zero-based, contiguous position in the collection's change log.
    pub lsn: u64,
    /// Unix epoch milliseconds, store-assigned when the change was observed.
    pub recorded_at: u64,
    /// Snapshot of the document as written.
    pub document: Document,
}

/// Opaque resume marker for change-feed and query pagination.
///
/// Tokens are minted by the backend and must be stored and passed back verbatim;
/// no internal structure is guaranteed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wrap a raw token string.
    pub fn new(raw: impl Into<String>) -> ContinuationToken {
        ContinuationToken(raw.into())
    }

    /// The raw token string, for storage or transmission.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a change-feed cursor begins reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStart {
    /// Replay the full change log from its first record.
    Beginning,
    /// Only changes observed after the cursor's first read.
    Now,
    /// Changes recorded at or after the given Unix epoch milliseconds.
    AtTime(u64),
}

/// Fully-qualified collection address: namespace plus collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    /// Owning namespace name.
    pub namespace: String,
    /// Collection name within the namespace.
    pub collection: String,
}

impl CollectionPath {
    /// Build a path from namespace and collection names.
    pub fn new(namespace: impl Into<String>, collection: impl Into<String>) -> CollectionPath {
        CollectionPath {
            namespace: namespace.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Partition-key spec validation.

    #[test]
    fn single_spec_strips_leading_slash() {
        let spec = PartitionKeySpec::single("/pk").expect("valid spec");
        assert_eq!(spec.paths(), ["pk"]);
        assert_eq!(spec.depth(), 1);
    }

    #[test]
    fn single_spec_accepts_bare_path() {
        let spec = PartitionKeySpec::single("pk").expect("valid spec");
        assert_eq!(spec.paths(), ["pk"]);
    }

    #[test]
    fn hierarchical_spec_preserves_order() {
        let spec = PartitionKeySpec::hierarchical(["/pk", "/queryfield"]).expect("valid spec");
        assert_eq!(spec.paths(), ["pk", "queryfield"]);
        assert_eq!(spec.depth(), 2);
    }

    #[test]
    fn empty_spec_is_rejected() {
        let result = PartitionKeySpec::hierarchical(Vec::<&str>::new());
        assert!(matches!(result, Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(matches!(
            PartitionKeySpec::single(""),
            Err(Error::InvalidSpec(_))
        ));
        assert!(matches!(
            PartitionKeySpec::single("/"),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn nested_path_is_rejected() {
        let result = PartitionKeySpec::single("/address/city");
        assert!(matches!(result, Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn duplicate_path_is_rejected() {
        let result = PartitionKeySpec::hierarchical(["/pk", "pk"]);
        assert!(matches!(result, Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn spec_deeper_than_max_is_rejected() {
        let result = PartitionKeySpec::hierarchical(["/a", "/b", "/c", "/d"]);
        assert!(matches!(result, Err(Error::InvalidSpec(_))));
    }

    // Partition-key value validation.

    #[test]
    fn value_matching_spec_cardinality_validates() {
        let spec = PartitionKeySpec::hierarchical(["/pk", "/queryfield"]).expect("valid spec");
        let key = PartitionKeyValue::hierarchical(["p1", "f1"]);
        key.validate_for_spec(&spec).expect("cardinality matches");
    }

    #[test]
    fn value_with_wrong_cardinality_is_rejected() {
        let spec = PartitionKeySpec::hierarchical(["/pk", "/queryfield"]).expect("valid spec");
        let key = PartitionKeyValue::single("p1");
        assert!(matches!(
            key.validate_for_spec(&spec),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn null_component_is_rejected() {
        let spec = PartitionKeySpec::single("/pk").expect("valid spec");
        let key = PartitionKeyValue::single(Value::Null);
        assert!(matches!(
            key.validate_for_spec(&spec),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn non_scalar_component_is_rejected() {
        let spec = PartitionKeySpec::single("/pk").expect("valid spec");
        let key = PartitionKeyValue::single(json!(["nested"]));
        assert!(matches!(
            key.validate_for_spec(&spec),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn render_is_canonical_json_array() {
        let key = PartitionKeyValue::hierarchical(["p1", "f1"]);
        assert_eq!(key.render(), r#"["p1","f1"]"#);
        assert_eq!(key.to_string(), r#"["p1","f1"]"#);
    }

    #[test]
    fn numeric_components_are_allowed() {
        let spec = PartitionKeySpec::single("/shard").expect("valid spec");
        let key = PartitionKeyValue::single(7);
        key.validate_for_spec(&spec).expect("numbers are scalars");
        assert_eq!(key.render(), "[7]");
    }

    // Documents.

    #[test]
    fn new_document_carries_id_field() {
        let doc = Document::new("d1");
        assert_eq!(doc.id(), Some("d1"));
        assert_eq!(doc.get(ID_FIELD), Some(&json!("d1")));
    }

    #[test]
    fn with_field_builder_sets_fields() {
        let doc = Document::new("d1")
            .with_field("pk", "p1")
            .with_field("city", "Seattle");
        assert_eq!(doc.get("pk"), Some(&json!("p1")));
        assert_eq!(doc.get("city"), Some(&json!("Seattle")));
    }

    #[test]
    fn partition_key_extracts_hierarchical_tuple_in_order() {
        let spec = PartitionKeySpec::hierarchical(["/pk", "/queryfield"]).expect("valid spec");
        let doc = Document::new("d1")
            .with_field("queryfield", "f1")
            .with_field("pk", "p1");
        let key = doc.partition_key(&spec).expect("all levels present");
        assert_eq!(key.components(), [json!("p1"), json!("f1")]);
    }

    #[test]
    fn partition_key_missing_level_is_rejected() {
        let spec = PartitionKeySpec::hierarchical(["/pk", "/queryfield"]).expect("valid spec");
        let doc = Document::new("d1").with_field("pk", "p1");
        assert!(matches!(
            doc.partition_key(&spec),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn partition_key_null_level_is_rejected() {
        let spec = PartitionKeySpec::single("/pk").expect("valid spec");
        let doc = Document::new("d1").with_field("pk", Value::Null);
        assert!(matches!(
            doc.partition_key(&spec),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn require_id_on_missing_id_is_rejected() {
        let doc = Document::try_from(json!({"pk": "p1"})).expect("object is a document");
        assert!(matches!(doc.require_id(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn try_from_non_object_is_rejected() {
        let result = Document::try_from(json!([1, 2, 3]));
        assert!(matches!(result, Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn document_serializes_transparently() {
        let doc = Document::new("d1").with_field("value", 100);
        let serialized = serde_json::to_value(&doc).expect("serializable");
        assert_eq!(serialized, json!({"id": "d1", "value": 100}));
    }

    // Continuation tokens and paths.

    #[test]
    fn continuation_token_round_trips_verbatim() {
        let token = ContinuationToken::new(r#"{"lsn":42}"#);
        assert_eq!(token.as_str(), r#"{"lsn":42}"#);
        assert_eq!(
            ContinuationToken::new(token.as_str().to_string()),
            token
        );
    }

    #[test]
    fn collection_path_displays_namespace_and_name() {
        let path = CollectionPath::new("db-1", "items");
        assert_eq!(path.to_string(), "db-1/items");
    }

    #[test]
    fn feed_start_is_copy() {
        let start = FeedStart::AtTime(1_700_000_000_123);
        let a = start;
        let b = start;
        assert_eq!(a, b);
    }
}

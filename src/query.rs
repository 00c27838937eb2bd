//! Typed query specification and the lazy query stream.
//!
//! A [`QueryDefinition`] is a typed filter/order/scope triple. Executing it
//! produces a lazy, finite stream of documents: pages are pulled from the
//! backend on demand and pagination is transparent to the caller. The stream is
//! restartable -- executing the same definition again re-runs the scan.
//!
//! Ordering contract: with `order_by` ascending, results are totally ordered by
//! the named field with ties broken by identifier ascending; descending returns
//! the exact reverse of that order.

use std::cmp::Ordering;
use std::sync::Arc;

use async_stream::stream;
use serde_json::Value;

use crate::error::Error;
use crate::store::DocumentStore;
use crate::types::{CollectionPath, ContinuationToken, Document, PartitionKeyValue};

/// Sort direction for [`OrderBy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest value first.
    Ascending,
    /// Exact reverse of the ascending order, tie-breaks included.
    Descending,
}

/// Total order over a single document field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Top-level field to order by.
    pub field: String,
    /// Sort direction.
    pub direction: Direction,
}

impl OrderBy {
    /// Ascending order on a field.
    pub fn ascending(field: impl Into<String>) -> OrderBy {
        OrderBy {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    /// Descending order on a field.
    pub fn descending(field: impl Into<String>) -> OrderBy {
        OrderBy {
            field: field.into(),
            direction: Direction::Descending,
        }
    }
}

/// A filter predicate over top-level document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Field equals the given value. A missing field never matches.
    Eq {
        /// Top-level field name.
        field: String,
        /// Value the field must equal.
        value: Value,
    },
    /// All sub-filters match.
    And(Vec<Filter>),
}

impl Filter {
    /// Equality predicate on a field.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Filter {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Conjunction of predicates.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::And(filters.into_iter().collect())
    }

    /// Whether a document satisfies the predicate.
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { field, value } => document.get(field) == Some(value),
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
        }
    }
}

/// A complete query: filter, optional order, optional partition scope.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefinition {
    /// Filter predicate; [`Filter::All`] selects everything.
    pub filter: Filter,
    /// Optional total order over the result.
    pub order_by: Option<OrderBy>,
    /// Optional scope restriction to a single partition (full key tuple).
    pub partition_key: Option<PartitionKeyValue>,
}

impl QueryDefinition {
    /// Query selecting all documents, unordered (identifier-ascending).
    pub fn all() -> QueryDefinition {
        QueryDefinition {
            filter: Filter::All,
            order_by: None,
            partition_key: None,
        }
    }

    /// Set the filter predicate.
    pub fn with_filter(mut self, filter: Filter) -> QueryDefinition {
        self.filter = filter;
        self
    }

    /// Set the result order.
    pub fn with_order_by(mut self, order_by: OrderBy) -> QueryDefinition {
        self.order_by = Some(order_by);
        self
    }

    /// Restrict the scope to one partition.
    pub fn with_partition_key(mut self, key: PartitionKeyValue) -> QueryDefinition {
        self.partition_key = Some(key);
        self
    }
}

/// Deterministic comparison of two documents under an optional order.
///
/// Without an order, documents compare by identifier ascending. With an order,
/// they compare by the named field with the identifier as tie-break; missing
/// fields sort as JSON null, before every non-null value. Descending reverses
/// the entire comparison, tie-break included.
pub(crate) fn compare_documents(a: &Document, b: &Document, order: Option<&OrderBy>) -> Ordering {
    let ascending = match order {
        None => compare_ids(a, b),
        Some(order) => compare_values(a.get(&order.field), b.get(&order.field))
            .then_with(|| compare_ids(a, b)),
    };
    match order.map(|o| o.direction) {
        Some(Direction::Descending) => ascending.reverse(),
        _ => ascending,
    }
}

fn compare_ids(a: &Document, b: &Document) -> Ordering {
    a.id().unwrap_or("").cmp(b.id().unwrap_or(""))
}

/// Total order over JSON values: null < bool < number < string < array < object.
/// Within a type class, bools order false-first, numbers numerically, strings
/// lexicographically, and composites by their canonical JSON text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);

    let rank = |v: &Value| match v {
        Value::Null => 0u8,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    };

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
        unequal => unequal,
    }
}

/// Execute a query as a lazy stream of documents.
///
/// Pages of `page_size` documents are pulled from the backend as the stream is
/// consumed; the continuation token handoff between pages is internal. Backend
/// errors end the stream after being yielded.
pub(crate) fn run_query(
    store: Arc<dyn DocumentStore>,
    path: CollectionPath,
    definition: QueryDefinition,
    page_size: u32,
) -> impl futures_core::Stream<Item = Result<Document, Error>> {
    stream! {
        let mut continuation: Option<ContinuationToken> = None;
        loop {
            let page = match store
                .query_page(&path, &definition, continuation.as_ref(), page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for document in page.documents {
                yield Ok(document);
            }

            // A page without a continuation token is the last one.
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str) -> Document {
        Document::new(id)
    }

    // Filters.

    #[test]
    fn filter_all_matches_everything() {
        assert!(Filter::All.matches(&doc("d1")));
    }

    #[test]
    fn filter_eq_matches_on_equal_value() {
        let d = doc("d1").with_field("pk", "p1");
        assert!(Filter::eq("pk", "p1").matches(&d));
        assert!(!Filter::eq("pk", "p2").matches(&d));
    }

    #[test]
    fn filter_eq_missing_field_never_matches() {
        let d = doc("d1");
        assert!(!Filter::eq("pk", "p1").matches(&d));
        // Explicit null is also not equal to a concrete value.
        let d = doc("d2").with_field("pk", Value::Null);
        assert!(!Filter::eq("pk", "p1").matches(&d));
    }

    #[test]
    fn filter_and_requires_all_branches() {
        let d = doc("d1").with_field("pk", "p1").with_field("city", "Seattle");
        assert!(Filter::and([Filter::eq("pk", "p1"), Filter::eq("city", "Seattle")]).matches(&d));
        assert!(!Filter::and([Filter::eq("pk", "p1"), Filter::eq("city", "Portland")]).matches(&d));
    }

    // Ordering.

    #[test]
    fn compare_without_order_uses_id_ascending() {
        let a = doc("a");
        let b = doc("b");
        assert_eq!(compare_documents(&a, &b, None), Ordering::Less);
        assert_eq!(compare_documents(&b, &a, None), Ordering::Greater);
    }

    #[test]
    fn compare_orders_by_field_then_id() {
        let order = OrderBy::ascending("city");
        let a = doc("z").with_field("city", "Austin");
        let b = doc("a").with_field("city", "Boston");
        assert_eq!(compare_documents(&a, &b, Some(&order)), Ordering::Less);

        // Equal field values fall back to the identifier.
        let c = doc("a").with_field("city", "Austin");
        assert_eq!(compare_documents(&a, &c, Some(&order)), Ordering::Greater);
    }

    #[test]
    fn descending_reverses_field_and_tie_break() {
        let asc = OrderBy::ascending("city");
        let desc = OrderBy::descending("city");
        let a = doc("a").with_field("city", "Austin");
        let b = doc("b").with_field("city", "Austin");

        assert_eq!(compare_documents(&a, &b, Some(&asc)), Ordering::Less);
        // The descending order is the exact reverse, including the id tie-break.
        assert_eq!(compare_documents(&a, &b, Some(&desc)), Ordering::Greater);
    }

    #[test]
    fn missing_order_field_sorts_before_present_values() {
        let order = OrderBy::ascending("city");
        let missing = doc("m");
        let present = doc("p").with_field("city", "Austin");
        assert_eq!(
            compare_documents(&missing, &present, Some(&order)),
            Ordering::Less
        );
    }

    #[test]
    fn value_order_ranks_types_then_compares_within_type() {
        assert_eq!(
            compare_values(Some(&json!(false)), Some(&json!(true))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(10))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!(100)), Some(&json!("1"))),
            Ordering::Less,
            "numbers rank before strings"
        );
        assert_eq!(compare_values(None, Some(&json!(false))), Ordering::Less);
        assert_eq!(compare_values(None, None), Ordering::Equal);
    }

    // Definition builder.

    #[test]
    fn definition_builder_composes() {
        let definition = QueryDefinition::all()
            .with_filter(Filter::eq("pk", "p1"))
            .with_order_by(OrderBy::descending("city"))
            .with_partition_key(PartitionKeyValue::single("p1"));

        assert_eq!(definition.filter, Filter::eq("pk", "p1"));
        assert_eq!(
            definition.order_by,
            Some(OrderBy::descending("city"))
        );
        assert!(definition.partition_key.is_some());
    }
}

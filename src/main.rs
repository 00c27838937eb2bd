//! Probe binary: drives one end-to-end diagnostic scenario against a
//! document-store endpoint -- ephemeral namespace, hierarchical-partition-key
//! collection, CRUD/upsert traffic, ordered queries, and change-feed drains
//! from `Beginning` and `Now` -- then tears everything down. Outcomes are
//! reported via `tracing`.

use futures_core::Stream;

use docharness::memory::WELL_KNOWN_KEY;
use docharness::{
    CollectionHandle, ConnectionMode, Credential, CursorState, Document, Error, FeedStart, Filter,
    Harness, HarnessConfig, OrderBy, PartitionKeySpec, PartitionKeyValue, QueryDefinition,
    RandomSuffix, TlsPolicy,
};

/// Probe configuration parsed from environment variables.
///
/// # Environment Variables
///
/// | Variable                     | Required | Default    | Description                          |
/// |------------------------------|----------|------------|--------------------------------------|
/// | `DOCHARNESS_ENDPOINT`        | No       | `memory:`  | Store endpoint address               |
/// | `DOCHARNESS_MASTER_KEY`      | No       | well-known | Credential presented at connect      |
/// | `DOCHARNESS_CONNECTION_MODE` | No       | `gateway`  | `gateway` or `direct`                |
/// | `DOCHARNESS_TLS_INSECURE`    | No       | unset      | Set to `1` to accept any certificate |
/// | `DOCHARNESS_FEED_PAGE_HINT`  | No       | `2`        | Change-feed page-size hint           |
/// | `DOCHARNESS_QUERY_PAGE_SIZE` | No       | `10`       | Query page size                      |
#[derive(Debug, Clone, PartialEq)]
struct ProbeConfig {
    /// Store endpoint address.
    endpoint: String,
    /// Credential presented at connect time.
    master_key: String,
    /// Request routing mode.
    connection_mode: ConnectionMode,
    /// Whether to accept invalid TLS certificates (local emulators).
    tls_insecure: bool,
    /// Change-feed page-size hint. Small by default so the probe exercises
    /// pagination even with a handful of documents.
    feed_page_hint: u32,
    /// Query page size.
    query_page_size: u32,
}

/// Default change-feed page-size hint when `DOCHARNESS_FEED_PAGE_HINT` is not set.
const DEFAULT_FEED_PAGE_HINT: u32 = 2;

/// Default query page size when `DOCHARNESS_QUERY_PAGE_SIZE` is not set.
const DEFAULT_QUERY_PAGE_SIZE: u32 = 10;

impl ProbeConfig {
    /// Parse probe configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` if:
    /// - `DOCHARNESS_CONNECTION_MODE` is set but neither `gateway` nor `direct`
    /// - `DOCHARNESS_FEED_PAGE_HINT` is set but not a nonzero `u32`
    /// - `DOCHARNESS_QUERY_PAGE_SIZE` is set but not a nonzero `u32`
    fn from_env() -> Result<ProbeConfig, String> {
        let endpoint =
            std::env::var("DOCHARNESS_ENDPOINT").unwrap_or_else(|_| "memory:".to_string());

        let master_key =
            std::env::var("DOCHARNESS_MASTER_KEY").unwrap_or_else(|_| WELL_KNOWN_KEY.to_string());

        let connection_mode = match std::env::var("DOCHARNESS_CONNECTION_MODE") {
            Ok(val) => match val.as_str() {
                "gateway" => ConnectionMode::Gateway,
                "direct" => ConnectionMode::Direct,
                other => {
                    return Err(format!(
                        "DOCHARNESS_CONNECTION_MODE must be 'gateway' or 'direct', got: {other}"
                    ));
                }
            },
            Err(_) => ConnectionMode::Gateway,
        };

        let tls_insecure = matches!(
            std::env::var("DOCHARNESS_TLS_INSECURE").as_deref(),
            Ok("1") | Ok("true")
        );

        let feed_page_hint =
            parse_nonzero_u32("DOCHARNESS_FEED_PAGE_HINT", DEFAULT_FEED_PAGE_HINT)?;
        let query_page_size =
            parse_nonzero_u32("DOCHARNESS_QUERY_PAGE_SIZE", DEFAULT_QUERY_PAGE_SIZE)?;

        Ok(ProbeConfig {
            endpoint,
            master_key,
            connection_mode,
            tls_insecure,
            feed_page_hint,
            query_page_size,
        })
    }

    /// Map onto the library's [`HarnessConfig`].
    fn harness_config(&self) -> HarnessConfig {
        HarnessConfig::new(self.endpoint.clone())
            .with_credential(Credential::master_key(self.master_key.clone()))
            .with_connection_mode(self.connection_mode)
            .with_tls(if self.tls_insecure {
                TlsPolicy::AcceptInvalidCerts
            } else {
                TlsPolicy::Validate
            })
            .with_feed_page_size_hint(self.feed_page_hint)
            .with_query_page_size(self.query_page_size)
    }
}

/// Parse an optional nonzero `u32` environment variable with a default.
fn parse_nonzero_u32(name: &str, default: u32) -> Result<u32, String> {
    match std::env::var(name) {
        Ok(val) => {
            let parsed: u32 = val
                .parse()
                .map_err(|e| format!("{name} is not a valid u32: {e}"))?;
            if parsed == 0 {
                return Err(format!("{name} must be nonzero"));
            }
            Ok(parsed)
        }
        Err(_) => Ok(default),
    }
}

/// Initialize the global `tracing` subscriber with an `EnvFilter`.
///
/// Reads the `RUST_LOG` environment variable to configure log level filtering. If `RUST_LOG`
/// is not set, defaults to `"info"`. Uses `try_init()` so that repeated calls (e.g., across
/// tests in the same process) do not panic -- the second call is a silent no-op.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Drain a query stream to completion.
async fn collect_documents(
    stream: impl Stream<Item = Result<Document, Error>>,
) -> Result<Vec<Document>, Error> {
    tokio::pin!(stream);
    let mut documents = Vec::new();
    loop {
        let item =
            std::future::poll_fn(|cx| std::pin::Pin::as_mut(&mut stream).poll_next(cx)).await;
        match item {
            Some(Ok(document)) => documents.push(document),
            Some(Err(e)) => return Err(e),
            None => return Ok(documents),
        }
    }
}

/// Drain a change feed until the first caught-up page. Returns
/// (documents, pages read, max records per page).
async fn drain_change_feed(
    cursor: &mut docharness::ChangeFeedCursor,
) -> Result<(Vec<Document>, u32, usize), Error> {
    let mut documents = Vec::new();
    let mut pages = 0u32;
    let mut max_page = 0usize;

    loop {
        let page = cursor.read_next(None).await?;
        pages += 1;
        if page.up_to_date {
            return Ok((documents, pages, max_page));
        }
        max_page = max_page.max(page.records.len());
        documents.extend(page.records.into_iter().map(|r| r.document));
    }
}

/// Shorthand for the two-level keys this scenario uses throughout.
fn key(pk: &str, queryfield: &str) -> PartitionKeyValue {
    PartitionKeyValue::hierarchical([pk, queryfield])
}

/// Build one scenario document.
fn probe_document(id: &str, pk: &str, queryfield: &str, city: &str) -> Document {
    Document::new(id)
        .with_field("pk", pk)
        .with_field("queryfield", queryfield)
        .with_field("city", city)
}

/// The end-to-end scenario: CRUD, upserts, ordered queries, and change-feed
/// drains against one ephemeral namespace.
async fn run_probe(harness: &Harness) -> Result<(), Error> {
    // 1. Ephemeral namespace and a collection with a hierarchical partition key.
    let ephemeral = harness
        .ephemeral_namespace("db", &RandomSuffix, None)
        .await?;
    tracing::info!(namespace = ephemeral.name(), "namespace created");

    let collection = ephemeral
        .handle()
        .create_collection(
            "items",
            PartitionKeySpec::hierarchical(["/pk", "/queryfield"])?,
            None,
        )
        .await?;
    tracing::info!(collection = %collection.path(), "collection created");

    // 2. Create documents across two partitions.
    collection
        .create(
            probe_document("document1", "p1", "field1", "Seattle"),
            &key("p1", "field1"),
            None,
        )
        .await?;
    collection
        .create(
            probe_document("document2", "p2", "field2", "Portland"),
            &key("p2", "field2"),
            None,
        )
        .await?;
    tracing::info!("created 2 documents");

    // 3. Replace document1 with the city cleared. Replacement is whole-document,
    //    so the current key fields are refetched by query first.
    replace_with_cleared_city(&collection, "document1", "p1").await?;

    // 4. Upsert a new document, then an existing one with a changed field.
    collection
        .upsert(
            probe_document("document3", "p2", "field1", "New Orleans"),
            &key("p2", "field1"),
            None,
        )
        .await?;
    collection
        .upsert(
            probe_document("document2", "p2", "field2", "Miami"),
            &key("p2", "field2"),
            None,
        )
        .await?;
    let document2 = collection
        .read("document2", &key("p2", "field2"), None)
        .await?;
    tracing::info!(city = ?document2.get("city"), "upsert of existing document verified");

    // 5. Queries: by partition field, and ordered both directions.
    let by_partition = collect_documents(
        collection.query(QueryDefinition::all().with_filter(Filter::eq("pk", "p1"))),
    )
    .await?;
    tracing::info!(count = by_partition.len(), "documents with pk = p1");

    let ascending = collect_documents(
        collection.query(QueryDefinition::all().with_order_by(OrderBy::ascending("city"))),
    )
    .await?;
    let descending = collect_documents(
        collection.query(QueryDefinition::all().with_order_by(OrderBy::descending("city"))),
    )
    .await?;
    tracing::info!(
        ascending = ?cities(&ascending),
        descending = ?cities(&descending),
        "ordered query results"
    );

    // 6. Delete document1 and verify the read now misses.
    collection
        .delete("document1", &key("p1", "field1"), None)
        .await?;
    match collection
        .read("document1", &key("p1", "field1"), None)
        .await
    {
        Err(Error::NotFound { .. }) => tracing::info!("delete verified: document1 is gone"),
        Ok(_) => tracing::warn!("document1 still readable after delete"),
        Err(e) => return Err(e),
    }

    // 7. Drain the change feed from the beginning with a small page hint.
    let mut cursor = collection.open_change_feed(FeedStart::Beginning, None)?;
    let (changes, pages, max_page) = drain_change_feed(&mut cursor).await?;
    tracing::info!(
        records = changes.len(),
        pages,
        max_records_per_page = max_page,
        final_token_len = cursor.continuation().map(|t| t.as_str().len()),
        "change feed drained from beginning"
    );
    cursor.close();

    // 8. A feed from Now sees only what happens after it: drain once (expected
    //    caught up), upsert twice, drain again.
    let mut live = collection.open_change_feed(FeedStart::Now, Some(5))?;
    let (initial, _, _) = drain_change_feed(&mut live).await?;
    tracing::info!(
        records = initial.len(),
        state = ?live.state(),
        "initial drain from Now (expected empty)"
    );
    debug_assert_eq!(live.state(), CursorState::CaughtUp);

    collection
        .upsert(
            probe_document("document4", "p1", "field9", "Chicago"),
            &key("p1", "field9"),
            None,
        )
        .await?;
    collection
        .upsert(
            probe_document("document2", "p2", "field2", "Boston"),
            &key("p2", "field2"),
            None,
        )
        .await?;

    let (recent, _, _) = drain_change_feed(&mut live).await?;
    tracing::info!(records = recent.len(), "changes observed after upserts (expected 2)");
    if recent.len() != 2 {
        tracing::warn!(
            records = recent.len(),
            "expected exactly 2 change records after 2 upserts"
        );
    }
    live.close();

    // 9. Teardown.
    ephemeral.teardown(None).await?;
    tracing::info!("namespace torn down");
    Ok(())
}

/// The refetch-then-replace pattern: replacement is whole-document, so the
/// current partition-key fields are read back by query before building the
/// hierarchical key and the replacement body.
async fn replace_with_cleared_city(
    collection: &CollectionHandle,
    id: &str,
    pk: &str,
) -> Result<(), Error> {
    let matches = collect_documents(collection.query(QueryDefinition::all().with_filter(
        Filter::and([Filter::eq("id", id), Filter::eq("pk", pk)]),
    )))
    .await?;

    let Some(current) = matches.first() else {
        tracing::warn!(id, "document to replace was not found by query");
        return Ok(());
    };
    let queryfield = current
        .get("queryfield")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    // City is omitted from the replacement, which clears it.
    let replacement = Document::new(id)
        .with_field("pk", pk)
        .with_field("queryfield", queryfield.clone());
    collection
        .replace(id, replacement, &key(pk, &queryfield), None)
        .await?;

    let replaced = collection.read(id, &key(pk, &queryfield), None).await?;
    tracing::info!(id, city = ?replaced.get("city"), "replace verified (city cleared)");
    Ok(())
}

fn cities(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .filter_map(|d| d.get("city").and_then(|v| v.as_str()).map(String::from))
        .collect()
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing.
    init_tracing();

    // 2. Read configuration from environment variables.
    let config = match ProbeConfig::from_env() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    };
    tracing::info!(endpoint = %config.endpoint, mode = ?config.connection_mode, "probe starting");

    // 3. Connect and run the scenario.
    let harness = match Harness::connect(config.harness_config()).await {
        Ok(harness) => harness,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect");
            std::process::exit(1);
        }
    };

    if let Err(e) = run_probe(&harness).await {
        tracing::error!(error = %e, "probe failed");
        std::process::exit(1);
    }
    tracing::info!("probe completed successfully");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Clear all probe environment variables so they do not leak between tests.
    fn clear_probe_env() {
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::remove_var("DOCHARNESS_ENDPOINT") };
        unsafe { std::env::remove_var("DOCHARNESS_MASTER_KEY") };
        unsafe { std::env::remove_var("DOCHARNESS_CONNECTION_MODE") };
        unsafe { std::env::remove_var("DOCHARNESS_TLS_INSECURE") };
        unsafe { std::env::remove_var("DOCHARNESS_FEED_PAGE_HINT") };
        unsafe { std::env::remove_var("DOCHARNESS_QUERY_PAGE_SIZE") };
    }

    #[test]
    #[serial]
    fn from_env_defaults_when_nothing_set() {
        clear_probe_env();

        let config = ProbeConfig::from_env().expect("should succeed with defaults");
        assert_eq!(config.endpoint, "memory:");
        assert_eq!(config.master_key, WELL_KNOWN_KEY);
        assert_eq!(config.connection_mode, ConnectionMode::Gateway);
        assert!(!config.tls_insecure);
        assert_eq!(config.feed_page_hint, DEFAULT_FEED_PAGE_HINT);
        assert_eq!(config.query_page_size, DEFAULT_QUERY_PAGE_SIZE);
    }

    #[test]
    #[serial]
    fn from_env_custom_endpoint_and_mode() {
        clear_probe_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("DOCHARNESS_ENDPOINT", "memory:probe") };
        unsafe { std::env::set_var("DOCHARNESS_CONNECTION_MODE", "direct") };

        let config = ProbeConfig::from_env().expect("should succeed");
        assert_eq!(config.endpoint, "memory:probe");
        assert_eq!(config.connection_mode, ConnectionMode::Direct);
        clear_probe_env();
    }

    #[test]
    #[serial]
    fn from_env_invalid_mode_returns_err() {
        clear_probe_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("DOCHARNESS_CONNECTION_MODE", "tunnel") };

        let result = ProbeConfig::from_env();
        assert!(result.is_err(), "expected Err for invalid connection mode");
        let msg = result.unwrap_err();
        assert!(
            msg.contains("DOCHARNESS_CONNECTION_MODE"),
            "error should name the variable, got: {msg}"
        );
        clear_probe_env();
    }

    #[test]
    #[serial]
    fn from_env_zero_page_hint_returns_err() {
        clear_probe_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("DOCHARNESS_FEED_PAGE_HINT", "0") };

        let result = ProbeConfig::from_env();
        assert!(result.is_err(), "expected Err for zero page hint");
        clear_probe_env();
    }

    #[test]
    #[serial]
    fn from_env_non_numeric_page_size_returns_err() {
        clear_probe_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("DOCHARNESS_QUERY_PAGE_SIZE", "lots") };

        let result = ProbeConfig::from_env();
        assert!(result.is_err(), "expected Err for non-numeric page size");
        clear_probe_env();
    }

    #[test]
    #[serial]
    fn from_env_tls_insecure_accepts_1_and_true() {
        clear_probe_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("DOCHARNESS_TLS_INSECURE", "1") };
        assert!(ProbeConfig::from_env().expect("should succeed").tls_insecure);

        unsafe { std::env::set_var("DOCHARNESS_TLS_INSECURE", "true") };
        assert!(ProbeConfig::from_env().expect("should succeed").tls_insecure);

        unsafe { std::env::set_var("DOCHARNESS_TLS_INSECURE", "0") };
        assert!(!ProbeConfig::from_env().expect("should succeed").tls_insecure);
        clear_probe_env();
    }

    #[test]
    #[serial]
    fn harness_config_maps_all_settings() {
        clear_probe_env();
        let probe = ProbeConfig {
            endpoint: "memory:".into(),
            master_key: "k".into(),
            connection_mode: ConnectionMode::Direct,
            tls_insecure: true,
            feed_page_hint: 7,
            query_page_size: 3,
        };

        let config = probe.harness_config();
        assert_eq!(config.endpoint, "memory:");
        assert_eq!(config.connection_mode, ConnectionMode::Direct);
        assert_eq!(config.tls, TlsPolicy::AcceptInvalidCerts);
        assert_eq!(config.feed_page_size_hint, 7);
        assert_eq!(config.query_page_size, 3);
    }

    #[tokio::test]
    async fn run_probe_completes_against_the_memory_backend() {
        let harness = Harness::in_memory();
        run_probe(&harness).await.expect("probe should complete");
    }

    #[test]
    fn init_tracing_does_not_panic() {
        // The global subscriber may already be set by another test; try_init
        // failure is silently accepted.
        init_tracing();
    }
}

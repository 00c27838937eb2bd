//! Harness configuration.
//!
//! A [`HarnessConfig`] describes one connection to a document-store endpoint:
//! address, credential, connection mode, TLS validation policy, and default page
//! sizes. Transport-level detail is a deployment concern -- it does not change
//! the harness contract, but it is configurable per instance because it affects
//! which server-side code path serves change-feed requests.

use std::fmt;

/// Default number of documents requested per query page.
pub const DEFAULT_QUERY_PAGE_SIZE: u32 = 10;

/// Default advisory upper bound on change records per feed page.
pub const DEFAULT_FEED_PAGE_SIZE_HINT: u32 = 100;

/// How requests are routed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// All requests pass through the store's gateway endpoint.
    Gateway,
    /// Requests connect directly to backend replicas where supported.
    Direct,
}

/// TLS certificate validation policy for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Validate server certificates normally.
    Validate,
    /// Accept any certificate. Intended for local emulators with self-signed
    /// certificates; never for production endpoints.
    AcceptInvalidCerts,
}

/// An endpoint credential. The key is redacted from `Debug` output so configs
/// can be logged safely.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    key: String,
}

impl Credential {
    /// Wrap a master-key credential.
    pub fn master_key(key: impl Into<String>) -> Credential {
        Credential { key: key.into() }
    }

    /// The raw key material.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("key", &"<redacted>").finish()
    }
}

/// Configuration for one harness instance.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Store endpoint address (e.g. `memory:` for the built-in backend).
    pub endpoint: String,
    /// Optional credential presented at connect time.
    pub credential: Option<Credential>,
    /// Request routing mode.
    pub connection_mode: ConnectionMode,
    /// TLS certificate validation policy.
    pub tls: TlsPolicy,
    /// Documents requested per query page.
    pub query_page_size: u32,
    /// Advisory upper bound on change records per feed page.
    pub feed_page_size_hint: u32,
}

impl HarnessConfig {
    /// Build a config for the given endpoint with defaults: no credential,
    /// gateway mode, certificate validation on, default page sizes.
    pub fn new(endpoint: impl Into<String>) -> HarnessConfig {
        HarnessConfig {
            endpoint: endpoint.into(),
            credential: None,
            connection_mode: ConnectionMode::Gateway,
            tls: TlsPolicy::Validate,
            query_page_size: DEFAULT_QUERY_PAGE_SIZE,
            feed_page_size_hint: DEFAULT_FEED_PAGE_SIZE_HINT,
        }
    }

    /// Set the credential presented at connect time.
    pub fn with_credential(mut self, credential: Credential) -> HarnessConfig {
        self.credential = Some(credential);
        self
    }

    /// Set the request routing mode.
    pub fn with_connection_mode(mut self, mode: ConnectionMode) -> HarnessConfig {
        self.connection_mode = mode;
        self
    }

    /// Set the TLS certificate validation policy.
    pub fn with_tls(mut self, tls: TlsPolicy) -> HarnessConfig {
        self.tls = tls;
        self
    }

    /// Set the query page size.
    pub fn with_query_page_size(mut self, size: u32) -> HarnessConfig {
        self.query_page_size = size;
        self
    }

    /// Set the default change-feed page-size hint.
    pub fn with_feed_page_size_hint(mut self, hint: u32) -> HarnessConfig {
        self.feed_page_size_hint = hint;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_applies_defaults() {
        let config = HarnessConfig::new("memory:");
        assert_eq!(config.endpoint, "memory:");
        assert_eq!(config.credential, None);
        assert_eq!(config.connection_mode, ConnectionMode::Gateway);
        assert_eq!(config.tls, TlsPolicy::Validate);
        assert_eq!(config.query_page_size, DEFAULT_QUERY_PAGE_SIZE);
        assert_eq!(config.feed_page_size_hint, DEFAULT_FEED_PAGE_SIZE_HINT);
    }

    #[test]
    fn builder_setters_override_defaults() {
        let config = HarnessConfig::new("memory:")
            .with_credential(Credential::master_key("secret"))
            .with_connection_mode(ConnectionMode::Direct)
            .with_tls(TlsPolicy::AcceptInvalidCerts)
            .with_query_page_size(3)
            .with_feed_page_size_hint(2);

        assert_eq!(
            config.credential.as_ref().map(Credential::key),
            Some("secret")
        );
        assert_eq!(config.connection_mode, ConnectionMode::Direct);
        assert_eq!(config.tls, TlsPolicy::AcceptInvalidCerts);
        assert_eq!(config.query_page_size, 3);
        assert_eq!(config.feed_page_size_hint, 2);
    }

    #[test]
    fn credential_debug_redacts_key_material() {
        let credential = Credential::master_key("super-secret-key");
        let debug = format!("{credential:?}");
        assert!(
            !debug.contains("super-secret-key"),
            "key leaked into Debug output: {debug}"
        );
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn config_debug_is_safe_to_log() {
        let config =
            HarnessConfig::new("memory:").with_credential(Credential::master_key("super-secret"));
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"), "key leaked: {debug}");
    }
}

//! Client address enrichment.
//!
//! At start-up the host spawns a [`FieldEnricher`], which asks a public
//! IP-echo service for the visitor's address exactly once. The answer lands in
//! an [`AddressSlot`] shared with the controller. Failure leaves the slot
//! empty and is never reported to the visitor; the lead is then sent with an
//! empty `ip` value.

use std::net::IpAddr;
use std::sync::{Arc, OnceLock};

use reqwest::Url;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::CollectorConfig;
use crate::error::EnrichmentError;
use crate::transport::http_client;

/// Write-once holder for the resolved client address.
///
/// Clones share the same cell. Readers see `None` until the lookup succeeds.
#[derive(Debug, Clone, Default)]
pub struct AddressSlot {
    cell: Arc<OnceLock<String>>,
}

impl AddressSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot that is already resolved.
    #[must_use]
    pub fn resolved(address: impl Into<String>) -> Self {
        let slot = Self::new();
        slot.fill(address);
        slot
    }

    /// The address, if resolved.
    #[must_use]
    pub fn get(&self) -> Option<&str> {
        self.cell.get().map(String::as_str)
    }

    /// Whether the lookup has completed successfully.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Store the address. Returns `false` if one was already stored.
    pub fn fill(&self, address: impl Into<String>) -> bool {
        self.cell.set(address.into()).is_ok()
    }
}

/// Source of the client's public address.
#[async_trait::async_trait]
pub trait AddressLookup: Send + Sync + 'static {
    /// Perform a single lookup.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichmentError`] on any network, status, or body problem.
    async fn lookup(&self) -> Result<IpAddr, EnrichmentError>;
}

#[derive(Deserialize)]
struct LookupResponse {
    ip: String,
}

/// Looks up the address with a `GET` against an IP-echo service answering
/// `{ "ip": "<address>" }`.
#[derive(Debug, Clone)]
pub struct HttpAddressLookup {
    client: reqwest::Client,
    url: Url,
}

impl HttpAddressLookup {
    /// Build a lookup against `config.lookup_url` with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichmentError::Network`] if the HTTP client cannot be built.
    pub fn new(config: &CollectorConfig) -> Result<Self, EnrichmentError> {
        Ok(Self::with_client(
            http_client(config)?,
            config.lookup_url.clone(),
        ))
    }

    /// Build a lookup sharing an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait::async_trait]
impl AddressLookup for HttpAddressLookup {
    async fn lookup(&self) -> Result<IpAddr, EnrichmentError> {
        let resp = self.client.get(self.url.clone()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status {
                status: status.as_u16(),
            });
        }

        let text = resp.text().await?;
        let body: LookupResponse =
            serde_json::from_str(&text).map_err(|e| EnrichmentError::Malformed {
                reason: e.to_string(),
            })?;

        body.ip
            .trim()
            .parse()
            .map_err(|_| EnrichmentError::Malformed {
                reason: "ip field is not an IPv4 or IPv6 address".to_owned(),
            })
    }
}

/// Resolves the client address once and publishes it to an [`AddressSlot`].
pub struct FieldEnricher {
    lookup: Arc<dyn AddressLookup>,
    slot: AddressSlot,
}

impl FieldEnricher {
    #[must_use]
    pub fn new(lookup: Arc<dyn AddressLookup>, slot: AddressSlot) -> Self {
        Self { lookup, slot }
    }

    /// Run one lookup. On success the address is stored; on failure nothing
    /// is stored and the error is only logged. No retry is attempted.
    ///
    /// Returns whether an address was stored.
    pub async fn resolve_address(&self) -> bool {
        match self.lookup.lookup().await {
            Ok(ip) => {
                let stored = self.slot.fill(ip.to_string());
                info!(stored, "client address resolved");
                stored
            }
            Err(e) => {
                debug!(error = %e, "client address lookup failed, leads will carry an empty ip");
                false
            }
        }
    }

    /// Run [`resolve_address`](Self::resolve_address) in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> JoinHandle<bool> {
        tokio::spawn(async move { self.resolve_address().await })
    }
}

impl std::fmt::Debug for FieldEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldEnricher")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_with_lookup(lookup_url: &str) -> CollectorConfig {
        let mut config = CollectorConfig::new("http://127.0.0.1:9/exec").unwrap();
        config.lookup_url = Url::parse(lookup_url).unwrap();
        config
    }

    async fn lookup_against(server: &MockServer) -> HttpAddressLookup {
        HttpAddressLookup::new(&config_with_lookup(&format!("{}/ip", server.uri()))).unwrap()
    }

    async fn failing_service() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn resolves_ipv4_from_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ip":"203.0.113.5"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let slot = AddressSlot::new();
        let enricher = FieldEnricher::new(Arc::new(lookup_against(&server).await), slot.clone());

        assert!(enricher.resolve_address().await);
        assert!(slot.is_ready());
        assert_eq!(slot.get(), Some("203.0.113.5"));
    }

    #[tokio::test]
    async fn resolves_ipv6() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ip":"2001:db8::1"}"#))
            .mount(&server)
            .await;

        let ip = lookup_against(&server).await.lookup().await.unwrap();
        assert_eq!(ip.to_string(), "2001:db8::1");
    }

    #[tokio::test]
    async fn non_success_status_is_a_status_error() {
        let server = failing_service().await;
        assert!(matches!(
            lookup_against(&server).await.lookup().await,
            Err(EnrichmentError::Status { status: 503 })
        ));
    }

    #[tokio::test]
    async fn failed_lookup_is_swallowed_without_retry() {
        let server = failing_service().await;
        let slot = AddressSlot::new();
        let enricher = FieldEnricher::new(Arc::new(lookup_against(&server).await), slot.clone());

        assert!(!enricher.resolve_address().await);
        assert_eq!(slot.get(), None);
        assert!(!slot.is_ready());
    }

    #[tokio::test]
    async fn unexpected_shape_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"address":"1.2.3.4"}"#))
            .mount(&server)
            .await;

        let result = lookup_against(&server).await.lookup().await;
        assert!(matches!(result, Err(EnrichmentError::Malformed { .. })));
    }

    #[tokio::test]
    async fn non_ip_value_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ip":"localhost"}"#))
            .mount(&server)
            .await;

        let result = lookup_against(&server).await.lookup().await;
        assert!(matches!(result, Err(EnrichmentError::Malformed { .. })));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_network_error() {
        let lookup = HttpAddressLookup::new(&config_with_lookup("http://127.0.0.1:9/ip")).unwrap();
        assert!(matches!(
            lookup.lookup().await,
            Err(EnrichmentError::Network(_))
        ));
    }

    struct CountingLookup(AtomicUsize);

    #[async_trait::async_trait]
    impl AddressLookup for CountingLookup {
        async fn lookup(&self) -> Result<IpAddr, EnrichmentError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("198.51.100.7".parse().unwrap())
        }
    }

    #[tokio::test]
    async fn spawned_enricher_performs_exactly_one_lookup() {
        let lookup = Arc::new(CountingLookup(AtomicUsize::new(0)));
        let slot = AddressSlot::new();
        let handle = FieldEnricher::new(Arc::clone(&lookup) as Arc<dyn AddressLookup>, slot.clone()).spawn();

        assert!(handle.await.unwrap());
        assert_eq!(lookup.0.load(Ordering::SeqCst), 1);
        assert_eq!(slot.get(), Some("198.51.100.7"));
    }

    #[test]
    fn slot_is_write_once() {
        let slot = AddressSlot::resolved("192.0.2.1");
        assert!(!slot.fill("192.0.2.2"));
        assert_eq!(slot.get(), Some("192.0.2.1"));
    }
}

//! Lead delivery to the collector endpoint.
//!
//! Delivery is fire-and-forget. [`Transport::dispatch`] hands the payload off
//! and returns immediately; nobody ever learns whether the collector accepted
//! it. The preferred route is the [`BeaconQueue`], a background worker that
//! keeps posting queued leads until the host flushes it on exit. When the
//! queue is missing, full, or closed, the lead goes out as a detached request
//! whose response is dropped unread.

use std::time::Duration;

use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{CollectorConfig, FallbackEncoding};
use crate::error::SubmissionError;
use crate::lead::{FORM_CONTENT_TYPE, LeadPayload};

/// Which delivery path took a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRoute {
    /// Queued on the background delivery worker.
    Beacon,
    /// Sent as a detached one-way request.
    Fallback,
}

/// Hands lead payloads to the network without waiting for an answer.
pub trait Transport: Send + Sync {
    /// Start delivery of `payload`.
    ///
    /// Returning `Ok` means only that delivery was started.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Dispatch`] if no delivery path could be
    /// started at all.
    fn dispatch(&self, payload: LeadPayload) -> Result<DispatchRoute, SubmissionError>;
}

/// Build the HTTP client used for collector and lookup requests.
///
/// # Errors
///
/// Returns the reqwest error if the TLS backend cannot be initialised.
pub fn http_client(config: &CollectorConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(concat!("leadform/", env!("CARGO_PKG_VERSION")))
        .build()
}

// ── Background queue ─────────────────────────────────────────────────

/// Producer side of a [`BeaconQueue`].
#[derive(Debug, Clone)]
pub struct BeaconSender {
    tx: mpsc::Sender<LeadPayload>,
}

impl BeaconSender {
    /// Enqueue without waiting. Hands the payload back if the queue is full
    /// or has been closed.
    fn try_send(&self, payload: LeadPayload) -> Result<(), LeadPayload> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(p) | mpsc::error::TrySendError::Closed(p) => p,
        })
    }
}

/// Bounded queue drained by a background task that posts each payload to
/// the collector as `application/x-www-form-urlencoded`.
///
/// Leads queued before [`close_and_flush`](Self::close_and_flush) are still
/// delivered; leads offered afterwards are refused.
#[derive(Debug)]
pub struct BeaconQueue {
    tx: mpsc::Sender<LeadPayload>,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<usize>,
}

impl BeaconQueue {
    /// Spawn the delivery worker on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Dispatch`] if called outside a tokio runtime.
    pub fn start(
        client: reqwest::Client,
        url: Url,
        capacity: usize,
    ) -> Result<Self, SubmissionError> {
        let handle = Handle::try_current().map_err(|e| SubmissionError::Dispatch {
            reason: format!("no async runtime for beacon worker: {e}"),
        })?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = handle.spawn(beacon_worker(client, url, rx, shutdown_rx));
        Ok(Self {
            tx,
            shutdown_tx,
            worker,
        })
    }

    /// A handle for enqueuing payloads.
    #[must_use]
    pub fn sender(&self) -> BeaconSender {
        BeaconSender {
            tx: self.tx.clone(),
        }
    }

    /// Stop accepting leads, deliver what is queued, and wait for the worker
    /// for at most `timeout`.
    ///
    /// Returns the number of delivery attempts the worker made, successful or
    /// not, or `None` if the worker did not finish in time.
    pub async fn close_and_flush(self, timeout: Duration) -> Option<usize> {
        let _ = self.shutdown_tx.send(true);
        drop(self.tx);
        match tokio::time::timeout(timeout, self.worker).await {
            Ok(Ok(attempted)) => Some(attempted),
            Ok(Err(e)) => {
                warn!(error = %e, "beacon worker terminated abnormally");
                None
            }
            Err(_) => {
                warn!(?timeout, "beacon flush timed out, queued leads may be lost");
                None
            }
        }
    }
}

async fn beacon_worker(
    client: reqwest::Client,
    url: Url,
    mut rx: mpsc::Receiver<LeadPayload>,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut attempted = 0;
    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(payload) => {
                    post_form(&client, &url, payload).await;
                    attempted += 1;
                }
                None => break,
            },
            _ = shutdown.changed() => {
                rx.close();
                while let Some(payload) = rx.recv().await {
                    post_form(&client, &url, payload).await;
                    attempted += 1;
                }
                break;
            }
        }
    }
    debug!(attempted, "beacon worker stopped");
    attempted
}

async fn post_form(client: &reqwest::Client, url: &Url, payload: LeadPayload) {
    let result = client
        .post(url.clone())
        .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
        .body(payload.body().to_owned())
        .send()
        .await;
    // Status and body are never read.
    if let Err(e) = result {
        debug!(error = %e, "lead delivery did not complete");
    }
}

// ── Collector transport ──────────────────────────────────────────────

/// Delivers leads to the configured collector, preferring the background
/// queue and falling back to a detached request.
#[derive(Debug, Clone)]
pub struct CollectorTransport {
    client: reqwest::Client,
    url: Url,
    encoding: FallbackEncoding,
    beacon: Option<BeaconSender>,
}

impl CollectorTransport {
    /// A transport with no background queue; every lead takes the fallback.
    #[must_use]
    pub fn new(client: reqwest::Client, config: &CollectorConfig) -> Self {
        Self {
            client,
            url: config.collector_url.clone(),
            encoding: config.fallback_encoding,
            beacon: None,
        }
    }

    /// Route leads through `beacon` while it accepts them.
    #[must_use]
    pub fn with_beacon(mut self, beacon: BeaconSender) -> Self {
        self.beacon = Some(beacon);
        self
    }

    fn spawn_fallback(&self, payload: LeadPayload) -> Result<(), SubmissionError> {
        let handle = Handle::try_current().map_err(|e| SubmissionError::Dispatch {
            reason: format!("no async runtime for fallback request: {e}"),
        })?;

        let request = match self.encoding {
            FallbackEncoding::UrlEncoded => self
                .client
                .post(self.url.clone())
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(payload.body().to_owned()),
            FallbackEncoding::Multipart => self
                .client
                .post(self.url.clone())
                .multipart(payload.to_multipart()),
        };

        handle.spawn(async move {
            if let Err(e) = request.send().await {
                debug!(error = %e, "fallback lead delivery did not complete");
            }
        });
        Ok(())
    }
}

impl Transport for CollectorTransport {
    fn dispatch(&self, payload: LeadPayload) -> Result<DispatchRoute, SubmissionError> {
        let payload = match &self.beacon {
            Some(beacon) => match beacon.try_send(payload) {
                Ok(()) => {
                    info!(route = "beacon", "lead dispatched");
                    return Ok(DispatchRoute::Beacon);
                }
                Err(payload) => {
                    warn!("beacon queue unavailable, using fallback request");
                    payload
                }
            },
            None => payload,
        };

        self.spawn_fallback(payload)?;
        info!(route = "fallback", encoding = ?self.encoding, "lead dispatched");
        Ok(DispatchRoute::Fallback)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::lead::LeadRecord;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn payload(name: &str) -> LeadPayload {
        LeadPayload::encode(LeadRecord {
            name: name.to_owned(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: String::new(),
            client_address: "203.0.113.5".to_owned(),
        })
        .unwrap()
    }

    async fn collector() -> (MockServer, CollectorConfig) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/exec"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let config = CollectorConfig::new(&format!("{}/exec", server.uri())).unwrap();
        (server, config)
    }

    async fn wait_for_requests(server: &MockServer, n: usize) -> Vec<Request> {
        for _ in 0..250 {
            let received = server.received_requests().await.unwrap();
            if received.len() >= n {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        server.received_requests().await.unwrap()
    }

    #[tokio::test]
    async fn beacon_route_posts_urlencoded_body() {
        let (server, config) = collector().await;
        let client = http_client(&config).unwrap();
        let queue = BeaconQueue::start(client.clone(), config.collector_url.clone(), 4).unwrap();
        let transport = CollectorTransport::new(client, &config).with_beacon(queue.sender());

        let route = transport.dispatch(payload("Amal")).unwrap();
        assert_eq!(route, DispatchRoute::Beacon);

        assert_eq!(queue.close_and_flush(Duration::from_secs(5)).await, Some(1));
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0].headers.get("content-type").unwrap(),
            FORM_CONTENT_TYPE
        );
        assert_eq!(
            String::from_utf8(received[0].body.clone()).unwrap(),
            "name=Amal&email=amal%40example.com&phone=&ip=203.0.113.5"
        );
    }

    #[tokio::test]
    async fn flush_delivers_everything_queued() {
        let (server, config) = collector().await;
        let client = http_client(&config).unwrap();
        let queue = BeaconQueue::start(client.clone(), config.collector_url.clone(), 8).unwrap();
        let transport = CollectorTransport::new(client, &config).with_beacon(queue.sender());

        for name in ["A", "B", "C"] {
            transport.dispatch(payload(name)).unwrap();
        }

        assert_eq!(queue.close_and_flush(Duration::from_secs(5)).await, Some(3));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn closed_beacon_falls_back_to_detached_request() {
        let (server, config) = collector().await;
        let client = http_client(&config).unwrap();
        let queue = BeaconQueue::start(client.clone(), config.collector_url.clone(), 4).unwrap();
        let sender = queue.sender();
        queue.close_and_flush(Duration::from_secs(5)).await;

        let transport = CollectorTransport::new(client, &config).with_beacon(sender);
        let route = transport.dispatch(payload("Late")).unwrap();
        assert_eq!(route, DispatchRoute::Fallback);

        let received = wait_for_requests(&server, 1).await;
        assert_eq!(received.len(), 1);
        assert!(
            String::from_utf8(received[0].body.clone())
                .unwrap()
                .starts_with("name=Late&")
        );
    }

    #[tokio::test]
    async fn full_beacon_falls_back_to_detached_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/exec"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .expect(4)
            .mount(&server)
            .await;
        let config = CollectorConfig::new(&format!("{}/exec", server.uri())).unwrap();
        let client = http_client(&config).unwrap();
        let queue = BeaconQueue::start(client.clone(), config.collector_url.clone(), 1).unwrap();
        let transport = CollectorTransport::new(client, &config).with_beacon(queue.sender());

        // The worker cannot run between synchronous dispatches, so only the
        // first lead fits in the queue.
        let routes: Vec<_> = ["A", "B", "C", "D"]
            .into_iter()
            .map(|name| transport.dispatch(payload(name)).unwrap())
            .collect();
        assert_eq!(
            routes,
            [
                DispatchRoute::Beacon,
                DispatchRoute::Fallback,
                DispatchRoute::Fallback,
                DispatchRoute::Fallback,
            ]
        );

        assert_eq!(queue.close_and_flush(Duration::from_secs(5)).await, Some(1));
        assert_eq!(wait_for_requests(&server, 4).await.len(), 4);
    }

    #[test]
    fn beacon_queue_requires_a_runtime() {
        let config = CollectorConfig::new("http://127.0.0.1:9/exec").unwrap();
        let result = BeaconQueue::start(reqwest::Client::new(), config.collector_url, 4);
        assert!(matches!(result, Err(SubmissionError::Dispatch { .. })));
    }

    #[tokio::test]
    async fn fallback_ignores_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", FORM_CONTENT_TYPE))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        let config = CollectorConfig::new(&server.uri()).unwrap();
        let transport = CollectorTransport::new(http_client(&config).unwrap(), &config);

        assert_eq!(
            transport.dispatch(payload("Amal")).unwrap(),
            DispatchRoute::Fallback
        );
        assert_eq!(wait_for_requests(&server, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn multipart_fallback_sends_every_field() {
        let (server, mut config) = collector().await;
        config.fallback_encoding = FallbackEncoding::Multipart;
        let transport = CollectorTransport::new(http_client(&config).unwrap(), &config);

        transport.dispatch(payload("Amal")).unwrap();

        let received = wait_for_requests(&server, 1).await;
        let content_type = received[0].headers.get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
        let body = String::from_utf8_lossy(&received[0].body);
        for key in ["name", "email", "phone", "ip"] {
            assert!(body.contains(&format!("name=\"{key}\"")), "missing part {key}");
        }
        assert!(body.contains("amal@example.com"));
    }

    #[test]
    fn dispatch_without_runtime_fails_synchronously() {
        let config = CollectorConfig::new("http://127.0.0.1:9/exec").unwrap();
        let transport = CollectorTransport::new(reqwest::Client::new(), &config);
        let result = transport.dispatch(payload("Amal"));
        assert!(matches!(result, Err(SubmissionError::Dispatch { .. })));
    }
}

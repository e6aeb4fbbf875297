//! Terminal host for one submission.
//!
//! Wires the core pipeline together the way a landing page would: start the
//! address lookup and the background delivery queue, feed the fields in,
//! press submit, show the thank-you panel from `on_success`, then wait for
//! the redirect and flush queued leads before exiting.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use leadform_core::Url;
use leadform_core::config::CollectorConfig;
use leadform_core::controller::{
    ControllerDeps, ControllerSettings, Navigator, SubmissionController, SubmitOutcome,
};
use leadform_core::enricher::{AddressSlot, FieldEnricher, HttpAddressLookup};
use leadform_core::error::ErrorKind;
use leadform_core::form::Field;
use leadform_core::scheduler::TokioScheduler;
use leadform_core::transport::{BeaconQueue, CollectorTransport, DispatchRoute, http_client};
use tokio::sync::watch;
use tracing::info;

use crate::{BOLD, DIM, GREEN, RESET, success, warning};

/// Slack on top of one request timeout while flushing queued leads.
const FLUSH_GRACE: Duration = Duration::from_secs(1);
/// Slack on top of the settle delay while waiting for the redirect.
const REDIRECT_GRACE: Duration = Duration::from_secs(2);

/// Field values and options for one `submit` run.
#[derive(Debug)]
pub struct SubmitRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub wait_for_address: Option<Duration>,
}

/// Publishes the redirect target so the command can wait for it.
struct TerminalNavigator {
    target: watch::Sender<Option<Url>>,
}

impl TerminalNavigator {
    fn new() -> Self {
        Self {
            target: watch::channel(None).0,
        }
    }

    async fn wait(&self, timeout: Duration) -> Option<Url> {
        let mut rx = self.target.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await;
        match result {
            Ok(Ok(url)) => url.clone(),
            _ => None,
        }
    }
}

impl Navigator for TerminalNavigator {
    fn navigate(&self, url: &Url) {
        self.target.send_replace(Some(url.clone()));
    }
}

/// How long queued leads get to leave before the process exits. A single
/// slow collector request must be able to finish.
fn flush_timeout(config: &CollectorConfig) -> Duration {
    config.request_timeout + FLUSH_GRACE
}

/// Visitor-facing text for an error, looked up by its translation key.
fn visitor_message(kind: ErrorKind) -> String {
    match kind.translation_key() {
        "error" => "Submission failed. Please check your details and try again.".to_owned(),
        _ => kind.to_string(),
    }
}

fn print_thanks() {
    println!();
    println!("  {GREEN}{BOLD}Thank You!{RESET}");
    println!("  {DIM}Your information has been submitted successfully.{RESET}");
    println!();
}

/// Run the full submit flow against the configured collector.
pub async fn run_submit(config: &CollectorConfig, request: SubmitRequest) -> Result<()> {
    let client = http_client(config).context("failed to build HTTP client")?;

    // Page load: the lookup races the visitor.
    let address = AddressSlot::new();
    let lookup = HttpAddressLookup::with_client(client.clone(), config.lookup_url.clone());
    let enricher = FieldEnricher::new(Arc::new(lookup), address.clone()).spawn();
    if let Some(wait) = request.wait_for_address {
        let _ = tokio::time::timeout(wait, enricher).await;
    }

    let beacon = BeaconQueue::start(
        client.clone(),
        config.collector_url.clone(),
        config.beacon_capacity,
    )
    .context("failed to start background delivery")?;
    let transport = CollectorTransport::new(client, config).with_beacon(beacon.sender());
    let navigator = Arc::new(TerminalNavigator::new());

    let mut controller = SubmissionController::new(
        ControllerSettings::from(config),
        ControllerDeps {
            address,
            transport: Arc::new(transport),
            scheduler: Arc::new(TokioScheduler::current().context("no tokio runtime")?),
            navigator: Arc::clone(&navigator) as Arc<dyn Navigator>,
        },
        print_thanks,
    );

    controller.set_field(Field::Name, request.name);
    controller.set_field(Field::Email, request.email);
    controller.set_field(Field::Phone, request.phone);

    match controller.submit() {
        SubmitOutcome::Dispatched(route) => {
            let via = match route {
                DispatchRoute::Beacon => "background queue",
                DispatchRoute::Fallback => "direct request",
            };
            success(&format!("lead handed off via {via}"));
        }
        SubmitOutcome::Blocked => {
            let required = if config.require_phone {
                "--name, --email and --phone are required"
            } else {
                "--name and --email are required"
            };
            bail!("{required}");
        }
        SubmitOutcome::Ignored => bail!("a submission is already in flight"),
        SubmitOutcome::Failed(kind) => bail!("{}", visitor_message(kind)),
    }

    match navigator.wait(config.settle_delay + REDIRECT_GRACE).await {
        Some(url) => println!("  {DIM}Redirecting to{RESET} {BOLD}{url}{RESET}"),
        None => warning("redirect did not fire"),
    }

    // Page unload.
    drop(controller);
    let attempted = beacon.close_and_flush(flush_timeout(config)).await;
    info!(?attempted, "leadform exiting");
    println!();
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flush_outlasts_one_collector_request() {
        let mut config = CollectorConfig::new("http://127.0.0.1:9/exec").unwrap();
        assert!(flush_timeout(&config) > config.request_timeout);

        config.request_timeout = Duration::from_secs(30);
        assert_eq!(flush_timeout(&config), Duration::from_secs(31));
    }

    #[test]
    fn failure_text_comes_from_the_translation_key() {
        let message = visitor_message(ErrorKind::SubmissionFailed);
        assert!(message.contains("try again"), "message: {message}");
    }
}

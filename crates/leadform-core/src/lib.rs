//! Lead submission pipeline.
//!
//! Takes a prospect's contact details from a form, enriches them with the
//! visitor's public address when it is known, hands them to an external
//! collector endpoint without waiting for an answer, and then moves the
//! visitor on to a fixed redirect target.
//!
//! - [`enricher`] resolves the client address once, in the background.
//! - [`controller`] owns the form fields and runs the submit protocol.
//! - [`transport`] delivers encoded leads, fire-and-forget.
//! - [`scheduler`] abstracts the two fixed-delay timers so they can be driven
//!   by a virtual clock in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use leadform_core::config::CollectorConfig;
//! use leadform_core::controller::{ControllerDeps, ControllerSettings, Navigator, SubmissionController};
//! use leadform_core::enricher::AddressSlot;
//! use leadform_core::form::Field;
//! use leadform_core::scheduler::TokioScheduler;
//! use leadform_core::transport::{CollectorTransport, http_client};
//!
//! struct Log;
//! impl Navigator for Log {
//!     fn navigate(&self, url: &leadform_core::Url) {
//!         tracing::info!(%url, "navigate");
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CollectorConfig::from_env()?;
//! let transport = CollectorTransport::new(http_client(&config)?, &config);
//! let mut controller = SubmissionController::new(
//!     ControllerSettings::from(&config),
//!     ControllerDeps {
//!         address: AddressSlot::new(),
//!         transport: Arc::new(transport),
//!         scheduler: Arc::new(TokioScheduler::current()?),
//!         navigator: Arc::new(Log),
//!     },
//!     || tracing::info!("thank you"),
//! );
//! controller.set_field(Field::Name, "Amal");
//! controller.set_field(Field::Email, "amal@example.com");
//! controller.submit();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod enricher;
pub mod error;
pub mod form;
pub mod lead;
pub mod scheduler;
pub mod transport;

pub use reqwest::Url;

//! Event collection and delivery
//!
//! ## Architecture
//!
//! The collector is "store first":
//! - Tracking calls build an [`Event`](crate::types::Event) and enqueue it;
//!   they never block on disk or network
//! - One worker thread appends events to the [`EventStore`](crate::db::EventStore)
//!   and, once enough are pending, delivers the oldest batch
//! - A batch is removed only after the server accepted or permanently
//!   rejected it; network failures leave it pending for the next flush
//!
//! ## Usage
//!
//! Configure the collector in `~/.config/beacon/config.toml`:
//!
//! ```toml
//! [collector]
//! app_key = "your-app-key"
//! secret_key = "your-secret"
//! server_url = "https://collector.example.com"
//! ```
//!
//! ```rust,no_run
//! use beacon_core::{Collector, Config};
//!
//! let config = Config::load().expect("failed to load config");
//! let collector = Collector::from_config(&config.collector).expect("failed to start collector");
//! collector.opened_app();
//! collector.viewed_link("spring-sale", Some("email"));
//! collector.shutdown();
//! ```

mod client;
mod events;
mod scheduler;
mod tracker;

pub use client::{DeliveryOutcome, HttpTransport, Transport, BATCH_EVENTS_ROUTE};
pub use events::{BatchPayload, DeviceContext, Identity, PayloadContext};
pub use scheduler::{FlushPolicy, FlushScheduler, FlushStats};
pub use tracker::{Collector, CollectorBuilder};

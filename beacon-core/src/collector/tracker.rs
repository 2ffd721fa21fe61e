//! Application-facing collector handle

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::CollectorConfig;
use crate::db::{Database, EventStore};
use crate::error::{Error, Result};
use crate::types::{Event, EventType};

use super::client::{HttpTransport, Transport};
use super::events::{DeviceContext, Identity, PayloadContext};
use super::scheduler::{FlushPolicy, FlushScheduler, FlushStats};

/// Records events and hands them to the flush worker.
///
/// Every tracking call returns after an O(1) enqueue and never fails; events
/// that cannot be built are dropped with a debug log. Dropping the collector
/// stops the worker once the already queued tasks have run.
pub struct Collector {
    store: EventStore,
    scheduler: FlushScheduler,
}

impl Collector {
    /// Start configuring a collector for `app_key`
    pub fn builder(app_key: impl Into<String>) -> CollectorBuilder {
        CollectorBuilder::new(app_key)
    }

    /// Build a collector delivering over HTTP as configured.
    ///
    /// Opens (and if needed creates) the event database, loads or
    /// generates the device identifier and detects the host context.
    pub fn from_config(config: &CollectorConfig) -> Result<Self> {
        config.validate()?;
        let app_key = config
            .app_key
            .clone()
            .ok_or_else(|| Error::Config("collector.app_key is required".to_string()))?;

        let db = Database::open(&config.resolved_database_path())?;
        db.migrate()?;
        let device = DeviceContext::detect(db.device_udid()?);

        Collector::builder(app_key)
            .database(Arc::new(db))
            .transport(HttpTransport::new(config)?)
            .device(device)
            .device_type(config.device_type.clone())
            .min_batch_size(config.min_batch_size)
            .max_batch_size(config.max_batch_size)
            .build()
    }

    /// Record an event with optional external properties.
    ///
    /// `properties` must serialize to a JSON object; anything else drops the
    /// event.
    pub fn collect<P>(
        &self,
        event_type: EventType,
        subject: Option<&str>,
        channel: Option<&str>,
        properties: Option<&P>,
    ) where
        P: Serialize + ?Sized,
    {
        match Event::new(event_type, subject, channel, properties) {
            Ok(event) => self.scheduler.add(event),
            Err(e) => {
                tracing::debug!(%event_type, error = %e, "Dropping event");
            }
        }
    }

    /// Record an event without external properties
    pub fn track(&self, event_type: EventType, subject: Option<&str>, channel: Option<&str>) {
        self.collect::<serde_json::Value>(event_type, subject, channel, None);
    }

    pub fn opened_app(&self) {
        self.track(EventType::OpenedApp, Some(""), None);
    }

    pub fn viewed_link(&self, subject: &str, channel: Option<&str>) {
        self.track(EventType::ViewedLink, Some(subject), channel);
    }

    pub fn shared_link(&self, subject: &str, channel: Option<&str>) {
        self.track(EventType::SharedLink, Some(subject), channel);
    }

    /// Attach `user_name` to every later payload and record a login
    pub fn user_logged_in(&self, user_name: &str) {
        self.scheduler
            .set_external_user_id(Some(user_name.to_string()));
        self.track(EventType::Login, Some(""), None);
    }

    /// Attach experiment variations (experiment id to variation id) to
    /// every later payload. `None` clears them.
    pub fn set_experiment_variations(&self, variations: Option<BTreeMap<String, String>>) {
        self.scheduler.set_experiment_variations(variations);
    }

    /// Ask the worker to deliver pending events now
    pub fn flush(&self) {
        self.scheduler.flush();
    }

    /// Wait until everything submitted so far has been processed.
    ///
    /// Blocks the calling thread; not for use inside an async runtime.
    pub fn sync(&self) {
        self.scheduler.sync();
    }

    /// Events persisted and not yet delivered
    pub fn pending_count(&self) -> Result<usize> {
        self.store.count()
    }

    pub fn stats(&self) -> FlushStats {
        self.scheduler.stats()
    }

    /// The store backing this collector
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Run the queued tasks and stop the worker
    pub fn shutdown(self) {
        self.scheduler.shutdown();
    }
}

/// Builder for [`Collector`]
pub struct CollectorBuilder {
    app_key: String,
    database: Option<Arc<Database>>,
    transport: Option<Box<dyn Transport>>,
    device: Option<DeviceContext>,
    device_type: String,
    policy: FlushPolicy,
}

impl CollectorBuilder {
    fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            database: None,
            transport: None,
            device: None,
            device_type: "3".to_string(),
            policy: FlushPolicy::default(),
        }
    }

    /// Migrated database to store events in. Defaults to a private
    /// in-memory database.
    pub fn database(mut self, db: Arc<Database>) -> Self {
        self.database = Some(db);
        self
    }

    /// Where batches go. Required.
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Device snapshot for payloads. Defaults to [`DeviceContext::detect`]
    /// with the database's device identifier.
    pub fn device(mut self, device: DeviceContext) -> Self {
        self.device = Some(device);
        self
    }

    pub fn device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn min_batch_size(mut self, size: usize) -> Self {
        self.policy.min_batch_size = size;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.policy.max_batch_size = size;
        self
    }

    /// Validate the settings and start the flush worker
    pub fn build(self) -> Result<Collector> {
        if self.app_key.is_empty() {
            return Err(Error::Config("app key must not be empty".to_string()));
        }
        self.policy.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| Error::Config("a transport is required".to_string()))?;

        let db = match self.database {
            Some(db) => db,
            None => {
                let db = Database::open_in_memory()?;
                db.migrate()?;
                Arc::new(db)
            }
        };

        let device = match self.device {
            Some(device) => device,
            None => DeviceContext::detect(db.device_udid()?),
        };

        let store = EventStore::new(db, self.app_key.clone());
        let context = PayloadContext {
            app_key: self.app_key,
            device_type: self.device_type,
            device,
            identity: Identity::default(),
        };

        let scheduler = FlushScheduler::start(store.clone(), transport, context, self.policy)?;
        tracing::info!(
            app_key = %store.app_key(),
            min_batch_size = self.policy.min_batch_size,
            max_batch_size = self.policy.max_batch_size,
            "Collector started"
        );

        Ok(Collector { store, scheduler })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::client::DeliveryOutcome;
    use crate::collector::events::BatchPayload;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingTransport {
        payloads: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl Transport for RecordingTransport {
        fn deliver(&self, payload: &BatchPayload<'_>) -> DeliveryOutcome {
            self.payloads
                .lock()
                .unwrap()
                .push(serde_json::to_value(payload).unwrap());
            DeliveryOutcome::Delivered
        }
    }

    fn collector() -> (Collector, RecordingTransport) {
        crate::logging::init_test();
        let transport = RecordingTransport::default();
        let collector = Collector::builder("app")
            .transport(transport.clone())
            .build()
            .unwrap();
        (collector, transport)
    }

    #[test]
    fn test_builder_requires_transport() {
        assert!(Collector::builder("app").build().is_err());
    }

    #[test]
    fn test_builder_rejects_bad_policy() {
        let result = Collector::builder("app")
            .transport(RecordingTransport::default())
            .min_batch_size(10)
            .max_batch_size(5)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_empty_app_key() {
        let result = Collector::builder("")
            .transport(RecordingTransport::default())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_default_device_uses_stored_udid() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let udid = db.device_udid().unwrap();

        let transport = RecordingTransport::default();
        let collector = Collector::builder("app")
            .database(db)
            .transport(transport.clone())
            .build()
            .unwrap();
        collector.opened_app();
        collector.sync();

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads[0]["device_udid"], udid.as_str());
    }

    #[test]
    fn test_convenience_events() {
        let (collector, transport) = collector();
        collector.opened_app();
        collector.sync();
        collector.viewed_link("loop", Some("email"));
        collector.sync();
        collector.shared_link("loop", None);
        collector.sync();

        let payloads = transport.payloads.lock().unwrap();
        let records: Vec<_> = payloads.iter().map(|p| p["payload"][0].clone()).collect();
        assert_eq!(records[0]["event_type"], 5);
        assert_eq!(records[0]["link_name"], "");
        assert_eq!(records[1]["event_type"], 11);
        assert_eq!(records[1]["link_name"], "loop");
        assert_eq!(records[1]["channel"], "email");
        assert_eq!(records[2]["event_type"], 12);
        assert!(records[2]["channel"].is_null());
    }

    #[test]
    fn test_user_logged_in_sets_identity() {
        let (collector, transport) = collector();
        collector.user_logged_in("spaceman");
        collector.sync();

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["external_user_id"], "spaceman");
        assert_eq!(payloads[0]["payload"][0]["event_type"], 6);
        assert_eq!(payloads[0]["payload"][0]["link_name"], "");
    }

    #[test]
    fn test_invalid_properties_are_dropped() {
        let (collector, transport) = collector();
        collector.collect(EventType::ViewedLink, Some("x"), None, Some(&vec![1, 2, 3]));
        collector.sync();

        assert_eq!(collector.pending_count().unwrap(), 0);
        assert!(transport.payloads.lock().unwrap().is_empty());
        assert_eq!(collector.stats().events_appended, 0);
    }

    #[test]
    fn test_properties_are_sent() {
        let (collector, transport) = collector();
        let properties = serde_json::json!({ "campaign": "spring", "position": 3 });
        collector.collect(EventType::SharedLink, Some("x"), None, Some(&properties));
        collector.sync();

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(
            payloads[0]["payload"][0]["external_properties"],
            properties
        );
    }

    #[test]
    fn test_experiment_variations() {
        let (collector, transport) = collector();
        let variations: BTreeMap<String, String> =
            [("experiment1".to_string(), "variation1".to_string())]
                .into_iter()
                .collect();
        collector.set_experiment_variations(Some(variations));
        collector.opened_app();
        collector.sync();

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(
            payloads[0]["experiment_variation_ids"]["experiment1"],
            "variation1"
        );
    }
}

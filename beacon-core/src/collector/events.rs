//! Outbound batch payload
//!
//! A delivery request is one JSON object: the process-wide device snapshot
//! and identity fields at the top level, and the batch of event records
//! under `payload`, oldest first.
//!
//! ```text
//! {
//!   "app_key": "...", "device_type": "3", "device_udid": "...",
//!   "os_version": "...", ...,
//!   "external_user_id": "...",          (omitted when unset)
//!   "experiment_variation_ids": {...},  (omitted when unset)
//!   "payload": [ { "event_type": 11, ... }, ... ]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Event;

/// Device metadata attached to every batch.
///
/// Collected once per process; the flush worker never refreshes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceContext {
    /// Stable installation identifier
    pub device_udid: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,

    /// "wifi" or "mobile"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_manufacturer: Option<String>,

    /// Hardware model or architecture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,

    /// Additional flat key/values from the host application
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl DeviceContext {
    /// Best-effort snapshot of the current host.
    ///
    /// Locale fields come from `LC_ALL` / `LANG` (e.g. `en_US.UTF-8`).
    pub fn detect(device_udid: impl Into<String>) -> Self {
        let locale = std::env::var("LC_ALL")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| std::env::var("LANG").ok());
        let (language_code, country_code) = locale
            .as_deref()
            .map(parse_locale)
            .unwrap_or((None, None));

        DeviceContext {
            device_udid: device_udid.into(),
            app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            os_version: Some(std::env::consts::OS.to_string()),
            country_code,
            language_code,
            hardware: Some(std::env::consts::ARCH.to_string()),
            ..Default::default()
        }
    }

    /// Attach an extra key/value to every payload
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Split `en_US.UTF-8` into (`en`, `US`)
fn parse_locale(locale: &str) -> (Option<String>, Option<String>) {
    let base = locale.split(['.', '@']).next().unwrap_or_default();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return (None, None);
    }
    let mut parts = base.splitn(2, '_');
    let language = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    let country = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    (language, country)
}

/// Caller identity that can change during the process lifetime
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    /// Application user name, set on login
    pub external_user_id: Option<String>,
    /// Experiment id to variation id
    pub experiment_variation_ids: Option<BTreeMap<String, String>>,
}

/// Everything besides the events that goes into a payload
#[derive(Debug, Clone)]
pub struct PayloadContext {
    pub app_key: String,
    pub device_type: String,
    pub device: DeviceContext,
    pub identity: Identity,
}

/// One delivery request body
#[derive(Debug, Serialize)]
pub struct BatchPayload<'a> {
    pub app_key: &'a str,
    pub device_type: &'a str,

    #[serde(flatten)]
    pub device: &'a DeviceContext,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_user_id: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_variation_ids: Option<&'a BTreeMap<String, String>>,

    /// The batch, oldest event first
    pub payload: &'a [Event],
}

impl<'a> BatchPayload<'a> {
    pub fn new(context: &'a PayloadContext, events: &'a [Event]) -> Self {
        BatchPayload {
            app_key: &context.app_key,
            device_type: &context.device_type,
            device: &context.device,
            external_user_id: context.identity.external_user_id.as_deref(),
            experiment_variation_ids: context.identity.experiment_variation_ids.as_ref(),
            payload: events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    fn context() -> PayloadContext {
        PayloadContext {
            app_key: "APP KEY".to_string(),
            device_type: "3".to_string(),
            device: DeviceContext {
                device_udid: "udid-1".to_string(),
                connection_type: Some("wifi".to_string()),
                ..Default::default()
            }
            .with_extra("screen_density", "320"),
            identity: Identity::default(),
        }
    }

    fn event(subject: &str) -> Event {
        Event::new::<serde_json::Value>(EventType::ViewedLink, Some(subject), None, None).unwrap()
    }

    #[test]
    fn test_payload_shape() {
        let ctx = context();
        let events = vec![event("first"), event("second")];
        let json = serde_json::to_value(BatchPayload::new(&ctx, &events)).unwrap();

        assert_eq!(json["app_key"], "APP KEY");
        assert_eq!(json["device_type"], "3");
        assert_eq!(json["device_udid"], "udid-1");
        assert_eq!(json["connection_type"], "wifi");
        assert_eq!(json["screen_density"], "320");
        assert_eq!(json["payload"][0]["link_name"], "first");
        assert_eq!(json["payload"][1]["link_name"], "second");
    }

    #[test]
    fn test_unset_fields_are_omitted() {
        let ctx = context();
        let events = vec![event("only")];
        let json = serde_json::to_value(BatchPayload::new(&ctx, &events)).unwrap();
        let obj = json.as_object().unwrap();

        assert!(!obj.contains_key("external_user_id"));
        assert!(!obj.contains_key("experiment_variation_ids"));
        assert!(!obj.contains_key("carrier_name"));
    }

    #[test]
    fn test_identity_fields() {
        let mut ctx = context();
        ctx.identity.external_user_id = Some("spaceman".to_string());
        ctx.identity.experiment_variation_ids = Some(
            [("experiment1".to_string(), "variation1".to_string())]
                .into_iter()
                .collect(),
        );
        let events = vec![event("x")];
        let json = serde_json::to_value(BatchPayload::new(&ctx, &events)).unwrap();

        assert_eq!(json["external_user_id"], "spaceman");
        assert_eq!(
            json["experiment_variation_ids"],
            serde_json::json!({"experiment1": "variation1"})
        );
    }

    #[test]
    fn test_parse_locale() {
        assert_eq!(
            parse_locale("en_US.UTF-8"),
            (Some("en".to_string()), Some("US".to_string()))
        );
        assert_eq!(parse_locale("de"), (Some("de".to_string()), None));
        assert_eq!(parse_locale("C.UTF-8"), (None, None));
        assert_eq!(parse_locale(""), (None, None));
    }

    #[test]
    fn test_detect_uses_given_udid() {
        let device = DeviceContext::detect("abc");
        assert_eq!(device.device_udid, "abc");
        assert!(device.os_version.is_some());
    }
}

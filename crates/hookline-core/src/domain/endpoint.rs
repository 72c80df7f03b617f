//! Webhook endpoint model and its management DTOs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use super::events::EventName;
use super::ids::{EndpointId, OwnerId};

/// Shared secret used to sign deliveries.
///
/// Written once at creation. It has no `Serialize` impl and its `Debug`
/// output is redacted, so it cannot leak through read models or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointSecret(String);

impl EndpointSecret {
    pub const PREFIX: &'static str = "whsec_";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// 32 bytes from the OS CSPRNG, hex encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(format!("{}{}", Self::PREFIX, hex::encode(bytes)))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EndpointSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EndpointSecret(**redacted**)")
    }
}

#[derive(Debug, Clone)]
pub struct WebhookEndpoint {
    pub id: EndpointId,
    pub owner_id: OwnerId,
    pub url: String,
    pub events: BTreeSet<EventName>,
    pub secret: EndpointSecret,
    pub headers: BTreeMap<String, String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl WebhookEndpoint {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Should a new occurrence of `event` fan out to this endpoint?
    pub fn accepts(&self, event: EventName) -> bool {
        self.enabled && !self.is_deleted() && self.events.contains(&event)
    }
}

/// Read model of an endpoint. Never contains the secret.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointView {
    pub id: EndpointId,
    pub owner_id: OwnerId,
    pub url: String,
    pub events: BTreeSet<EventName>,
    pub headers: BTreeMap<String, String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WebhookEndpoint> for EndpointView {
    fn from(e: &WebhookEndpoint) -> Self {
        Self {
            id: e.id,
            owner_id: e.owner_id.clone(),
            url: e.url.clone(),
            events: e.events.clone(),
            headers: e.headers.clone(),
            enabled: e.enabled,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

/// Result of `create_webhook`: the only place the secret is ever returned.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedEndpoint {
    pub endpoint: EndpointView,
    pub secret: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEndpoint {
    pub url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Partial update. The secret is write-once and deliberately absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointUpdate {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointFilter {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub event: Option<EventName>,
}

impl EndpointFilter {
    pub fn matches(&self, endpoint: &WebhookEndpoint) -> bool {
        self.enabled.is_none_or(|enabled| endpoint.enabled == enabled)
            && self.event.is_none_or(|event| endpoint.events.contains(&event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(enabled: bool, events: &[EventName]) -> WebhookEndpoint {
        let now = Utc::now();
        WebhookEndpoint {
            id: EndpointId::generate(),
            owner_id: OwnerId::new("acme"),
            url: "https://example.com/hook".into(),
            events: events.iter().copied().collect(),
            secret: EndpointSecret::generate(),
            headers: BTreeMap::new(),
            enabled,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn generated_secrets_are_prefixed_and_unique() {
        let a = EndpointSecret::generate();
        let b = EndpointSecret::generate();
        assert!(a.expose().starts_with("whsec_"));
        assert_eq!(a.expose().len(), "whsec_".len() + 64);
        assert_ne!(a, b);
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = EndpointSecret::new("whsec_super_secret");
        let ep = WebhookEndpoint {
            secret: secret.clone(),
            ..endpoint(true, &[EventName::UserCreated])
        };
        assert!(!format!("{secret:?}").contains("super_secret"));
        assert!(!format!("{ep:?}").contains("super_secret"));
    }

    #[test]
    fn accepts_requires_enabled_subscribed_and_live() {
        let mut ep = endpoint(true, &[EventName::UserCreated]);
        assert!(ep.accepts(EventName::UserCreated));
        assert!(!ep.accepts(EventName::UserDeleted));

        ep.enabled = false;
        assert!(!ep.accepts(EventName::UserCreated));

        ep.enabled = true;
        ep.deleted_at = Some(Utc::now());
        assert!(!ep.accepts(EventName::UserCreated));
    }

    #[test]
    fn view_omits_secret() {
        let ep = endpoint(true, &[EventName::InvoicePaid]);
        let json = serde_json::to_value(EndpointView::from(&ep)).unwrap();
        assert!(json.get("secret").is_none());
        assert_eq!(json["events"], serde_json::json!(["invoice.paid"]));
    }

    #[test]
    fn filter_matches_on_enabled_and_event() {
        let ep = endpoint(false, &[EventName::UserCreated]);
        assert!(EndpointFilter::default().matches(&ep));
        assert!(!EndpointFilter { enabled: Some(true), event: None }.matches(&ep));
        assert!(EndpointFilter { enabled: Some(false), event: Some(EventName::UserCreated) }.matches(&ep));
        assert!(!EndpointFilter { enabled: None, event: Some(EventName::InvoicePaid) }.matches(&ep));
    }
}

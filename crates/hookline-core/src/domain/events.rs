//! Events - the closed catalog of domain events that can reach webhooks.
//!
//! Every event kind carries a statically-typed payload. Endpoints subscribe by
//! `EventName`; the dispatcher turns a `DomainEvent` into a persisted
//! `WebhookEvent` row whose `data` is the payload serialized as JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::UnknownEventName;

/// Name of a subscribable event.
///
/// Wire form is the dotted lower-case name (`"user.created"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "user.created")]
    UserCreated,
    #[serde(rename = "user.updated")]
    UserUpdated,
    #[serde(rename = "user.deleted")]
    UserDeleted,
    #[serde(rename = "organization.created")]
    OrganizationCreated,
    #[serde(rename = "organization.member_added")]
    OrganizationMemberAdded,
    #[serde(rename = "subscription.created")]
    SubscriptionCreated,
    #[serde(rename = "subscription.canceled")]
    SubscriptionCanceled,
    #[serde(rename = "invoice.paid")]
    InvoicePaid,
    #[serde(rename = "invoice.payment_failed")]
    InvoicePaymentFailed,
}

impl EventName {
    pub const ALL: [EventName; 9] = [
        EventName::UserCreated,
        EventName::UserUpdated,
        EventName::UserDeleted,
        EventName::OrganizationCreated,
        EventName::OrganizationMemberAdded,
        EventName::SubscriptionCreated,
        EventName::SubscriptionCanceled,
        EventName::InvoicePaid,
        EventName::InvoicePaymentFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventName::UserCreated => "user.created",
            EventName::UserUpdated => "user.updated",
            EventName::UserDeleted => "user.deleted",
            EventName::OrganizationCreated => "organization.created",
            EventName::OrganizationMemberAdded => "organization.member_added",
            EventName::SubscriptionCreated => "subscription.created",
            EventName::SubscriptionCanceled => "subscription.canceled",
            EventName::InvoicePaid => "invoice.paid",
            EventName::InvoicePaymentFailed => "invoice.payment_failed",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = UnknownEventName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownEventName(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationPayload {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipPayload {
    pub organization_id: String,
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    pub id: String,
    pub customer_id: String,
    pub plan: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoicePayload {
    pub id: String,
    pub customer_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// A domain occurrence published on the event bus.
///
/// The variant fixes both the event name and the payload type, so a
/// `user.created` event can only ever carry a `UserPayload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum DomainEvent {
    #[serde(rename = "user.created")]
    UserCreated(UserPayload),
    #[serde(rename = "user.updated")]
    UserUpdated(UserPayload),
    #[serde(rename = "user.deleted")]
    UserDeleted(UserPayload),
    #[serde(rename = "organization.created")]
    OrganizationCreated(OrganizationPayload),
    #[serde(rename = "organization.member_added")]
    OrganizationMemberAdded(MembershipPayload),
    #[serde(rename = "subscription.created")]
    SubscriptionCreated(SubscriptionPayload),
    #[serde(rename = "subscription.canceled")]
    SubscriptionCanceled(SubscriptionPayload),
    #[serde(rename = "invoice.paid")]
    InvoicePaid(InvoicePayload),
    #[serde(rename = "invoice.payment_failed")]
    InvoicePaymentFailed(InvoicePayload),
}

impl DomainEvent {
    pub fn name(&self) -> EventName {
        match self {
            DomainEvent::UserCreated(_) => EventName::UserCreated,
            DomainEvent::UserUpdated(_) => EventName::UserUpdated,
            DomainEvent::UserDeleted(_) => EventName::UserDeleted,
            DomainEvent::OrganizationCreated(_) => EventName::OrganizationCreated,
            DomainEvent::OrganizationMemberAdded(_) => EventName::OrganizationMemberAdded,
            DomainEvent::SubscriptionCreated(_) => EventName::SubscriptionCreated,
            DomainEvent::SubscriptionCanceled(_) => EventName::SubscriptionCanceled,
            DomainEvent::InvoicePaid(_) => EventName::InvoicePaid,
            DomainEvent::InvoicePaymentFailed(_) => EventName::InvoicePaymentFailed,
        }
    }

    /// The payload as it appears in the `data` field of the envelope.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            DomainEvent::UserCreated(p) | DomainEvent::UserUpdated(p) | DomainEvent::UserDeleted(p) => {
                serde_json::to_value(p)
            }
            DomainEvent::OrganizationCreated(p) => serde_json::to_value(p),
            DomainEvent::OrganizationMemberAdded(p) => serde_json::to_value(p),
            DomainEvent::SubscriptionCreated(p) | DomainEvent::SubscriptionCanceled(p) => {
                serde_json::to_value(p)
            }
            DomainEvent::InvoicePaid(p) | DomainEvent::InvoicePaymentFailed(p) => {
                serde_json::to_value(p)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn every_name_roundtrips_through_str() {
        for name in EventName::ALL {
            assert_eq!(name.as_str().parse::<EventName>().unwrap(), name);
            let json = serde_json::to_string(&name).unwrap();
            assert_eq!(json, format!("\"{}\"", name.as_str()));
        }
    }

    #[rstest]
    #[case("user.exploded")]
    #[case("")]
    #[case("USER.CREATED")]
    fn unknown_names_are_rejected(#[case] raw: &str) {
        assert!(raw.parse::<EventName>().is_err());
    }

    #[test]
    fn domain_event_uses_catalog_name_and_typed_payload() {
        let event = DomainEvent::UserCreated(UserPayload {
            id: "u1".into(),
            email: None,
            name: None,
        });
        assert_eq!(event.name(), EventName::UserCreated);
        assert_eq!(event.payload().unwrap(), serde_json::json!({"id": "u1"}));

        let tagged = serde_json::to_value(&event).unwrap();
        assert_eq!(tagged["event"], "user.created");
        assert_eq!(tagged["data"]["id"], "u1");
    }
}

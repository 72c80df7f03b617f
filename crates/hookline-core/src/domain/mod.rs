//! Domain model (ids, event catalog, endpoints, delivery ledger, errors).

pub mod delivery;
pub mod endpoint;
pub mod errors;
pub mod events;
pub mod ids;

pub use delivery::{
    AttemptOutcome, DeliveryQuery, DeliveryStatus, ErrorClass, WebhookDelivery, WebhookEvent,
};
pub use endpoint::{
    CreatedEndpoint, EndpointFilter, EndpointSecret, EndpointUpdate, EndpointView, NewEndpoint,
    WebhookEndpoint,
};
pub use errors::{HandlerError, QueueError, RepoError, UnknownEventName, WebhookError};
pub use events::{
    DomainEvent, EventName, InvoicePayload, MembershipPayload, OrganizationPayload,
    SubscriptionPayload, UserPayload,
};
pub use ids::{DeliveryId, EndpointId, EventId, Id, IdMarker, JobId, LineageId, OwnerId};

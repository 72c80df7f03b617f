//! Job trait: binds a payload type to its queue and job type name.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed job payload.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendInvoice { invoice_id: String }
///
/// impl Job for SendInvoice {
///     const QUEUE: &'static str = "billing";
///     const TYPE: &'static str = "billing.send_invoice";
/// }
/// ```
///
/// The payload is stored as JSON, so it must round-trip through serde and
/// must not borrow (`'static`).
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Queue the job is added to.
    const QUEUE: &'static str;

    /// Name used to route the payload to its processor within the queue.
    const TYPE: &'static str;
}

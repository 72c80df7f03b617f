//! Endpoint registry: validation and CRUD of webhook subscriptions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::domain::{
    CreatedEndpoint, EndpointFilter, EndpointId, EndpointSecret, EndpointUpdate, EndpointView,
    EventName, NewEndpoint, OwnerId, RepoError, WebhookEndpoint, WebhookError,
};
use crate::ports::{Clock, IdGenerator, WebhookRepository};

/// Header names the executor sets itself; endpoints may not override them.
const RESERVED_HEADERS: [&str; 3] = ["content-type", "content-length", "host"];
const RESERVED_PREFIX: &str = "x-webhook-";

/// Validate a delivery URL: parseable, https (or http when allowed), with a
/// host. Returns the normalised form.
pub fn validate_url(raw: &str, allow_http: bool) -> Result<String, WebhookError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| WebhookError::InvalidUrl(format!("{raw}: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_http => {}
        "http" => return Err(WebhookError::InvalidUrl("webhook URLs must use https".into())),
        scheme => return Err(WebhookError::InvalidUrl(format!("unsupported scheme: {scheme}"))),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(WebhookError::InvalidUrl("URL must have a host".into()));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(WebhookError::InvalidUrl("credentials in the URL are not allowed".into()));
    }
    Ok(parsed.to_string())
}

/// Parse a non-empty list of event names against the catalog.
pub fn parse_events(raw: &[String]) -> Result<BTreeSet<EventName>, WebhookError> {
    if raw.is_empty() {
        return Err(WebhookError::Validation("at least one event is required".into()));
    }
    raw.iter()
        .map(|name| name.parse::<EventName>().map_err(WebhookError::from))
        .collect()
}

pub fn validate_headers(headers: &BTreeMap<String, String>) -> Result<(), WebhookError> {
    for (name, value) in headers {
        let valid_name = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
        if !valid_name {
            return Err(WebhookError::Validation(format!("invalid header name: {name:?}")));
        }
        let lower = name.to_ascii_lowercase();
        if lower.starts_with(RESERVED_PREFIX) || RESERVED_HEADERS.contains(&lower.as_str()) {
            return Err(WebhookError::Validation(format!("header {name} is managed by the sender")));
        }
        if value.chars().any(|c| c == '\r' || c == '\n') {
            return Err(WebhookError::Validation(format!("invalid value for header {name}")));
        }
    }
    Ok(())
}

fn storage_error(e: RepoError) -> WebhookError {
    match e {
        RepoError::Conflict(_) => WebhookError::DuplicateEndpoint,
        other => WebhookError::Storage(other),
    }
}

/// Owner-scoped endpoint management. An endpoint of another owner is
/// reported as not found.
pub struct EndpointRegistry {
    repo: Arc<dyn WebhookRepository>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    allow_http: bool,
}

impl EndpointRegistry {
    pub fn new(
        repo: Arc<dyn WebhookRepository>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        allow_http: bool,
    ) -> Self {
        Self {
            repo,
            clock,
            ids,
            allow_http,
        }
    }

    pub async fn create(&self, owner: &OwnerId, input: NewEndpoint) -> Result<CreatedEndpoint, WebhookError> {
        let url = validate_url(&input.url, self.allow_http)?;
        let events = parse_events(&input.events)?;
        let headers = input.headers.unwrap_or_default();
        validate_headers(&headers)?;

        let secret = match input.secret {
            Some(s) if s.trim().is_empty() => {
                return Err(WebhookError::Validation("secret must not be blank".into()));
            }
            Some(s) => EndpointSecret::new(s),
            None => EndpointSecret::generate(),
        };

        let now = self.clock.now();
        let endpoint = WebhookEndpoint {
            id: self.ids.endpoint_id(),
            owner_id: owner.clone(),
            url,
            events,
            secret,
            headers,
            enabled: input.enabled.unwrap_or(true),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.repo.insert_endpoint(endpoint.clone()).await.map_err(storage_error)?;
        tracing::info!(endpoint_id = %endpoint.id, owner = %owner, url = %endpoint.url, "endpoint created");

        Ok(CreatedEndpoint {
            endpoint: EndpointView::from(&endpoint),
            secret: endpoint.secret.expose().to_string(),
        })
    }

    pub async fn get(&self, owner: &OwnerId, id: EndpointId) -> Result<WebhookEndpoint, WebhookError> {
        match self.repo.get_endpoint(id).await? {
            Some(endpoint) if &endpoint.owner_id == owner => Ok(endpoint),
            _ => Err(WebhookError::EndpointNotFound(id)),
        }
    }

    pub async fn list(&self, owner: &OwnerId, filter: &EndpointFilter) -> Result<Vec<EndpointView>, WebhookError> {
        let endpoints = self.repo.list_endpoints(owner, filter).await?;
        Ok(endpoints.iter().map(EndpointView::from).collect())
    }

    pub async fn update(
        &self,
        owner: &OwnerId,
        id: EndpointId,
        update: EndpointUpdate,
    ) -> Result<EndpointView, WebhookError> {
        let mut endpoint = self.get(owner, id).await?;
        if let Some(url) = update.url {
            endpoint.url = validate_url(&url, self.allow_http)?;
        }
        if let Some(events) = update.events {
            endpoint.events = parse_events(&events)?;
        }
        if let Some(headers) = update.headers {
            validate_headers(&headers)?;
            endpoint.headers = headers;
        }
        if let Some(enabled) = update.enabled {
            endpoint.enabled = enabled;
        }
        endpoint.updated_at = self.clock.now();

        self.repo
            .update_endpoint(endpoint.clone())
            .await
            .map_err(|e| match e {
                RepoError::NotFound => WebhookError::EndpointNotFound(id),
                other => storage_error(other),
            })?;
        tracing::info!(endpoint_id = %id, enabled = endpoint.enabled, "endpoint updated");
        Ok(EndpointView::from(&endpoint))
    }

    /// Soft delete. Rows in the delivery ledger keep pointing at the endpoint.
    pub async fn delete(&self, owner: &OwnerId, id: EndpointId) -> Result<(), WebhookError> {
        let mut endpoint = self.get(owner, id).await?;
        let now = self.clock.now();
        endpoint.deleted_at = Some(now);
        endpoint.updated_at = now;
        self.repo.update_endpoint(endpoint).await.map_err(|e| match e {
            RepoError::NotFound => WebhookError::EndpointNotFound(id),
            other => WebhookError::Storage(other),
        })?;
        tracing::info!(endpoint_id = %id, "endpoint deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryWebhookRepository;
    use crate::ports::{SystemClock, UlidGenerator};
    use rstest::rstest;

    fn registry(allow_http: bool) -> EndpointRegistry {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        EndpointRegistry::new(
            Arc::new(InMemoryWebhookRepository::new()),
            Arc::clone(&clock),
            Arc::new(UlidGenerator::new(clock)),
            allow_http,
        )
    }

    fn new_endpoint(url: &str, events: &[&str]) -> NewEndpoint {
        NewEndpoint {
            url: url.into(),
            events: events.iter().map(|e| e.to_string()).collect(),
            ..NewEndpoint::default()
        }
    }

    #[rstest]
    #[case("https://example.com/hook", false)]
    #[case("https://hooks.example.com:8443/cb?x=1", false)]
    #[case("http://localhost:8080/hook", true)]
    fn accepted_urls(#[case] url: &str, #[case] allow_http: bool) {
        assert!(validate_url(url, allow_http).is_ok());
    }

    #[rstest]
    #[case("not a url")]
    #[case("http://example.com/hook")]
    #[case("ftp://example.com/hook")]
    #[case("https://user:pw@example.com/hook")]
    #[case("")]
    fn rejected_urls(#[case] url: &str) {
        assert!(matches!(validate_url(url, false), Err(WebhookError::InvalidUrl(_))));
    }

    #[test]
    fn events_must_be_known_and_non_empty() {
        assert!(matches!(parse_events(&[]), Err(WebhookError::Validation(_))));
        assert!(matches!(
            parse_events(&["user.created".into(), "user.exploded".into()]),
            Err(WebhookError::UnknownEvent(_))
        ));
        let parsed = parse_events(&["invoice.paid".into(), "user.created".into(), "invoice.paid".into()]).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[rstest]
    #[case("X-Webhook-Signature")]
    #[case("content-type")]
    #[case("bad header")]
    fn reserved_or_malformed_headers_are_rejected(#[case] name: &str) {
        let headers = BTreeMap::from([(name.to_string(), "v".to_string())]);
        assert!(validate_headers(&headers).is_err());
    }

    #[tokio::test]
    async fn create_generates_secret_and_hides_it_from_reads() {
        let registry = registry(false);
        let owner = OwnerId::new("acme");
        let created = registry
            .create(&owner, new_endpoint("https://example.com/hook", &["user.created"]))
            .await
            .unwrap();

        assert!(created.secret.starts_with(EndpointSecret::PREFIX));
        assert!(created.endpoint.enabled);

        let listed = registry.list(&owner, &EndpointFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains(&created.secret));
    }

    #[tokio::test]
    async fn supplied_secret_is_kept() {
        let registry = registry(false);
        let owner = OwnerId::new("acme");
        let created = registry
            .create(
                &owner,
                NewEndpoint {
                    secret: Some("whsec_mine".into()),
                    ..new_endpoint("https://example.com/hook", &["user.created"])
                },
            )
            .await
            .unwrap();
        assert_eq!(created.secret, "whsec_mine");
        let stored = registry.get(&owner, created.endpoint.id).await.unwrap();
        assert_eq!(stored.secret.expose(), "whsec_mine");
    }

    #[tokio::test]
    async fn duplicate_url_is_rejected_until_deleted() {
        let registry = registry(false);
        let owner = OwnerId::new("acme");
        let first = registry
            .create(&owner, new_endpoint("https://example.com/hook", &["user.created"]))
            .await
            .unwrap();

        let err = registry
            .create(&owner, new_endpoint("https://example.com/hook", &["user.deleted"]))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::DuplicateEndpoint));

        registry.delete(&owner, first.endpoint.id).await.unwrap();
        assert!(matches!(
            registry.get(&owner, first.endpoint.id).await,
            Err(WebhookError::EndpointNotFound(_))
        ));
        registry
            .create(&owner, new_endpoint("https://example.com/hook", &["user.deleted"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn other_owners_endpoints_are_not_found() {
        let registry = registry(false);
        let created = registry
            .create(&OwnerId::new("acme"), new_endpoint("https://example.com/hook", &["user.created"]))
            .await
            .unwrap();

        let intruder = OwnerId::new("globex");
        let id = created.endpoint.id;
        assert!(matches!(registry.get(&intruder, id).await, Err(WebhookError::EndpointNotFound(_))));
        assert!(matches!(
            registry.update(&intruder, id, EndpointUpdate::default()).await,
            Err(WebhookError::EndpointNotFound(_))
        ));
        assert!(matches!(registry.delete(&intruder, id).await, Err(WebhookError::EndpointNotFound(_))));
    }

    #[tokio::test]
    async fn update_applies_partial_changes() {
        let registry = registry(false);
        let owner = OwnerId::new("acme");
        let created = registry
            .create(&owner, new_endpoint("https://example.com/hook", &["user.created"]))
            .await
            .unwrap();

        let view = registry
            .update(
                &owner,
                created.endpoint.id,
                EndpointUpdate {
                    events: Some(vec!["invoice.paid".into()]),
                    enabled: Some(false),
                    ..EndpointUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(!view.enabled);
        assert_eq!(view.url, "https://example.com/hook");
        assert_eq!(view.events, BTreeSet::from([EventName::InvoicePaid]));

        let err = registry
            .update(
                &owner,
                created.endpoint.id,
                EndpointUpdate {
                    url: Some("http://example.com/plain".into()),
                    ..EndpointUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidUrl(_)));
    }
}

//! Contentful management API client.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, trace, warn};

use taxosync_core::defaults;
use taxosync_core::{
    ApiFailure, Error, Locale, PatchOp, RemotePayload, RemoteResource, RequestRecord,
    ResourceKind, Result, TaxonomyStore,
};

use crate::config::RemoteConfig;

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    items: Vec<JsonValue>,
    #[serde(default)]
    pages: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: Option<String>,
}

/// HTTP client for the remote taxonomy store.
pub struct ContentfulClient {
    client: Client,
    config: RemoteConfig,
}

impl ContentfulClient {
    /// Create a new client with the given configuration.
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            organization_id = %config.organization_id,
            max_rate_limit_retries = config.rate_limit.max_retries,
            "Initializing Contentful client"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(RemoteConfig::from_env()?)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn collection_url(&self, kind: ResourceKind) -> Result<String> {
        let segment = match kind {
            ResourceKind::ConceptScheme => "concept-schemes",
            ResourceKind::Concept => "concepts",
            ResourceKind::Other => {
                return Err(Error::InvalidInput(
                    "only concepts and concept schemes live in the taxonomy".to_string(),
                ))
            }
        };
        Ok(format!(
            "{}/organizations/{}/taxonomy/{}",
            self.base_url(),
            self.config.organization_id,
            segment
        ))
    }

    fn resource_url(&self, kind: ResourceKind, id: &str) -> Result<String> {
        Ok(format!("{}/{}", self.collection_url(kind)?, id))
    }

    /// Resolve a `pages.next` cursor: a path relative to the API base, or an
    /// absolute URL.
    fn next_url(&self, next: &str) -> String {
        if next.starts_with("http://") || next.starts_with("https://") {
            next.to_string()
        } else {
            format!("{}{}", self.base_url(), next)
        }
    }

    /// Send one request, retrying while rate limited.
    async fn send(
        &self,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        version: Option<u64>,
        body: Option<&JsonValue>,
    ) -> Result<Option<JsonValue>> {
        let op = method.as_str().to_string();
        let result = self
            .config
            .rate_limit
            .execute(&op, || {
                self.send_once(method.clone(), url, content_type, version, body)
            })
            .await;

        if let Err(Error::Remote(failure)) = &result {
            if failure.is_uri_conflict() {
                debug!(endpoint = %failure.endpoint, "URI conflict on create");
            } else {
                warn!(
                    endpoint = %failure.endpoint,
                    status = failure.status,
                    response = %failure.response,
                    "API call failure"
                );
            }
        }
        result
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        version: Option<u64>,
        body: Option<&JsonValue>,
    ) -> Result<Option<JsonValue>> {
        let mut headers: Vec<(&str, String)> = vec![(
            "Authorization",
            format!("Bearer {}", self.config.access_token),
        )];
        if let Some(content_type) = content_type {
            headers.push(("Content-Type", content_type.to_string()));
        }
        if let Some(version) = version {
            headers.push((defaults::VERSION_HEADER, version.to_string()));
        }

        let mut request = self.client.request(method.clone(), url);
        for (name, value) in &headers {
            request = request.header(*name, value);
        }
        if let Some(body) = body {
            request = request.body(serde_json::to_vec(body)?);
        }

        let start = Instant::now();
        let response = request.send().await?;
        let status = response.status();
        let elapsed = start.elapsed().as_millis() as u64;
        trace!(
            method = %method,
            url,
            status = status.as_u16(),
            duration_ms = elapsed,
            "Remote call"
        );
        if elapsed > defaults::SLOW_REQUEST_THRESHOLD_MS {
            warn!(method = %method, url, duration_ms = elapsed, slow = true, "Slow remote call");
        }

        let text = response.text().await?;
        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_str(&text)?));
        }

        let response_body = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::json!({ "message": text }));
        Err(ApiFailure {
            endpoint: url.to_string(),
            status: status.as_u16(),
            request: RequestRecord::new(method.as_str(), headers, body.cloned()),
            response: response_body,
        }
        .into())
    }

    /// Follow `pages.next` until exhausted, accumulating items.
    ///
    /// Stops when `next` points back at a page already fetched.
    async fn get_all_pages(&self, first: String) -> Result<Vec<JsonValue>> {
        let mut items = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(first);
        let mut pages = 0usize;
        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                warn!(url = %url, pages, "Pagination revisits a fetched page, stopping");
                break;
            }
            let body = self.send(Method::GET, &url, None, None, None).await?;
            let page: Page = match body {
                Some(value) => serde_json::from_value(value)?,
                None => break,
            };
            pages += 1;
            trace!(url = %url, item_count = page.items.len(), "Fetched page");
            items.extend(page.items);
            next = page
                .pages
                .and_then(|p| p.next)
                .filter(|n| !n.is_empty())
                .map(|n| self.next_url(&n));
        }
        debug!(pages, item_count = items.len(), "Listing complete");
        Ok(items)
    }

    fn parse_resource(body: Option<JsonValue>) -> Result<RemoteResource> {
        let body = body.ok_or_else(|| Error::Internal("empty response body".to_string()))?;
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait]
impl TaxonomyStore for ContentfulClient {
    #[instrument(
        skip(self),
        fields(
            subsystem = "remote",
            component = "contentful",
            op = "list_locales"
        )
    )]
    async fn list_locales(&self) -> Result<Vec<Locale>> {
        let url = format!(
            "{}/spaces/{}/environments/{}/locales",
            self.base_url(),
            self.config.space_id,
            self.config.environment_id
        );
        self.get_all_pages(url)
            .await?
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Error::from))
            .collect()
    }

    #[instrument(
        skip(self, kind),
        fields(
            subsystem = "remote",
            component = "contentful",
            op = "list_all",
            kind = %kind
        )
    )]
    async fn list_all(
        &self,
        kind: ResourceKind,
        scheme_id: Option<&str>,
    ) -> Result<Vec<RemoteResource>> {
        let mut url = format!(
            "{}?limit={}",
            self.collection_url(kind)?,
            self.config.page_limit
        );
        if let Some(scheme_id) = scheme_id {
            url.push_str("&conceptScheme=");
            url.push_str(scheme_id);
        }
        self.get_all_pages(url)
            .await?
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Error::from))
            .collect()
    }

    #[instrument(
        skip(self, kind),
        fields(
            subsystem = "remote",
            component = "contentful",
            op = "fetch",
            kind = %kind
        )
    )]
    async fn fetch(&self, kind: ResourceKind, id: &str) -> Result<RemoteResource> {
        let url = self.resource_url(kind, id)?;
        let body = self.send(Method::GET, &url, None, None, None).await?;
        Self::parse_resource(body)
    }

    #[instrument(
        skip(self, kind, payload),
        fields(
            subsystem = "remote",
            component = "contentful",
            op = "create",
            kind = %kind
        )
    )]
    async fn create(&self, kind: ResourceKind, payload: &RemotePayload) -> Result<RemoteResource> {
        let url = self.collection_url(kind)?;
        let body = JsonValue::Object(payload.clone());
        let response = self
            .send(
                Method::POST,
                &url,
                Some(defaults::CONTENT_TYPE_MANAGEMENT),
                None,
                Some(&body),
            )
            .await?;
        Self::parse_resource(response)
    }

    #[instrument(
        skip(self, kind, body),
        fields(
            subsystem = "remote",
            component = "contentful",
            op = "replace",
            kind = %kind
        )
    )]
    async fn replace(
        &self,
        kind: ResourceKind,
        id: &str,
        body: &RemotePayload,
        version: u64,
    ) -> Result<RemoteResource> {
        let url = self.resource_url(kind, id)?;
        let body = JsonValue::Object(body.clone());
        let response = self
            .send(
                Method::PUT,
                &url,
                Some(defaults::CONTENT_TYPE_MANAGEMENT),
                Some(version),
                Some(&body),
            )
            .await?;
        Self::parse_resource(response)
    }

    #[instrument(
        skip(self, kind, ops),
        fields(
            subsystem = "remote",
            component = "contentful",
            op = "patch",
            kind = %kind,
            op_count = ops.len()
        )
    )]
    async fn patch(
        &self,
        kind: ResourceKind,
        id: &str,
        ops: &[PatchOp],
        version: u64,
    ) -> Result<RemoteResource> {
        let url = self.resource_url(kind, id)?;
        let body = serde_json::to_value(ops)?;
        let response = self
            .send(
                Method::PATCH,
                &url,
                Some(defaults::CONTENT_TYPE_JSON_PATCH),
                Some(version),
                Some(&body),
            )
            .await?;
        Self::parse_resource(response)
    }

    #[instrument(
        skip(self, kind),
        fields(
            subsystem = "remote",
            component = "contentful",
            op = "delete",
            kind = %kind
        )
    )]
    async fn delete(&self, kind: ResourceKind, id: &str, version: u64) -> Result<()> {
        let url = self.resource_url(kind, id)?;
        self.send(
            Method::DELETE,
            &url,
            Some(defaults::CONTENT_TYPE_MANAGEMENT),
            Some(version),
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> ContentfulClient {
        let config = RemoteConfig::new("t", "org", "space", "master").with_base_url(base_url);
        ContentfulClient::new(config).unwrap()
    }

    #[test]
    fn test_collection_urls() {
        let c = client("https://api.example.com/");
        assert_eq!(
            c.collection_url(ResourceKind::ConceptScheme).unwrap(),
            "https://api.example.com/organizations/org/taxonomy/concept-schemes"
        );
        assert_eq!(
            c.resource_url(ResourceKind::Concept, "c1").unwrap(),
            "https://api.example.com/organizations/org/taxonomy/concepts/c1"
        );
        assert!(c.collection_url(ResourceKind::Other).is_err());
    }

    #[test]
    fn test_next_url_relative_and_absolute() {
        let c = client("https://api.example.com");
        assert_eq!(
            c.next_url("/organizations/org/taxonomy/concepts?pageNext=x"),
            "https://api.example.com/organizations/org/taxonomy/concepts?pageNext=x"
        );
        assert_eq!(c.next_url("https://other.example.com/p"), "https://other.example.com/p");
    }
}

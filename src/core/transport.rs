//! Transport seam between the sync orchestrator and the remote provider.
//!
//! The orchestrator is generic over [`Transport`], so tests script provider
//! behavior without a network. [`HttpTransport`] is the production
//! implementation, built on a shared `reqwest` client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, ClientBuilder, Response, StatusCode};

use crate::core::credential::{CredentialVerifier, Credentials};
use crate::core::entity::Endpoint;
use crate::core::models::{ProviderPage, ProviderRecord, QuotaHeaders};
use crate::error::{Result, RookeryError};

/// Default timeout for provider requests. A request past this deadline is
/// treated as a transient failure.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Request
// =============================================================================

/// A single outbound page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub endpoint: Endpoint,
    /// Account, list, or location the endpoint is scoped to.
    pub selector: String,
    pub max_results: u32,
    /// Resume token from a previous page, if any.
    pub pagination_token: Option<String>,
}

impl FetchRequest {
    /// Build a request, clamping `max_results` to the endpoint's page size.
    #[must_use]
    pub fn new(endpoint: Endpoint, selector: &str, max_results: u32) -> Self {
        Self {
            endpoint,
            selector: selector.to_string(),
            max_results: max_results.min(endpoint.max_page_size()),
            pagination_token: None,
        }
    }

    /// Request with a pagination token.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.pagination_token = token;
        self
    }
}

// =============================================================================
// Transport trait
// =============================================================================

/// Fetches one page of records from the provider.
pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl std::future::Future<Output = Result<ProviderPage>> + Send;
}

// =============================================================================
// HTTP transport
// =============================================================================

/// Production transport against the provider's v2 REST API.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpTransport {
    /// Build a transport with the default timeout.
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        Self::with_timeout(base_url, credentials, DEFAULT_TIMEOUT)
    }

    /// Build a transport with a custom request timeout.
    pub fn with_timeout(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        let client = build_client(timeout)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn bearer(&self) -> &str {
        match &self.credentials {
            Credentials::App { bearer_token } => bearer_token,
            Credentials::User { access_token, .. } => access_token,
        }
    }

    async fn send(&self, request: &FetchRequest) -> Result<Response> {
        let url = format!(
            "{}{}",
            self.base_url,
            request.endpoint.path_for(&request.selector)
        );
        let mut builder = self
            .client
            .get(&url)
            .bearer_auth(self.bearer())
            .query(&[("max_results", request.max_results.to_string())]);
        if let Some(token) = &request.pagination_token {
            builder = builder.query(&[("pagination_token", token.as_str())]);
        }

        builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, request.endpoint))
    }
}

impl Transport for HttpTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<ProviderPage> {
        let response = self.send(request).await?;
        let quota = parse_quota_headers(&response);
        let status = response.status();

        if !status.is_success() {
            return Err(map_status_error(status, request, quota));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RookeryError::ParseResponse(e.to_string()))?;

        let mut page = parse_page(&body)?;
        page.quota = quota;
        tracing::debug!(
            endpoint = request.endpoint.id(),
            records = page.records.len(),
            has_next = page.next_token.is_some(),
            "fetched provider page"
        );
        Ok(page)
    }
}

impl CredentialVerifier for HttpTransport {
    /// Verify credentials against the authenticated-user lookup endpoint.
    ///
    /// A 401/403 is a definitive rejection (`Ok(false)`); anything else
    /// non-successful is surfaced as a transient error so it is never cached
    /// as invalid.
    async fn verify(&self, credentials: &Credentials) -> Result<bool> {
        let url = format!("{}/2/users/me", self.base_url);
        let bearer = match credentials {
            Credentials::App { bearer_token } => bearer_token,
            Credentials::User { access_token, .. } => access_token,
        };
        let response = self
            .client
            .get(&url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, Endpoint::UserLookup))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            s => Err(RookeryError::TransientNetwork {
                endpoint: "verify".to_string(),
                status_code: Some(s.as_u16()),
                message: format!("unexpected status {s} from credential verification"),
            }),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("rookery/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| RookeryError::ConnectionFailed {
            endpoint: "client".to_string(),
            message: e.to_string(),
        })
}

fn map_reqwest_error(error: &reqwest::Error, endpoint: Endpoint) -> RookeryError {
    if error.is_timeout() {
        RookeryError::Timeout {
            endpoint: endpoint.id().to_string(),
            seconds: DEFAULT_TIMEOUT.as_secs(),
        }
    } else if error.is_connect() {
        RookeryError::ConnectionFailed {
            endpoint: endpoint.id().to_string(),
            message: error.to_string(),
        }
    } else {
        RookeryError::TransientNetwork {
            endpoint: endpoint.id().to_string(),
            status_code: None,
            message: error.to_string(),
        }
    }
}

fn map_status_error(
    status: StatusCode,
    request: &FetchRequest,
    quota: Option<QuotaHeaders>,
) -> RookeryError {
    let endpoint = request.endpoint.id().to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RookeryError::AuthenticationRejected {
            reason: format!("provider returned {status} on {endpoint}"),
        },
        StatusCode::NOT_FOUND => RookeryError::NotFound {
            endpoint,
            selector: request.selector.clone(),
        },
        StatusCode::TOO_MANY_REQUESTS => RookeryError::RateLimited {
            endpoint,
            wait_until: quota.map(|q| q.reset_at),
        },
        s if s.is_server_error() => RookeryError::TransientNetwork {
            endpoint,
            status_code: Some(s.as_u16()),
            message: format!("provider returned {s}"),
        },
        s => RookeryError::Validation(format!("provider rejected request on {endpoint}: {s}")),
    }
}

/// Parse `x-rate-limit-remaining` / `x-rate-limit-reset` headers.
fn parse_quota_headers(response: &Response) -> Option<QuotaHeaders> {
    let remaining: u32 = header_value(response, "x-rate-limit-remaining")?;
    let reset_unix: i64 = header_value(response, "x-rate-limit-reset")?;
    let reset_at: DateTime<Utc> = DateTime::from_timestamp(reset_unix, 0)?;
    Some(QuotaHeaders {
        remaining,
        reset_at,
    })
}

fn header_value<T: std::str::FromStr>(response: &Response, name: &str) -> Option<T> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Parse a provider response body: `data` array plus `meta.next_token`.
fn parse_page(body: &serde_json::Value) -> Result<ProviderPage> {
    let records = match body.get("data") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| {
                let entity_id = item
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        RookeryError::ParseResponse("record missing 'id' field".to_string())
                    })?
                    .to_string();
                Ok(ProviderRecord {
                    entity_id,
                    payload: item.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?,
        // An empty or absent data array is a valid empty page.
        Some(serde_json::Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(RookeryError::ParseResponse(format!(
                "expected 'data' array, got {other}"
            )));
        }
    };

    let next_token = body
        .get("meta")
        .and_then(|m| m.get("next_token"))
        .and_then(|t| t.as_str())
        .map(str::to_string);

    Ok(ProviderPage {
        records,
        next_token,
        quota: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_request_clamps_page_size() {
        let req = FetchRequest::new(Endpoint::Trends, "1", 500);
        assert_eq!(req.max_results, Endpoint::Trends.max_page_size());

        let req = FetchRequest::new(Endpoint::Followers, "u1", 200);
        assert_eq!(req.max_results, 200);
    }

    #[test]
    fn test_parse_page_with_records_and_token() {
        let body = json!({
            "data": [
                {"id": "1", "text": "first"},
                {"id": "2", "text": "second"}
            ],
            "meta": {"next_token": "abc123"}
        });
        let page = parse_page(&body).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].entity_id, "1");
        assert_eq!(page.next_token.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_empty_page() {
        let page = parse_page(&json!({"meta": {"result_count": 0}})).unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_token.is_none());
    }

    #[test]
    fn test_parse_page_rejects_record_without_id() {
        let body = json!({"data": [{"text": "no id"}]});
        assert!(matches!(
            parse_page(&body).unwrap_err(),
            RookeryError::ParseResponse(_)
        ));
    }

    #[test]
    fn test_status_error_mapping() {
        let req = FetchRequest::new(Endpoint::Followers, "u1", 100);

        assert!(matches!(
            map_status_error(StatusCode::UNAUTHORIZED, &req, None),
            RookeryError::AuthenticationRejected { .. }
        ));
        assert!(matches!(
            map_status_error(StatusCode::NOT_FOUND, &req, None),
            RookeryError::NotFound { .. }
        ));
        assert!(matches!(
            map_status_error(StatusCode::SERVICE_UNAVAILABLE, &req, None),
            RookeryError::TransientNetwork {
                status_code: Some(503),
                ..
            }
        ));
        assert!(matches!(
            map_status_error(StatusCode::BAD_REQUEST, &req, None),
            RookeryError::Validation(_)
        ));
    }

    #[test]
    fn test_rate_limit_error_carries_reset_time() {
        let req = FetchRequest::new(Endpoint::Followers, "u1", 100);
        let reset = Utc::now() + chrono::TimeDelta::minutes(10);
        let err = map_status_error(
            StatusCode::TOO_MANY_REQUESTS,
            &req,
            Some(QuotaHeaders {
                remaining: 0,
                reset_at: reset,
            }),
        );
        assert_eq!(err.retry_after(), Some(reset));
    }
}

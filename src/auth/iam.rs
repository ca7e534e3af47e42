use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::source::CredentialSource;
use super::token::Credential;
use crate::error::{ErrorCategory, Fault, FaultCode};
use crate::util::retry::{BackoffRetrier, RetryPolicy};

const APIKEY_EXCHANGE_PATH: &str = "/v1/iam/apikey";
const DEFAULT_EXCHANGE_ATTEMPTS: u32 = 40;
const DEFAULT_EXCHANGE_INTERVAL: Duration = Duration::from_secs(3);

/// Exchanges an IAM API key for an access token against the container API
/// server.
///
/// Only connection-level failures are retried; any answer from the server
/// is final.
///
/// # Example
/// ```no_run
/// use converge::auth::IamTokenExchange;
///
/// # async fn example() -> converge::error::Result<()> {
/// let exchange = IamTokenExchange::new("https://containers.example.cloud", "api-key")
///     .with_csrf_token("csrf");
/// let credential = exchange.exchange().await?;
/// # Ok(())
/// # }
/// ```
pub struct IamTokenExchange {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    csrf_token: Option<String>,
    retry_policy: RetryPolicy,
}

impl IamTokenExchange {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            csrf_token: None,
            retry_policy: default_retry_policy(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_csrf_token(mut self, csrf_token: impl Into<String>) -> Self {
        self.csrf_token = Some(csrf_token.into());
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub async fn exchange(&self) -> Result<Credential, Fault> {
        self.exchange_with(&CancellationToken::new()).await
    }

    /// Like [`exchange`](Self::exchange), but stops retrying as soon as
    /// `cancel` fires.
    pub async fn exchange_with(&self, cancel: &CancellationToken) -> Result<Credential, Fault> {
        BackoffRetrier::new(self.retry_policy.clone())
            .execute(cancel, move || self.send_exchange_request())
            .await
    }

    async fn send_exchange_request(&self) -> Result<Credential, Fault> {
        let url = format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            APIKEY_EXCHANGE_PATH
        );
        tracing::debug!(%url, "sending IAM token exchange request");

        let mut request = self.client.post(&url).json(&ApiKeyRequest {
            apikey: &self.api_key,
        });
        if let Some(csrf) = &self.csrf_token {
            request = request.header("X-CSRF-TOKEN", csrf);
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::error!(error = %err, "IAM token exchange request failed");
                let cause = Fault::from(err);
                return Err(Fault::new(
                    FaultCode::UNCLASSIFIED,
                    cause.category(),
                    "IAM token exchange request failed",
                )
                .wrap_fault(cause));
            }
        };

        let status = resp.status();
        if status.is_success() {
            let payload: TokenExchangeResponse = resp.json().await?;
            tracing::debug!("IAM token exchange request successful");
            return Ok(Credential::new(payload.token));
        }

        let body = resp.text().await.unwrap_or_default();
        let error: TokenExchangeError = serde_json::from_str(&body).unwrap_or_default();
        if !error.description.is_empty() {
            tracing::error!(
                status = status.as_u16(),
                incident_id = %error.incident_id,
                code = %error.code,
                "IAM token exchange request failed with message"
            );
            return Err(Fault::new(
                FaultCode::FAILED_TOKEN_EXCHANGE,
                ErrorCategory::CredentialRefreshFailed,
                format!("IAM token exchange request failed: {}", error.description),
            )
            .wrap(format!(
                "{} {}, Description: {}, API IncidentID:{}",
                error.code, error.kind, error.description, error.incident_id
            ))
            .with_property("status", status.as_u16().to_string())
            .with_property("incident_id", error.incident_id));
        }

        tracing::error!(status = status.as_u16(), "unexpected IAM token exchange response");
        Err(Fault::new(
            FaultCode::UNCLASSIFIED,
            ErrorCategory::CredentialRefreshFailed,
            "Unexpected IAM token exchange response",
        )
        .with_property("status", status.as_u16().to_string()))
    }
}

#[async_trait]
impl CredentialSource for IamTokenExchange {
    async fn fetch(&self) -> Result<Credential, Fault> {
        self.exchange().await
    }
}

fn default_retry_policy() -> RetryPolicy {
    RetryPolicy::new(
        DEFAULT_EXCHANGE_ATTEMPTS,
        DEFAULT_EXCHANGE_INTERVAL,
        DEFAULT_EXCHANGE_INTERVAL,
    )
    .unwrap_or_default()
}

#[derive(Debug, Serialize)]
struct ApiKeyRequest<'a> {
    apikey: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenExchangeError {
    code: String,
    description: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "incidentID")]
    incident_id: String,
}

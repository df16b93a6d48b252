/// GraphQL Client Module
///
/// This module handles all interactions with subgraph endpoints.
/// It posts `{query, variables}` documents over HTTP, unwraps the `data`
/// envelope, and backs off on HTTP 429 when the adapter asks for it.
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{FetchError, FetchResult};

/// Anything that can answer a GraphQL query with its `data` object
#[async_trait]
pub trait GraphQlTransport: Send + Sync {
    async fn request(&self, query: &str, variables: Value) -> FetchResult<Value>;
}

/// Backoff applied when the endpoint answers 429
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RateLimitPolicy {
    /// Fail on the first 429
    pub fn none() -> Self {
        Self { max_retries: 0, base_delay: Duration::from_secs(1) }
    }

    pub fn with_retries(max_retries: u32) -> Self {
        Self { max_retries, base_delay: Duration::from_secs(1) }
    }

    /// Server hint wins, otherwise base_delay doubled per retry already made
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.base_delay.saturating_mul(1u32 << retry.min(16)))
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Connection settings for one subgraph
#[derive(Debug, Clone)]
pub struct SubgraphConfig {
    pub endpoint: String,
    pub rate_limit: RateLimitPolicy,
}

pub struct SubgraphClient {
    client: reqwest::Client,
    config: SubgraphConfig,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorMessage {
    message: String,
}

impl GraphQlResponse {
    fn into_data(self) -> FetchResult<Value> {
        match self.data {
            Some(data) => Ok(data),
            None if !self.errors.is_empty() => {
                Err(FetchError::GraphQl(self.errors.into_iter().map(|e| e.message).collect()))
            }
            None => Err(FetchError::MissingData { collection: "data".to_string() }),
        }
    }
}

impl SubgraphClient {
    /// Create a new client for the configured endpoint
    pub fn new(config: SubgraphConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    /// Get the endpoint URL this client posts to
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn retry_after(response: &reqwest::Response) -> Option<Duration> {
        response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

#[async_trait]
impl GraphQlTransport for SubgraphClient {
    async fn request(&self, query: &str, variables: Value) -> FetchResult<Value> {
        let body = json!({ "query": query, "variables": variables });
        let policy = self.config.rate_limit;
        let mut retries = 0;

        loop {
            tracing::debug!("POST {} variables={}", self.config.endpoint, body["variables"]);

            let response = self
                .client
                .post(&self.config.endpoint)
                .header(header::ACCEPT, "application/json")
                .json(&body)
                .send()
                .await?;

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if retries >= policy.max_retries {
                    return Err(FetchError::RateLimited { attempts: retries + 1 });
                }

                let delay = policy.delay_for(retries, Self::retry_after(&response));
                tracing::warn!(
                    "Rate limited by {}, retrying after {:?} ({}/{})",
                    self.config.endpoint,
                    delay,
                    retries + 1,
                    policy.max_retries
                );

                tokio::time::sleep(delay).await;
                retries += 1;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Status { status, body });
            }

            let payload: GraphQlResponse = response.json().await?;
            return payload.into_data();
        }
    }
}

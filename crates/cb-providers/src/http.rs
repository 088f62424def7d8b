//! Rate-limited HTTP client shared by provider adapters.
//!
//! Every outbound provider call waits on a token-bucket limiter. A `429 Too
//! Many Requests` answer is retried after the server's `Retry-After` delay a
//! bounded number of times; any other status is returned to the caller.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{RequestBuilder, Response, StatusCode};

use cb_core::{Error, Result};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    limiter: Arc<DirectLimiter>,
}

impl ProviderClient {
    pub fn new(timeout: Duration, requests_per_second: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("coursebridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
        Ok(Self {
            http,
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// The underlying client, for building requests.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Send the request produced by `build`, honouring the rate limit and
    /// retrying on 429.
    pub async fn send<F>(&self, build: F) -> std::result::Result<Response, reqwest::Error>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            self.limiter.until_ready().await;
            let resp = build(&self.http).send().await?;

            if resp.status() != StatusCode::TOO_MANY_REQUESTS || attempt >= MAX_RATE_LIMIT_RETRIES {
                return Ok(resp);
            }

            attempt += 1;
            let delay = retry_after(&resp);
            tracing::warn!(
                url = %resp.url(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Provider rate limited request; backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after(resp: &Response) -> Duration {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
        .min(MAX_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn retries_after_429() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = ProviderClient::new(Duration::from_secs(5), 100).unwrap();
        let url = format!("{}/limited", server.uri());
        let resp = client.send(|c| c.get(&url)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .expect(u64::from(MAX_RATE_LIMIT_RETRIES) + 1)
            .mount(&server)
            .await;

        let client = ProviderClient::new(Duration::from_secs(5), 100).unwrap();
        let url = server.uri();
        let resp = client.send(|c| c.get(&url)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn other_errors_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProviderClient::new(Duration::from_secs(5), 0).unwrap();
        let url = server.uri();
        let resp = client.send(|c| c.get(&url)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

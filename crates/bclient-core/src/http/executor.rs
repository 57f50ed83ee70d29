use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{header, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::error::ClientError;

use super::path::ResourcePath;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Single-shot HTTP calls against the node or wallet REST interface.
///
/// Every call is independent: there is no shared state besides the
/// connection pool and the optional rate limiter, and nothing is retried.
/// A 404 is reported as `Ok(None)` because "no such block" is an ordinary
/// answer for most callers.
pub struct HttpExecutor {
    client: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    limiter: Option<DirectRateLimiter>,
}

impl HttpExecutor {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base = config.http_base()?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout())
            .pool_max_idle_per_host(32)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("build http client: {e}")))?;

        let limiter = match config.requests_per_second() {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    ClientError::InvalidConfig("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            client,
            base,
            api_key: config.api_key().map(str::to_owned),
            limiter,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Issue one request.
    ///
    /// `params` go into the query string for GET and DELETE, and into a JSON
    /// body for every other method. Query params must be a flat JSON object.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &ResourcePath,
        params: Option<&Value>,
    ) -> Result<Option<T>, ClientError> {
        self.wait_for_rate_limit().await;
        let url = path.join_to(&self.base)?;
        debug!(http.method = %method, http.path = url.path(), "http request");

        let mut builder = self.client.request(method.clone(), url.clone());
        if let Some(params) = params {
            if method == Method::GET || method == Method::DELETE {
                builder = builder.query(&query_pairs(params)?);
            } else {
                builder = builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .json(params);
            }
        }
        if let Some(key) = &self.api_key {
            builder = builder.basic_auth(key, None::<&str>);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(http.method = %method, http.path = url.path(), %status, body_len = body.len(), "http response");
        trace!(http.path = url.path(), body = %body, "http response body");

        decode_response(status, &body)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &ResourcePath,
        params: Option<&Value>,
    ) -> Result<Option<T>, ClientError> {
        self.request(Method::GET, path, params).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &ResourcePath,
        params: Option<&Value>,
    ) -> Result<Option<T>, ClientError> {
        self.request(Method::POST, path, params).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &ResourcePath,
        params: Option<&Value>,
    ) -> Result<Option<T>, ClientError> {
        self.request(Method::PUT, path, params).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &ResourcePath,
        params: Option<&Value>,
    ) -> Result<Option<T>, ClientError> {
        self.request(Method::DELETE, path, params).await
    }
}

// ==============================================================================
// Encoding / Decoding
// ==============================================================================

fn query_pairs(params: &Value) -> Result<Vec<(String, String)>, ClientError> {
    let Value::Object(map) = params else {
        return Err(ClientError::InvalidRequest(format!(
            "query params must be a JSON object, got {params}"
        )));
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        let rendered = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Bool(_) | Value::Number(_) => value.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(ClientError::InvalidRequest(format!(
                    "query param `{key}` must be a scalar"
                )))
            }
        };
        pairs.push((key.clone(), rendered));
    }
    Ok(pairs)
}

/// Map a status and body to the executor's result convention.
fn decode_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> Result<Option<T>, ClientError> {
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(ClientError::RequestFailed {
            status: status.as_u16(),
            body: body.to_owned(),
        });
    }

    let decoded = if body.trim().is_empty() {
        serde_json::from_value(Value::Null)
    } else {
        serde_json::from_str(body)
    };
    decoded
        .map(Some)
        .map_err(|e| ClientError::InvalidResponse(format!("decode response body: {e}; body={body}")))
}

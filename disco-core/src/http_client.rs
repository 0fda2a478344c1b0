use std::time::Instant;

use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::Method;
use reqwest::{Body, Client, Response};
use tracing::Instrument;

use crate::auth::{ApiKey, basic_auth_header};
use crate::config::HttpCfg;
use crate::error::{CoreResult, DiscoError};
use crate::telemetry::{KEY_HTTP_STATUS, SPAN_HTTP_REQUEST};

const USER_AGENT: &str = concat!("disco-cli/", env!("CARGO_PKG_VERSION"));
pub(crate) const MIME_JSON: &str = "application/json";

/// One authenticated call against the disco API.
///
/// `body` is only serialized for `POST`. `body_stream`, when set, is sent as-is
/// and replaces the serialized JSON body.
#[derive(Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
    pub body_stream: Option<Body>,
    /// Statuses that count as success. Defaults to `[200]`.
    pub expected_statuses: Vec<u16>,
    /// Applied after the defaults; a repeated name overwrites the earlier value.
    pub extra_headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            body_stream: None,
            expected_statuses: vec![200],
            extra_headers: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn body_stream(mut self, body: impl Into<Body>) -> Self {
        self.body_stream = Some(body.into());
        self
    }

    pub fn expect_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.expected_statuses = statuses.into_iter().collect();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = base_builder(cfg).timeout(cfg.request_timeout());
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| DiscoError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self { inner })
    }

    /// Client for long-lived event streams: same connect timeout, no total timeout.
    pub fn streaming(cfg: &HttpCfg) -> CoreResult<Self> {
        let inner = base_builder(cfg)
            .build()
            .map_err(|e| DiscoError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self { inner })
    }

    pub(crate) fn inner(&self) -> &Client {
        &self.inner
    }

    /// Perform exactly one authenticated call and check the status.
    ///
    /// On an expected status the response is returned unread so the caller
    /// picks the decoding. Otherwise the body text is drained into
    /// [`DiscoError::UnexpectedStatus`]. Nothing is retried here.
    pub async fn send(&self, api_key: &ApiKey, req: ApiRequest) -> CoreResult<Response> {
        let span = tracing::debug_span!(
            SPAN_HTTP_REQUEST,
            http.method = %req.method,
            http.url = %req.url,
            http.status = tracing::field::Empty,
        );
        self.send_inner(api_key, req).instrument(span).await
    }

    async fn send_inner(&self, api_key: &ApiKey, req: ApiRequest) -> CoreResult<Response> {
        let start = Instant::now();
        let ApiRequest {
            method,
            url,
            body,
            body_stream,
            expected_statuses,
            extra_headers,
        } = req;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MIME_JSON));
        headers.insert(AUTHORIZATION, auth_header_value(api_key)?);

        let mut payload: Option<Body> = None;
        if method == Method::POST
            && let Some(json) = &body
        {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(MIME_JSON));
            payload = Some(Body::from(serde_json::to_vec(json)?));
        }

        for (k, v) in &extra_headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| DiscoError::Validation(format!("invalid header name '{k}': {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| DiscoError::Validation(format!("invalid value for header '{k}': {e}")))?;
            headers.insert(name, value);
        }

        if let Some(stream) = body_stream {
            payload = Some(stream);
        }

        let mut builder = self.inner.request(method, &url).headers(headers);
        if let Some(payload) = payload {
            builder = builder.body(payload);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| DiscoError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        tracing::Span::current().record(KEY_HTTP_STATUS, status);

        if !expected_statuses.contains(&status) {
            let text = resp.text().await.unwrap_or_default();
            tracing::debug!(status, latency_ms = start.elapsed().as_millis() as u64, "unexpected status");
            return Err(DiscoError::UnexpectedStatus { status, body: text });
        }

        tracing::debug!(status, latency_ms = start.elapsed().as_millis() as u64, "request complete");
        Ok(resp)
    }
}

fn base_builder(cfg: &HttpCfg) -> reqwest::ClientBuilder {
    Client::builder()
        .connect_timeout(cfg.connect_timeout())
        .user_agent(USER_AGENT)
}

/// `Authorization` value, flagged sensitive so it never shows up in debug output.
pub(crate) fn auth_header_value(api_key: &ApiKey) -> CoreResult<HeaderValue> {
    let mut value = HeaderValue::from_str(&basic_auth_header(api_key))
        .map_err(|e| DiscoError::Validation(format!("api key is not header-safe: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

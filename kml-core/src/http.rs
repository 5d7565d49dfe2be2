use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{KmlError, Result, classify_http_status};

static CLIENT: OnceCell<reqwest::Client> = OnceCell::new();

/// The process-wide HTTP client. One connection pool is shared by every
/// client crate (sandbox-provider and edge) so repeated requests to the
/// same host reuse connections.
pub fn http_client() -> Result<reqwest::Client> {
    CLIENT
        .get_or_try_init(|| {
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .build()
        })
        .map(Clone::clone)
        .map_err(|err| KmlError::Transport {
            status: None,
            message: format!("failed to build HTTP client: {err}"),
        })
}

pub fn build_url(base: &str, path: &str) -> Result<Url> {
    let base_url = Url::parse(base).map_err(|err| KmlError::Transport {
        status: None,
        message: format!("invalid base URL '{base}': {err}"),
    })?;
    base_url.join(path).map_err(|err| KmlError::Transport {
        status: None,
        message: format!("invalid path '{path}': {err}"),
    })
}

pub fn bearer_headers(token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
        KmlError::Precondition("auth token contains invalid header characters".into())
    })?;
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

/// Send a JSON request and return the parsed body. Non-2xx responses are
/// classified via [`classify_http_status`] using the status and a fragment
/// of the body before the body is discarded.
pub async fn send_json(
    method: Method,
    url: Url,
    body: Option<Value>,
    headers: HeaderMap,
    timeout: Duration,
) -> Result<Value> {
    let client = http_client()?;
    let method_for_log = method.clone();
    let url_for_log = url.clone();
    debug!(method = %method_for_log, url = %url_for_log, "sending request");

    let mut request = client.request(method, url).headers(headers).timeout(timeout);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        warn!(method = %method_for_log, url = %url_for_log, %status, "request failed");
        return Err(classify_http_status(status, &text));
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&text).map_err(|err| KmlError::Transport {
        status: Some(status.as_u16()),
        message: format!("response was not valid JSON: {err}"),
    })
}

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

/// Default per-request timeout; exceeding it is a transient failure.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB
const FEED_ACCEPT: &str = "application/rss+xml, application/atom+xml, text/xml;q=0.9, */*;q=0.8";

/// Cache validators carried from the previous response to the next request.
///
/// Both values are the opaque header strings the server sent; they are
/// replayed verbatim as `If-None-Match` / `If-Modified-Since`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Classified result of a single conditional fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// HTTP 2xx with a body. Carries the new validators (when the server
    /// sent any) and the declared Content-Type as a parser hint.
    Fresh {
        body: Vec<u8>,
        content_type: Option<String>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    /// HTTP 304: the cached validators still hold.
    NotModified,
    /// Network trouble, timeout, or HTTP 5xx. Eligible for retry on a
    /// future cycle.
    TransientFailure(String),
    /// Malformed URL or HTTP 4xx. Not retried automatically.
    PermanentFailure(String),
}

/// Builds the shared HTTP client used across a cycle.
pub fn build_client(user_agent: &str) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().user_agent(user_agent).build()
}

/// Performs one conditional GET against a source URL.
///
/// `If-None-Match` is attached when an ETag validator is present,
/// `If-Modified-Since` when a Last-Modified validator is present; with
/// neither, the request is an unconditional GET.
///
/// Never touches the store; classification is the caller's only signal:
/// transport errors and timeouts are [`FetchOutcome::TransientFailure`],
/// 304 is [`FetchOutcome::NotModified`], 2xx is [`FetchOutcome::Fresh`],
/// 4xx is [`FetchOutcome::PermanentFailure`], 5xx is transient.
pub async fn fetch_source(
    client: &reqwest::Client,
    url: &str,
    validators: &Validators,
    timeout: Duration,
) -> FetchOutcome {
    if let Err(e) = Url::parse(url) {
        return FetchOutcome::PermanentFailure(format!("invalid URL: {}", e));
    }

    let mut request = client.get(url).header(ACCEPT, FEED_ACCEPT);
    if let Some(etag) = &validators.etag {
        request = request.header(IF_NONE_MATCH, etag);
    }
    if let Some(last_modified) = &validators.last_modified {
        request = request.header(IF_MODIFIED_SINCE, last_modified);
    }

    let response = match tokio::time::timeout(timeout, request.send()).await {
        Err(_) => return FetchOutcome::TransientFailure("request timed out".into()),
        Ok(Err(e)) => return FetchOutcome::TransientFailure(format!("request failed: {}", e)),
        Ok(Ok(response)) => response,
    };

    let status = response.status();
    if status == StatusCode::NOT_MODIFIED {
        return FetchOutcome::NotModified;
    }
    if status.is_server_error() {
        return FetchOutcome::TransientFailure(format!("HTTP {}", status));
    }
    if status.is_client_error() {
        return FetchOutcome::PermanentFailure(format!("HTTP {}", status));
    }
    if !status.is_success() {
        // Unfollowed redirects and other oddities: worth another try later.
        return FetchOutcome::TransientFailure(format!("unexpected HTTP {}", status));
    }

    let content_type = header_string(&response, CONTENT_TYPE);
    let etag = header_string(&response, ETAG);
    let last_modified = header_string(&response, LAST_MODIFIED);

    match tokio::time::timeout(timeout, read_limited_bytes(response, MAX_BODY_SIZE)).await {
        Err(_) => FetchOutcome::TransientFailure("timed out reading response body".into()),
        Ok(Err(reason)) => FetchOutcome::TransientFailure(reason),
        Ok(Ok(body)) => FetchOutcome::Fresh {
            body,
            content_type,
            etag,
            last_modified,
        },
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Streams the response body with a hard size cap.
async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, String> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(format!("response too large: {} bytes", len));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("error reading body: {}", e))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err("response too large".into());
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

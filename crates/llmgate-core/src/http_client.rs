use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::RETRY_AFTER;
use http::{HeaderMap, StatusCode};
use tracing::{info, warn};

use llmgate_provider_impl::{HttpMethod, UpstreamRequest};

use crate::error::ProxyError;

/// One shared `wreq::Client` per outbound proxy string, mirroring the
/// provider-impl crate's single shared client when no proxy is configured
/// (wreq pools connections per host internally, so nothing is gained by
/// per-request clients). Proxy-specific clients are cached since building
/// one is not free.
static CLIENT_CACHE: OnceLock<Mutex<HashMap<Option<String>, wreq::Client>>> = OnceLock::new();

fn normalize_proxy(proxy: Option<&str>) -> Option<String> {
    proxy
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn client_for(proxy: Option<&str>) -> Result<wreq::Client, ProxyError> {
    let key = normalize_proxy(proxy);
    let cache = CLIENT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache
        .lock()
        .map_err(|_| ProxyError::internal("http client cache lock poisoned"))?;

    if let Some(client) = guard.get(&key) {
        return Ok(client.clone());
    }

    let mut builder = wreq::Client::builder();
    if let Some(proxy_url) = &key {
        let proxy = wreq::Proxy::all(proxy_url)
            .map_err(|err| ProxyError::internal(format!("invalid outbound proxy: {err}")))?;
        builder = builder.proxy(proxy);
    }
    let client = builder
        .build()
        .map_err(|err| ProxyError::internal(format!("build http client: {err}")))?;
    guard.insert(key, client.clone());
    Ok(client)
}

pub enum UpstreamBody {
    Buffered(Bytes),
    Stream(Pin<Box<dyn Stream<Item = Result<Bytes, wreq::Error>> + Send>>),
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

/// Opens one outbound call per dispatcher attempt (§4.J step g). Non-2xx
/// responses are buffered and turned into `ProxyError` here, classified by
/// status the same way the dialect adapters' upstream client does; 2xx
/// responses are handed back either fully buffered or as a live byte
/// stream depending on `req.is_stream`.
pub async fn send(
    req: &UpstreamRequest,
    proxy: Option<&str>,
    timeout: Duration,
) -> Result<UpstreamResponse, ProxyError> {
    let client = client_for(proxy)?;
    let method = match req.method {
        HttpMethod::Get => wreq::Method::GET,
        HttpMethod::Post => wreq::Method::POST,
    };

    let mut builder = client.request(method, &req.url).timeout(timeout);
    for (name, value) in &req.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = &req.body {
        builder = builder.body(body.clone());
    }

    let started_at = Instant::now();
    info!(event = "attempt_dial", url = %req.url, is_stream = req.is_stream);

    let response = builder.send().await.map_err(|err| {
        warn!(event = "attempt_connect_failed", url = %req.url, error = %err, elapsed_ms = started_at.elapsed().as_millis());
        classify_transport_error(err)
    })?;

    let status = response.status();
    let headers = response.headers().clone();
    info!(
        event = "attempt_response",
        url = %req.url,
        status = status.as_u16(),
        elapsed_ms = started_at.elapsed().as_millis(),
    );

    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        return Err(classify_status_error(status, &headers, &body));
    }

    if req.is_stream {
        let stream = response.bytes_stream();
        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Stream(Box::pin(stream)),
        })
    } else {
        let body = response
            .bytes()
            .await
            .map_err(|err| ProxyError::upstream_stream_broken_pre(err.to_string()))?;
        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Buffered(body),
        })
    }
}

/// Connect/TLS/DNS failures and other pre-byte transport errors are
/// retryable; a request-level timeout means the attempt's share of the
/// overall deadline (`deadline - now`, §4.J step g) elapsed, which the
/// dispatcher treats as terminal once the request deadline itself is spent.
fn classify_transport_error(err: wreq::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::upstream_timeout(err.to_string())
    } else {
        ProxyError::upstream_stream_broken_pre(err.to_string())
    }
}

/// 5xx/429 are transient upstream trouble the dispatcher should retry
/// against a different candidate; everything else is a non-retryable
/// client-visible error that preserves the upstream status and body.
fn classify_status_error(status: StatusCode, headers: &HeaderMap, body: &Bytes) -> ProxyError {
    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => {
            let _ = retry_after_seconds(headers);
            ProxyError::upstream_stream_broken_pre(String::from_utf8_lossy(body).into_owned())
        }
        _ => ProxyError::with_upstream_detail(status, &String::from_utf8_lossy(body)),
    }
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().to_string();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let when = httpdate::parse_http_date(&value).ok()?;
    when.duration_since(SystemTime::now()).ok().map(|d| d.as_secs())
}

/// Classifies a mid-stream transport error once the caller knows whether any
/// bytes have already been flushed to the client (§4.J step j): pre-byte is
/// retryable, post-byte must surface as a terminal SSE error event.
pub fn classify_stream_error(err: &wreq::Error, bytes_flushed: bool) -> ProxyError {
    if bytes_flushed {
        ProxyError::upstream_stream_broken_post(err.to_string())
    } else {
        ProxyError::upstream_stream_broken_pre(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_parses_plain_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(retry_after_seconds(&headers), Some(12));
    }

    #[test]
    fn retry_after_missing_is_none() {
        let headers = HeaderMap::new();
        assert_eq!(retry_after_seconds(&headers), None);
    }

    #[test]
    fn classify_status_error_preserves_4xx_detail() {
        let err = classify_status_error(
            StatusCode::UNAUTHORIZED,
            &HeaderMap::new(),
            &Bytes::from_static(b"bad key"),
        );
        assert_eq!(err.kind, crate::error::ErrorKind::UpstreamError);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn classify_status_error_marks_5xx_retryable() {
        let err = classify_status_error(
            StatusCode::BAD_GATEWAY,
            &HeaderMap::new(),
            &Bytes::from_static(b"down"),
        );
        assert!(err.kind.is_retryable());
    }
}

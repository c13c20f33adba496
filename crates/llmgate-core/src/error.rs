use bytes::Bytes;
use http::StatusCode;

/// Which of the dispatcher's error outcomes produced this response.
///
/// `Retryable` kinds never reach a client directly — the dispatcher loops
/// on them until the retry cap is hit, at which point the last one is
/// surfaced as `NoUpstream` or `UpstreamError`. `kind` is carried alongside
/// `status`/`body` so the log sink can record the outcome without
/// re-parsing the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    NotFound,
    MethodNotAllowed,
    NoUpstream,
    UpstreamError,
    UpstreamTimeout,
    /// Retryable mid-connect/mid-stream failure before any bytes reached the client.
    UpstreamStreamBrokenPre,
    /// Stream broke after bytes were already flushed; surfaced as a terminal SSE error event.
    UpstreamStreamBrokenPost,
    Internal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::UpstreamStreamBrokenPre)
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorKind::NoUpstream => "NO_UPSTREAM",
            ErrorKind::UpstreamError => "UPSTREAM_ERROR",
            ErrorKind::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorKind::UpstreamStreamBrokenPre => "UPSTREAM_STREAM_BROKEN_PRE",
            ErrorKind::UpstreamStreamBrokenPost => "UPSTREAM_STREAM_BROKEN_POST",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug)]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    fn new(kind: ErrorKind, status: StatusCode, message: impl Into<Bytes>) -> Self {
        Self {
            kind,
            status,
            body: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<Bytes>) -> Self {
        Self::new(ErrorKind::BadRequest, StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<Bytes>) -> Self {
        Self::new(ErrorKind::Unauthorized, StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<Bytes>) -> Self {
        Self::new(ErrorKind::NotFound, StatusCode::NOT_FOUND, message)
    }

    pub fn method_not_allowed(message: impl Into<Bytes>) -> Self {
        Self::new(
            ErrorKind::MethodNotAllowed,
            StatusCode::METHOD_NOT_ALLOWED,
            message,
        )
    }

    /// No binding in the candidate pool survived filtering (capability, breaker, rate limit).
    pub fn no_upstream(message: impl Into<Bytes>) -> Self {
        Self::new(
            ErrorKind::NoUpstream,
            StatusCode::SERVICE_UNAVAILABLE,
            message,
        )
    }

    /// Upstream returned a non-retryable HTTP error; `status` mirrors the upstream status.
    pub fn upstream_error(status: StatusCode, message: impl Into<Bytes>) -> Self {
        Self::new(ErrorKind::UpstreamError, status, message)
    }

    pub fn upstream_timeout(message: impl Into<Bytes>) -> Self {
        Self::new(
            ErrorKind::UpstreamTimeout,
            StatusCode::GATEWAY_TIMEOUT,
            message,
        )
    }

    /// Never meant to reach a client; the dispatcher catches this kind and re-enters `PICK`.
    pub fn upstream_stream_broken_pre(message: impl Into<Bytes>) -> Self {
        Self::new(
            ErrorKind::UpstreamStreamBrokenPre,
            StatusCode::BAD_GATEWAY,
            message,
        )
    }

    pub fn upstream_stream_broken_post(message: impl Into<Bytes>) -> Self {
        Self::new(
            ErrorKind::UpstreamStreamBrokenPost,
            StatusCode::BAD_GATEWAY,
            message,
        )
    }

    pub fn internal(message: impl Into<Bytes>) -> Self {
        Self::new(
            ErrorKind::Internal,
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
        )
    }

    /// `code: X body: …` wire message format used when an upstream status/body should be
    /// preserved in the client-visible error.
    pub fn with_upstream_detail(status: StatusCode, upstream_body: &str) -> Self {
        Self::upstream_error(status, format!("code: {} body: {}", status.as_u16(), upstream_body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_only_for_stream_broken_pre() {
        assert!(ErrorKind::UpstreamStreamBrokenPre.is_retryable());
        assert!(!ErrorKind::UpstreamStreamBrokenPost.is_retryable());
        assert!(!ErrorKind::UpstreamError.is_retryable());
    }

    #[test]
    fn with_upstream_detail_preserves_status_and_body() {
        let err = ProxyError::with_upstream_detail(StatusCode::TOO_MANY_REQUESTS, "rate limited");
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.kind, ErrorKind::UpstreamError);
        assert_eq!(&err.body[..], b"code: 429 body: rate limited");
    }
}

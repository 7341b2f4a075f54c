//! Framework-agnostic admission middleware (§4.7, §6).
//!
//! This models the middleware's decision logic only — extracting a key,
//! calling the limiter, and deciding headers/status/body. Wiring
//! [`AdmissionOutcome`] into a specific web framework's request/response
//! types is the external integration step named in §1.

use std::sync::Arc;
use std::time::SystemTime;

use http::{HeaderMap, HeaderName, StatusCode};

use crate::limiter::Limiter;

// Lower-case: `HeaderName::from_static` requires already-valid lower-case
// header-name bytes, and these double as the fallback when a caller-supplied
// custom name is invalid. HTTP header names are case-insensitive on the
// wire, so the lower-case form is also what `X-Api-Call-Limit: ...` renders
// to in practice.
const DEFAULT_LIMIT_HEADER: &str = "x-api-call-limit";
const DEFAULT_RETRY_AFTER_HEADER: &str = "x-retry-after";
const DEFAULT_EXCEED_BODY: &str = "too many request";
const ENGINE_ERROR_BODY: &str = "error when check rate limit";

/// The subset of an inbound request the middleware needs to classify it.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Value of the `X-Real-IP` header, if present.
    pub real_ip: Option<String>,
    /// Caller-supplied remote address, used when `X-Real-IP` is absent.
    pub remote_addr: Option<String>,
}

/// Classifies a request into a rate-limit key. An empty/absent key bypasses
/// limiting entirely (the request is forwarded unconditionally).
pub type KeyExtractor = Box<dyn Fn(&RequestInfo) -> Option<String> + Send + Sync>;

/// Produces the `(status, body)` pair used when a request is rejected.
/// Defaults to `429 too many request`.
pub type ExceedHandler = Box<dyn Fn() -> (StatusCode, String) + Send + Sync>;

fn default_key_extractor(req: &RequestInfo) -> Option<String> {
    req.real_ip.clone().or_else(|| req.remote_addr.clone())
}

fn default_exceed_handler() -> (StatusCode, String) {
    (StatusCode::TOO_MANY_REQUESTS, DEFAULT_EXCEED_BODY.to_string())
}

/// The middleware's decision for a single request.
pub enum AdmissionOutcome {
    /// Forward to the downstream handler, attaching these response headers.
    Forward { headers: HeaderMap },
    /// Reject the request with an admission-exceeded response.
    Denied {
        status: StatusCode,
        headers: HeaderMap,
        body: String,
    },
    /// The limiter itself failed (transport/storage error); do not forward.
    Error { status: StatusCode, body: String },
}

/// Admission middleware: extracts a key, consults a [`Limiter`], and
/// produces an [`AdmissionOutcome`].
pub struct AdmissionMiddleware {
    limiter: Arc<dyn Limiter>,
    key_extractor: KeyExtractor,
    limit_header: HeaderName,
    retry_after_header: HeaderName,
    exceed_handler: ExceedHandler,
}

impl AdmissionMiddleware {
    pub fn builder(limiter: Arc<dyn Limiter>) -> AdmissionMiddlewareBuilder {
        AdmissionMiddlewareBuilder::new(limiter)
    }

    pub async fn check(&self, req: &RequestInfo) -> AdmissionOutcome {
        let key = match (self.key_extractor)(req) {
            Some(k) if !k.is_empty() => k,
            _ => return AdmissionOutcome::Forward { headers: HeaderMap::new() },
        };

        let (reservation, allowed) = match self.limiter.allow(&key, 1).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return AdmissionOutcome::Error {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: ENGINE_ERROR_BODY.to_string(),
                };
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            self.limit_header.clone(),
            format!("{}/{}", reservation.req.ceil() as i64, reservation.bucket)
                .parse()
                .expect("formatted limit header value is valid"),
        );
        let delay = reservation.delay(SystemTime::now()).as_secs_f64();
        headers.insert(
            self.retry_after_header.clone(),
            format!("{delay:.1}")
                .parse()
                .expect("formatted retry-after header value is valid"),
        );

        if allowed {
            AdmissionOutcome::Forward { headers }
        } else {
            let (status, body) = (self.exceed_handler)();
            AdmissionOutcome::Denied {
                status,
                headers,
                body,
            }
        }
    }

    /// Reset the limiter's usage for `key`, e.g. an admin override.
    pub async fn reset(&self, key: &str) -> crate::error::RateLimitResult<()> {
        self.limiter.reset(key, 0).await
    }
}

/// Fluent builder for [`AdmissionMiddleware`], mirroring the defaults in §6.
pub struct AdmissionMiddlewareBuilder {
    limiter: Arc<dyn Limiter>,
    key_extractor: KeyExtractor,
    limit_header: HeaderName,
    retry_after_header: HeaderName,
    exceed_handler: ExceedHandler,
}

impl AdmissionMiddlewareBuilder {
    fn new(limiter: Arc<dyn Limiter>) -> Self {
        Self {
            limiter,
            key_extractor: Box::new(default_key_extractor),
            limit_header: HeaderName::from_static(DEFAULT_LIMIT_HEADER),
            retry_after_header: HeaderName::from_static(DEFAULT_RETRY_AFTER_HEADER),
            exceed_handler: Box::new(default_exceed_handler),
        }
    }

    pub fn key_extractor(mut self, f: impl Fn(&RequestInfo) -> Option<String> + Send + Sync + 'static) -> Self {
        self.key_extractor = Box::new(f);
        self
    }

    pub fn limit_header(mut self, name: &str) -> Self {
        self.limit_header = HeaderName::try_from(name).unwrap_or_else(|_| HeaderName::from_static(DEFAULT_LIMIT_HEADER));
        self
    }

    pub fn retry_after_header(mut self, name: &str) -> Self {
        self.retry_after_header =
            HeaderName::try_from(name).unwrap_or_else(|_| HeaderName::from_static(DEFAULT_RETRY_AFTER_HEADER));
        self
    }

    pub fn exceed_handler(mut self, f: impl Fn() -> (StatusCode, String) + Send + Sync + 'static) -> Self {
        self.exceed_handler = Box::new(f);
        self
    }

    pub fn build(self) -> AdmissionMiddleware {
        AdmissionMiddleware {
            limiter: self.limiter,
            key_extractor: self.key_extractor,
            limit_header: self.limit_header,
            retry_after_header: self.retry_after_header,
            exceed_handler: self.exceed_handler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::FixedWindowLimiter;
    use crate::store::memory_counter::MemoryFixedWindowStore;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn saturating_limiter(quota: i64) -> Arc<dyn Limiter> {
        Arc::new(FixedWindowLimiter::new(
            Duration::from_secs(600),
            quota,
            MemoryFixedWindowStore::new(Duration::from_secs(600)),
        ))
    }

    #[tokio::test]
    async fn default_exceed_response_is_429_with_default_headers() {
        let mw = AdmissionMiddleware::builder(saturating_limiter(10)).build();
        let req = RequestInfo {
            real_ip: Some("1.2.3.4".into()),
            remote_addr: None,
        };

        for _ in 0..10 {
            assert!(matches!(mw.check(&req).await, AdmissionOutcome::Forward { .. }));
        }

        match mw.check(&req).await {
            AdmissionOutcome::Denied { status, headers, body } => {
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(headers.get("x-api-call-limit").unwrap(), "10/10");
                assert!(headers.get("x-retry-after").is_some());
                assert_eq!(body, "too many request");
            }
            _ => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn per_request_key_never_saturates() {
        let counter = Arc::new(AtomicU64::new(0));
        let mw = {
            let counter = counter.clone();
            AdmissionMiddleware::builder(saturating_limiter(10))
                .key_extractor(move |_| Some(counter.fetch_add(1, Ordering::SeqCst).to_string()))
                .build()
        };
        let req = RequestInfo::default();

        for _ in 0..11 {
            assert!(matches!(mw.check(&req).await, AdmissionOutcome::Forward { .. }));
        }
    }

    #[tokio::test]
    async fn custom_header_name_replaces_the_default() {
        let mw = AdmissionMiddleware::builder(saturating_limiter(10))
            .limit_header("X-Api-Request-Limit")
            .build();
        let req = RequestInfo {
            real_ip: Some("k".into()),
            remote_addr: None,
        };
        for _ in 0..10 {
            mw.check(&req).await;
        }
        match mw.check(&req).await {
            AdmissionOutcome::Denied { headers, .. } => {
                assert!(headers.get("x-api-request-limit").is_some());
                assert!(headers.get("x-api-call-limit").is_none());
            }
            _ => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn invalid_custom_header_name_falls_back_instead_of_panicking() {
        let mw = AdmissionMiddleware::builder(saturating_limiter(10))
            .limit_header("not a valid header name")
            .retry_after_header("also not valid")
            .build();
        let req = RequestInfo {
            real_ip: Some("k".into()),
            remote_addr: None,
        };
        for _ in 0..10 {
            mw.check(&req).await;
        }
        match mw.check(&req).await {
            AdmissionOutcome::Denied { headers, .. } => {
                assert_eq!(headers.get("x-api-call-limit").unwrap(), "10/10");
                assert!(headers.get("x-retry-after").is_some());
            }
            _ => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn custom_exceed_handler_overrides_status_and_body() {
        let mw = AdmissionMiddleware::builder(saturating_limiter(10))
            .exceed_handler(|| (StatusCode::OK, "too many request".to_string()))
            .build();
        let req = RequestInfo {
            real_ip: Some("k".into()),
            remote_addr: None,
        };
        for _ in 0..10 {
            mw.check(&req).await;
        }
        match mw.check(&req).await {
            AdmissionOutcome::Denied { status, body, .. } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body, "too many request");
            }
            _ => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn reset_restores_admission() {
        let mw = AdmissionMiddleware::builder(saturating_limiter(1)).build();
        let req = RequestInfo {
            real_ip: Some("x_unique_id".into()),
            remote_addr: None,
        };
        assert!(matches!(mw.check(&req).await, AdmissionOutcome::Forward { .. }));
        assert!(matches!(mw.check(&req).await, AdmissionOutcome::Denied { .. }));

        mw.reset("x_unique_id").await.unwrap();
        assert!(matches!(mw.check(&req).await, AdmissionOutcome::Forward { .. }));
    }

    #[tokio::test]
    async fn empty_key_bypasses_limiting() {
        let mw = AdmissionMiddleware::builder(saturating_limiter(1)).build();
        let req = RequestInfo::default();
        for _ in 0..5 {
            assert!(matches!(mw.check(&req).await, AdmissionOutcome::Forward { .. }));
        }
    }
}

//! Archive-first, legacy-second request routing.
//!
//! Every request is first rewritten onto the archive server. A status below 400
//! is final. Anything else, including a transport error, hands the original
//! request to the legacy backend exactly once; that answer is final whatever its
//! status. The two attempts are strictly sequential.
use std::sync::Arc;

use axum::body::Body as AxumBody;
use hyper::{Response, StatusCode, header, header::HeaderValue};
use tracing::Instrument;

use crate::{
    config::RoutingSettings,
    core::{
        content_type::{ARCHIVE_FILENAME_HEADER, ContentTypeResolver},
        outcome::{Provenance, RoutingOutcome},
        request::InboundRequest,
    },
    metrics,
    ports::http_client::{HttpClient, HttpClientError},
};

/// Why the archive attempt did not produce the final response.
#[derive(Debug)]
enum FallbackTrigger {
    Status(StatusCode),
    Unreachable(String),
}

impl FallbackTrigger {
    fn label(&self) -> &'static str {
        match self {
            FallbackTrigger::Status(_) => "status",
            FallbackTrigger::Unreachable(_) => "unreachable",
        }
    }
}

impl std::fmt::Display for FallbackTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackTrigger::Status(status) => write!(f, "archive returned {status}"),
            FallbackTrigger::Unreachable(e) => write!(f, "archive unreachable: {e}"),
        }
    }
}

/// Routes one request to the archive server, falling back to the legacy backend.
///
/// Holds no per-request state; a single instance is shared by every connection.
pub struct FailoverRouter {
    settings: Arc<RoutingSettings>,
    primary: Arc<dyn HttpClient>,
    legacy: Arc<dyn HttpClient>,
    resolver: ContentTypeResolver,
}

impl FailoverRouter {
    pub fn new(
        settings: Arc<RoutingSettings>,
        primary: Arc<dyn HttpClient>,
        legacy: Arc<dyn HttpClient>,
    ) -> Self {
        let resolver = ContentTypeResolver::new(settings.ext_mime_types.clone());
        Self {
            settings,
            primary,
            legacy,
            resolver,
        }
    }

    pub fn settings(&self) -> &RoutingSettings {
        &self.settings
    }

    /// Route a request. Always yields exactly one outcome; backend failures are
    /// logged and surface as error statuses rather than errors.
    pub async fn route(&self, request: InboundRequest) -> RoutingOutcome {
        let span = tracing::info_span!(
            "proxy_request",
            http.method = %request.method(),
            http.host = %request.host(),
            http.path = %request.path(),
            provenance = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
        );

        async move {
            tracing::info!("Proxy request: {}{}", request.host(), request.path());

            let (provenance, mut response) = match self.try_primary(&request).await {
                Ok(response) => {
                    tracing::info!("Serving from archive");
                    (Provenance::Primary, response)
                }
                Err(trigger) => {
                    tracing::info!(trigger = %trigger, "Serving from legacy");
                    metrics::increment_fallback_total(trigger.label());
                    (Provenance::Legacy, self.try_legacy(&request).await)
                }
            };

            self.apply_content_type(request.path(), &mut response);

            let span = tracing::Span::current();
            span.record("provenance", provenance.as_str());
            span.record("http.status_code", response.status().as_u16());
            metrics::increment_request_total(provenance, response.status().as_u16());

            RoutingOutcome::new(provenance, response)
        }
        .instrument(span)
        .await
    }

    async fn try_primary(
        &self,
        request: &InboundRequest,
    ) -> Result<Response<AxumBody>, FallbackTrigger> {
        let port = self.settings.primary_port(request.is_tls());
        let primary_request = request
            .primary_request(port)
            .map_err(|e| FallbackTrigger::Unreachable(e.to_string()))?;

        let _timer = metrics::BackendRequestTimer::new(Provenance::Primary);
        match self.primary.send_request(primary_request).await {
            Ok(response) if response.status().as_u16() < 400 => Ok(response),
            Ok(response) => Err(FallbackTrigger::Status(response.status())),
            Err(e) => {
                tracing::warn!("Archive request failed: {}", e);
                Err(FallbackTrigger::Unreachable(e.to_string()))
            }
        }
    }

    async fn try_legacy(&self, request: &InboundRequest) -> Response<AxumBody> {
        let legacy_request = match request.legacy_request() {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Failed to build legacy request: {}", e);
                return synthetic_response(StatusCode::BAD_GATEWAY, "Legacy request invalid");
            }
        };

        let _timer = metrics::BackendRequestTimer::new(Provenance::Legacy);
        match self.legacy.send_request(legacy_request).await {
            Ok(response) => response,
            Err(HttpClientError::Timeout(secs)) => {
                tracing::error!("Legacy backend timed out after {}s", secs);
                synthetic_response(StatusCode::GATEWAY_TIMEOUT, "Legacy backend timed out")
            }
            Err(e) => {
                tracing::error!("Legacy backend request failed: {}", e);
                synthetic_response(StatusCode::BAD_GATEWAY, "Legacy backend unavailable")
            }
        }
    }

    /// Overwrite `Content-Type` from the extension table. An unmapped extension
    /// leaves an empty value.
    fn apply_content_type(&self, request_path: &str, response: &mut Response<AxumBody>) {
        let backend_filename = response
            .headers()
            .get(ARCHIVE_FILENAME_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        let value = match self.resolver.resolve(request_path, backend_filename) {
            Some(mime) => HeaderValue::from_str(mime).unwrap_or_else(|_| {
                tracing::warn!("Configured MIME type is not a valid header value: {}", mime);
                HeaderValue::from_static("")
            }),
            None => {
                tracing::debug!("No MIME type mapped for {}", request_path);
                HeaderValue::from_static("")
            }
        };
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
}

fn synthetic_response(status: StatusCode, message: &'static str) -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::from(message));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use hyper::{HeaderMap, Method, Request, Uri};

    use super::*;
    use crate::ports::http_client::HttpClientResult;

    /// Scripted backend that records the requests it receives.
    struct ScriptedBackend {
        reply: Box<dyn Fn() -> HttpClientResult<Response<AxumBody>> + Send + Sync>,
        seen: Mutex<Vec<(Method, String, Option<String>)>>,
    }

    impl ScriptedBackend {
        fn status(status: u16, body: &'static str) -> Arc<Self> {
            Self::with(move || {
                Ok(Response::builder()
                    .status(status)
                    .header("x-backend", "scripted")
                    .body(AxumBody::from(body))
                    .unwrap())
            })
        }

        fn with(
            reply: impl Fn() -> HttpClientResult<Response<AxumBody>> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                reply: Box::new(reply),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Method, String, Option<String>)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedBackend {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            let host = req
                .headers()
                .get(header::HOST)
                .map(|h| h.to_str().unwrap().to_string());
            self.seen
                .lock()
                .unwrap()
                .push((req.method().clone(), req.uri().to_string(), host));
            (self.reply)()
        }
    }

    fn router(primary: Arc<ScriptedBackend>, legacy: Arc<ScriptedBackend>) -> FailoverRouter {
        FailoverRouter::new(Arc::new(RoutingSettings::default()), primary, legacy)
    }

    fn inbound(uri: &str) -> InboundRequest {
        let uri: Uri = uri.parse().unwrap();
        InboundRequest::new(Method::GET, &uri, HeaderMap::new(), Bytes::new(), false).unwrap()
    }

    async fn body_string(outcome: RoutingOutcome) -> String {
        let bytes = outcome
            .into_response()
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_primary_success_is_final() {
        let primary = ScriptedBackend::status(200, "zip");
        let legacy = ScriptedBackend::status(200, "legacy");
        let router = router(primary.clone(), legacy.clone());

        let outcome = router.route(inbound("http://classicgame.com/movie.mp4")).await;

        assert_eq!(outcome.provenance(), Provenance::Primary);
        assert_eq!(outcome.status(), StatusCode::OK);
        assert_eq!(outcome.content_type(), Some("video/mp4"));
        assert_eq!(outcome.response().headers().get("x-backend").unwrap(), "scripted");
        assert_eq!(body_string(outcome).await, "zip");
        assert_eq!(
            primary.calls()[0].1,
            "http://127.0.0.1:22501/content/classicgame.com/movie.mp4"
        );
        assert!(legacy.calls().is_empty());
    }

    #[tokio::test]
    async fn test_redirect_from_primary_is_still_primary() {
        let primary = ScriptedBackend::status(302, "");
        let legacy = ScriptedBackend::status(200, "legacy");
        let router = router(primary, legacy.clone());

        let outcome = router.route(inbound("http://classicgame.com/dir")).await;
        assert_eq!(outcome.provenance(), Provenance::Primary);
        assert_eq!(outcome.status(), StatusCode::FOUND);
        assert!(legacy.calls().is_empty());
    }

    #[tokio::test]
    async fn test_primary_404_falls_back_once_with_original_target() {
        let primary = ScriptedBackend::status(404, "missing");
        let legacy = ScriptedBackend::status(200, "<html>...</html>");
        let router = router(primary, legacy.clone());

        let outcome = router
            .route(inbound("http://classicgame.com:8080/index.html"))
            .await;

        assert_eq!(outcome.provenance(), Provenance::Legacy);
        assert_eq!(outcome.status(), StatusCode::OK);
        assert_eq!(outcome.content_type(), Some("text/html"));
        assert_eq!(body_string(outcome).await, "<html>...</html>");

        let calls = legacy.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "http://classicgame.com/index.html");
        assert_eq!(calls[0].2.as_deref(), Some("classicgame.com"));
    }

    #[tokio::test]
    async fn test_legacy_error_status_is_final() {
        let primary = ScriptedBackend::status(500, "");
        let legacy = ScriptedBackend::status(404, "still missing");
        let router = router(primary, legacy.clone());

        let outcome = router.route(inbound("http://classicgame.com/gone.swf")).await;
        assert_eq!(outcome.provenance(), Provenance::Legacy);
        assert_eq!(outcome.status(), StatusCode::NOT_FOUND);
        assert_eq!(legacy.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_primary_triggers_fallback() {
        let primary = ScriptedBackend::with(|| {
            Err(HttpClientError::ConnectionError("refused".to_string()))
        });
        let legacy = ScriptedBackend::status(200, "legacy");
        let router = router(primary, legacy.clone());

        let outcome = router.route(inbound("http://classicgame.com/a.swf")).await;
        assert_eq!(outcome.provenance(), Provenance::Legacy);
        assert_eq!(outcome.status(), StatusCode::OK);
        assert_eq!(legacy.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_double_failure_yields_bad_gateway() {
        let primary = ScriptedBackend::with(|| {
            Err(HttpClientError::ConnectionError("refused".to_string()))
        });
        let legacy = ScriptedBackend::with(|| {
            Err(HttpClientError::ConnectionError("refused".to_string()))
        });
        let router = router(primary, legacy);

        let outcome = router.route(inbound("http://classicgame.com/a.swf")).await;
        assert_eq!(outcome.provenance(), Provenance::Legacy);
        assert_eq!(outcome.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(outcome.content_type(), Some("application/x-shockwave-flash"));
    }

    #[tokio::test]
    async fn test_legacy_timeout_yields_gateway_timeout() {
        let primary = ScriptedBackend::status(404, "");
        let legacy = ScriptedBackend::with(|| Err(HttpClientError::Timeout(300)));
        let router = router(primary, legacy);

        let outcome = router.route(inbound("http://classicgame.com/slow.php")).await;
        assert_eq!(outcome.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_archive_filename_header_drives_content_type() {
        let primary = ScriptedBackend::with(|| {
            Ok(Response::builder()
                .status(200)
                .header(ARCHIVE_FILENAME_HEADER, "content/classicgame.com/game.swf")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(AxumBody::empty())
                .unwrap())
        });
        let legacy = ScriptedBackend::status(200, "");
        let router = router(primary, legacy);

        let outcome = router.route(inbound("http://classicgame.com/play")).await;
        assert_eq!(outcome.content_type(), Some("application/x-shockwave-flash"));
    }

    #[tokio::test]
    async fn test_unmapped_extension_clears_content_type() {
        let primary = ScriptedBackend::status(200, "");
        let legacy = ScriptedBackend::status(200, "");
        let router = router(primary, legacy);

        let outcome = router.route(inbound("http://classicgame.com/data.xyz")).await;
        assert_eq!(outcome.content_type(), Some(""));
    }

    #[tokio::test]
    async fn test_routing_is_repeatable() {
        let primary = ScriptedBackend::status(404, "");
        let legacy = ScriptedBackend::status(200, "");
        let router = router(primary, legacy);

        let first = router.route(inbound("http://classicgame.com/index.html")).await;
        let second = router.route(inbound("http://classicgame.com/index.html")).await;
        assert_eq!(first.provenance(), second.provenance());
        assert_eq!(first.status(), second.status());
    }

    #[tokio::test]
    async fn test_tls_request_uses_https_archive_port() {
        let primary = ScriptedBackend::status(200, "");
        let legacy = ScriptedBackend::status(200, "");
        let router = router(primary.clone(), legacy);

        let uri: Uri = "https://secure.example.org/app.js".parse().unwrap();
        let req =
            InboundRequest::new(Method::GET, &uri, HeaderMap::new(), Bytes::new(), true).unwrap();
        router.route(req).await;

        assert_eq!(
            primary.calls()[0].1,
            "https://127.0.0.1:22502/content/secure.example.org/app.js"
        );
    }
}

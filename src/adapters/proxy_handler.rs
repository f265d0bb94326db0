use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body as AxumBody,
    http::{HeaderValue, Method, StatusCode, uri::Scheme},
};
use eyre::{Result, WrapErr};
use hyper::{Request, Response};

use crate::core::{FailoverRouter, InboundRequest, RequestError};

/// Header naming the backend that served a response, added in verbose mode.
pub const SERVED_BY_HEADER: &str = "x-served-by";

/// Front door of the proxy: turns client requests into routed outcomes.
#[derive(Clone)]
pub struct ProxyHandler {
    router: Arc<FailoverRouter>,
    verbose: bool,
}

impl ProxyHandler {
    pub fn new(router: Arc<FailoverRouter>) -> Self {
        let verbose = router.settings().verbose_logging;
        Self { router, verbose }
    }

    /// Handle one proxied request.
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>> {
        tracing::debug!(
            client = ?client_addr,
            "Handling {} request to {}",
            req.method(),
            req.uri()
        );

        // TLS interception (CONNECT tunnels) lives in front of this handler.
        if req.method() == Method::CONNECT {
            return Response::builder()
                .status(StatusCode::NOT_IMPLEMENTED)
                .body(AxumBody::from("CONNECT tunnelling is not supported"))
                .wrap_err("Failed to build not implemented response");
        }

        let tls = req.uri().scheme() == Some(&Scheme::HTTPS);
        let inbound = match InboundRequest::from_http(req, tls).await {
            Ok(inbound) => inbound,
            Err(e @ RequestError::MissingHost) | Err(e @ RequestError::Body(_)) => {
                tracing::warn!("Rejecting request: {}", e);
                return Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(AxumBody::from(e.to_string()))
                    .wrap_err("Failed to build bad request response");
            }
            Err(e) => return Err(e).wrap_err("Failed to capture request"),
        };

        let outcome = self.router.route(inbound).await;
        let provenance = outcome.provenance();
        let mut response = outcome.into_response();

        if self.verbose {
            response
                .headers_mut()
                .insert(SERVED_BY_HEADER, HeaderValue::from_static(provenance.as_str()));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::RoutingSettings,
        ports::http_client::{HttpClient, HttpClientResult},
    };

    struct FixedStatus(u16);

    #[async_trait]
    impl HttpClient for FixedStatus {
        async fn send_request(
            &self,
            _req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            Ok(Response::builder()
                .status(self.0)
                .body(AxumBody::empty())
                .unwrap())
        }
    }

    fn create_test_handler(verbose: bool) -> ProxyHandler {
        let settings = RoutingSettings {
            verbose_logging: verbose,
            ..RoutingSettings::default()
        };
        let router = FailoverRouter::new(
            Arc::new(settings),
            Arc::new(FixedStatus(404)),
            Arc::new(FixedStatus(200)),
        );
        ProxyHandler::new(Arc::new(router))
    }

    #[tokio::test]
    async fn test_connect_is_not_implemented() {
        let handler = create_test_handler(false);
        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("classicgame.com:443")
            .body(AxumBody::empty())
            .unwrap();

        let response = handler.handle_request(req, None).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_request_without_host_is_bad_request() {
        let handler = create_test_handler(false);
        let req = Request::builder()
            .uri("/index.html")
            .body(AxumBody::empty())
            .unwrap();

        let response = handler.handle_request(req, None).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_verbose_mode_tags_provenance() {
        let handler = create_test_handler(true);
        let req = Request::builder()
            .uri("http://classicgame.com/index.html")
            .body(AxumBody::empty())
            .unwrap();

        let response = handler.handle_request(req, None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(SERVED_BY_HEADER).unwrap(), "legacy");
    }

    #[tokio::test]
    async fn test_quiet_mode_adds_no_tag() {
        let handler = create_test_handler(false);
        let req = Request::builder()
            .uri("http://classicgame.com/index.html")
            .body(AxumBody::empty())
            .unwrap();

        let response = handler.handle_request(req, None).await.unwrap();
        assert!(response.headers().get(SERVED_BY_HEADER).is_none());
    }
}

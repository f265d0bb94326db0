use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// HTTP client adapter for the archive server, using Hyper with Rustls.
///
/// Responsibilities:
/// * Speaks plain HTTP to the archive HTTP port and TLS to the archive HTTPS port
/// * Forces request version to HTTP/1.1
/// * Points the `Host` header at the rewritten destination
/// * Converts between Hyper body and Axum body types
///
/// The primary attempt is not separately time-bounded here; the caller owns that.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::debug!("Created archive server HTTP client");
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let client = self.client.clone();

        let backend_identifier = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        let span = tracing::info_span!(
            "backend_request",
            backend.url = %backend_identifier,
            http.method = %req.method(),
            http.path = %req.uri().path(),
            http.status_code = tracing::field::Empty,
        );

        async move {
            if let Some(host_str) = req.uri().host() {
                let host_header_val = match req.uri().port() {
                    Some(port) => HeaderValue::from_str(&format!("{host_str}:{}", port.as_u16())),
                    None => HeaderValue::from_str(host_str),
                }
                .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
                req.headers_mut().insert(header::HOST, host_header_val);
            } else {
                tracing::error!("Outgoing URI has no host: {}", req.uri());
                return Err(HttpClientError::InvalidRequest(
                    "Outgoing URI has no host".to_string(),
                ));
            }

            let (mut parts, axum_body) = req.into_parts();
            parts.version = Version::HTTP_11;

            tracing::debug!("Sending request: {} {}", parts.method, parts.uri);
            tracing::trace!("Outgoing request headers: {:?}", parts.headers);

            let outgoing_request = Request::from_parts(parts, axum_body);
            let method_for_error_log = outgoing_request.method().clone();
            let uri_for_error_log = outgoing_request.uri().clone();

            match client.request(outgoing_request).await {
                Ok(response) => {
                    tracing::Span::current().record("http.status_code", response.status().as_u16());

                    let (mut parts, hyper_body) = response.into_parts();
                    // The body is re-framed by the downstream server.
                    parts.headers.remove(header::TRANSFER_ENCODING);

                    Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
                }
                Err(e) => {
                    tracing::Span::current().record("http.status_code", 599u16);
                    tracing::warn!(
                        "Error making request to archive server {} ({} {}): {}",
                        backend_identifier,
                        method_for_error_log,
                        uri_for_error_log,
                        e
                    );

                    Err(HttpClientError::ConnectionError(format!(
                        "Request to {method_for_error_log} {uri_for_error_log} failed: {e}"
                    )))
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        let client = HttpClientAdapter::new();
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_uri_without_host_is_rejected() {
        let client = HttpClientAdapter::new().unwrap();
        let req = Request::builder()
            .uri("/content/example.com/index.html")
            .body(AxumBody::empty())
            .unwrap();

        let result = client.send_request(req).await;
        assert!(matches!(result, Err(HttpClientError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_unreachable_archive_is_connection_error() {
        // Bind then drop to obtain a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = HttpClientAdapter::new().unwrap();
        let req = Request::builder()
            .uri(format!("http://127.0.0.1:{port}/content/example.com/"))
            .body(AxumBody::empty())
            .unwrap();

        let result = client.send_request(req).await;
        assert!(matches!(result, Err(HttpClientError::ConnectionError(_))));
    }
}

use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::uri::Authority;
use http_body_util::BodyExt;
use hyper::{
    HeaderMap, Method, Request, Uri,
    header::{self, HeaderValue},
};
use thiserror::Error;

/// Errors raised while capturing or rewriting an inbound request.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RequestError {
    #[error("Request has no target host")]
    MissingHost,

    #[error("Failed to read request body: {0}")]
    Body(String),

    #[error("Failed to build rewritten request: {0}")]
    Build(#[from] http::Error),
}

/// A captured client request.
///
/// The body is buffered once so that both the archive attempt and the legacy
/// attempt can replay it. Every rewrite produces a fresh `Request`; the captured
/// value itself is never mutated.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    method: Method,
    host: String,
    path_and_query: String,
    headers: HeaderMap,
    body: Bytes,
    tls: bool,
}

impl InboundRequest {
    /// Capture a request from its parts. The target host comes from the URI
    /// authority, or from the `Host` header for origin-form requests, and any
    /// port suffix is dropped.
    pub fn new(
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
        tls: bool,
    ) -> Result<Self, RequestError> {
        let host = match uri.host() {
            Some(host) => host.to_string(),
            None => headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<Authority>().ok())
                .map(|authority| authority.host().to_string())
                .ok_or(RequestError::MissingHost)?,
        };
        if host.is_empty() {
            return Err(RequestError::MissingHost);
        }

        let path_and_query = uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();
        let path_and_query = if path_and_query.starts_with('/') {
            path_and_query
        } else {
            format!("/{path_and_query}")
        };

        Ok(Self {
            method,
            host,
            path_and_query,
            headers,
            body,
            tls,
        })
    }

    /// Capture an HTTP request, buffering its body.
    pub async fn from_http(req: Request<AxumBody>, tls: bool) -> Result<Self, RequestError> {
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| RequestError::Body(e.to_string()))?
            .to_bytes();
        Self::new(parts.method, &parts.uri, parts.headers, body, tls)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target host with any port suffix removed.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path component, without the query string.
    pub fn path(&self) -> &str {
        self.path_and_query
            .split_once('?')
            .map_or(self.path_and_query.as_str(), |(path, _)| path)
    }

    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the request arrived through an intercepted TLS tunnel.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    fn scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }

    /// Rewrite for the archive server: `/content/<host><path>` on the loopback
    /// archive port. Method, headers and body are carried over unchanged; the
    /// `Host` header is left for the client to point at the new destination.
    pub fn primary_request(&self, primary_port: u16) -> Result<Request<AxumBody>, RequestError> {
        let uri = format!(
            "{}://127.0.0.1:{}/content/{}{}",
            self.scheme(),
            primary_port,
            self.host,
            self.path_and_query
        );

        let mut headers = self.headers.clone();
        headers.remove(header::HOST);

        let mut req = Request::builder()
            .method(self.method.clone())
            .uri(uri)
            .body(AxumBody::from(self.body.clone()))?;
        *req.headers_mut() = headers;
        Ok(req)
    }

    /// The original request, addressed in absolute form for the legacy backend.
    pub fn legacy_request(&self) -> Result<Request<AxumBody>, RequestError> {
        let uri = format!("{}://{}{}", self.scheme(), self.host, self.path_and_query);

        let mut req = Request::builder()
            .method(self.method.clone())
            .uri(uri)
            .body(AxumBody::from(self.body.clone()))?;
        *req.headers_mut() = self.headers.clone();
        let host = HeaderValue::from_str(&self.host).map_err(http::Error::from)?;
        req.headers_mut().insert(header::HOST, host);
        Ok(req)
    }
}

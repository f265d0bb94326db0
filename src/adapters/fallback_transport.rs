//! Connection layer for the legacy backend.
//!
//! Legacy request targets routinely name hosts that do not resolve (or resolve
//! somewhere public), so the fallback path never consults DNS. Every socket the
//! client opens goes to `127.0.0.1:<legacy-port>`, and the connection is marked as
//! an HTTP proxy hop so requests are written in absolute form and the legacy
//! server still sees the original target.
use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::{Result, WrapErr};
use hyper::{
    Request, Response, Uri,
    body::{Body, Frame, SizeHint},
    header,
    rt::{Read, ReadBufCursor, Write},
};
use hyper_util::{
    client::legacy::{
        Client,
        connect::{Connected, Connection, HttpConnector},
    },
    rt::{TokioExecutor, TokioIo},
};
use tokio::{
    net::TcpStream,
    time::{Instant, Sleep, sleep_until, timeout_at},
};
use tower::Service;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Connect timeout for every dial to the legacy backend.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
/// TCP keep-alive applied to legacy backend sockets.
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);
/// Upper bound for a whole fallback request, body included; legacy scripts can
/// be slow.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Connector that ignores the URI it is asked to dial and always connects to
/// the loopback legacy port instead.
#[derive(Clone, Debug)]
pub struct LoopbackConnector {
    inner: HttpConnector,
    target: Uri,
}

impl LoopbackConnector {
    pub fn new(legacy_port: u16) -> Result<Self> {
        let mut inner = HttpConnector::new();
        inner.set_connect_timeout(Some(DIAL_TIMEOUT));
        inner.set_keepalive(Some(KEEP_ALIVE));
        inner.set_nodelay(true);

        let target: Uri = format!("http://127.0.0.1:{legacy_port}/")
            .parse()
            .wrap_err("Failed to build loopback target URI")?;

        Ok(Self { inner, target })
    }

    /// The address every connection is opened to, regardless of the request.
    pub fn target(&self) -> &Uri {
        &self.target
    }
}

impl Service<Uri> for LoopbackConnector {
    type Response = LoopbackStream;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, requested: Uri) -> Self::Future {
        tracing::debug!(
            requested = %requested,
            dialing = %self.target,
            "Pinning legacy connection to loopback"
        );
        let connecting = self.inner.call(self.target.clone());
        Box::pin(async move {
            let io = connecting.await?;
            Ok(LoopbackStream { inner: io })
        })
    }
}

/// TCP stream to the legacy backend, reported to hyper as a proxy connection.
pub struct LoopbackStream {
    inner: TokioIo<TcpStream>,
}

impl Connection for LoopbackStream {
    fn connected(&self) -> Connected {
        self.inner.connected().proxy(true)
    }
}

impl Read for LoopbackStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Write for LoopbackStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }
}

/// Response body that errors once the request deadline passes, so a backend
/// that sends its headers and then stalls cannot hold the request open.
pub struct DeadlineBody<B> {
    inner: B,
    deadline: Pin<Box<Sleep>>,
    limit: Duration,
}

impl<B> DeadlineBody<B> {
    fn new(inner: B, deadline: Instant, limit: Duration) -> Self {
        Self {
            inner,
            deadline: Box::pin(sleep_until(deadline)),
            limit,
        }
    }
}

impl<B> Body for DeadlineBody<B>
where
    B: Body + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        if let Poll::Ready(frame) = Pin::new(&mut this.inner).poll_frame(cx) {
            return Poll::Ready(frame.map(|result| result.map_err(Into::into)));
        }

        match this.deadline.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("legacy response body not finished within {:?}", this.limit),
            )
            .into()))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// HTTP client for the legacy backend built on [`LoopbackConnector`].
pub struct FallbackTransport {
    client: Client<LoopbackConnector, AxumBody>,
    legacy_port: u16,
    request_timeout: Duration,
}

impl FallbackTransport {
    pub fn new(legacy_port: u16) -> Result<Self> {
        Self::with_request_timeout(legacy_port, REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(legacy_port: u16, request_timeout: Duration) -> Result<Self> {
        let connector = LoopbackConnector::new(legacy_port)?;
        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(connector);

        tracing::debug!(
            "Created legacy fallback client pinned to 127.0.0.1:{}",
            legacy_port
        );
        Ok(Self {
            client,
            legacy_port,
            request_timeout,
        })
    }

    pub fn legacy_port(&self) -> u16 {
        self.legacy_port
    }
}

#[async_trait]
impl HttpClient for FallbackTransport {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        let span = tracing::info_span!(
            "backend_request",
            backend.url = %format!("http://127.0.0.1:{}", self.legacy_port),
            http.method = %req.method(),
            http.path = %req.uri().path(),
            http.status_code = tracing::field::Empty,
        );

        async move {
            let method_for_error_log = req.method().clone();
            let uri_for_error_log = req.uri().clone();

            let deadline = Instant::now() + self.request_timeout;

            match timeout_at(deadline, self.client.request(req)).await {
                Ok(Ok(response)) => {
                    tracing::Span::current().record("http.status_code", response.status().as_u16());

                    let (mut parts, hyper_body) = response.into_parts();
                    parts.headers.remove(header::TRANSFER_ENCODING);

                    let body = DeadlineBody::new(hyper_body, deadline, self.request_timeout);
                    Ok(Response::from_parts(parts, AxumBody::new(body)))
                }
                Ok(Err(e)) => {
                    tracing::Span::current().record("http.status_code", 599u16);
                    tracing::error!(
                        "Error making request to legacy backend ({} {}): {}",
                        method_for_error_log,
                        uri_for_error_log,
                        e
                    );
                    Err(HttpClientError::ConnectionError(format!(
                        "Request to {method_for_error_log} {uri_for_error_log} failed: {e}"
                    )))
                }
                Err(_) => {
                    tracing::Span::current().record("http.status_code", 599u16);
                    tracing::error!(
                        "Legacy backend timed out after {:?} ({} {})",
                        self.request_timeout,
                        method_for_error_log,
                        uri_for_error_log
                    );
                    Err(HttpClientError::Timeout(self.request_timeout.as_secs()))
                }
            }
        }
        .instrument(span)
        .await
    }
}

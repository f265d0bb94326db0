use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Transport-level failure talking to a backend. Error statuses are not
/// errors here; they come back as ordinary responses.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// The backend could not be reached or the exchange broke off
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// No response within the bound, in whole seconds
    #[error("Timeout error after {0} seconds")]
    Timeout(u64),

    /// The outgoing request could not be sent as built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// One backend the router can send a request to: the archive server or the
/// legacy fallback.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send `req` and return whatever the backend answered, whatever its status.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}

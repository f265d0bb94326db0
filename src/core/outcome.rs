use axum::body::Body as AxumBody;
use hyper::{Response, StatusCode, header};

/// Which backend produced a routed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// The archive server answered with a status below 400.
    Primary,
    /// The archive server could not serve the request; the legacy backend answered.
    Legacy,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Primary => "primary",
            Provenance::Legacy => "legacy",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single response returned for one routed request, with its
/// `Content-Type` already resolved.
#[derive(Debug)]
pub struct RoutingOutcome {
    provenance: Provenance,
    response: Response<AxumBody>,
}

impl RoutingOutcome {
    pub fn new(provenance: Provenance, response: Response<AxumBody>) -> Self {
        Self {
            provenance,
            response,
        }
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    pub fn response(&self) -> &Response<AxumBody> {
        &self.response
    }

    pub fn into_response(self) -> Response<AxumBody> {
        self.response
    }
}

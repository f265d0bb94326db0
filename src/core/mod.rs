pub mod content_type;
pub mod outcome;
pub mod request;
pub mod router;

pub use content_type::ContentTypeResolver;
pub use outcome::{Provenance, RoutingOutcome};
pub use request::{InboundRequest, RequestError};
pub use router::FailoverRouter;

pub mod error;
pub mod http;
pub mod mock;

pub use error::TransportError;
pub use http::HttpTransport;
pub use mock::{MockTransport, RecordedRequest};

use async_trait::async_trait;
use leanplum_wire::RequestBody;
use serde_json::Value;

/// Boundary between the SDK and the backend. One call is one HTTP POST
/// carrying a batch envelope; the parsed response body comes back as-is.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &str, body: &RequestBody) -> Result<Value, TransportError>;
}

use async_trait::async_trait;
use leanplum_wire::RequestBody;
use reqwest::Client as Http;
use serde_json::Value;
use tracing::debug;

use crate::{Transport, TransportError};

/// `reqwest`-backed transport used outside of tests.
pub struct HttpTransport {
    http: Http,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let http = Http::builder()
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, body: &RequestBody) -> Result<Value, TransportError> {
        debug!(url, actions = body.data.len(), "posting batch");

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let value: Value = serde_json::from_str(&text)?;
        Ok(value)
    }
}

//! # oracle::http
//!
//! Remote decision service: `POST <url>` with the serialized
//! [`DecisionRequest`], answer `{"decisions": [...]}` (or a bare list).

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use super::{prompt::verdicts_from_value, DecisionOracle, DecisionRequest, Verdict};
use crate::error::OracleError;

pub struct HttpOracle {
    client: reqwest::Client,
    url:    String,
}

impl HttpOracle {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl DecisionOracle for HttpOracle {
    async fn decide(&self, request: &DecisionRequest) -> Result<Vec<Verdict>, OracleError> {
        debug!(cycle_id = %request.cycle_id, bundles = request.bundles.len(), url = %self.url, "Calling decision service...");

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "decision service unreachable");
                if e.is_timeout() { OracleError::Timeout } else { OracleError::Transport(e.to_string()) }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status { status, body });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;
        verdicts_from_value(value)
    }
}

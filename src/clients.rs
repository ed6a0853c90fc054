//! HTTP adapters for the remote classifier and ledger services.

use crate::collaborators::{ClassifierJudgment, ClassifierRequest, Ledger, VisualClassifier};
use crate::error::ExternalError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ClassifyBody<'a> {
    image_base64: String,
    goal_description: &'a str,
    proof_type: &'a str,
}

/// Visual classifier reached over HTTP.
///
/// The response body is read as text and parsed leniently, so a service
/// that wraps its JSON in a markdown fence still works.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: Client,
    url: String,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ExternalError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl VisualClassifier for HttpClassifier {
    async fn classify(&self, request: ClassifierRequest<'_>) -> Result<ClassifierJudgment, ExternalError> {
        let body = ClassifyBody {
            image_base64: STANDARD.encode(request.image),
            goal_description: request.goal_description,
            proof_type: request.proof_type,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        debug!(bytes = text.len(), "classifier responded");

        Ok(ClassifierJudgment::from_response_text(&text))
    }
}

#[derive(Debug, Serialize)]
struct OutcomeBody {
    goal_id: u64,
    approved: bool,
}

#[derive(Debug, Deserialize)]
struct OutcomeReceipt {
    tx_hash: String,
}

/// Escrow ledger reached over HTTP: `POST {goal_id, approved}` -> `{tx_hash}`.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: Client,
    url: String,
}

impl HttpLedger {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ExternalError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn record_outcome(&self, on_chain_goal_id: u64, approved: bool) -> Result<String, ExternalError> {
        let receipt: OutcomeReceipt = self
            .client
            .post(&self.url)
            .json(&OutcomeBody {
                goal_id: on_chain_goal_id,
                approved,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if receipt.tx_hash.is_empty() {
            return Err(ExternalError::Malformed("empty tx_hash".into()));
        }
        Ok(receipt.tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_body_encodes_image() {
        let body = ClassifyBody {
            image_base64: STANDARD.encode(b"abc"),
            goal_description: "gym",
            proof_type: "photo",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["image_base64"], "YWJj");
        assert_eq!(json["proof_type"], "photo");
    }

    #[tokio::test]
    async fn test_unreachable_classifier_is_an_external_error() {
        // port 9 (discard) on localhost is not served in the test environment
        let classifier = HttpClassifier::new("http://127.0.0.1:9/classify", Duration::from_millis(500)).unwrap();
        let err = classifier
            .classify(ClassifierRequest {
                image: b"img",
                goal_description: "gym",
                proof_type: "photo",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalError::Unavailable(_) | ExternalError::Timeout));
    }
}

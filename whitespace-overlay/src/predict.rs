//! Prediction service seam.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PREDICT_URL: &str = "http://localhost:3001/api/predict";

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Prediction request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Prediction service returned status {0}")]
    Status(u16),
}

/// Turns the text before the cursor into a continuation.
///
/// An empty continuation means "nothing to suggest".
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, context: String) -> Result<String, PredictError>;
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    prediction: String,
}

/// `POST {"text": ...}` returning `{"prediction": ...}`.
pub struct HttpPredictor {
    client: Client,
    url: String,
}

impl HttpPredictor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PredictError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, context: String) -> Result<String, PredictError> {
        let response = self
            .client
            .post(&self.url)
            .json(&PredictRequest { text: &context })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PredictError::Status(status.as_u16()));
        }
        let body: PredictResponse = response.json().await?;
        log::debug!("Prediction of {} chars for {} chars of context", body.prediction.len(), context.len());
        Ok(body.prediction)
    }
}

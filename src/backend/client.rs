use async_trait::async_trait;
use serde_json::Value;

use crate::backend::protocol::{FallbackRequest, VerifySecureRequest, VerifySecureResponse};
use crate::backend::VerificationBackend;
use crate::common::config::BackendConfig;
use crate::common::VerificationError;

/// Verification backend reached over HTTPS with JSON bodies.
pub struct HttpVerificationBackend {
    /// HTTP client (reusable connection pool).
    http_client: reqwest::Client,
    verify_url: String,
    fallback_url: String,
}

impl HttpVerificationBackend {
    pub fn new(config: &BackendConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            verify_url: config.verify_url(),
            fallback_url: config.fallback_url(),
        }
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, VerificationError> {
        self.http_client.post(url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                VerificationError::backend_unreachable(format!("request timed out: {}", e))
            } else if e.is_connect() {
                VerificationError::backend_unreachable(format!("connection failed: {}", e))
            } else {
                VerificationError::backend_unreachable(e.to_string())
            }
        })
    }
}

#[async_trait]
impl VerificationBackend for HttpVerificationBackend {
    async fn verify_secure(&self, request: &VerifySecureRequest) -> Result<Value, VerificationError> {
        let response = self.post(&self.verify_url, request).await?;
        let status = response.status();

        if !status.is_success() {
            // Error bodies usually carry the same envelope with a message.
            let message = response
                .json::<VerifySecureResponse>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| format!("HTTP status {}", status));
            return Err(VerificationError::backend_rejected(message));
        }

        let body: VerifySecureResponse = response.json().await.map_err(|e| {
            VerificationError::backend_unreachable(format!("failed to parse verification response: {}", e))
        })?;

        if body.success {
            Ok(body.data.unwrap_or(Value::Null))
        } else {
            Err(VerificationError::backend_rejected(
                body.message.unwrap_or_else(|| "Verification failed".to_string()),
            ))
        }
    }

    async fn request_fallback(&self, request: &FallbackRequest) -> Result<(), VerificationError> {
        let response = self.post(&self.fallback_url, request).await?;

        if !response.status().is_success() {
            return Err(VerificationError::backend_rejected(format!(
                "Fallback verification refused: HTTP status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

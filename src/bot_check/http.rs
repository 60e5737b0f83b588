use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::bot_check::BotCheck;
use crate::common::config::BotCheckConfig;
use crate::common::VerificationError;

/// Bot-check service reached over HTTP.
///
/// `load` fetches the script once per client; `execute` asks the token
/// endpoint for a token bound to the site key and action.
pub struct HttpBotCheck {
    http_client: reqwest::Client,
    site_key: String,
    script_url: String,
    execute_url: String,
    loaded: OnceCell<()>,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    sitekey: &'a str,
    action: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    success: bool,
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl HttpBotCheck {
    pub fn new(config: &BotCheckConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            site_key: config.site_key.clone(),
            script_url: config.script_url.clone(),
            execute_url: config.execute_url.clone(),
            loaded: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    async fn fetch_script(&self) -> Result<(), VerificationError> {
        tracing::debug!("Loading bot-check script from {}", self.script_url);
        let response = self.http_client.get(&self.script_url).send().await.map_err(|e| {
            VerificationError::bot_check_unavailable(format!("Failed to load verification script: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(VerificationError::bot_check_unavailable(format!(
                "Failed to load verification script: HTTP status {}",
                response.status()
            )));
        }
        tracing::info!("Bot-check script loaded");
        Ok(())
    }
}

#[async_trait]
impl BotCheck for HttpBotCheck {
    async fn load(&self) -> Result<(), VerificationError> {
        // Concurrent callers wait on the same fetch; a failure leaves it unset.
        self.loaded.get_or_try_init(|| self.fetch_script()).await?;
        Ok(())
    }

    async fn execute(&self, action_tag: &str) -> Result<String, VerificationError> {
        self.load().await?;

        let request = ExecuteRequest {
            sitekey: &self.site_key,
            action: action_tag,
        };
        let response = self
            .http_client
            .post(&self.execute_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VerificationError::bot_check_unavailable(format!("Bot-check timed out: {}", e))
                } else {
                    VerificationError::bot_check_unavailable(format!("Bot-check unreachable: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(VerificationError::bot_check_unavailable(format!(
                "Bot-check returned HTTP status {}",
                response.status()
            )));
        }

        let body: ExecuteResponse = response.json().await.map_err(|e| {
            VerificationError::bot_check_unavailable(format!("Invalid bot-check response: {}", e))
        })?;

        match (body.success, body.token) {
            (true, Some(token)) if !token.is_empty() => Ok(token),
            _ if body.error_codes.is_empty() => Err(VerificationError::bot_check_rejected(
                "reCAPTCHA verification failed. Please try again.",
            )),
            _ => Err(VerificationError::bot_check_rejected(format!(
                "reCAPTCHA verification failed: {}",
                body.error_codes.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_response_with_error_codes() {
        let json = r#"{"success": false, "error-codes": ["timeout-or-duplicate"]}"#;
        let resp: ExecuteResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.success);
        assert!(resp.token.is_none());
        assert_eq!(resp.error_codes, vec!["timeout-or-duplicate".to_string()]);
    }

    #[test]
    fn test_execute_response_with_token() {
        let json = r#"{"success": true, "token": "abc123"}"#;
        let resp: ExecuteResponse = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        assert_eq!(resp.token.as_deref(), Some("abc123"));
        assert!(resp.error_codes.is_empty());
    }
}

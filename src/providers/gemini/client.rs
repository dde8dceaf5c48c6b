use crate::config::ProviderConfig;
use crate::providers::http;
use crate::{Error, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const PROVIDER: &str = "Gemini";

/// Lightweight Gemini REST client.
pub struct GeminiHttpClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiHttpClient {
    /// Construct a Gemini client.
    ///
    /// `model` should be the bare model ID (for example `gemini-1.5-flash`);
    /// a leading `models/` is stripped.
    pub fn new_with_client(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
        client: Client,
    ) -> Self {
        let model = model.strip_prefix("models/").unwrap_or(&model).to_string();

        Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Builds a client from provider configuration. Fails when no key is set.
    pub fn from_config(config: &ProviderConfig, client: Client) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Configuration("GEMINI_API_KEY is not configured".to_string()))?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "gemini-1.5-flash".to_string());

        Ok(Self::new_with_client(
            api_key,
            model,
            config.base_url().to_string(),
            config.timeout,
            client,
        ))
    }

    /// Returns the configured model ID without the `models/` prefix.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Calls Gemini's `generateContent` endpoint.
    pub async fn generate_content<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        request: &Req,
    ) -> Result<Resp> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;

        let status = response.status().as_u16();
        let body = http::read_body(PROVIDER, response).await?;
        serde_json::from_slice(&body).map_err(|e| {
            tracing::error!(
                "Failed to parse Gemini response: {}\nBody: {}",
                e,
                String::from_utf8_lossy(&body)
            );
            Error::upstream(status, format!("Failed to parse Gemini response: {}", e))
        })
    }
}

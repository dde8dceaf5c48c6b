//! Managed screenshot capture through the ScreenshotOne `take` API.

use crate::config::ProviderConfig;
use crate::models::{ScreenshotInput, TaskOutput, TaskRequest, TaskResult};
use crate::providers::{http, mime, unexpected_task, TaskAdapter};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const PROVIDER: &str = "ScreenshotOne";

pub struct ScreenshotOneClient {
    client: Client,
    access_key: String,
    base_url: String,
    timeout: Duration,
}

impl ScreenshotOneClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Self::new_with_client(config, Client::new())
    }

    pub fn new_with_client(config: &ProviderConfig, client: Client) -> Result<Self> {
        let access_key = config.api_key.clone().ok_or_else(|| {
            Error::Configuration("SCREENSHOTONE_KEY is not configured".to_string())
        })?;

        Ok(Self {
            client,
            access_key,
            base_url: config.base_url().to_string(),
            timeout: config.timeout,
        })
    }

    async fn capture(&self, input: ScreenshotInput) -> TaskResult {
        tracing::debug!(
            "Capturing {} at {}x{} (full_page={}) via ScreenshotOne",
            input.url,
            input.width,
            input.height,
            input.full_page
        );

        let response = self
            .client
            .get(format!("{}/take", self.base_url))
            .timeout(self.timeout)
            .query(&[
                ("access_key", self.access_key.as_str()),
                ("url", input.url.trim()),
                ("format", "png"),
            ])
            .query(&[
                ("viewport_width", input.width.to_string()),
                ("viewport_height", input.height.to_string()),
                ("full_page", input.full_page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;

        let status = response.status().as_u16();
        let bytes = http::read_body(PROVIDER, response).await?;

        let format = mime::detect_image_format(&bytes).ok_or_else(|| {
            Error::upstream(status, "ScreenshotOne returned data that is not an image")
        })?;

        Ok(TaskOutput::binary(bytes, format))
    }
}

#[async_trait]
impl TaskAdapter for ScreenshotOneClient {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn invoke(&self, request: TaskRequest) -> TaskResult {
        match request {
            TaskRequest::Screenshot(input) => self.capture(input).await,
            other => Err(unexpected_task(PROVIDER, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaFormat, Payload};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG: [u8; 12] = [
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
    ];

    fn make_client(server: &MockServer) -> ScreenshotOneClient {
        let config =
            ProviderConfig::new(server.uri(), Duration::from_secs(5)).with_api_key("shot-key");
        ScreenshotOneClient::new(&config).unwrap()
    }

    fn request(full_page: bool) -> TaskRequest {
        TaskRequest::Screenshot(ScreenshotInput {
            url: "https://example.com/pricing".to_string(),
            width: 1280,
            height: 800,
            full_page,
        })
    }

    #[tokio::test]
    async fn test_capture_sends_viewport_and_returns_png() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/take"))
            .and(query_param("access_key", "shot-key"))
            .and(query_param("url", "https://example.com/pricing"))
            .and(query_param("viewport_width", "1280"))
            .and(query_param("viewport_height", "800"))
            .and(query_param("full_page", "true"))
            .and(query_param("format", "png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let output = make_client(&server).invoke(request(true)).await.unwrap();

        assert_eq!(
            output.payload,
            Payload::Binary {
                bytes: PNG.to_vec(),
                format: MediaFormat::Png
            }
        );
    }

    #[tokio::test]
    async fn test_provider_error_is_upstream_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/take"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid access key"))
            .mount(&server)
            .await;

        let err = make_client(&server).invoke(request(false)).await.unwrap_err();
        match err {
            Error::Upstream { status, .. } => assert_eq!(status, Some(400)),
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_image_body_is_upstream_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/take"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = make_client(&server).invoke(request(false)).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_connection_failure_does_not_expose_access_key() {
        let config = ProviderConfig::new("http://127.0.0.1:9", Duration::from_secs(5))
            .with_api_key("SECRET-SHOT-KEY");
        let client = ScreenshotOneClient::new(&config).unwrap();

        let err = client.invoke(request(false)).await.unwrap_err();

        assert_eq!(err.status_code().as_u16(), 502);
        assert_eq!(err.kind(), "UpstreamError");
        assert!(!err.public_message().contains("SECRET-SHOT-KEY"));
        assert!(!err.to_string().contains("SECRET-SHOT-KEY"));
        assert!(!format!("{:?}", err).contains("SECRET-SHOT-KEY"));
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let config = ProviderConfig::new("http://localhost", Duration::from_secs(1));
        assert!(matches!(
            ScreenshotOneClient::new(&config),
            Err(Error::Configuration(_))
        ));
    }
}

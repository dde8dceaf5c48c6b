//! Pollinations adapters: image generation and text-to-speech.
//!
//! Both endpoints take their main input as a URL path segment and answer with
//! raw media bytes. An API key is optional and sent as a bearer token.

use crate::config::ProviderConfig;
use crate::models::{ImageInput, MediaFormat, TaskOutput, TaskRequest, TaskResult, VoiceInput};
use crate::providers::{http, mime, unexpected_task, TaskAdapter};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use std::time::Duration;

const IMAGE_PROVIDER: &str = "Pollinations image";
const VOICE_PROVIDER: &str = "Pollinations voice";

pub const DEFAULT_IMAGE_MODEL: &str = "flux";
pub const DEFAULT_VOICE: &str = "alloy";
pub const DEFAULT_VOICE_MODEL: &str = "openai-audio";

/// Shared request plumbing for both Pollinations hosts.
struct PollinationsHttpClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl PollinationsHttpClient {
    fn new(config: &ProviderConfig, client: Client) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url().to_string(),
            timeout: config.timeout,
        }
    }

    /// `{base_url}/{prefix...}/{segment}` with `segment` percent-encoded.
    fn url(&self, prefix: &[&str], segment: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::Internal(format!("Invalid Pollinations base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Internal("Pollinations base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(prefix)
            .push(segment);
        Ok(url)
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let request = self.client.get(url).timeout(self.timeout);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

pub struct PollinationsImageClient {
    http: PollinationsHttpClient,
    model: String,
}

impl PollinationsImageClient {
    pub fn new(config: &ProviderConfig) -> Self {
        Self::new_with_client(config, Client::new())
    }

    pub fn new_with_client(config: &ProviderConfig, client: Client) -> Self {
        Self {
            http: PollinationsHttpClient::new(config, client),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
        }
    }

    async fn generate(&self, input: ImageInput) -> TaskResult {
        let model = input.model.clone().unwrap_or_else(|| self.model.clone());
        let mut url = self.http.url(&["prompt"], input.prompt.trim())?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("width", &input.width.to_string())
                .append_pair("height", &input.height.to_string())
                .append_pair("model", &model)
                .append_pair("nologo", "true");
            if let Some(seed) = input.seed {
                query.append_pair("seed", &seed.to_string());
            }
        }

        tracing::debug!(
            "Generating {}x{} image with Pollinations model {}",
            input.width,
            input.height,
            model
        );

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| http::send_error(IMAGE_PROVIDER, e))?;

        let status = response.status().as_u16();
        let bytes = http::read_body(IMAGE_PROVIDER, response).await?;

        let format = mime::detect_image_format(&bytes).ok_or_else(|| {
            Error::upstream(status, "Pollinations returned data that is not an image")
        })?;

        Ok(TaskOutput::binary(bytes, format).with_model(model))
    }
}

#[async_trait]
impl TaskAdapter for PollinationsImageClient {
    fn provider(&self) -> &'static str {
        IMAGE_PROVIDER
    }

    async fn invoke(&self, request: TaskRequest) -> TaskResult {
        match request {
            TaskRequest::ImageGenerate(input) => self.generate(input).await,
            other => Err(unexpected_task(IMAGE_PROVIDER, &other)),
        }
    }
}

pub struct PollinationsVoiceClient {
    http: PollinationsHttpClient,
    model: String,
}

impl PollinationsVoiceClient {
    pub fn new(config: &ProviderConfig) -> Self {
        Self::new_with_client(config, Client::new())
    }

    pub fn new_with_client(config: &ProviderConfig, client: Client) -> Self {
        Self {
            http: PollinationsHttpClient::new(config, client),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_VOICE_MODEL.to_string()),
        }
    }

    async fn synthesize(&self, input: VoiceInput) -> TaskResult {
        let voice = input.voice.as_deref().unwrap_or(DEFAULT_VOICE);
        let model = input.model_id.as_deref().unwrap_or(&self.model);

        let mut url = self.http.url(&[], input.text.trim())?;
        url.query_pairs_mut()
            .append_pair("model", model)
            .append_pair("voice", voice);

        tracing::debug!(
            "Synthesizing {} chars with Pollinations voice {}",
            input.text.chars().count(),
            voice
        );

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| http::send_error(VOICE_PROVIDER, e))?;

        let status = response.status().as_u16();
        let content_type = http::content_type(&response);
        let bytes = http::read_body(VOICE_PROVIDER, response).await?;

        // Pollinations answers some failures with 200 and a JSON/text body.
        if let Some(content_type) = content_type.filter(|ct| mime::is_error_document(ct)) {
            tracing::error!(
                "Pollinations voice returned {} instead of audio: {}",
                content_type,
                String::from_utf8_lossy(&bytes[..bytes.len().min(200)])
            );
            return Err(Error::upstream(
                status,
                format!("Pollinations voice returned {} instead of audio", content_type),
            ));
        }

        if !mime::is_mp3(&bytes) {
            tracing::error!(
                "Pollinations voice returned {} bytes without an MP3 signature (first 4 bytes: {:02X?})",
                bytes.len(),
                &bytes[..bytes.len().min(4)]
            );
            return Err(Error::upstream(
                status,
                "Pollinations voice returned data that is not MP3 audio",
            ));
        }

        Ok(TaskOutput::binary(bytes, MediaFormat::Mp3).with_model(model))
    }
}

#[async_trait]
impl TaskAdapter for PollinationsVoiceClient {
    fn provider(&self) -> &'static str {
        VOICE_PROVIDER
    }

    async fn invoke(&self, request: TaskRequest) -> TaskResult {
        match request {
            TaskRequest::VoiceSynthesize(input) => self.synthesize(input).await,
            other => Err(unexpected_task(VOICE_PROVIDER, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];
    const MP3: [u8; 4] = [0x49, 0x44, 0x33, 0x04];

    fn config(server: &MockServer) -> ProviderConfig {
        ProviderConfig::new(server.uri(), Duration::from_secs(5))
    }

    fn image_request(seed: Option<u64>) -> TaskRequest {
        TaskRequest::ImageGenerate(ImageInput {
            prompt: "a red fox in snow".to_string(),
            width: 512,
            height: 768,
            seed,
            model: None,
        })
    }

    fn voice_request(voice: Option<&str>) -> TaskRequest {
        TaskRequest::VoiceSynthesize(VoiceInput {
            text: "hello there".to_string(),
            voice: voice.map(str::to_string),
            model_id: None,
        })
    }

    #[tokio::test]
    async fn test_image_prompt_is_path_encoded_with_query() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/prompt/a%20red%20fox%20in%20snow"))
            .and(query_param("width", "512"))
            .and(query_param("height", "768"))
            .and(query_param("model", "flux"))
            .and(query_param("nologo", "true"))
            .and(query_param("seed", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let client = PollinationsImageClient::new(&config(&server).with_model("flux"));
        let output = client.invoke(image_request(Some(42))).await.unwrap();

        assert_eq!(
            output.payload,
            Payload::Binary {
                bytes: PNG.to_vec(),
                format: MediaFormat::Png
            }
        );
    }

    #[tokio::test]
    async fn test_image_format_follows_returned_signature() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(JPEG.to_vec()))
            .mount(&server)
            .await;

        let client = PollinationsImageClient::new(&config(&server));
        let output = client.invoke(image_request(None)).await.unwrap();

        match output.payload {
            Payload::Binary { format, .. } => assert_eq!(format, MediaFormat::Jpeg),
            other => panic!("expected binary payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_image_unrecognized_bytes_are_upstream_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"error\":\"queue full\"}"))
            .mount(&server)
            .await;

        let client = PollinationsImageClient::new(&config(&server));
        let err = client.invoke(image_request(None)).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_image_sends_bearer_token_when_configured() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(header("authorization", "Bearer poll-key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let client = PollinationsImageClient::new(&config(&server).with_api_key("poll-key"));
        client.invoke(image_request(None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_image_provider_error_keeps_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(530).set_body_string("origin down"))
            .mount(&server)
            .await;

        let client = PollinationsImageClient::new(&config(&server));
        match client.invoke(image_request(None)).await.unwrap_err() {
            Error::Upstream { status, .. } => assert_eq!(status, Some(530)),
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_voice_uses_default_voice_and_returns_mp3() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/hello%20there"))
            .and(query_param("model", "openai-audio"))
            .and(query_param("voice", "alloy"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/mpeg")
                    .set_body_bytes(MP3.to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = PollinationsVoiceClient::new(&config(&server));
        let output = client.invoke(voice_request(None)).await.unwrap();

        assert_eq!(
            output.payload,
            Payload::Binary {
                bytes: MP3.to_vec(),
                format: MediaFormat::Mp3
            }
        );
    }

    #[tokio::test]
    async fn test_voice_rejects_non_audio_success_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("voice", "nova"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string("{\"error\":\"unsupported voice\"}"),
            )
            .mount(&server)
            .await;

        let client = PollinationsVoiceClient::new(&config(&server));
        let err = client.invoke(voice_request(Some("nova"))).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_voice_rejects_body_without_mp3_signature() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/octet-stream")
                    .set_body_bytes(PNG.to_vec()),
            )
            .mount(&server)
            .await;

        let client = PollinationsVoiceClient::new(&config(&server));
        match client.invoke(voice_request(None)).await.unwrap_err() {
            Error::Upstream { status, message } => {
                assert_eq!(status, Some(200));
                assert!(message.contains("not MP3"));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_task_is_rejected_without_network() {
        let client = PollinationsVoiceClient::new(&ProviderConfig::new(
            "http://127.0.0.1:9",
            Duration::from_secs(1),
        ));
        let err = client.invoke(image_request(None)).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}

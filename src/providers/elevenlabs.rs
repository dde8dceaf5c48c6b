use crate::config::ProviderConfig;
use crate::models::{MediaFormat, TaskOutput, TaskRequest, TaskResult, VoiceInput};
use crate::providers::{http, mime, unexpected_task, TaskAdapter};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;

const PROVIDER: &str = "ElevenLabs";

pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
pub const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

pub struct ElevenLabsVoiceClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl ElevenLabsVoiceClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Self::new_with_client(config, Client::new())
    }

    pub fn new_with_client(config: &ProviderConfig, client: Client) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::Configuration("ELEVENLABS_API_KEY is not configured".to_string())
        })?;

        Ok(Self {
            client,
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            base_url: config.base_url().to_string(),
            timeout: config.timeout,
        })
    }

    /// `{base_url}/v1/text-to-speech/{voice_id}` with the voice id encoded as
    /// a single path segment.
    fn speech_url(&self, voice_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::Internal(format!("Invalid ElevenLabs base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Internal("ElevenLabs base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["v1", "text-to-speech"])
            .push(voice_id);
        Ok(url)
    }

    async fn synthesize(&self, input: VoiceInput) -> TaskResult {
        let voice_id = input.voice.as_deref().unwrap_or(DEFAULT_VOICE_ID).trim();
        let model_id = input.model_id.as_deref().unwrap_or(&self.model);
        let url = self.speech_url(voice_id)?;

        let body = SpeechRequest {
            text: input.text.trim(),
            model_id,
            voice_settings: VoiceSettings::default(),
        };

        tracing::debug!(
            "Requesting ElevenLabs speech for {} chars with voice {}",
            body.text.chars().count(),
            voice_id
        );

        let response = self
            .client
            .post(url)
            .header("xi-api-key", &self.api_key)
            .header("accept", "audio/mpeg")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, e))?;

        let status = response.status().as_u16();
        let content_type = http::content_type(&response);
        let bytes = http::read_body(PROVIDER, response).await?;

        if let Some(content_type) = content_type.filter(|ct| mime::is_error_document(ct)) {
            return Err(Error::upstream(
                status,
                format!("ElevenLabs returned {} instead of audio", content_type),
            ));
        }

        if !mime::is_mp3(&bytes) {
            return Err(Error::upstream(
                status,
                "ElevenLabs returned data that is not MP3 audio",
            ));
        }

        tracing::info!("ElevenLabs produced {} bytes of audio", bytes.len());
        Ok(TaskOutput::binary(bytes, MediaFormat::Mp3).with_model(model_id))
    }
}

#[async_trait]
impl TaskAdapter for ElevenLabsVoiceClient {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn invoke(&self, request: TaskRequest) -> TaskResult {
        match request {
            TaskRequest::VoiceSynthesize(input) => self.synthesize(input).await,
            other => Err(unexpected_task(PROVIDER, &other)),
        }
    }
}

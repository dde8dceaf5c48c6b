//! Data models and structures
//!
//! Defines the task requests accepted by the gateway, the outputs adapters
//! hand back, and the media formats those outputs declare.

use crate::{Error, Result};
use serde::Deserialize;

/// Longest text the voice route will forward to a TTS provider.
pub const MAX_VOICE_TEXT_CHARS: usize = 5000;
pub const MAX_SCREENSHOT_DIMENSION: u32 = 7680;
pub const MIN_IMAGE_DIMENSION: u32 = 64;
pub const MAX_IMAGE_DIMENSION: u32 = 2048;
pub const MAX_OUTPUT_TOKENS: u32 = 8192;

pub const DEFAULT_QUESTION: &str = "Solve this question step by step.";
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// The closed set of tasks the gateway knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    DocumentSolve,
    Screenshot,
    ImageGenerate,
    VoiceSynthesize,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::DocumentSolve,
        TaskKind::Screenshot,
        TaskKind::ImageGenerate,
        TaskKind::VoiceSynthesize,
    ];

    pub fn route(&self) -> &'static str {
        match self {
            TaskKind::DocumentSolve => "/solve-pdf",
            TaskKind::Screenshot => "/screenshot",
            TaskKind::ImageGenerate => "/generate-image",
            TaskKind::VoiceSynthesize => "/voiceover",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::DocumentSolve => "solve_pdf",
            TaskKind::Screenshot => "screenshot",
            TaskKind::ImageGenerate => "generate_image",
            TaskKind::VoiceSynthesize => "voiceover",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentSolveInput {
    pub file: Vec<u8>,
    /// Content type declared by the multipart part, if any.
    pub content_type: Option<String>,
    pub question: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl DocumentSolveInput {
    pub fn new(file: Vec<u8>) -> Self {
        Self {
            file,
            content_type: None,
            question: DEFAULT_QUESTION.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotInput {
    pub url: String,
    #[serde(default = "default_viewport_width")]
    pub width: u32,
    #[serde(default = "default_viewport_height")]
    pub height: u32,
    #[serde(default)]
    pub full_page: bool,
}

fn default_viewport_width() -> u32 {
    1920
}

fn default_viewport_height() -> u32 {
    1080
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageInput {
    pub prompt: String,
    #[serde(default = "default_image_dimension")]
    pub width: u32,
    #[serde(default = "default_image_dimension")]
    pub height: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_image_dimension() -> u32 {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceInput {
    pub text: String,
    /// Provider-specific voice; the adapter falls back to its own default.
    #[serde(default, alias = "voice_id")]
    pub voice: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// One inbound task. Exactly one variant is populated per request.
#[derive(Debug, Clone)]
pub enum TaskRequest {
    DocumentSolve(DocumentSolveInput),
    Screenshot(ScreenshotInput),
    ImageGenerate(ImageInput),
    VoiceSynthesize(VoiceInput),
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::DocumentSolve(_) => TaskKind::DocumentSolve,
            TaskRequest::Screenshot(_) => TaskKind::Screenshot,
            TaskRequest::ImageGenerate(_) => TaskKind::ImageGenerate,
            TaskRequest::VoiceSynthesize(_) => TaskKind::VoiceSynthesize,
        }
    }

    /// Checks the request content before any adapter sees it.
    ///
    /// Range and shape problems on numeric options are [`Error::Validation`];
    /// content an upstream could never accept is [`Error::Input`].
    pub fn validate(&self) -> Result<()> {
        match self {
            TaskRequest::DocumentSolve(input) => validate_document(input),
            TaskRequest::Screenshot(input) => validate_screenshot(input),
            TaskRequest::ImageGenerate(input) => validate_image(input),
            TaskRequest::VoiceSynthesize(input) => validate_voice(input),
        }
    }
}

fn validate_document(input: &DocumentSolveInput) -> Result<()> {
    if input.file.is_empty() {
        return Err(Error::Validation("Uploaded file is empty".to_string()));
    }
    if !(1..=MAX_OUTPUT_TOKENS).contains(&input.max_tokens) {
        return Err(Error::Validation(format!(
            "max_tokens must be between 1 and {}",
            MAX_OUTPUT_TOKENS
        )));
    }
    if !(0.0..=2.0).contains(&input.temperature) {
        return Err(Error::Validation(
            "temperature must be between 0.0 and 2.0".to_string(),
        ));
    }
    if let Some(content_type) = &input.content_type {
        if !content_type.starts_with("application/pdf") {
            return Err(Error::Input("File must be a PDF".to_string()));
        }
    }
    if !crate::providers::mime::is_pdf(&input.file) {
        return Err(Error::Input(
            "File is not a readable PDF document".to_string(),
        ));
    }
    Ok(())
}

fn validate_screenshot(input: &ScreenshotInput) -> Result<()> {
    if input.url.trim().is_empty() {
        return Err(Error::Input("url must not be empty".to_string()));
    }
    let url = reqwest::Url::parse(input.url.trim())
        .map_err(|e| Error::Input(format!("Invalid url '{}': {}", input.url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Input(format!(
            "Unsupported url scheme '{}': only http and https can be captured",
            url.scheme()
        )));
    }
    for (name, value) in [("width", input.width), ("height", input.height)] {
        if !(1..=MAX_SCREENSHOT_DIMENSION).contains(&value) {
            return Err(Error::Input(format!(
                "{} must be between 1 and {}",
                name, MAX_SCREENSHOT_DIMENSION
            )));
        }
    }
    Ok(())
}

fn validate_image(input: &ImageInput) -> Result<()> {
    if input.prompt.trim().is_empty() {
        return Err(Error::Input("prompt must not be empty".to_string()));
    }
    for (name, value) in [("width", input.width), ("height", input.height)] {
        if !(MIN_IMAGE_DIMENSION..=MAX_IMAGE_DIMENSION).contains(&value) {
            return Err(Error::Input(format!(
                "{} must be between {} and {}",
                name, MIN_IMAGE_DIMENSION, MAX_IMAGE_DIMENSION
            )));
        }
    }
    Ok(())
}

fn validate_voice(input: &VoiceInput) -> Result<()> {
    if input.text.trim().is_empty() {
        return Err(Error::Input("text must not be empty".to_string()));
    }
    if input.text.chars().count() > MAX_VOICE_TEXT_CHARS {
        return Err(Error::Input(format!(
            "Text too long (max {} chars)",
            MAX_VOICE_TEXT_CHARS
        )));
    }
    if let Some(voice) = &input.voice {
        let voice = voice.trim();
        if voice.is_empty() {
            return Err(Error::Input("voice must not be empty".to_string()));
        }
        if !voice
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::Input(format!(
                "Invalid voice '{}': only letters, digits, '_' and '-' are allowed",
                voice
            )));
        }
    }
    Ok(())
}

/// Declared format of a binary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Png,
    Jpeg,
    Webp,
    Mp3,
}

impl MediaFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Png => "png",
            MediaFormat::Jpeg => "jpeg",
            MediaFormat::Webp => "webp",
            MediaFormat::Mp3 => "mp3",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaFormat::Png => "image/png",
            MediaFormat::Jpeg => "image/jpeg",
            MediaFormat::Webp => "image/webp",
            MediaFormat::Mp3 => "audio/mpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Jpeg => "jpg",
            other => other.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Binary { bytes: Vec<u8>, format: MediaFormat },
}

/// Successful result of one task. Built once by an adapter and consumed when
/// the response is written.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub payload: Payload,
    pub model: Option<String>,
    pub tokens_used: Option<u64>,
}

impl TaskOutput {
    pub fn text(text: String) -> Self {
        Self {
            payload: Payload::Text(text),
            model: None,
            tokens_used: None,
        }
    }

    pub fn binary(bytes: Vec<u8>, format: MediaFormat) -> Self {
        Self {
            payload: Payload::Binary { bytes, format },
            model: None,
            tokens_used: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tokens_used(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }
}

/// Outcome of a task: the output on success, a typed [`Error`] otherwise.
pub type TaskResult = Result<TaskOutput>;

//! Process configuration
//!
//! Loaded once at startup from the environment (and `.env`, when present) into
//! an immutable [`Config`]. Adapters receive the slice they need through their
//! constructors; nothing reads the environment after startup.

use crate::models::TaskKind;
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const SCREENSHOTONE_BASE_URL: &str = "https://api.screenshotone.com";
pub const POLLINATIONS_IMAGE_BASE_URL: &str = "https://image.pollinations.ai";
pub const POLLINATIONS_TEXT_BASE_URL: &str = "https://text.pollinations.ai";
pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_REQUESTS: u64 = 100;

/// Static settings for one upstream provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Ceiling applied to each outbound HTTP call.
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: None,
            timeout,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub(crate) fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotProvider {
    ScreenshotOne,
    Browser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceProvider {
    ElevenLabs,
    Pollinations,
}

/// Hard deadline the gateway gives each route.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub document_solve: Duration,
    pub screenshot: Duration,
    pub image_generate: Duration,
    pub voice_synthesize: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            document_solve: Duration::from_secs(60),
            screenshot: Duration::from_secs(30),
            image_generate: Duration::from_secs(60),
            voice_synthesize: Duration::from_secs(60),
        }
    }
}

impl Deadlines {
    pub fn for_task(&self, kind: TaskKind) -> Duration {
        match kind {
            TaskKind::DocumentSolve => self.document_solve,
            TaskKind::Screenshot => self.screenshot,
            TaskKind::ImageGenerate => self.image_generate,
            TaskKind::VoiceSynthesize => self.voice_synthesize,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_upload_bytes: u64,
    /// Requests served before the worker asks to be recycled. `0` disables.
    pub max_requests: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub gemini: ProviderConfig,
    pub screenshot_provider: ScreenshotProvider,
    pub screenshotone: ProviderConfig,
    pub chrome_executable: Option<PathBuf>,
    pub image: ProviderConfig,
    pub voice_provider: VoiceProvider,
    pub elevenlabs: ProviderConfig,
    pub pollinations_voice: ProviderConfig,
    pub deadlines: Deadlines,
    pub limits: Limits,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let deadlines = Deadlines {
            document_solve: Duration::from_secs(parse_or(&get, "SOLVE_TIMEOUT_SECS", 60)?),
            screenshot: Duration::from_secs(parse_or(&get, "SCREENSHOT_TIMEOUT_SECS", 30)?),
            image_generate: Duration::from_secs(parse_or(&get, "IMAGE_TIMEOUT_SECS", 60)?),
            voice_synthesize: Duration::from_secs(parse_or(&get, "VOICE_TIMEOUT_SECS", 60)?),
        };

        let limits = Limits {
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            max_requests: parse_or(&get, "MAX_REQUESTS", DEFAULT_MAX_REQUESTS)?,
        };

        let mut gemini = ProviderConfig::new(
            or("GEMINI_BASE_URL", GEMINI_BASE_URL),
            deadlines.document_solve,
        )
        .with_model(or("GEMINI_MODEL", "gemini-1.5-flash"));
        gemini.api_key = get("GEMINI_API_KEY");

        let mut screenshotone = ProviderConfig::new(
            or("SCREENSHOTONE_BASE_URL", SCREENSHOTONE_BASE_URL),
            deadlines.screenshot,
        );
        screenshotone.api_key = get("SCREENSHOTONE_KEY");

        let screenshot_provider = match get("SCREENSHOT_PROVIDER") {
            Some(value) => parse_screenshot_provider(&value)?,
            None if screenshotone.api_key.is_some() => ScreenshotProvider::ScreenshotOne,
            None => ScreenshotProvider::Browser,
        };

        let pollinations_key = get("POLLINATIONS_API_KEY");

        let mut image = ProviderConfig::new(
            or("POLLINATIONS_IMAGE_BASE_URL", POLLINATIONS_IMAGE_BASE_URL),
            deadlines.image_generate,
        )
        .with_model(or("IMAGE_MODEL", "flux"));
        image.api_key = pollinations_key.clone();

        let mut elevenlabs = ProviderConfig::new(
            or("ELEVENLABS_BASE_URL", ELEVENLABS_BASE_URL),
            deadlines.voice_synthesize,
        )
        .with_model(or("ELEVENLABS_MODEL", "eleven_multilingual_v2"));
        elevenlabs.api_key = get("ELEVENLABS_API_KEY");

        let mut pollinations_voice = ProviderConfig::new(
            or("POLLINATIONS_TEXT_BASE_URL", POLLINATIONS_TEXT_BASE_URL),
            deadlines.voice_synthesize,
        )
        .with_model("openai-audio");
        pollinations_voice.api_key = pollinations_key;

        let voice_provider = match get("VOICE_PROVIDER") {
            Some(value) => parse_voice_provider(&value)?,
            None if elevenlabs.api_key.is_some() => VoiceProvider::ElevenLabs,
            None => VoiceProvider::Pollinations,
        };

        Ok(Self {
            host: or("HOST", "0.0.0.0"),
            port: parse_or(&get, "PORT", 8000)?,
            gemini,
            screenshot_provider,
            screenshotone,
            chrome_executable: get("CHROME_EXECUTABLE").map(PathBuf::from),
            image,
            voice_provider,
            elevenlabs,
            pollinations_voice,
            deadlines,
            limits,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid {}='{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_screenshot_provider(value: &str) -> Result<ScreenshotProvider> {
    match value.trim().to_ascii_lowercase().as_str() {
        "screenshotone" => Ok(ScreenshotProvider::ScreenshotOne),
        "browser" | "headless" => Ok(ScreenshotProvider::Browser),
        other => Err(Error::Configuration(format!(
            "Unknown SCREENSHOT_PROVIDER '{}'. Expected 'screenshotone' or 'browser'",
            other
        ))),
    }
}

fn parse_voice_provider(value: &str) -> Result<VoiceProvider> {
    match value.trim().to_ascii_lowercase().as_str() {
        "elevenlabs" => Ok(VoiceProvider::ElevenLabs),
        "pollinations" => Ok(VoiceProvider::Pollinations),
        other => Err(Error::Configuration(format!(
            "Unknown VOICE_PROVIDER '{}'. Expected 'elevenlabs' or 'pollinations'",
            other
        ))),
    }
}

//! Upstream provider adapters
//!
//! Each adapter wraps one third-party API behind the shared [`TaskAdapter`]
//! contract: it takes a normalized [`TaskRequest`], calls its provider, and
//! returns a [`TaskResult`] with failures mapped onto the crate [`Error`]
//! taxonomy.

pub mod browser;
pub mod elevenlabs;
pub mod gemini;
pub(crate) mod http;
pub mod mime;
pub mod mock;
pub mod pollinations;
pub mod screenshot;

pub use browser::{BrowserLauncher, BrowserScreenshotClient, BrowserSession};
pub use elevenlabs::ElevenLabsVoiceClient;
pub use gemini::GeminiDocumentClient;
pub use mock::MockAdapter;
pub use pollinations::{PollinationsImageClient, PollinationsVoiceClient};
pub use screenshot::ScreenshotOneClient;

use crate::models::{TaskRequest, TaskResult};
use crate::Error;
use async_trait::async_trait;

#[async_trait]
pub trait TaskAdapter: Send + Sync {
    /// Human-readable provider name used in logs and error messages.
    fn provider(&self) -> &'static str;

    async fn invoke(&self, request: TaskRequest) -> TaskResult;
}

/// Error for a request routed to an adapter that serves a different task.
pub(crate) fn unexpected_task(provider: &str, request: &TaskRequest) -> Error {
    Error::Internal(format!(
        "{} adapter cannot handle {:?} requests",
        provider,
        request.kind()
    ))
}

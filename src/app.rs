//! Application wiring: adapter selection, shared state, and the HTTP router.

use crate::config::{Config, Deadlines, Limits, ScreenshotProvider, VoiceProvider};
use crate::error::error_envelope;
use crate::gateway::{AdapterSlot, Adapters, Gateway};
use crate::guard::ResourceGuard;
use crate::providers::{
    ElevenLabsVoiceClient, GeminiDocumentClient, PollinationsImageClient, PollinationsVoiceClient,
    ScreenshotOneClient, TaskAdapter,
};
use crate::routes;
use crate::{Error, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Process-wide state shared by every request.
pub struct App {
    gateway: Gateway,
    guard: ResourceGuard,
}

/// Injectable bundle used to construct [`App`] in tests and harnesses.
pub struct AppServices {
    pub adapters: Adapters,
    pub deadlines: Deadlines,
    pub limits: Limits,
}

impl App {
    /// Build an app from concrete adapters.
    ///
    /// This is primarily useful for integration tests that inject mocks.
    pub fn with_services(services: AppServices) -> Self {
        Self {
            gateway: Gateway::new(services.adapters, services.deadlines),
            guard: ResourceGuard::new(services.limits),
        }
    }

    /// Selects one adapter per route from configuration. Routes whose
    /// provider lacks credentials are disabled rather than failing startup.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("nanobot-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let adapters = Adapters {
            document_solve: slot(GeminiDocumentClient::new_with_client(
                &config.gemini,
                client.clone(),
            )),
            screenshot: match config.screenshot_provider {
                ScreenshotProvider::ScreenshotOne => slot(ScreenshotOneClient::new_with_client(
                    &config.screenshotone,
                    client.clone(),
                )),
                ScreenshotProvider::Browser => browser_slot(config),
            },
            image_generate: AdapterSlot::ready(PollinationsImageClient::new_with_client(
                &config.image,
                client.clone(),
            )),
            voice_synthesize: match config.voice_provider {
                VoiceProvider::ElevenLabs => slot(ElevenLabsVoiceClient::new_with_client(
                    &config.elevenlabs,
                    client.clone(),
                )),
                VoiceProvider::Pollinations => AdapterSlot::ready(
                    PollinationsVoiceClient::new_with_client(&config.pollinations_voice, client),
                ),
            },
        };

        Ok(Self::with_services(AppServices {
            adapters,
            deadlines: config.deadlines,
            limits: config.limits,
        }))
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn guard(&self) -> &ResourceGuard {
        &self.guard
    }

    pub fn router(self: Arc<Self>) -> Router {
        let body_limit = self.guard.max_body_bytes();

        Router::new()
            .route("/", get(routes::root))
            .route("/health", get(routes::health))
            .route("/solve-pdf", post(routes::solve_pdf))
            .route("/screenshot", post(routes::screenshot))
            .route("/generate-image", post(routes::generate_image))
            .route("/voiceover", post(routes::voiceover))
            .route("/cleanup", post(routes::cleanup).get(routes::cleanup))
            .fallback(routes::not_found)
            .method_not_allowed_fallback(routes::method_not_allowed)
            .layer(from_fn_with_state(Arc::clone(&self), guard_middleware))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::custom(panic_response))
            .with_state(self)
    }
}

fn slot<A: TaskAdapter + 'static>(adapter: Result<A>) -> AdapterSlot {
    match adapter {
        Ok(adapter) => AdapterSlot::ready(adapter),
        Err(e) => AdapterSlot::disabled(e.to_string()),
    }
}

#[cfg(feature = "headless-browser")]
fn browser_slot(config: &Config) -> AdapterSlot {
    use crate::providers::browser::{BrowserScreenshotClient, ChromiumLauncher};

    let launcher = ChromiumLauncher::new(config.chrome_executable.clone());
    AdapterSlot::ready(BrowserScreenshotClient::new(Arc::new(launcher)))
}

#[cfg(not(feature = "headless-browser"))]
fn browser_slot(_config: &Config) -> AdapterSlot {
    AdapterSlot::disabled(
        "browser screenshots need the `headless-browser` feature; set SCREENSHOTONE_KEY instead",
    )
}

/// Admission check before the handler, reclaim and request counting after it.
async fn guard_middleware(State(app): State<Arc<App>>, req: Request<Body>, next: Next) -> Response {
    let declared_len = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let response = match app.guard.before(declared_len) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    };

    app.guard.after();
    response
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {}", detail);

    let err = Error::Internal(detail.to_string());
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(error_envelope(err.kind(), &err.public_message())),
    )
        .into_response()
}

//! Screenshot capture by driving a headless browser.
//!
//! A browser session is an expensive, leak-prone resource: every capture
//! acquires one through [`BrowserLauncher::launch`] and holds it in a
//! [`SessionGuard`]. The guard closes the session on success and on failure;
//! if the capture future is dropped (deadline expiry), the guard's `Drop`
//! releases it instead. `open_sessions` counts guards alive right now.

use crate::models::{ScreenshotInput, TaskOutput, TaskRequest, TaskResult};
use crate::providers::{mime, unexpected_task, TaskAdapter};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PROVIDER: &str = "headless browser";

/// Starts a fresh browser session sized for one capture.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, width: u32, height: u32) -> Result<Box<dyn BrowserSession>>;
}

/// One live browser. Dropping it must release the underlying process.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigates to `url` and returns the raster capture.
    async fn capture(&mut self, url: &str, full_page: bool) -> Result<Vec<u8>>;

    /// Graceful shutdown. Called at most once, before drop.
    async fn close(&mut self) -> Result<()>;
}

/// Scoped ownership of a [`BrowserSession`].
struct SessionGuard {
    session: Box<dyn BrowserSession>,
    open_sessions: Arc<AtomicUsize>,
}

impl SessionGuard {
    fn new(session: Box<dyn BrowserSession>, open_sessions: Arc<AtomicUsize>) -> Self {
        open_sessions.fetch_add(1, Ordering::SeqCst);
        Self {
            session,
            open_sessions,
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.session.close().await {
            tracing::warn!("Failed to close browser session cleanly: {}", e);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct BrowserScreenshotClient {
    launcher: Arc<dyn BrowserLauncher>,
    open_sessions: Arc<AtomicUsize>,
}

impl BrowserScreenshotClient {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of browser sessions currently held by in-flight captures.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Shared handle on the open-session counter, for callers that give the
    /// client away but still want to observe it.
    pub fn session_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.open_sessions)
    }

    async fn capture(&self, input: ScreenshotInput) -> TaskResult {
        let session = self
            .launcher
            .launch(input.width, input.height)
            .await
            .map_err(|e| match e {
                Error::Upstream { .. } | Error::Configuration(_) => e,
                other => Error::Upstream {
                    status: None,
                    message: format!("Failed to launch browser: {}", other),
                },
            })?;
        let mut guard = SessionGuard::new(session, Arc::clone(&self.open_sessions));

        tracing::debug!("Browser session open, navigating to {}", input.url);
        let captured = guard.session.capture(input.url.trim(), input.full_page).await;
        guard.close().await;

        let bytes = captured.map_err(|e| match e {
            Error::Upstream { .. } | Error::UpstreamTimeout(_) => e,
            other => Error::Upstream {
                status: None,
                message: format!("Browser capture failed: {}", other),
            },
        })?;

        let format = mime::detect_image_format(&bytes).ok_or_else(|| Error::Upstream {
            status: None,
            message: "Browser capture did not produce an image".to_string(),
        })?;

        Ok(TaskOutput::binary(bytes, format))
    }
}

#[async_trait]
impl TaskAdapter for BrowserScreenshotClient {
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

#[cfg(feature = "headless-browser")]
pub use chromium::ChromiumLauncher;

#[cfg(feature = "headless-browser")]
mod chromium {
    use super::{BrowserLauncher, BrowserSession};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
    use chromiumoxide::handler::viewport::Viewport;
    use chromiumoxide::page::ScreenshotParams;
    use futures::StreamExt;
    use std::path::PathBuf;
    use tokio::task::JoinHandle;

    /// Launches a local Chromium over CDP, one process per capture.
    pub struct ChromiumLauncher {
        executable: Option<PathBuf>,
    }

    impl ChromiumLauncher {
        pub fn new(executable: Option<PathBuf>) -> Self {
            Self { executable }
        }
    }

    fn browser_error(context: &str, e: impl std::fmt::Display) -> Error {
        Error::Upstream {
            status: None,
            message: format!("{}: {}", context, e),
        }
    }

    #[async_trait]
    impl BrowserLauncher for ChromiumLauncher {
        async fn launch(&self, width: u32, height: u32) -> Result<Box<dyn BrowserSession>> {
            let mut builder = BrowserConfig::builder()
                .no_sandbox()
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .window_size(width, height)
                .viewport(Viewport {
                    width,
                    height,
                    device_scale_factor: None,
                    emulating_mobile: false,
                    is_landscape: width > height,
                    has_touch: false,
                });
            if let Some(executable) = &self.executable {
                builder = builder.chrome_executable(executable);
            }
            let config = builder
                .build()
                .map_err(|e| Error::Configuration(format!("Invalid browser config: {}", e)))?;

            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| browser_error("Failed to launch browser", e))?;
            let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

            Ok(Box::new(ChromiumSession {
                browser,
                handler_task,
            }))
        }
    }

    struct ChromiumSession {
        browser: Browser,
        handler_task: JoinHandle<()>,
    }

    #[async_trait]
    impl BrowserSession for ChromiumSession {
        async fn capture(&mut self, url: &str, full_page: bool) -> Result<Vec<u8>> {
            let page = self
                .browser
                .new_page(url)
                .await
                .map_err(|e| browser_error("Navigation failed", e))?;
            page.wait_for_navigation()
                .await
                .map_err(|e| browser_error("Page did not finish loading", e))?;

            let params = ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(full_page)
                .build();
            let bytes = page
                .screenshot(params)
                .await
                .map_err(|e| browser_error("Screenshot capture failed", e))?;

            if let Err(e) = page.close().await {
                tracing::debug!("Failed to close page: {}", e);
            }
            Ok(bytes)
        }

        async fn close(&mut self) -> Result<()> {
            self.browser
                .close()
                .await
                .map_err(|e| browser_error("Failed to close browser", e))?;
            self.browser.wait().await?;
            self.handler_task.abort();
            Ok(())
        }
    }

    impl Drop for ChromiumSession {
        fn drop(&mut self) {
            // Browser's own Drop kills the child process if close() never ran.
            self.handler_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaFormat, Payload};
    use std::time::Duration;

    const PNG: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[derive(Clone, Copy)]
    enum Behavior {
        Capture,
        Fail,
        Hang,
    }

    #[derive(Clone, Default)]
    struct Counters {
        launched: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    struct FakeLauncher {
        behavior: Behavior,
        counters: Counters,
    }

    struct FakeSession {
        behavior: Behavior,
        counters: Counters,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self, _width: u32, _height: u32) -> Result<Box<dyn BrowserSession>> {
            self.counters.launched.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                behavior: self.behavior,
                counters: self.counters.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn capture(&mut self, _url: &str, _full_page: bool) -> Result<Vec<u8>> {
            match self.behavior {
                Behavior::Capture => Ok(PNG.to_vec()),
                Behavior::Fail => Err(Error::Internal("net::ERR_NAME_NOT_RESOLVED".to_string())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(PNG.to_vec())
                }
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn client(behavior: Behavior) -> (BrowserScreenshotClient, Counters) {
        let counters = Counters::default();
        let launcher = FakeLauncher {
            behavior,
            counters: counters.clone(),
        };
        (BrowserScreenshotClient::new(Arc::new(launcher)), counters)
    }

    fn request() -> TaskRequest {
        TaskRequest::Screenshot(ScreenshotInput {
            url: "https://example.com".to_string(),
            width: 800,
            height: 600,
            full_page: false,
        })
    }

    #[tokio::test]
    async fn test_successful_capture_closes_session() {
        let (client, counters) = client(Behavior::Capture);

        let output = client.invoke(request()).await.unwrap();

        assert_eq!(
            output.payload,
            Payload::Binary {
                bytes: PNG.to_vec(),
                format: MediaFormat::Png
            }
        );
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.dropped.load(Ordering::SeqCst), 1);
        assert_eq!(client.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_failed_navigation_closes_session_and_maps_to_upstream() {
        let (client, counters) = client(Behavior::Fail);

        let err = client.invoke(request()).await.unwrap_err();

        assert!(matches!(err, Error::Upstream { .. }));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(client.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_capture_releases_session() {
        let (client, counters) = client(Behavior::Hang);

        for _ in 0..3 {
            let result =
                tokio::time::timeout(Duration::from_millis(50), client.invoke(request())).await;
            assert!(result.is_err());
        }

        assert_eq!(counters.launched.load(Ordering::SeqCst), 3);
        assert_eq!(counters.dropped.load(Ordering::SeqCst), 3);
        assert_eq!(client.open_sessions(), 0);
    }
}

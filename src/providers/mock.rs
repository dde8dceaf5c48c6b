use super::TaskAdapter;
use crate::models::{MediaFormat, TaskOutput, TaskRequest, TaskResult};
use crate::Error;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A tiny valid 1x1 PNG.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
    0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1 pixel
    0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49,
    0x44, 0x41, // IDAT chunk
    0x54, 0x08, 0x99, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0xE2,
    0x25, 0x00, 0xBC, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, // IEND chunk
    0x44, 0xAE, 0x42, 0x60, 0x82,
];

#[derive(Debug, Clone)]
enum MockResponse {
    Output(TaskOutput),
    Failure { status: u16, message: String },
}

/// Scripted adapter for tests and local runs without provider credentials.
///
/// Responses cycle in the order they were added. With none configured it
/// answers text for document tasks, a short MP3 frame for voice, and
/// [`TINY_PNG`] for everything else.
#[derive(Clone)]
pub struct MockAdapter {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    delay: Option<Duration>,
    call_count: Arc<Mutex<usize>>,
    in_flight: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<TaskRequest>>>,
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            delay: None,
            call_count: Arc::new(Mutex::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_output(self, output: TaskOutput) -> Self {
        lock(&self.responses).push(MockResponse::Output(output));
        self
    }

    /// Queues an upstream failure with the given provider status.
    pub fn with_failure(self, status: u16, message: impl Into<String>) -> Self {
        lock(&self.responses).push(MockResponse::Failure {
            status,
            message: message.into(),
        });
        self
    }

    /// Sleeps before answering, to exercise deadlines.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn get_call_count(&self) -> usize {
        *lock(&self.call_count)
    }

    /// Invocations started but not yet finished or dropped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Every request this adapter has received, oldest first.
    pub fn requests(&self) -> Vec<TaskRequest> {
        lock(&self.requests).clone()
    }

    fn default_output(request: &TaskRequest) -> TaskOutput {
        match request {
            TaskRequest::DocumentSolve(input) => {
                TaskOutput::text(format!("Mock solution for: {}", input.question))
                    .with_model("mock")
                    .with_tokens_used(42)
            }
            TaskRequest::VoiceSynthesize(_) => {
                TaskOutput::binary(vec![0xFF, 0xFB, 0x90, 0x64], MediaFormat::Mp3)
            }
            TaskRequest::Screenshot(_) | TaskRequest::ImageGenerate(_) => {
                TaskOutput::binary(TINY_PNG.to_vec(), MediaFormat::Png)
            }
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskAdapter for MockAdapter {
    fn provider(&self) -> &'static str {
        "mock"
    }

    async fn invoke(&self, request: TaskRequest) -> TaskResult {
        let _in_flight = InFlight::enter(&self.in_flight);
        let count = {
            let mut count = lock(&self.call_count);
            *count += 1;
            *count
        };
        lock(&self.requests).push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = {
            let responses = lock(&self.responses);
            if responses.is_empty() {
                None
            } else {
                Some(responses[(count - 1) % responses.len()].clone())
            }
        };

        match response {
            None => Ok(Self::default_output(&request)),
            Some(MockResponse::Output(output)) => Ok(output),
            Some(MockResponse::Failure { status, message }) => Err(Error::upstream(status, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentSolveInput, ImageInput, Payload};

    fn image_request() -> TaskRequest {
        TaskRequest::ImageGenerate(ImageInput {
            prompt: "a harbor at dawn".to_string(),
            width: 256,
            height: 256,
            seed: None,
            model: None,
        })
    }

    #[tokio::test]
    async fn test_mock_default_outputs_follow_task() {
        let mock = MockAdapter::new();

        let output = mock.invoke(image_request()).await.unwrap();
        assert_eq!(
            output.payload,
            Payload::Binary {
                bytes: TINY_PNG.to_vec(),
                format: MediaFormat::Png
            }
        );

        let document = TaskRequest::DocumentSolve(DocumentSolveInput::new(b"%PDF-1.4".to_vec()));
        let output = mock.invoke(document).await.unwrap();
        assert!(matches!(output.payload, Payload::Text(ref text) if text.contains("Mock solution")));
        assert_eq!(output.tokens_used, Some(42));
    }

    #[tokio::test]
    async fn test_mock_responses_cycle() {
        let mock = MockAdapter::new()
            .with_output(TaskOutput::text("first".to_string()))
            .with_failure(503, "overloaded");

        assert!(mock.invoke(image_request()).await.is_ok());
        match mock.invoke(image_request()).await.unwrap_err() {
            Error::Upstream { status, .. } => assert_eq!(status, Some(503)),
            other => panic!("expected upstream error, got {:?}", other),
        }
        let third = mock.invoke(image_request()).await.unwrap();
        assert_eq!(third.payload, Payload::Text("first".to_string()));
    }

    #[tokio::test]
    async fn test_mock_call_count_and_requests() {
        let mock = MockAdapter::new();
        assert_eq!(mock.get_call_count(), 0);

        mock.invoke(image_request()).await.unwrap();
        mock.invoke(image_request()).await.unwrap();

        assert_eq!(mock.get_call_count(), 2);
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_in_flight_released_on_cancel() {
        let mock = MockAdapter::new().with_delay(Duration::from_secs(60));

        let result =
            tokio::time::timeout(Duration::from_millis(20), mock.invoke(image_request())).await;

        assert!(result.is_err());
        assert_eq!(mock.get_call_count(), 1);
        assert_eq!(mock.in_flight(), 0);
    }
}

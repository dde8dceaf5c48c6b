//! Task dispatch
//!
//! The [`Gateway`] owns one adapter slot per [`TaskKind`]. `dispatch` validates
//! the request, looks up the slot, and runs the adapter under the route
//! deadline. A disabled slot or an invalid request never reaches an adapter.

use crate::config::Deadlines;
use crate::models::{TaskKind, TaskRequest, TaskResult};
use crate::providers::TaskAdapter;
use crate::Error;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a route is bound to for the life of the process.
#[derive(Clone)]
pub enum AdapterSlot {
    Ready(Arc<dyn TaskAdapter>),
    /// The route answers 503 with this reason.
    Disabled(String),
}

impl AdapterSlot {
    pub fn ready(adapter: impl TaskAdapter + 'static) -> Self {
        AdapterSlot::Ready(Arc::new(adapter))
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        AdapterSlot::Disabled(reason.into())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, AdapterSlot::Ready(_))
    }

    /// Provider name for ready slots.
    pub fn provider(&self) -> Option<&'static str> {
        match self {
            AdapterSlot::Ready(adapter) => Some(adapter.provider()),
            AdapterSlot::Disabled(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct Adapters {
    pub document_solve: AdapterSlot,
    pub screenshot: AdapterSlot,
    pub image_generate: AdapterSlot,
    pub voice_synthesize: AdapterSlot,
}

impl Adapters {
    pub fn get(&self, kind: TaskKind) -> &AdapterSlot {
        match kind {
            TaskKind::DocumentSolve => &self.document_solve,
            TaskKind::Screenshot => &self.screenshot,
            TaskKind::ImageGenerate => &self.image_generate,
            TaskKind::VoiceSynthesize => &self.voice_synthesize,
        }
    }
}

pub struct Gateway {
    adapters: Adapters,
    deadlines: Deadlines,
}

impl Gateway {
    pub fn new(adapters: Adapters, deadlines: Deadlines) -> Self {
        for kind in TaskKind::ALL {
            match adapters.get(kind) {
                AdapterSlot::Ready(adapter) => {
                    info!("{} -> {}", kind.route(), adapter.provider())
                }
                AdapterSlot::Disabled(reason) => {
                    warn!("{} is disabled: {}", kind.route(), reason)
                }
            }
        }
        Self {
            adapters,
            deadlines,
        }
    }

    pub fn slot(&self, kind: TaskKind) -> &AdapterSlot {
        self.adapters.get(kind)
    }

    /// Runs one task to completion or failure.
    ///
    /// Exactly one adapter invocation happens per valid request on an enabled
    /// route; zero otherwise. The adapter future is dropped when the route
    /// deadline expires, which releases whatever it holds.
    pub async fn dispatch(&self, request: TaskRequest) -> TaskResult {
        let kind = request.kind();
        let request_id = Uuid::new_v4();

        request.validate()?;

        let adapter = match self.adapters.get(kind) {
            AdapterSlot::Ready(adapter) => Arc::clone(adapter),
            AdapterSlot::Disabled(reason) => {
                return Err(Error::Configuration(format!(
                    "{} is unavailable: {}",
                    kind.route(),
                    reason
                )));
            }
        };

        let deadline = self.deadlines.for_task(kind);
        debug!(
            "[{}] {} dispatching to {} (deadline {:?})",
            request_id,
            kind.name(),
            adapter.provider(),
            deadline
        );

        let started = Instant::now();
        let result = match tokio::time::timeout(deadline, adapter.invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::UpstreamTimeout(format!(
                "{} did not respond within {}s",
                adapter.provider(),
                deadline.as_secs_f32()
            ))),
        };

        match &result {
            Ok(_) => info!(
                "[{}] {} completed via {} in {:?}",
                request_id,
                kind.name(),
                adapter.provider(),
                started.elapsed()
            ),
            Err(e) => warn!(
                "[{}] {} failed via {} after {:?}: {}",
                request_id,
                kind.name(),
                adapter.provider(),
                started.elapsed(),
                e
            ),
        }

        result
    }
}

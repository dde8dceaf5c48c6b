//! Per-request resource hygiene
//!
//! Rejects oversized uploads before they are buffered, returns freed heap to
//! the OS after each request, and asks the server to recycle itself once it has
//! served its request quota.

use crate::config::Limits;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Allowance for multipart boundaries and the small text fields that travel
/// with an upload.
pub const FORM_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Outcome of one [`ResourceGuard::reclaim`] pass.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReclaimReport {
    pub trimmed: bool,
    pub resident_bytes: Option<u64>,
}

impl ReclaimReport {
    pub fn resident_mb(&self) -> Option<f64> {
        self.resident_bytes
            .map(|bytes| (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0)
    }
}

pub struct ResourceGuard {
    max_upload_bytes: u64,
    max_requests: u64,
    served: AtomicU64,
    recycle: Notify,
}

impl ResourceGuard {
    pub fn new(limits: Limits) -> Self {
        Self {
            max_upload_bytes: limits.max_upload_bytes,
            max_requests: limits.max_requests,
            served: AtomicU64::new(0),
            recycle: Notify::new(),
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Ceiling for a whole request body, upload plus form framing.
    pub fn max_body_bytes(&self) -> usize {
        usize::try_from(self.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES))
            .unwrap_or(usize::MAX)
    }

    /// Admission check on the declared `Content-Length`, before any body is read.
    pub fn before(&self, declared_len: Option<u64>) -> Result<()> {
        match declared_len {
            Some(len) if len > self.max_body_bytes() as u64 => Err(Error::PayloadTooLarge(
                format!("File too large (max {} bytes)", self.max_upload_bytes),
            )),
            _ => Ok(()),
        }
    }

    /// Tracks bytes of one streamed upload against the limit.
    pub fn upload_limit(&self) -> UploadLimit {
        UploadLimit {
            limit: self.max_upload_bytes,
            seen: 0,
        }
    }

    /// Post-request hook. Runs on success and failure alike.
    ///
    /// Counting and the recycle signal happen inline. The reclaim pass runs on
    /// the blocking pool; the returned handle may be dropped.
    pub fn after(&self) -> JoinHandle<ReclaimReport> {
        let served = self.served.fetch_add(1, Ordering::SeqCst) + 1;

        if self.max_requests > 0 && served == self.max_requests {
            info!(
                "Served {} requests, requesting worker recycle",
                self.max_requests
            );
            self.recycle.notify_one();
        }

        tokio::task::spawn_blocking(move || {
            let report = reclaim_now();
            debug!(
                "Request {} done (trimmed: {}, rss: {:?} bytes)",
                served, report.trimmed, report.resident_bytes
            );
            report
        })
    }

    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    /// Hands freed heap back to the OS where the allocator supports it, and
    /// reports current resident memory.
    pub fn reclaim(&self) -> ReclaimReport {
        reclaim_now()
    }

    /// [`reclaim`](Self::reclaim) on the blocking pool, for async callers.
    pub async fn reclaim_blocking(&self) -> ReclaimReport {
        match tokio::task::spawn_blocking(reclaim_now).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Reclaim task failed: {}", e);
                ReclaimReport {
                    trimmed: false,
                    resident_bytes: None,
                }
            }
        }
    }

    /// Resolves once the request quota has been reached.
    pub async fn recycle_requested(&self) {
        self.recycle.notified().await;
    }
}

/// Running byte count for one upload.
#[derive(Debug)]
pub struct UploadLimit {
    limit: u64,
    seen: u64,
}

impl UploadLimit {
    pub fn accept(&mut self, chunk_len: usize) -> Result<()> {
        self.seen = self.seen.saturating_add(chunk_len as u64);
        if self.seen > self.limit {
            return Err(Error::PayloadTooLarge(format!(
                "File too large (max {} bytes)",
                self.limit
            )));
        }
        Ok(())
    }
}

fn reclaim_now() -> ReclaimReport {
    ReclaimReport {
        trimmed: trim_heap(),
        resident_bytes: resident_bytes(),
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn trim_heap() -> bool {
    // SAFETY: malloc_trim has no preconditions and only touches allocator state.
    unsafe { libc::malloc_trim(0) == 1 }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn trim_heap() -> bool {
    false
}

#[cfg(target_os = "linux")]
fn resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    // SAFETY: sysconf is a pure query.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(page_size).ok().map(|size| pages * size)
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn guard(max_upload_bytes: u64, max_requests: u64) -> ResourceGuard {
        ResourceGuard::new(Limits {
            max_upload_bytes,
            max_requests,
        })
    }

    #[test]
    fn test_declared_length_over_limit_is_rejected() {
        let guard = guard(1024, 0);

        guard.before(None).unwrap();
        guard.before(Some(1024)).unwrap();
        guard.before(Some(1024 + FORM_OVERHEAD_BYTES)).unwrap();

        let err = guard.before(Some(1024 + FORM_OVERHEAD_BYTES + 1)).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge(_)));
        assert_eq!(err.status_code().as_u16(), 413);
    }

    #[test]
    fn test_upload_limit_counts_chunks() {
        let guard = guard(10, 0);
        let mut limit = guard.upload_limit();

        limit.accept(4).unwrap();
        limit.accept(6).unwrap();
        assert!(matches!(limit.accept(1), Err(Error::PayloadTooLarge(_))));
    }

    #[test]
    fn test_reclaim_is_repeatable() {
        let guard = guard(1024, 0);
        let first = guard.reclaim();
        let second = guard.reclaim();

        #[cfg(target_os = "linux")]
        {
            assert!(first.resident_bytes.unwrap() > 0);
            assert!(second.resident_mb().unwrap() > 0.0);
        }
        #[cfg(not(target_os = "linux"))]
        {
            assert!(first.resident_bytes.is_none());
            assert!(second.resident_bytes.is_none());
        }
    }

    #[tokio::test]
    async fn test_recycle_fires_at_quota() {
        let guard = Arc::new(guard(1024, 3));

        let waiter = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.recycle_requested().await })
        };

        guard.after();
        guard.after();
        assert!(!waiter.is_finished());

        guard.after();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(guard.served(), 3);
    }

    #[tokio::test]
    async fn test_after_counts_inline_and_reclaims_on_blocking_pool() {
        let guard = guard(1024, 0);
        let caller = std::thread::current().id();

        let handle = guard.after();
        assert_eq!(guard.served(), 1);

        let report = handle.await.unwrap();
        #[cfg(target_os = "linux")]
        assert!(report.resident_bytes.unwrap() > 0);
        #[cfg(not(target_os = "linux"))]
        assert!(report.resident_bytes.is_none());

        let reclaim_thread = tokio::task::spawn_blocking(|| std::thread::current().id())
            .await
            .unwrap();
        assert_ne!(reclaim_thread, caller);

        let report = guard.reclaim_blocking().await;
        assert_eq!(report.resident_bytes.is_some(), cfg!(target_os = "linux"));
    }

    #[tokio::test]
    async fn test_zero_quota_never_recycles() {
        let guard = guard(1024, 0);
        for _ in 0..5 {
            guard.after();
        }

        let fired =
            tokio::time::timeout(Duration::from_millis(50), guard.recycle_requested()).await;
        assert!(fired.is_err());
    }
}

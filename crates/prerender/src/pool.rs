//! Render worker pool for concurrent rendering.
//!
//! The pool manages multiple worker threads, distributing render requests
//! using round-robin scheduling with backpressure support.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use prerender_core::{PlatformConfig, PoolConfig};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::{
    document::DocumentFactory,
    error::{RenderError, Result},
    platform::AppModule,
    static_page::StaticPage,
    worker::{RenderJob, RenderWorker},
};

/// Timeout applied to health checks.
const HEALTH_TIMEOUT_MS: u64 = 5000;

const HEALTH_DOCUMENT: &str = "<html><head></head><body><main id=\"health\"></main></body></html>";

/// A pool of render workers for concurrent rendering.
pub struct RenderPool {
    workers: Vec<RenderWorker>,
    next_worker: AtomicUsize,
    config: PoolConfig,
}

impl RenderPool {
    /// Create a new pool, spawning one thread per worker.
    pub fn new(config: PoolConfig) -> Result<Self> {
        let workers = (0..config.worker_count)
            .map(|index| RenderWorker::spawn(index, &config))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            worker_count = workers.len(),
            max_pending = config.max_pending,
            render_timeout_ms = config.render_timeout_ms,
            "Render pool initialized"
        );

        Ok(Self {
            workers,
            next_worker: AtomicUsize::new(0),
            config,
        })
    }

    /// Create pool and warm up all workers.
    ///
    /// Sends a health render to each worker to ensure they're ready.
    pub async fn new_with_warmup(config: PoolConfig) -> Result<Self> {
        let pool = Self::new(config)?;

        tracing::info!("Warming up {} render workers...", pool.workers.len());

        for i in 0..pool.workers.len() {
            match pool.check_render(pool.config.render_timeout_ms).await {
                Ok(_) => tracing::debug!(worker = i, "Worker warmed up"),
                Err(e) => tracing::warn!(worker = i, error = %e, "Worker warmup failed"),
            }
        }

        tracing::info!("Render pool warm-up complete");
        Ok(pool)
    }

    /// Render `module` on the next worker with room.
    ///
    /// Returns `Overloaded` if no worker has capacity and `Timeout` if the
    /// result does not arrive within `render_timeout_ms`. A timed-out render
    /// still runs to completion on its worker.
    pub async fn render(&self, module: Arc<dyn AppModule>, config: PlatformConfig) -> Result<String> {
        self.submit(module, config, None, self.config.render_timeout_ms)
            .await
            .map(|(_, html)| html)
    }

    /// Like [`render`](Self::render), building each document with `factory`
    /// on the worker thread.
    pub async fn render_with_document(
        &self,
        module: Arc<dyn AppModule>,
        config: PlatformConfig,
        factory: DocumentFactory,
    ) -> Result<String> {
        self.submit(module, config, Some(factory), self.config.render_timeout_ms)
            .await
            .map(|(_, html)| html)
    }

    /// Get pool statistics (passive - no I/O).
    pub fn stats(&self) -> RenderPoolStats {
        RenderPoolStats {
            worker_count: self.workers.len(),
            workers_with_capacity: self.workers.iter().filter(|w| w.has_capacity()).count(),
        }
    }

    /// Active health check - verifies workers can process requests.
    ///
    /// Renders a static health page and reports the latency. A failed render
    /// is reported as unhealthy; transport errors are returned as errors.
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let start = Instant::now();

        match self.check_render(HEALTH_TIMEOUT_MS).await {
            Ok((worker_idx, _html)) => Ok(HealthStatus {
                healthy: true,
                latency_ms: start.elapsed().as_millis() as u64,
                worker_idx: Some(worker_idx),
                stats: self.stats(),
                error: None,
            }),
            Err(
                e @ (RenderError::ChannelClosed
                | RenderError::Timeout(_)
                | RenderError::Overloaded { .. }),
            ) => Err(e),
            Err(e) => Ok(HealthStatus {
                healthy: false,
                latency_ms: start.elapsed().as_millis() as u64,
                worker_idx: None,
                stats: self.stats(),
                error: Some(e.to_string()),
            }),
        }
    }

    async fn check_render(&self, timeout_ms: u64) -> Result<(usize, String)> {
        let config = PlatformConfig::builder(HEALTH_DOCUMENT)
            .url("http://localhost/health")
            .build()?;
        let page = StaticPage::new().root("#health").title("health");
        self.submit(Arc::new(page), config, None, timeout_ms).await
    }

    async fn submit(
        &self,
        module: Arc<dyn AppModule>,
        config: PlatformConfig,
        document_factory: Option<DocumentFactory>,
        timeout_ms: u64,
    ) -> Result<(usize, String)> {
        let (response_tx, response_rx) = oneshot::channel();
        let mut job = RenderJob {
            module,
            config,
            document_factory,
            response_tx,
        };

        // Round-robin start, falling through to the next worker with room
        let start = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let mut worker_idx = None;
        for offset in 0..self.workers.len() {
            let idx = (start + offset) % self.workers.len();
            match self.workers[idx].try_send(job) {
                Ok(()) => {
                    worker_idx = Some(idx);
                    break;
                }
                Err((returned, e)) => {
                    tracing::trace!(worker = idx, error = %e, "Worker unavailable");
                    job = returned;
                }
            }
        }
        let Some(worker_idx) = worker_idx else {
            return Err(RenderError::Overloaded {
                retry_after_secs: 5,
            });
        };

        // Wait for response with timeout
        match tokio::time::timeout(Duration::from_millis(timeout_ms), response_rx).await {
            Ok(Ok(result)) => result.map(|html| (worker_idx, html)),
            Ok(Err(_)) => Err(RenderError::ChannelClosed),
            Err(_) => {
                tracing::warn!(worker = worker_idx, timeout_ms, "Render timed out");
                Err(RenderError::Timeout(timeout_ms))
            }
        }
    }
}

/// Pool statistics (passive data).
#[derive(Debug, Clone, Serialize)]
pub struct RenderPoolStats {
    pub worker_count: usize,
    pub workers_with_capacity: usize,
}

/// Health check result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_idx: Option<usize>,
    pub stats: RenderPoolStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use futures_util::StreamExt;

    use super::*;
    use crate::document::HtmlDocument;
    use crate::hooks::RenderHooks;
    use crate::platform::{RenderContext, Stability};

    /// Reports stable only after `delay`.
    struct SlowApp {
        delay: Duration,
        started: Arc<AtomicBool>,
    }

    impl SlowApp {
        fn new(delay_ms: u64) -> Self {
            Self {
                delay: Duration::from_millis(delay_ms),
                started: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait(?Send)]
    impl AppModule for SlowApp {
        async fn bootstrap(&self, _ctx: &RenderContext) -> anyhow::Result<Stability> {
            self.started.store(true, Ordering::SeqCst);
            let delay = self.delay;
            Ok(async_stream::stream! {
                tokio::time::sleep(delay).await;
                yield true;
            }
            .boxed_local())
        }
    }

    /// Async hook that needs the worker's `LocalSet`.
    struct SpawningApp;

    #[async_trait(?Send)]
    impl AppModule for SpawningApp {
        fn root_selector(&self) -> Option<&str> {
            Some("app")
        }

        async fn bootstrap(&self, _ctx: &RenderContext) -> anyhow::Result<Stability> {
            Ok(crate::platform::stable())
        }

        fn render_hooks(&self) -> RenderHooks {
            RenderHooks::new().with_async(|ctx| {
                let env = ctx.environment().clone();
                async move {
                    tokio::task::spawn_local(async move { env.set_title("spawned") }).await??;
                    Ok(())
                }
            })
        }
    }

    fn config(document: &str) -> PlatformConfig {
        PlatformConfig::builder(document).build().unwrap()
    }

    #[tokio::test]
    async fn test_pool_renders() {
        let pool = RenderPool::new(PoolConfig::with_defaults(2).unwrap()).unwrap();
        let html = pool
            .render(Arc::new(SpawningApp), config("<app></app>"))
            .await
            .unwrap();
        assert_eq!(
            html,
            r#"<html><head><title>spawned</title></head><body><app ng-version="0.0.0-PLACEHOLDER"></app></body></html>"#
        );
    }

    #[tokio::test]
    async fn test_render_errors_are_returned() {
        let pool = RenderPool::new(PoolConfig::with_defaults(1).unwrap()).unwrap();
        let page = StaticPage::new().root("missing");
        let err = pool
            .render(Arc::new(page), config("<app></app>"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::RootNotFound { .. }));
    }

    #[tokio::test]
    async fn test_document_factory() {
        let pool = RenderPool::new(PoolConfig::with_defaults(1).unwrap()).unwrap();
        let factory: DocumentFactory =
            Arc::new(|| Box::new(HtmlDocument::parse("<injected></injected>")));
        let html = pool
            .render_with_document(Arc::new(StaticPage::new()), config("<app></app>"), factory)
            .await
            .unwrap();
        assert!(html.contains("<injected></injected>"));
    }

    #[tokio::test]
    async fn test_timeout_does_not_cancel_render() {
        let pool = RenderPool::new(PoolConfig::new(1, 10, 20).unwrap()).unwrap();

        let err = pool
            .render(Arc::new(SlowApp::new(200)), config("<app></app>"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Timeout(20)));

        // The worker finishes the slow render and is then free again.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let health = pool.health_check().await.unwrap();
        assert!(health.healthy);
    }

    #[tokio::test]
    async fn test_overloaded_when_queues_full() {
        let pool = Arc::new(RenderPool::new(PoolConfig::new(1, 1, 5000).unwrap()).unwrap());

        let running = SlowApp::new(100);
        let started = Arc::clone(&running.started);
        let first = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.render(Arc::new(running), config("<app></app>")).await }
        });
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let queued = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move {
                pool.render(Arc::new(SlowApp::new(0)), config("<app></app>"))
                    .await
            }
        });
        while pool.stats().workers_with_capacity > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let err = pool
            .render(Arc::new(StaticPage::new()), config("<app></app>"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Overloaded { .. }));

        first.await.unwrap().unwrap();
        queued.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stats_and_health() {
        let pool = RenderPool::new_with_warmup(PoolConfig::with_defaults(3).unwrap())
            .await
            .unwrap();

        let stats = pool.stats();
        assert_eq!(stats.worker_count, 3);
        assert_eq!(stats.workers_with_capacity, 3);

        let health = pool.health_check().await.unwrap();
        assert!(health.healthy);
        assert!(health.error.is_none());
        assert!(health.worker_idx.is_some());
    }
}

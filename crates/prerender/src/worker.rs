//! Render worker thread management.
//!
//! Each worker runs in a dedicated thread with its own single-threaded Tokio
//! runtime and a `LocalSet`, because documents and render contexts are not
//! `Send`.

use std::sync::Arc;

use prerender_core::{PlatformConfig, PoolConfig};
use tokio::sync::{mpsc, oneshot};

use crate::document::DocumentFactory;
use crate::error::{RenderError, Result};
use crate::platform::AppModule;
use crate::render::Renderer;

/// A render sent to a worker.
pub struct RenderJob {
    pub module: Arc<dyn AppModule>,
    pub config: PlatformConfig,
    /// Builds the document on the worker thread instead of parsing the
    /// configured markup.
    pub document_factory: Option<DocumentFactory>,
    /// Channel to send the result back.
    pub response_tx: oneshot::Sender<Result<String>>,
}

impl RenderJob {
    async fn run(self) {
        let RenderJob {
            module,
            config,
            document_factory,
            response_tx,
        } = self;

        let renderer = match document_factory {
            Some(factory) => Renderer::with_document(config, factory()),
            None => Renderer::new(config),
        };
        let result = match renderer {
            Ok(mut renderer) => renderer.run(module.as_ref()).await,
            Err(e) => Err(e),
        };

        // The caller may have timed out and dropped the receiver.
        let _ = response_tx.send(result);
    }
}

/// A dedicated render worker thread.
pub struct RenderWorker {
    request_tx: mpsc::Sender<RenderJob>,
}

impl RenderWorker {
    /// Spawn a new worker thread.
    pub fn spawn(index: usize, config: &PoolConfig) -> Result<Self> {
        let (request_tx, mut request_rx) = mpsc::channel::<RenderJob>(config.max_pending);

        std::thread::Builder::new()
            .name(format!("prerender-worker-{index}"))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(worker = index, error = %e, "Failed to create worker runtime");
                        return;
                    }
                };

                let local = tokio::task::LocalSet::new();
                local.block_on(&rt, async move {
                    tracing::debug!(worker = index, "Render worker started");

                    while let Some(job) = request_rx.recv().await {
                        job.run().await;
                    }

                    tracing::debug!(worker = index, "Render worker shutting down");
                });
            })
            .map_err(|e| RenderError::WorkerSpawn(e.to_string()))?;

        Ok(Self { request_tx })
    }

    /// Check if the worker has capacity for more requests.
    pub fn has_capacity(&self) -> bool {
        self.request_tx.capacity() > 0
    }

    /// Queue `job` without waiting for room. On failure the job is handed
    /// back so it can be offered to another worker.
    pub fn try_send(&self, job: RenderJob) -> std::result::Result<(), (RenderJob, RenderError)> {
        self.request_tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => (
                job,
                RenderError::Overloaded {
                    retry_after_secs: 5,
                },
            ),
            mpsc::error::TrySendError::Closed(job) => (job, RenderError::ChannelClosed),
        })
    }
}

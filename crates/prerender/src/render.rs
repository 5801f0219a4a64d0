//! The render pipeline: bootstrap, wait for stability, run hooks, embed
//! transfer state and serialize.

use std::fmt;

use prerender_core::{encode, PlatformConfig, RenderCoreError, TRANSFER_STATE_SCRIPT_ID};

use crate::document::DomDocument;
use crate::error::{RenderError, Result};
use crate::hooks::RenderHooks;
use crate::platform::{AppModule, RenderContext, ServerPlatform};

/// Where a render currently is. Phases only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderPhase {
    Created,
    Bootstrapping,
    AwaitingStability,
    RunningHooks,
    Serializing,
    Done,
    Failed,
}

impl fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderPhase::Created => "created",
            RenderPhase::Bootstrapping => "bootstrapping",
            RenderPhase::AwaitingStability => "awaiting_stability",
            RenderPhase::RunningHooks => "running_hooks",
            RenderPhase::Serializing => "serializing",
            RenderPhase::Done => "done",
            RenderPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Drives a single render from configuration to HTML.
///
/// A `Renderer` runs once; a second [`run`](Self::run) fails with
/// [`RenderError::AlreadyRendered`].
#[derive(Debug)]
pub struct Renderer {
    platform: ServerPlatform,
    hooks: Option<RenderHooks>,
    phase: RenderPhase,
}

impl Renderer {
    /// Validate `config` and set up a fresh document for it.
    pub fn new(config: PlatformConfig) -> Result<Self> {
        Ok(Self::from_platform(ServerPlatform::new(config)?))
    }

    /// Render into an injected document.
    pub fn with_document(config: PlatformConfig, document: Box<dyn DomDocument>) -> Result<Self> {
        Ok(Self::from_platform(ServerPlatform::with_document(
            config, document,
        )?))
    }

    fn from_platform(platform: ServerPlatform) -> Self {
        Self {
            platform,
            hooks: Some(RenderHooks::new()),
            phase: RenderPhase::Created,
        }
    }

    /// Register hooks that run after the module's own hooks. Fails once the
    /// render has started.
    pub fn add_hooks(&mut self, hooks: RenderHooks) -> Result<()> {
        match self.hooks.as_mut() {
            Some(registered) if self.phase == RenderPhase::Created => {
                registered.extend(hooks);
                Ok(())
            }
            _ => Err(RenderError::AlreadyRendered),
        }
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    pub fn context(&self) -> &RenderContext {
        self.platform.context()
    }

    /// Render `module` to a complete HTML document.
    ///
    /// The document is disposed whether the render succeeds or fails.
    pub async fn run(&mut self, module: &dyn AppModule) -> Result<String> {
        if self.phase != RenderPhase::Created {
            return Err(RenderError::AlreadyRendered);
        }

        let result = self.drive(module).await;
        match &result {
            Ok(_) => self.transition(RenderPhase::Done),
            Err(e) => {
                tracing::debug!(phase = %self.phase, error = %e, "Render failed");
                self.transition(RenderPhase::Failed);
            }
        }
        self.platform.destroy();
        result
    }

    async fn drive(&mut self, module: &dyn AppModule) -> Result<String> {
        self.transition(RenderPhase::Bootstrapping);
        let mut app = self.platform.bootstrap_module(module).await?;

        self.transition(RenderPhase::AwaitingStability);
        app.when_stable().await?;

        self.transition(RenderPhase::RunningHooks);
        let mut hooks = module.render_hooks();
        if let Some(extra) = self.hooks.take() {
            hooks.extend(extra);
        }
        hooks.run(self.platform.context()).await?;

        self.transition(RenderPhase::Serializing);
        embed_transfer_state(self.platform.context())?;
        self.platform.render_to_string()
    }

    fn transition(&mut self, to: RenderPhase) {
        tracing::debug!(
            from = %self.phase,
            to = %to,
            app_id = %self.platform.context().environment().app_id(),
            "Render phase transition"
        );
        self.phase = to;
    }
}

/// Render `module` with `config` in one call.
pub async fn render_module(module: &dyn AppModule, config: PlatformConfig) -> Result<String> {
    Renderer::new(config)?.run(module).await
}

/// Append the transfer-state `<script>` as the last child of `<body>`.
///
/// Nothing is appended when the payload is empty.
fn embed_transfer_state(ctx: &RenderContext) -> Result<()> {
    let payload = ctx.transfer_state().take();
    if payload.is_empty() {
        return Ok(());
    }

    let encoded = encode(&payload).map_err(|e| match e {
        RenderCoreError::Serialization(reason) => RenderError::Serialization(reason),
        other => RenderError::Core(other),
    })?;

    let document = ctx.document();
    let script = document.create_element("script")?;
    document.set_attribute(script, "id", TRANSFER_STATE_SCRIPT_ID)?;
    document.set_attribute(script, "type", "application/json")?;
    document.set_text_content(script, &encoded)?;
    document.append_child(document.body()?, script)?;

    tracing::debug!(keys = payload.len(), bytes = encoded.len(), "Embedded transfer state");
    Ok(())
}

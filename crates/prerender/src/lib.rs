//! Server render pipeline - Imperative Shell.
//!
//! This crate orchestrates rendering using pure functions from
//! `prerender_core`. It owns the document, bootstraps applications against
//! it, runs render hooks and serializes the result, and provides a worker
//! pool for concurrent rendering.
//!
//! # Architecture
//!
//! - **Functional Core** (`prerender_core`): Pure validation, config, URL resolution, transfer state
//! - **Imperative Shell** (this crate): DOM, async execution, hooks, threading
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use prerender::{PlatformConfig, PoolConfig, RenderPool, StaticPage};
//!
//! // Create pool (spawns worker threads)
//! let pool = RenderPool::new(PoolConfig::with_defaults(4).unwrap()).unwrap();
//!
//! // Render (sends to worker, waits for response)
//! let config = PlatformConfig::builder("<app></app>")
//!     .url("http://localhost/home")
//!     .build()
//!     .unwrap();
//! let page = StaticPage::new().root("app").title("Home");
//! let html = pool.render(Arc::new(page), config).await.unwrap();
//! ```

mod document;
mod environment;
mod error;
mod hooks;
mod location;
mod platform;
mod pool;
mod render;
mod selector;
mod static_page;
mod worker;

// Re-export core types for convenience
pub use prerender_core::{
    make_state_key, PlatformConfig, PoolConfig, RenderCoreError, ResolvedLocation, StateKey,
    TransferState, MAX_TRANSFER_STATE_SIZE,
};

// Export shell types
pub use document::{DocumentFactory, DomDocument, DomError, DomResult, HtmlDocument, NodeId};
pub use environment::{DocumentEnvironment, TRANSITION_ATTRIBUTE};
pub use error::{sanitize_error, RenderError, Result};
pub use hooks::{HookAction, RenderHooks};
pub use location::{HashChangeEvent, ServerLocation};
pub use platform::{
    stable, AppModule, ApplicationRef, RenderContext, ServerPlatform, Stability,
    FRAMEWORK_VERSION, VERSION_ATTRIBUTE,
};
pub use pool::{HealthStatus, RenderPool, RenderPoolStats};
pub use render::{render_module, RenderPhase, Renderer};
pub use static_page::StaticPage;

//! Server platform: owns the per-render context and bootstraps application
//! modules against it.

use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;

use async_trait::async_trait;
use futures_util::stream::{self, LocalBoxStream};
use futures_util::StreamExt;
use prerender_core::{PlatformConfig, TransferState};

use crate::document::{DomDocument, DomError, NodeId};
use crate::environment::DocumentEnvironment;
use crate::error::{RenderError, Result};
use crate::hooks::RenderHooks;
use crate::location::ServerLocation;

/// Version stamped on the root element of every rendered application.
pub const FRAMEWORK_VERSION: &str = "0.0.0-PLACEHOLDER";

/// Attribute carrying [`FRAMEWORK_VERSION`].
pub const VERSION_ATTRIBUTE: &str = "ng-version";

/// Readiness notifications: the render proceeds on the first `true`.
pub type Stability = LocalBoxStream<'static, bool>;

/// A stream that reports stable immediately.
pub fn stable() -> Stability {
    stream::iter([true]).boxed_local()
}

/// An application that can be rendered on the server.
///
/// Modules are shared across worker threads, but every call happens on the
/// thread that owns the render.
#[async_trait(?Send)]
pub trait AppModule: Send + Sync {
    /// Selector of the element the application attaches to. The element is
    /// stamped with [`VERSION_ATTRIBUTE`] once bootstrap returns.
    fn root_selector(&self) -> Option<&str> {
        None
    }

    /// Start the application and return its readiness signal.
    async fn bootstrap(&self, ctx: &RenderContext) -> anyhow::Result<Stability>;

    /// Hooks to run after the application is stable, in order.
    fn render_hooks(&self) -> RenderHooks {
        RenderHooks::new()
    }
}

/// Everything a render exposes to the application and its hooks.
///
/// Cloning shares the underlying document, location and transfer state.
#[derive(Clone, Debug)]
pub struct RenderContext {
    environment: DocumentEnvironment,
    location: ServerLocation,
    transfer_state: Rc<RefCell<TransferState>>,
}

impl RenderContext {
    /// Build a context from `config`, using `document` instead of parsing the
    /// configured markup when given.
    pub fn new(config: &PlatformConfig, document: Option<Box<dyn DomDocument>>) -> Result<Self> {
        let environment = match document {
            Some(document) => DocumentEnvironment::with_document(document, config.app_id()),
            None => DocumentEnvironment::parse(config.document(), config.app_id()),
        };
        let location = ServerLocation::new(config, environment.clone())?;

        Ok(Self {
            environment,
            location,
            transfer_state: Rc::new(RefCell::new(TransferState::new())),
        })
    }

    pub fn environment(&self) -> &DocumentEnvironment {
        &self.environment
    }

    /// Shorthand for `environment().document()`.
    pub fn document(&self) -> &dyn DomDocument {
        self.environment.document()
    }

    pub fn location(&self) -> &ServerLocation {
        &self.location
    }

    /// Mutable access to the transfer-state payload. Do not hold the guard
    /// across an `.await`.
    pub fn transfer_state(&self) -> RefMut<'_, TransferState> {
        self.transfer_state.borrow_mut()
    }
}

/// A bootstrapped application.
pub struct ApplicationRef {
    root: Option<NodeId>,
    stability: Stability,
    stable: bool,
}

impl ApplicationRef {
    /// Root element the application is attached to.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Wait until the application reports stable.
    ///
    /// Returns immediately once stability has been observed.
    pub async fn when_stable(&mut self) -> Result<()> {
        while !self.stable {
            match self.stability.next().await {
                Some(stable) => self.stable = stable,
                None => return Err(RenderError::NeverStable),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ApplicationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationRef")
            .field("root", &self.root)
            .field("stable", &self.stable)
            .finish()
    }
}

/// Platform for a single render request.
#[derive(Debug)]
pub struct ServerPlatform {
    context: RenderContext,
    destroyed: Cell<bool>,
}

impl ServerPlatform {
    pub fn new(config: PlatformConfig) -> Result<Self> {
        Self::from_parts(&config, None)
    }

    /// Render into an injected document instead of the configured markup.
    pub fn with_document(config: PlatformConfig, document: Box<dyn DomDocument>) -> Result<Self> {
        Self::from_parts(&config, Some(document))
    }

    fn from_parts(config: &PlatformConfig, document: Option<Box<dyn DomDocument>>) -> Result<Self> {
        Ok(Self {
            context: RenderContext::new(config, document)?,
            destroyed: Cell::new(false),
        })
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    /// Bootstrap `module` against this platform's document.
    pub async fn bootstrap_module(&self, module: &dyn AppModule) -> Result<ApplicationRef> {
        self.ensure_alive()?;

        let root = match module.root_selector() {
            Some(selector) => {
                let root = self.context.document().query_selector(selector).ok_or_else(|| {
                    RenderError::RootNotFound {
                        selector: selector.to_string(),
                    }
                })?;
                Some(root)
            }
            None => None,
        };

        let stability = module
            .bootstrap(&self.context)
            .await
            .map_err(RenderError::Bootstrap)?;

        if let Some(root) = root {
            self.context
                .document()
                .set_attribute(root, VERSION_ATTRIBUTE, FRAMEWORK_VERSION)?;
        }

        Ok(ApplicationRef {
            root,
            stability,
            stable: false,
        })
    }

    /// Serialize the document as it is now.
    pub fn render_to_string(&self) -> Result<String> {
        self.ensure_alive()?;
        self.context
            .environment()
            .render_to_string()
            .map_err(|e| match e {
                DomError::Serialization(reason) => RenderError::Serialization(reason),
                other => RenderError::Dom(other),
            })
    }

    /// Release the document. Safe to call more than once.
    pub fn destroy(&self) {
        if !self.destroyed.replace(true) {
            self.context.environment().dispose();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(RenderError::Dom(DomError::Disposed));
        }
        Ok(())
    }
}

//! An application with no behaviour of its own.
//!
//! Renders the configured document as-is, optionally setting a title and
//! seeding transfer state. Used for health checks and the command line.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::platform::{stable, AppModule, RenderContext, Stability};

#[derive(Clone, Debug, Default)]
pub struct StaticPage {
    root: Option<String>,
    title: Option<String>,
    state: Map<String, Value>,
}

impl StaticPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the element matching `selector` as the application root.
    pub fn root(mut self, selector: impl Into<String>) -> Self {
        self.root = Some(selector.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Transfer state embedded in the output.
    pub fn state(mut self, state: Map<String, Value>) -> Self {
        self.state = state;
        self
    }
}

#[async_trait(?Send)]
impl AppModule for StaticPage {
    fn root_selector(&self) -> Option<&str> {
        self.root.as_deref()
    }

    async fn bootstrap(&self, ctx: &RenderContext) -> anyhow::Result<Stability> {
        if let Some(title) = &self.title {
            ctx.environment().set_title(title)?;
        }

        let mut transfer_state = ctx.transfer_state();
        for (key, value) in &self.state {
            transfer_state.set_raw(key.clone(), value.clone());
        }

        Ok(stable())
    }
}

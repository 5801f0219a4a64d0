//! Configuration types for server rendering with validation.

use serde::{Deserialize, Serialize};

use crate::error::{RenderCoreError, Result};
use crate::location::ResolvedLocation;

/// Application id used when none is configured.
pub const DEFAULT_APP_ID: &str = "ng";

/// Configuration for a single render request.
///
/// Built once per request through [`PlatformConfig::builder`] and immutable
/// afterwards. Validation happens in [`PlatformConfigBuilder::build`], before
/// any bootstrap work or outbound request. Deserialized configs go through
/// the same validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "PlatformConfigBuilder")]
pub struct PlatformConfig {
    document: String,
    url: Option<String>,
    use_absolute_url: bool,
    base_url: Option<String>,
    app_id: String,
}

impl PlatformConfig {
    /// Start building a config for `document`, either a full HTML document or
    /// a fragment containing the root application element.
    pub fn builder(document: impl Into<String>) -> PlatformConfigBuilder {
        PlatformConfigBuilder {
            document: document.into(),
            url: None,
            use_absolute_url: false,
            base_url: None,
            app_id: None,
        }
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn use_absolute_url(&self) -> bool {
        self.use_absolute_url
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Derive the location the application starts at.
    ///
    /// With `use_absolute_url`, protocol and hostname come from `base_url`,
    /// and so does the port when `base_url` names one. Otherwise `base_url`
    /// has no effect.
    pub fn initial_location(&self) -> Result<ResolvedLocation> {
        let mut location = match &self.url {
            Some(url) => ResolvedLocation::parse(url)?,
            None => ResolvedLocation::root(),
        };

        if self.use_absolute_url {
            let base_url = self
                .base_url
                .as_deref()
                .ok_or(RenderCoreError::MissingBaseUrl)?;
            let base = ResolvedLocation::parse(base_url)?;
            location.protocol = base.protocol;
            location.hostname = base.hostname;
            if !base.port.is_empty() {
                location.port = base.port;
            }
        }

        Ok(location)
    }
}

/// Builder for [`PlatformConfig`].
#[derive(Clone, Debug, Deserialize)]
pub struct PlatformConfigBuilder {
    document: String,
    url: Option<String>,
    #[serde(default)]
    use_absolute_url: bool,
    base_url: Option<String>,
    app_id: Option<String>,
}

impl PlatformConfigBuilder {
    /// URL of the request being rendered.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Rewrite relative outbound requests to absolute URLs.
    pub fn use_absolute_url(mut self, enabled: bool) -> Self {
        self.use_absolute_url = enabled;
        self
    }

    /// Base URL for outbound requests; required with `use_absolute_url`.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Id used to namespace style and transition markers.
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Validate and freeze the config.
    pub fn build(self) -> Result<PlatformConfig> {
        if self.document.trim().is_empty() {
            return Err(RenderCoreError::InvalidConfig(
                "document must not be empty".to_string(),
            ));
        }

        let app_id = match self.app_id {
            Some(app_id) if app_id.trim().is_empty() => {
                return Err(RenderCoreError::InvalidConfig(
                    "app_id must not be blank".to_string(),
                ));
            }
            Some(app_id) => app_id,
            None => DEFAULT_APP_ID.to_string(),
        };

        let config = PlatformConfig {
            document: self.document,
            url: self.url,
            use_absolute_url: self.use_absolute_url,
            base_url: self.base_url,
            app_id,
        };

        // Surfaces a missing base_url and unparsable URLs now, not on first use.
        config.initial_location()?;

        Ok(config)
    }
}

impl TryFrom<PlatformConfigBuilder> for PlatformConfig {
    type Error = RenderCoreError;

    fn try_from(builder: PlatformConfigBuilder) -> Result<Self> {
        builder.build()
    }
}

/// Configuration for the render worker pool (validated).
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Maximum queued renders per worker before rejecting.
    pub max_pending: usize,
    /// How long a caller waits for a render, in milliseconds.
    pub render_timeout_ms: u64,
}

impl PoolConfig {
    /// Create and validate pool config.
    pub fn new(worker_count: usize, max_pending: usize, render_timeout_ms: u64) -> Result<Self> {
        if worker_count == 0 {
            return Err(RenderCoreError::InvalidWorkerCount);
        }
        if render_timeout_ms == 0 {
            return Err(RenderCoreError::InvalidTimeout);
        }

        Ok(Self {
            worker_count,
            max_pending: max_pending.max(1),
            render_timeout_ms,
        })
    }

    /// Create with defaults (100 pending, 10s timeout).
    pub fn with_defaults(worker_count: usize) -> Result<Self> {
        Self::new(worker_count, 100, 10_000)
    }
}

//! Pure prerender logic - no I/O, no async, no side effects.
//!
//! This crate provides:
//! - Render configuration with construction-time validation
//! - URL resolution for server-side locations and outbound requests
//! - The transfer-state store and its `<script>`-safe encoding
//! - Error types for validation failures
//!
//! # Example
//!
//! ```
//! use prerender_core::{encode, PlatformConfig, PoolConfig};
//!
//! // Create validated config
//! let config = PlatformConfig::builder("<app></app>")
//!     .url("http://test.com:80/deep/path?query#hash")
//!     .build()
//!     .unwrap();
//!
//! let location = config.initial_location().unwrap();
//! assert_eq!(location.port, "80");
//!
//! // Encode a payload for embedding inside <script>
//! let encoded = encode(&serde_json::json!({"test": 10})).unwrap();
//! assert_eq!(encoded, "{&q;test&q;:10}");
//!
//! // Create pool config with validation
//! let pool_config = PoolConfig::with_defaults(4).unwrap();
//! assert_eq!(pool_config.worker_count, 4);
//! ```

mod config;
mod error;
pub mod location;
mod transfer_state;

pub use config::{PlatformConfig, PlatformConfigBuilder, PoolConfig, DEFAULT_APP_ID};
pub use error::{RenderCoreError, Result, MAX_TRANSFER_STATE_SIZE};
pub use location::{is_absolute_url, resolve_base, to_absolute, ResolvedLocation};
pub use transfer_state::{
    decode, encode, escape_html, make_state_key, script_tag, unescape_html, StateKey,
    TransferState, TRANSFER_STATE_SCRIPT_ID,
};

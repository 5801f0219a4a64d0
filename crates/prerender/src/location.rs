//! Server-side `PlatformLocation`.
//!
//! Exposes the request URL to the application, tracks in-memory navigation
//! (`push_state`/`replace_state`) and rewrites relative outbound requests when
//! `use_absolute_url` is enabled.

use std::cell::RefCell;
use std::rc::Rc;

use prerender_core::{resolve_base, to_absolute, PlatformConfig, ResolvedLocation};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::environment::DocumentEnvironment;
use crate::error::Result;

/// Channel capacity for hash change notifications.
const CHANNEL_CAPACITY: usize = 16;

/// Stand-in origin for resolving navigation against a path-only location.
const PATH_ONLY_ORIGIN: &str = "http://localhost";

/// Fired when navigation changes the URL fragment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HashChangeEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub old_url: String,
    pub new_url: String,
}

#[derive(Clone)]
pub struct ServerLocation {
    inner: Rc<LocationInner>,
}

struct LocationInner {
    current: RefCell<ResolvedLocation>,
    use_absolute_url: bool,
    environment: DocumentEnvironment,
    hash_changes: broadcast::Sender<HashChangeEvent>,
}

impl ServerLocation {
    /// Build the location for `config`, reading `<base href>` from `environment`.
    pub fn new(config: &PlatformConfig, environment: DocumentEnvironment) -> Result<Self> {
        let (hash_changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Ok(Self {
            inner: Rc::new(LocationInner {
                current: RefCell::new(config.initial_location()?),
                use_absolute_url: config.use_absolute_url(),
                environment,
                hash_changes,
            }),
        })
    }

    /// Snapshot of the current location.
    pub fn snapshot(&self) -> ResolvedLocation {
        self.inner.current.borrow().clone()
    }

    pub fn protocol(&self) -> String {
        self.inner.current.borrow().protocol.clone()
    }

    pub fn hostname(&self) -> String {
        self.inner.current.borrow().hostname.clone()
    }

    pub fn port(&self) -> String {
        self.inner.current.borrow().port.clone()
    }

    pub fn pathname(&self) -> String {
        self.inner.current.borrow().pathname.clone()
    }

    pub fn search(&self) -> String {
        self.inner.current.borrow().search.clone()
    }

    pub fn hash(&self) -> String {
        self.inner.current.borrow().hash.clone()
    }

    pub fn href(&self) -> String {
        self.inner.current.borrow().href()
    }

    pub fn use_absolute_url(&self) -> bool {
        self.inner.use_absolute_url
    }

    /// `href` of the document's `<base>` element, if any.
    pub fn base_href_from_dom(&self) -> Option<String> {
        self.inner.environment.base_href()
    }

    /// Navigate to `url`, resolved against the current location the way a
    /// browser resolves `history.pushState` targets: `?q=1` keeps the path,
    /// `foo` is relative to the current directory. Only path, query and
    /// fragment change; host and protocol stay.
    pub fn push_state(&self, url: &str) -> Result<()> {
        let base = {
            let current = self.inner.current.borrow();
            if current.origin().is_empty() {
                format!("{PATH_ONLY_ORIGIN}{}", current.url())
            } else {
                current.href()
            }
        };
        let target = ResolvedLocation::parse(&to_absolute(url, &base)?)?;

        let event = {
            let mut current = self.inner.current.borrow_mut();
            let old_url = current.url();
            let old_hash = std::mem::take(&mut current.hash);
            current.pathname = target.pathname;
            current.search = target.search;
            current.hash = target.hash;

            (old_hash != current.hash).then(|| HashChangeEvent {
                kind: "hashchange",
                old_url,
                new_url: current.url(),
            })
        };

        if let Some(event) = event {
            tracing::debug!(old_url = %event.old_url, new_url = %event.new_url, "Hash changed");
            // No subscribers is fine.
            let _ = self.inner.hash_changes.send(event);
        }
        Ok(())
    }

    /// Same as [`push_state`](Self::push_state); there is no history stack on
    /// the server.
    pub fn replace_state(&self, url: &str) -> Result<()> {
        self.push_state(url)
    }

    /// Subscribe to hash change notifications.
    pub fn on_hash_change(&self) -> broadcast::Receiver<HashChangeEvent> {
        self.inner.hash_changes.subscribe()
    }

    /// Rewrite an outbound request URL.
    ///
    /// Without `use_absolute_url`, or for already absolute requests, the
    /// request passes through unchanged. Otherwise it is resolved against the
    /// origin plus the document's `<base href>`, falling back to the current
    /// path.
    pub fn absolute_request_url(&self, request: &str) -> Result<String> {
        if !self.inner.use_absolute_url || prerender_core::is_absolute_url(request) {
            return Ok(request.to_string());
        }

        let (origin, pathname) = {
            let current = self.inner.current.borrow();
            (current.origin(), current.pathname.clone())
        };
        let base = resolve_base(self.base_href_from_dom().as_deref(), &pathname);
        let base_url = to_absolute(&base, &format!("{origin}/"))?;
        Ok(to_absolute(request, &base_url)?)
    }
}

impl std::fmt::Debug for ServerLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerLocation")
            .field("current", &*self.inner.current.borrow())
            .field("use_absolute_url", &self.inner.use_absolute_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(document: &str, url: &str, base_url: Option<&str>) -> ServerLocation {
        let mut builder = PlatformConfig::builder(document).url(url);
        if let Some(base_url) = base_url {
            builder = builder.use_absolute_url(true).base_url(base_url);
        }
        let config = builder.build().unwrap();
        let env = DocumentEnvironment::parse(config.document(), config.app_id());
        ServerLocation::new(&config, env).unwrap()
    }

    #[test]
    fn test_configured_url_components() {
        let location = location("<app></app>", "http://test.com/deep/path?query#hash", None);
        assert_eq!(location.pathname(), "/deep/path");
        assert_eq!(location.search(), "?query");
        assert_eq!(location.hash(), "#hash");
    }

    #[test]
    fn test_push_state_updates_path_and_hash() {
        let config = PlatformConfig::builder("<app></app>").build().unwrap();
        let env = DocumentEnvironment::parse(config.document(), config.app_id());
        let location = ServerLocation::new(&config, env).unwrap();
        assert_eq!(location.pathname(), "/");

        location.push_state("/foo#bar").unwrap();
        assert_eq!(location.pathname(), "/foo");
        assert_eq!(location.hash(), "#bar");
    }

    #[test]
    fn test_push_state_resolves_against_current_location() {
        let location = location("<app></app>", "http://localhost/a/b?x=1#top", None);

        location.push_state("?q=1").unwrap();
        assert_eq!(location.pathname(), "/a/b");
        assert_eq!(location.search(), "?q=1");
        assert_eq!(location.hash(), "");

        location.push_state("#frag").unwrap();
        assert_eq!(location.href(), "http://localhost/a/b?q=1#frag");

        location.push_state("foo").unwrap();
        assert_eq!(location.pathname(), "/a/foo");
        assert_eq!(location.search(), "");

        location.push_state("../up?y").unwrap();
        assert_eq!(location.snapshot().url(), "/up?y");
    }

    #[test]
    fn test_push_state_relative_without_origin() {
        let config = PlatformConfig::builder("<app></app>").build().unwrap();
        let env = DocumentEnvironment::parse(config.document(), config.app_id());
        let location = ServerLocation::new(&config, env).unwrap();

        location.push_state("foo?a").unwrap();
        assert_eq!(location.href(), "/foo?a");
        location.push_state("#x").unwrap();
        assert_eq!(location.href(), "/foo?a#x");
    }

    #[tokio::test]
    async fn test_hash_change_subscription() {
        let config = PlatformConfig::builder("<app></app>").build().unwrap();
        let env = DocumentEnvironment::parse(config.document(), config.app_id());
        let location = ServerLocation::new(&config, env).unwrap();

        let mut receiver = location.on_hash_change();
        location.push_state("/foo#bar").unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind, "hashchange");
        assert_eq!(event.old_url, "/");
        assert_eq!(event.new_url, "/foo#bar");
    }

    #[test]
    fn test_push_state_without_hash_change_is_silent() {
        let location = location("<app></app>", "http://localhost/a#x", None);
        let mut receiver = location.on_hash_change();
        location.push_state("/b#x").unwrap();
        assert!(receiver.try_recv().is_err());
        assert_eq!(location.href(), "http://localhost/b#x");
    }

    #[test]
    fn test_requests_unchanged_without_absolute_url() {
        let location = location("<app></app>", "http://localhost", None);
        assert_eq!(location.absolute_request_url("/testing").unwrap(), "/testing");
    }

    #[test]
    fn test_absolute_requests_pass_through() {
        let location = location("<app></app>", "http://localhost", Some("http://localhost"));
        assert_eq!(
            location.absolute_request_url("http://localhost/testing").unwrap(),
            "http://localhost/testing"
        );
    }

    #[test]
    fn test_request_mapping() {
        let cases = [
            ("http://localhost", "/testing", "http://localhost/testing"),
            ("http://localhost", "testing", "http://localhost/testing"),
            ("http://localhost/", "/testing", "http://localhost/testing"),
            ("http://localhost:5000", "/testing", "http://localhost:5000/testing"),
            ("http://localhost/path/page", "testing", "http://localhost/path/testing"),
            ("http://localhost/path/page", "/testing", "http://localhost/testing"),
        ];
        for (url, request, expected) in cases {
            let location = location("<app></app>", url, Some("http://localhost"));
            assert_eq!(
                location.absolute_request_url(request).unwrap(),
                expected,
                "url {url:?} request {request:?}"
            );
        }
    }

    #[test]
    fn test_document_base_href_drives_request_mapping() {
        let location = location(
            r#"<base href="http://other"><app></app>"#,
            "http://localhost/path/page",
            Some("http://localhost"),
        );
        assert_eq!(location.base_href_from_dom().as_deref(), Some("http://other"));
        assert_eq!(
            location.absolute_request_url("/testing").unwrap(),
            "http://other/testing"
        );
        // The configured host is not overridden by the base tag.
        assert_eq!(location.hostname(), "localhost");
    }
}

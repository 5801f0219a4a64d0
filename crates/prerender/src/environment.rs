//! Per-render document environment.
//!
//! Wraps the document of a single render together with the application id
//! used to namespace injected style markers. Cloning is cheap and every clone
//! refers to the same document, so async render hooks can hold their own
//! handle.

use std::cell::Cell;
use std::rc::Rc;

use crate::document::{DomDocument, DomError, DomResult, HtmlDocument, NodeId};

/// Attribute marking styles injected for a server-rendered application.
pub const TRANSITION_ATTRIBUTE: &str = "ng-transition";

#[derive(Clone)]
pub struct DocumentEnvironment {
    inner: Rc<EnvironmentInner>,
}

struct EnvironmentInner {
    document: Box<dyn DomDocument>,
    app_id: String,
    disposed: Cell<bool>,
}

impl DocumentEnvironment {
    /// Parse `markup` into a fresh [`HtmlDocument`].
    pub fn parse(markup: &str, app_id: impl Into<String>) -> Self {
        Self::with_document(Box::new(HtmlDocument::parse(markup)), app_id)
    }

    /// Wrap an injected document implementation.
    pub fn with_document(document: Box<dyn DomDocument>, app_id: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(EnvironmentInner {
                document,
                app_id: app_id.into(),
                disposed: Cell::new(false),
            }),
        }
    }

    /// The live document.
    pub fn document(&self) -> &dyn DomDocument {
        self.inner.document.as_ref()
    }

    pub fn app_id(&self) -> &str {
        &self.inner.app_id
    }

    /// Current `<title>` text, empty when the document has none.
    pub fn title(&self) -> String {
        self.document()
            .query_selector("title")
            .and_then(|title| self.document().text_content(title).ok())
            .unwrap_or_default()
    }

    /// Set the document title, creating `<title>` at the end of `<head>`
    /// when it does not exist yet.
    pub fn set_title(&self, title: &str) -> DomResult<()> {
        let document = self.document();
        let element = match document.query_selector("title") {
            Some(element) => element,
            None => self.append_to_head("title")?,
        };
        document.set_text_content(element, title)
    }

    /// Create a `tag` element and append it to `<head>`.
    pub fn append_to_head(&self, tag: &str) -> DomResult<NodeId> {
        let document = self.document();
        let head = document.head()?;
        let element = document.create_element(tag)?;
        document.append_child(head, element)?;
        Ok(element)
    }

    /// Inject component styles, tagged with the application id so the client
    /// can find and replace them once it takes over.
    pub fn add_styles(&self, css: &str) -> DomResult<NodeId> {
        let style = self.append_to_head("style")?;
        let document = self.document();
        document.set_attribute(style, TRANSITION_ATTRIBUTE, self.app_id())?;
        document.set_text_content(style, css)?;
        Ok(style)
    }

    /// `href` of the first `<base>` element, if any.
    pub fn base_href(&self) -> Option<String> {
        let document = self.document();
        document
            .query_selector("base[href]")
            .and_then(|base| document.get_attribute(base, "href"))
    }

    pub fn render_to_string(&self) -> DomResult<String> {
        if self.is_disposed() {
            return Err(DomError::Disposed);
        }
        self.document().render_to_string()
    }

    /// Release the document. Safe to call repeatedly and after failures.
    pub fn dispose(&self) {
        if !self.inner.disposed.replace(true) {
            tracing::trace!(app_id = %self.app_id(), "Disposing document environment");
            self.document().clear();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

impl std::fmt::Debug for DocumentEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentEnvironment")
            .field("app_id", &self.inner.app_id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_title_creates_and_updates() {
        let env = DocumentEnvironment::parse("<app></app>", "render-hook");
        assert_eq!(env.title(), "");

        env.set_title("Test App Title").unwrap();
        assert_eq!(env.title(), "Test App Title");
        env.set_title("RenderHook").unwrap();

        assert_eq!(
            env.render_to_string().unwrap(),
            "<html><head><title>RenderHook</title></head><body><app></app></body></html>"
        );
    }

    #[test]
    fn test_add_styles_tags_app_id() {
        let env = DocumentEnvironment::parse("<app></app>", "example-styles");
        env.add_styles(":host { color: red; }").unwrap();

        let document = env.document();
        let styles = document.query_selector_all("style");
        assert_eq!(styles.len(), 1);
        assert_eq!(
            document.get_attribute(styles[0], TRANSITION_ATTRIBUTE).as_deref(),
            Some("example-styles")
        );
        assert!(document
            .text_content(styles[0])
            .unwrap()
            .contains("color: red"));
    }

    #[test]
    fn test_base_href_from_document() {
        let env = DocumentEnvironment::parse(
            r#"<html><head><base href="/"></head><body><app></app></body></html>"#,
            "ng",
        );
        assert_eq!(env.base_href().as_deref(), Some("/"));

        let env = DocumentEnvironment::parse("<app></app>", "ng");
        assert_eq!(env.base_href(), None);
    }

    #[test]
    fn test_clones_share_document() {
        let env = DocumentEnvironment::parse("<app></app>", "ng");
        let clone = env.clone();
        clone.set_title("shared").unwrap();
        assert_eq!(env.title(), "shared");
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let env = DocumentEnvironment::parse("<app></app>", "ng");
        env.dispose();
        env.dispose();
        assert!(env.is_disposed());
        assert_eq!(env.render_to_string(), Err(DomError::Disposed));
    }
}

//! The DOM abstraction the render pipeline works against.
//!
//! The pipeline only needs a handful of operations: look nodes up, mutate
//! them and serialize the whole tree. [`DomDocument`] captures exactly that
//! with opaque [`NodeId`] handles so alternative implementations can be
//! injected. [`HtmlDocument`] is the default, backed by `html5ever`'s tree
//! builder and serializer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{parse_document, Attribute, LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use thiserror::Error;

use crate::selector::Selector;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Opaque handle to a node owned by a [`DomDocument`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Errors raised by DOM operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("Unknown node handle {0:?}")]
    UnknownNode(NodeId),

    #[error("Node {0:?} is not an element")]
    NotAnElement(NodeId),

    #[error("Node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("Cannot insert a node into itself or one of its descendants")]
    HierarchyRequest,

    #[error("Document has no <{0}> element")]
    MissingElement(&'static str),

    #[error("Document has been disposed")]
    Disposed,

    #[error("Document serialization failed: {0}")]
    Serialization(String),
}

pub type DomResult<T> = std::result::Result<T, DomError>;

/// Creates a fresh document for each render. Used where the document has to
/// be produced on another thread than the one configuring the render.
pub type DocumentFactory = Arc<dyn Fn() -> Box<dyn DomDocument> + Send + Sync>;

/// A mutable document that can be serialized to HTML.
pub trait DomDocument {
    /// The `<html>` element.
    fn document_element(&self) -> DomResult<NodeId>;

    fn head(&self) -> DomResult<NodeId>;

    fn body(&self) -> DomResult<NodeId>;

    /// First element in document order matching a CSS selector list.
    fn query_selector(&self, selector: &str) -> Option<NodeId>;

    fn query_selector_all(&self, selector: &str) -> Vec<NodeId>;

    fn create_element(&self, tag: &str) -> DomResult<NodeId>;

    fn create_text_node(&self, text: &str) -> DomResult<NodeId>;

    /// Append `child` to `parent`, moving it if it is already attached.
    fn append_child(&self, parent: NodeId, child: NodeId) -> DomResult<()>;

    /// Insert `child` before `reference`, or append when `reference` is `None`.
    fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>)
        -> DomResult<()>;

    fn remove_child(&self, parent: NodeId, child: NodeId) -> DomResult<()>;

    fn children(&self, node: NodeId) -> DomResult<Vec<NodeId>>;

    /// Lowercase tag name, `None` for non-element nodes.
    fn tag_name(&self, node: NodeId) -> Option<String>;

    fn get_attribute(&self, element: NodeId, name: &str) -> Option<String>;

    /// Set an attribute. An existing attribute keeps its position; a new one
    /// is appended after the others.
    fn set_attribute(&self, element: NodeId, name: &str, value: &str) -> DomResult<()>;

    fn remove_attribute(&self, element: NodeId, name: &str) -> DomResult<()>;

    fn text_content(&self, node: NodeId) -> DomResult<String>;

    /// Replace all children of `node` with a single text node.
    fn set_text_content(&self, node: NodeId, text: &str) -> DomResult<()>;

    fn render_to_string(&self) -> DomResult<String>;

    /// Release the tree. Safe to call more than once.
    fn clear(&self);
}

/// [`DomDocument`] backed by `markup5ever_rcdom`.
pub struct HtmlDocument {
    document: RefCell<Option<Handle>>,
    nodes: RefCell<Vec<Handle>>,
    /// Node address to its position in `nodes`.
    index: RefCell<HashMap<*const Node, NodeId>>,
}

impl HtmlDocument {
    /// Parse a full document or a fragment. Missing `<html>`, `<head>` and
    /// `<body>` elements are synthesized by the HTML5 tree builder.
    pub fn parse(markup: &str) -> Self {
        let dom: RcDom = parse_document(RcDom::default(), ParseOpts::default()).one(markup);
        Self {
            document: RefCell::new(Some(dom.document.clone())),
            nodes: RefCell::new(Vec::new()),
            index: RefCell::new(HashMap::new()),
        }
    }

    fn root(&self) -> DomResult<Handle> {
        self.document.borrow().clone().ok_or(DomError::Disposed)
    }

    fn handle(&self, id: NodeId) -> DomResult<Handle> {
        if self.document.borrow().is_none() {
            return Err(DomError::Disposed);
        }
        self.nodes
            .borrow()
            .get(id.0)
            .cloned()
            .ok_or(DomError::UnknownNode(id))
    }

    fn element(&self, id: NodeId) -> DomResult<Handle> {
        let handle = self.handle(id)?;
        if matches!(handle.data, NodeData::Element { .. }) {
            Ok(handle)
        } else {
            Err(DomError::NotAnElement(id))
        }
    }

    /// Registered handles are kept alive, so their addresses stay unique
    /// until `clear`.
    fn register(&self, handle: &Handle) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        *self
            .index
            .borrow_mut()
            .entry(Rc::as_ptr(handle))
            .or_insert_with(|| {
                nodes.push(handle.clone());
                NodeId(nodes.len() - 1)
            })
    }

    fn find_by_tag(&self, tag: &'static str) -> DomResult<NodeId> {
        let root = self.root()?;
        let mut found = None;
        walk_elements(&root, &mut |handle| {
            if local_name(handle).is_some_and(|name| name == tag) {
                found = Some(handle.clone());
                return false;
            }
            true
        });
        found
            .map(|handle| self.register(&handle))
            .ok_or(DomError::MissingElement(tag))
    }

    fn select(&self, selector: &str, first_only: bool) -> Vec<NodeId> {
        let (Some(selector), Ok(root)) = (Selector::parse(selector), self.root()) else {
            return Vec::new();
        };
        selector
            .query(&root, first_only)
            .iter()
            .map(|handle| self.register(handle))
            .collect()
    }
}

impl DomDocument for HtmlDocument {
    fn document_element(&self) -> DomResult<NodeId> {
        self.find_by_tag("html")
    }

    fn head(&self) -> DomResult<NodeId> {
        self.find_by_tag("head")
    }

    fn body(&self) -> DomResult<NodeId> {
        self.find_by_tag("body")
    }

    fn query_selector(&self, selector: &str) -> Option<NodeId> {
        self.select(selector, true).into_iter().next()
    }

    fn query_selector_all(&self, selector: &str) -> Vec<NodeId> {
        self.select(selector, false)
    }

    fn create_element(&self, tag: &str) -> DomResult<NodeId> {
        self.root()?;
        let node = Node::new(NodeData::Element {
            name: QualName::new(
                None,
                Namespace::from(HTML_NAMESPACE),
                LocalName::from(tag.to_ascii_lowercase()),
            ),
            attrs: RefCell::new(Vec::new()),
            template_contents: RefCell::new(None),
            mathml_annotation_xml_integration_point: false,
        });
        Ok(self.register(&node))
    }

    fn create_text_node(&self, text: &str) -> DomResult<NodeId> {
        self.root()?;
        let node = Node::new(NodeData::Text {
            contents: RefCell::new(StrTendril::from_slice(text)),
        });
        Ok(self.register(&node))
    }

    fn append_child(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.insert_before(parent, child, None)
    }

    fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> DomResult<()> {
        let parent_handle = self.handle(parent)?;
        let child_handle = self.handle(child)?;

        if is_inclusive_ancestor(&child_handle, &parent_handle) {
            return Err(DomError::HierarchyRequest);
        }

        let reference_handle = match reference {
            Some(reference) => {
                let handle = self.handle(reference)?;
                if !is_child_of(&parent_handle, &handle) {
                    return Err(DomError::NotAChild {
                        parent,
                        child: reference,
                    });
                }
                if Rc::ptr_eq(&handle, &child_handle) {
                    return Ok(());
                }
                Some(handle)
            }
            None => None,
        };

        detach(&child_handle);
        child_handle.parent.set(Some(Rc::downgrade(&parent_handle)));

        let mut children = parent_handle.children.borrow_mut();
        let position = reference_handle
            .and_then(|reference| children.iter().position(|c| Rc::ptr_eq(c, &reference)))
            .unwrap_or(children.len());
        children.insert(position, child_handle);
        Ok(())
    }

    fn remove_child(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        let parent_handle = self.handle(parent)?;
        let child_handle = self.handle(child)?;
        if !is_child_of(&parent_handle, &child_handle) {
            return Err(DomError::NotAChild { parent, child });
        }
        detach(&child_handle);
        Ok(())
    }

    fn children(&self, node: NodeId) -> DomResult<Vec<NodeId>> {
        let handle = self.handle(node)?;
        let children: Vec<Handle> = handle.children.borrow().clone();
        Ok(children.iter().map(|child| self.register(child)).collect())
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.handle(node).ok().and_then(|handle| local_name(&handle))
    }

    fn get_attribute(&self, element: NodeId, name: &str) -> Option<String> {
        self.element(element)
            .ok()
            .and_then(|handle| attribute(&handle, name))
    }

    fn set_attribute(&self, element: NodeId, name: &str, value: &str) -> DomResult<()> {
        let handle = self.element(element)?;
        if let NodeData::Element { ref attrs, .. } = handle.data {
            let name = name.to_ascii_lowercase();
            let mut attrs = attrs.borrow_mut();
            match attrs.iter_mut().find(|attr| &*attr.name.local == name) {
                Some(existing) => existing.value = StrTendril::from_slice(value),
                None => attrs.push(Attribute {
                    name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
                    value: StrTendril::from_slice(value),
                }),
            }
        }
        Ok(())
    }

    fn remove_attribute(&self, element: NodeId, name: &str) -> DomResult<()> {
        let handle = self.element(element)?;
        if let NodeData::Element { ref attrs, .. } = handle.data {
            attrs
                .borrow_mut()
                .retain(|attr| !attr.name.local.eq_str_ignore_ascii_case(name));
        }
        Ok(())
    }

    fn text_content(&self, node: NodeId) -> DomResult<String> {
        let handle = self.handle(node)?;
        let mut text = String::new();
        collect_text(&handle, &mut text);
        Ok(text)
    }

    fn set_text_content(&self, node: NodeId, text: &str) -> DomResult<()> {
        let handle = self.handle(node)?;
        if let NodeData::Text { ref contents } = handle.data {
            *contents.borrow_mut() = StrTendril::from_slice(text);
            return Ok(());
        }

        let previous: Vec<Handle> = handle.children.borrow_mut().drain(..).collect();
        for child in previous {
            child.parent.set(None);
        }
        if !text.is_empty() {
            let text_node = Node::new(NodeData::Text {
                contents: RefCell::new(StrTendril::from_slice(text)),
            });
            text_node.parent.set(Some(Rc::downgrade(&handle)));
            handle.children.borrow_mut().push(text_node);
        }
        Ok(())
    }

    fn render_to_string(&self) -> DomResult<String> {
        let document: SerializableHandle = self.root()?.into();
        let mut bytes = Vec::new();
        serialize(
            &mut bytes,
            &document,
            SerializeOpts {
                traversal_scope: TraversalScope::ChildrenOnly(None),
                ..Default::default()
            },
        )
        .map_err(|e| DomError::Serialization(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| DomError::Serialization(e.to_string()))
    }

    fn clear(&self) {
        self.index.borrow_mut().clear();
        self.nodes.borrow_mut().clear();
        if let Some(document) = self.document.borrow_mut().take() {
            let children: Vec<Handle> = document.children.borrow_mut().drain(..).collect();
            for child in children {
                child.parent.set(None);
            }
        }
    }
}

fn local_name(handle: &Handle) -> Option<String> {
    match handle.data {
        NodeData::Element { ref name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

fn attribute(handle: &Handle, name: &str) -> Option<String> {
    match handle.data {
        NodeData::Element { ref attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| attr.name.local.eq_str_ignore_ascii_case(name))
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

/// Pre-order walk over element nodes; `visit` returns `false` to stop.
pub(crate) fn walk_elements(root: &Handle, visit: &mut dyn FnMut(&Handle) -> bool) -> bool {
    let children: Vec<Handle> = root.children.borrow().clone();
    for child in &children {
        if let NodeData::Element { .. } = child.data {
            if !visit(child) {
                return false;
            }
        }
        if !walk_elements(child, visit) {
            return false;
        }
    }
    true
}

fn collect_text(handle: &Handle, out: &mut String) {
    match handle.data {
        NodeData::Text { ref contents } => out.push_str(&contents.borrow()),
        _ => {
            for child in handle.children.borrow().iter() {
                collect_text(child, out);
            }
        }
    }
}

fn detach(handle: &Handle) {
    if let Some(parent) = handle.parent.take().and_then(|weak| weak.upgrade()) {
        parent
            .children
            .borrow_mut()
            .retain(|child| !Rc::ptr_eq(child, handle));
    }
}

fn is_child_of(parent: &Handle, child: &Handle) -> bool {
    parent
        .children
        .borrow()
        .iter()
        .any(|candidate| Rc::ptr_eq(candidate, child))
}

pub(crate) fn parent_of(handle: &Handle) -> Option<Handle> {
    let parent = handle.parent.take();
    let upgraded = parent.as_ref().and_then(|weak| weak.upgrade());
    handle.parent.set(parent);
    upgraded
}

/// Whether `ancestor` is `node` or one of its ancestors.
fn is_inclusive_ancestor(ancestor: &Handle, node: &Handle) -> bool {
    let mut current = Some(node.clone());
    while let Some(handle) = current {
        if Rc::ptr_eq(&handle, ancestor) {
            return true;
        }
        current = parent_of(&handle);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_is_wrapped_in_document() {
        let doc = HtmlDocument::parse("<app></app>");
        assert_eq!(
            doc.render_to_string().unwrap(),
            "<html><head></head><body><app></app></body></html>"
        );
    }

    #[test]
    fn test_full_document_round_trips() {
        let markup = "<html><head></head><body><app></app></body></html>";
        let doc = HtmlDocument::parse(markup);
        assert_eq!(doc.render_to_string().unwrap(), markup);
    }

    #[test]
    fn test_base_fragment_lands_in_head() {
        let doc = HtmlDocument::parse(r#"<base href="http://other"><app></app>"#);
        assert_eq!(
            doc.render_to_string().unwrap(),
            r#"<html><head><base href="http://other"></head><body><app></app></body></html>"#
        );
    }

    #[test]
    fn test_head_and_body_match_selectors() {
        let doc = HtmlDocument::parse("<app></app>");
        assert_eq!(doc.head().unwrap(), doc.query_selector("head").unwrap());
        assert_eq!(doc.body().unwrap(), doc.query_selector("body").unwrap());
    }

    #[test]
    fn test_append_and_attribute_order() {
        let doc = HtmlDocument::parse("<app></app>");
        let app = doc.query_selector("app").unwrap();
        doc.set_attribute(app, "_nghost-sc1", "").unwrap();
        doc.set_attribute(app, "ng-version", "1").unwrap();
        doc.set_attribute(app, "_nghost-sc1", "x").unwrap();
        let text = doc.create_text_node("Works!").unwrap();
        doc.append_child(app, text).unwrap();
        assert_eq!(
            doc.render_to_string().unwrap(),
            r#"<html><head></head><body><app _nghost-sc1="x" ng-version="1">Works!</app></body></html>"#
        );
    }

    #[test]
    fn test_insert_before_and_remove() {
        let doc = HtmlDocument::parse("<app></app>");
        let head = doc.head().unwrap();
        let title = doc.create_element("title").unwrap();
        let meta = doc.create_element("meta").unwrap();
        doc.append_child(head, title).unwrap();
        doc.insert_before(head, meta, Some(title)).unwrap();
        assert_eq!(doc.children(head).unwrap(), vec![meta, title]);

        doc.remove_child(head, meta).unwrap();
        assert_eq!(doc.children(head).unwrap(), vec![title]);
        assert_eq!(
            doc.remove_child(head, meta),
            Err(DomError::NotAChild {
                parent: head,
                child: meta
            })
        );
    }

    #[test]
    fn test_cannot_append_ancestor_into_descendant() {
        let doc = HtmlDocument::parse("<app><div></div></app>");
        let app = doc.query_selector("app").unwrap();
        let div = doc.query_selector("div").unwrap();
        assert_eq!(doc.append_child(div, app), Err(DomError::HierarchyRequest));
        assert_eq!(doc.append_child(app, app), Err(DomError::HierarchyRequest));
    }

    #[test]
    fn test_set_text_content_replaces_children() {
        let doc = HtmlDocument::parse("<app><b>old</b> text</app>");
        let app = doc.query_selector("app").unwrap();
        assert_eq!(doc.text_content(app).unwrap(), "old text");
        doc.set_text_content(app, "new").unwrap();
        assert_eq!(doc.text_content(app).unwrap(), "new");
        assert!(doc.query_selector("b").is_none());
    }

    #[test]
    fn test_script_text_is_not_escaped() {
        let doc = HtmlDocument::parse("<app></app>");
        let body = doc.body().unwrap();
        let script = doc.create_element("script").unwrap();
        doc.set_text_content(script, "{&q;a&q;:1}").unwrap();
        doc.append_child(body, script).unwrap();
        assert!(doc
            .render_to_string()
            .unwrap()
            .contains("<script>{&q;a&q;:1}</script></body>"));
    }

    #[test]
    fn test_attribute_values_are_escaped() {
        let doc = HtmlDocument::parse("<app></app>");
        let app = doc.query_selector("app").unwrap();
        doc.set_attribute(app, "title", "a \"b\" & c").unwrap();
        assert!(doc
            .render_to_string()
            .unwrap()
            .contains(r#"<app title="a &quot;b&quot; &amp; c">"#));
    }

    #[test]
    fn test_query_selector_all_in_document_order() {
        let doc = HtmlDocument::parse("<app><input hidden><input></app>");
        let inputs = doc.query_selector_all("input");
        assert_eq!(inputs.len(), 2);
        assert_eq!(doc.query_selector("input[hidden]"), Some(inputs[0]));
    }

    #[test]
    fn test_attribute_names_ignore_case() {
        let doc = HtmlDocument::parse(r#"<app data-id="7"></app>"#);
        let app = doc.query_selector("app").unwrap();
        assert_eq!(doc.get_attribute(app, "DATA-ID").as_deref(), Some("7"));
        doc.set_attribute(app, "Title", "x").unwrap();
        assert_eq!(doc.get_attribute(app, "title").as_deref(), Some("x"));
        doc.remove_attribute(app, "Data-Id").unwrap();
        assert_eq!(doc.get_attribute(app, "data-id"), None);
        assert_eq!(doc.query_selector("app[title]"), Some(app));
    }

    #[test]
    fn test_query_selector_combinators() {
        let doc = HtmlDocument::parse(
            r#"<div><section><p>deep</p></section><p title="a]b">direct</p></div>"#,
        );
        let direct = doc.query_selector("div > p").unwrap();
        assert_eq!(doc.text_content(direct).unwrap(), "direct");
        assert_eq!(doc.query_selector(r#"p[title="a]b"]"#), Some(direct));
        assert_eq!(doc.query_selector_all("div p").len(), 2);
        assert!(doc.query_selector("div >").is_none());
    }

    #[test]
    fn test_node_ids_are_stable() {
        let doc = HtmlDocument::parse("<app><p></p></app>");
        let app = doc.query_selector("app").unwrap();
        let p = doc.children(app).unwrap()[0];
        assert_eq!(doc.query_selector("app"), Some(app));
        assert_eq!(doc.query_selector("p"), Some(p));
        assert_eq!(doc.query_selector_all("app, p"), vec![app, p]);
    }

    #[test]
    fn test_text_nodes_are_not_elements() {
        let doc = HtmlDocument::parse("<app></app>");
        let text = doc.create_text_node("x").unwrap();
        assert_eq!(doc.set_attribute(text, "a", "b"), Err(DomError::NotAnElement(text)));
        assert_eq!(doc.tag_name(text), None);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let doc = HtmlDocument::parse("<app></app>");
        let app = doc.query_selector("app").unwrap();
        doc.clear();
        doc.clear();
        assert_eq!(doc.render_to_string(), Err(DomError::Disposed));
        assert_eq!(doc.text_content(app), Err(DomError::Disposed));
        assert!(doc.query_selector("app").is_none());
    }
}

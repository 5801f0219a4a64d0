//! CSS selector matching over the `markup5ever_rcdom` tree.
//!
//! Parsing and matching are delegated to the `selectors` crate. This module
//! only supplies the [`SelectorImpl`] vocabulary and an [`Element`] view of
//! rcdom handles. No non-tree-structural pseudo-classes or pseudo-elements
//! are recognized; structural ones (`:first-child`, `:not(..)`, ...) and all
//! combinators come from the crate.

use std::fmt;

use cssparser::{Parser as CssParser, ParserInput, ToCss};
use markup5ever_rcdom::{Handle, NodeData};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::bloom::{BloomStorageU8, CountingBloomFilter};
use selectors::matching::{
    matches_selector, ElementSelectorFlags, MatchingContext, MatchingForInvalidation,
    MatchingMode, NeedsSelectorFlags, QuirksMode, SelectorCaches,
};
use selectors::parser::{ParseRelative, SelectorImpl, SelectorList, SelectorParseErrorKind};
use selectors::{Element, OpaqueElement};

use crate::document::{parent_of, walk_elements};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// String atom used for every identifier slot of [`DomSelectors`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub(crate) struct CssString(String);

impl CssString {
    fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CssString {
    fn from(s: &str) -> Self {
        CssString(s.to_string())
    }
}

impl std::borrow::Borrow<str> for CssString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CssString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl ToCss for CssString {
    fn to_css<W>(&self, dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        dest.write_str(&self.0)
    }
}

impl precomputed_hash::PrecomputedHash for CssString {
    fn precomputed_hash(&self) -> u32 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        hasher.finish() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DomSelectors;

impl SelectorImpl for DomSelectors {
    type ExtraMatchingData<'a> = ();
    type AttrValue = CssString;
    type Identifier = CssString;
    type LocalName = CssString;
    type NamespacePrefix = CssString;
    type NamespaceUrl = CssString;
    type BorrowedLocalName = str;
    type BorrowedNamespaceUrl = str;

    type NonTSPseudoClass = PseudoClass;
    type PseudoElement = PseudoElement;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PseudoClass {}

impl selectors::parser::NonTSPseudoClass for PseudoClass {
    type Impl = DomSelectors;

    fn is_active_or_hover(&self) -> bool {
        match *self {}
    }

    fn is_user_action_state(&self) -> bool {
        match *self {}
    }
}

impl ToCss for PseudoClass {
    fn to_css<W>(&self, _dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        match *self {}
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PseudoElement {}

impl selectors::parser::PseudoElement for PseudoElement {
    type Impl = DomSelectors;
}

impl ToCss for PseudoElement {
    fn to_css<W>(&self, _dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        match *self {}
    }
}

struct SelectorParser;

impl<'i> selectors::parser::Parser<'i> for SelectorParser {
    type Impl = DomSelectors;
    type Error = SelectorParseErrorKind<'i>;

    fn parse_is_and_where(&self) -> bool {
        true
    }
}

/// A parsed selector list such as `div > p, base[href]`.
pub(crate) struct Selector {
    list: SelectorList<DomSelectors>,
}

impl Selector {
    /// Parse `input`, returning `None` when it is not a valid selector list.
    pub(crate) fn parse(input: &str) -> Option<Self> {
        let mut parser_input = ParserInput::new(input);
        let mut parser = CssParser::new(&mut parser_input);
        match SelectorList::parse(&SelectorParser, &mut parser, ParseRelative::No) {
            Ok(list) => Some(Self { list }),
            Err(e) => {
                tracing::debug!(selector = input, error = ?e.kind, "Invalid selector");
                None
            }
        }
    }

    /// Elements below `root` matching the selector, in document order.
    pub(crate) fn query(&self, root: &Handle, first_only: bool) -> Vec<Handle> {
        let mut caches = SelectorCaches::default();
        let mut matched = Vec::new();
        walk_elements(root, &mut |handle| {
            if self.matches(&ElementHandle(handle.clone()), &mut caches) {
                matched.push(handle.clone());
                if first_only {
                    return false;
                }
            }
            true
        });
        matched
    }

    fn matches(&self, element: &ElementHandle, caches: &mut SelectorCaches) -> bool {
        let mut context = MatchingContext::new(
            MatchingMode::Normal,
            None,
            caches,
            QuirksMode::NoQuirks,
            NeedsSelectorFlags::No,
            MatchingForInvalidation::No,
        );
        self.list
            .slice()
            .iter()
            .any(|selector| matches_selector(selector, 0, None, element, &mut context))
    }
}

/// [`Element`] view of an rcdom element node.
#[derive(Clone)]
struct ElementHandle(Handle);

impl fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.data {
            NodeData::Element { ref name, .. } => write!(f, "<{}>", name.local),
            _ => f.write_str("<?>"),
        }
    }
}

impl ElementHandle {
    fn wrap(handle: Handle) -> Option<Self> {
        matches!(handle.data, NodeData::Element { .. }).then_some(Self(handle))
    }

    fn is_html(&self) -> bool {
        match self.0.data {
            NodeData::Element { ref name, .. } => &*name.ns == HTML_NAMESPACE,
            _ => false,
        }
    }

    fn attr(&self, local_name: &str) -> Option<String> {
        let NodeData::Element { ref attrs, .. } = self.0.data else {
            return None;
        };
        let is_html = self.is_html();
        attrs
            .borrow()
            .iter()
            .find(|attr| {
                if is_html {
                    attr.name.local.eq_str_ignore_ascii_case(local_name)
                } else {
                    &*attr.name.local == local_name
                }
            })
            .map(|attr| attr.value.to_string())
    }

    /// Sibling nodes before and after this node, nearest first.
    fn siblings(&self) -> (Vec<Handle>, Vec<Handle>) {
        let Some(parent) = parent_of(&self.0) else {
            return (Vec::new(), Vec::new());
        };
        let children = parent.children.borrow();
        let Some(index) = children
            .iter()
            .position(|child| std::rc::Rc::ptr_eq(child, &self.0))
        else {
            return (Vec::new(), Vec::new());
        };
        let before = children[..index].iter().rev().cloned().collect();
        let after = children[index + 1..].iter().cloned().collect();
        (before, after)
    }
}

impl Element for ElementHandle {
    type Impl = DomSelectors;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(&*self.0)
    }

    fn parent_element(&self) -> Option<Self> {
        parent_of(&self.0).and_then(Self::wrap)
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        self.siblings().0.into_iter().find_map(Self::wrap)
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.siblings().1.into_iter().find_map(Self::wrap)
    }

    fn first_element_child(&self) -> Option<Self> {
        self.0.children.borrow().iter().cloned().find_map(Self::wrap)
    }

    fn is_html_element_in_html_document(&self) -> bool {
        self.is_html()
    }

    fn has_local_name(&self, local_name: &str) -> bool {
        match self.0.data {
            NodeData::Element { ref name, .. } if self.is_html() => {
                name.local.eq_str_ignore_ascii_case(local_name)
            }
            NodeData::Element { ref name, .. } => &*name.local == local_name,
            _ => false,
        }
    }

    fn has_namespace(&self, ns: &str) -> bool {
        match self.0.data {
            NodeData::Element { ref name, .. } => ns.is_empty() || &*name.ns == ns,
            _ => false,
        }
    }

    fn is_same_type(&self, other: &Self) -> bool {
        match (&self.0.data, &other.0.data) {
            (NodeData::Element { name: a, .. }, NodeData::Element { name: b, .. }) => {
                a.local == b.local && a.ns == b.ns
            }
            _ => false,
        }
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&CssString>,
        local_name: &CssString,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        if let NamespaceConstraint::Specific(url) = ns {
            if !(url.as_str().is_empty() || url.as_str() == HTML_NAMESPACE) {
                return false;
            }
        }

        let Some(value) = self.attr(local_name.as_str()) else {
            return false;
        };
        match operation {
            AttrSelectorOperation::Exists => true,
            AttrSelectorOperation::WithValue {
                operator,
                case_sensitivity,
                value: expected,
            } => operator.eval_str(&value, expected.as_str(), *case_sensitivity),
        }
    }

    fn match_non_ts_pseudo_class(
        &self,
        pseudo: &PseudoClass,
        _context: &mut MatchingContext<Self::Impl>,
    ) -> bool {
        match *pseudo {}
    }

    fn match_pseudo_element(
        &self,
        pseudo: &PseudoElement,
        _context: &mut MatchingContext<Self::Impl>,
    ) -> bool {
        match *pseudo {}
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn is_link(&self) -> bool {
        self.attr("href").is_some()
            && ["a", "area", "link"]
                .iter()
                .any(|tag| self.has_local_name(tag))
    }

    fn is_html_slot_element(&self) -> bool {
        self.is_html() && self.has_local_name("slot")
    }

    fn has_id(&self, id: &CssString, case_sensitivity: CaseSensitivity) -> bool {
        self.attr("id")
            .is_some_and(|actual| same_token(&actual, id.as_str(), case_sensitivity))
    }

    fn has_class(&self, class: &CssString, case_sensitivity: CaseSensitivity) -> bool {
        self.attr("class").is_some_and(|classes| {
            classes
                .split_ascii_whitespace()
                .any(|c| same_token(c, class.as_str(), case_sensitivity))
        })
    }

    fn has_custom_state(&self, _name: &CssString) -> bool {
        false
    }

    fn imported_part(&self, _name: &CssString) -> Option<CssString> {
        None
    }

    fn is_part(&self, _name: &CssString) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.0.children.borrow().iter().all(|child| match child.data {
            NodeData::Element { .. } => false,
            NodeData::Text { ref contents } => contents.borrow().is_empty(),
            _ => true,
        })
    }

    fn is_root(&self) -> bool {
        parent_of(&self.0).is_some_and(|parent| matches!(parent.data, NodeData::Document))
    }

    fn add_element_unique_hashes(
        &self,
        _filter: &mut CountingBloomFilter<BloomStorageU8>,
    ) -> bool {
        false
    }
}

fn same_token(actual: &str, expected: &str, case_sensitivity: CaseSensitivity) -> bool {
    match case_sensitivity {
        CaseSensitivity::CaseSensitive => actual == expected,
        CaseSensitivity::AsciiCaseInsensitive => actual.eq_ignore_ascii_case(expected),
    }
}

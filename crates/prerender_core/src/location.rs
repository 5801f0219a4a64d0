//! URL resolution for server-side locations.
//!
//! Splits request URLs into the components a browser exposes through
//! `window.location` and rewrites relative outbound requests to absolute ones.
//! Parsing is deliberately literal: an explicit default port such as `:80`
//! is kept, and an omitted port is never inferred from the scheme.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RenderCoreError, Result};

/// The components of a URL as seen by the rendered application.
///
/// `search` and `hash` are either empty or carry their `?`/`#` prefix, and
/// `pathname` always starts with `/`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub protocol: String,
    pub hostname: String,
    pub port: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
}

impl ResolvedLocation {
    /// Location used when no request URL was configured.
    pub fn root() -> Self {
        Self {
            pathname: "/".to_string(),
            ..Self::default()
        }
    }

    /// Parse an absolute URL (`http://host:port/path?query#hash`) or a
    /// path-only reference (`/path?query#hash`).
    ///
    /// Path-only input leaves `protocol`, `hostname` and `port` empty.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = |reason: &str| RenderCoreError::InvalidUrl {
            url: input.to_string(),
            reason: reason.to_string(),
        };

        let (protocol, rest) = match split_scheme(input) {
            Some((scheme, rest)) => (format!("{}:", scheme.to_ascii_lowercase()), rest),
            None => (String::new(), input),
        };

        let (rest, hash) = split_suffix(rest, '#');
        let (rest, search) = split_suffix(rest, '?');

        let (hostname, port, path) = if protocol.is_empty() {
            (String::new(), String::new(), rest)
        } else {
            let (authority, path) = match rest.find('/') {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            };
            let (hostname, port) = split_authority(authority).map_err(|reason| invalid(reason))?;
            (hostname, port, path)
        };

        let pathname = if path.is_empty() {
            "/".to_string()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        Ok(Self {
            protocol,
            hostname,
            port,
            pathname,
            search: search.to_string(),
            hash: hash.to_string(),
        })
    }

    /// `protocol//hostname[:port]`, or an empty string for path-only locations.
    pub fn origin(&self) -> String {
        if self.protocol.is_empty() {
            return String::new();
        }
        let mut origin = format!("{}//{}", self.protocol, self.hostname);
        if !self.port.is_empty() {
            origin.push(':');
            origin.push_str(&self.port);
        }
        origin
    }

    /// Path, query and fragment: what `history.pushState` operates on.
    pub fn url(&self) -> String {
        format!("{}{}{}", self.pathname, self.search, self.hash)
    }

    /// The full reassembled URL.
    pub fn href(&self) -> String {
        format!("{}{}", self.origin(), self.url())
    }
}

/// Pick the base used for navigation state.
///
/// A non-empty `<base href>` found in the document wins over `fallback`.
pub fn resolve_base(document_base_href: Option<&str>, fallback: &str) -> String {
    match document_base_href.map(str::trim) {
        Some(href) if !href.is_empty() => href.to_string(),
        _ => fallback.to_string(),
    }
}

/// Resolve `request` against `base`.
///
/// Requests that already name a scheme or a host (`//host/...`) pass through
/// unchanged. Everything else follows RFC 3986 reference resolution, so the
/// result has exactly one `/` between authority and path whatever slashes
/// either side carried.
pub fn to_absolute(request: &str, base: &str) -> Result<String> {
    if is_absolute_url(request) {
        return Ok(request.to_string());
    }

    let base_url = Url::parse(base).map_err(|e| RenderCoreError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;

    base_url
        .join(request)
        .map(String::from)
        .map_err(|e| RenderCoreError::InvalidUrl {
            url: request.to_string(),
            reason: e.to_string(),
        })
}

/// Whether `url` carries a scheme or is a network-path reference.
pub fn is_absolute_url(url: &str) -> bool {
    url.starts_with("//") || split_scheme(url).is_some()
}

fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let idx = input.find("://")?;
    let scheme = &input[..idx];
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then(|| (scheme, &input[idx + 3..]))
}

/// Split `input` at the first `marker`, keeping the marker on the suffix.
/// A lone marker yields an empty suffix, like `location.hash` for `#`.
fn split_suffix(input: &str, marker: char) -> (&str, &str) {
    match input.find(marker) {
        Some(idx) => {
            let (head, tail) = input.split_at(idx);
            if tail.len() == marker.len_utf8() {
                (head, "")
            } else {
                (head, tail)
            }
        }
        None => (input, ""),
    }
}

fn split_authority(authority: &str) -> std::result::Result<(String, String), &'static str> {
    // userinfo never reaches `location`
    let host_port = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host_port)| host_port);

    let (hostname, port) = if host_port.starts_with('[') {
        let end = host_port.find(']').ok_or("unterminated IPv6 host")?;
        let (host, rest) = host_port.split_at(end + 1);
        match rest.strip_prefix(':') {
            Some(port) => (host, port),
            None if rest.is_empty() => (host, ""),
            None => return Err("unexpected characters after IPv6 host"),
        }
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host, port),
            None => (host_port, ""),
        }
    };

    if hostname.is_empty() {
        return Err("missing host");
    }
    if !port.chars().all(|c| c.is_ascii_digit()) {
        return Err("port must be numeric");
    }

    Ok((hostname.to_ascii_lowercase(), port.to_string()))
}

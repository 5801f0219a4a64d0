//! Transfer state: the key/value payload handed from the server render to
//! the client, and the escaping that makes it safe inside `<script>`.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::{RenderCoreError, Result, MAX_TRANSFER_STATE_SIZE};

/// `id` of the script element that carries the transfer state.
pub const TRANSFER_STATE_SCRIPT_ID: &str = "transfer-state";

/// Escape tokens, in the order they are tried when decoding.
const ESCAPES: [(char, &str); 5] = [
    ('&', "&a;"),
    ('"', "&q;"),
    ('\'', "&s;"),
    ('<', "&l;"),
    ('>', "&g;"),
];

/// Replace `& " ' < >` with private escape tokens.
///
/// The tokens are not HTML entities, so the browser's HTML parser leaves them
/// alone inside a `<script>` element and `</script>` can never appear in the
/// output.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match ESCAPES.iter().find(|(raw, _)| *raw == c) {
            Some((_, token)) => escaped.push_str(token),
            None => escaped.push(c),
        }
    }
    escaped
}

/// Exact inverse of [`escape_html`].
pub fn unescape_html(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find('&') {
        unescaped.push_str(&rest[..idx]);
        rest = &rest[idx..];
        match ESCAPES.iter().find(|(_, token)| rest.starts_with(token)) {
            Some((raw, token)) => {
                unescaped.push(*raw);
                rest = &rest[token.len()..];
            }
            None => {
                unescaped.push('&');
                rest = &rest[1..];
            }
        }
    }
    unescaped.push_str(rest);
    unescaped
}

/// Serialize `payload` to JSON and escape it for embedding in a script tag.
pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    let json =
        serde_json::to_string(payload).map_err(|e| RenderCoreError::Serialization(e.to_string()))?;
    if json.len() > MAX_TRANSFER_STATE_SIZE {
        return Err(RenderCoreError::PayloadTooLarge {
            size: json.len(),
            max: MAX_TRANSFER_STATE_SIZE,
        });
    }
    Ok(escape_html(&json))
}

/// Undo [`encode`].
pub fn decode<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    serde_json::from_str(&unescape_html(encoded))
        .map_err(|e| RenderCoreError::Serialization(e.to_string()))
}

/// A typed key into [`TransferState`].
pub struct StateKey<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        make_state_key(self.name.clone())
    }
}

impl<T> fmt::Debug for StateKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateKey").field(&self.name).finish()
    }
}

/// Create a typed key for values of type `T`.
pub fn make_state_key<T>(name: impl Into<String>) -> StateKey<T> {
    StateKey {
        name: name.into(),
        _marker: PhantomData,
    }
}

type SerializeCallback = Box<dyn Fn() -> Value>;

/// Key/value payload accumulated during a render and consumed once when the
/// document is serialized.
#[derive(Default)]
pub struct TransferState {
    store: Map<String, Value>,
    on_serialize: BTreeMap<String, SerializeCallback>,
}

impl TransferState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set<T: Serialize>(&mut self, key: &StateKey<T>, value: &T) -> Result<()> {
        let value =
            serde_json::to_value(value).map_err(|e| RenderCoreError::Serialization(e.to_string()))?;
        self.store.insert(key.name.clone(), value);
        Ok(())
    }

    /// Read the value under `key`; `None` if absent or of a different shape.
    pub fn get<T: DeserializeOwned>(&self, key: &StateKey<T>) -> Option<T> {
        self.store
            .get(&key.name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Store an untyped JSON value.
    pub fn set_raw(&mut self, key: impl Into<String>, value: Value) {
        self.store.insert(key.into(), value);
    }

    pub fn has_key<T>(&self, key: &StateKey<T>) -> bool {
        self.store.contains_key(&key.name)
    }

    pub fn remove<T>(&mut self, key: &StateKey<T>) {
        self.store.remove(&key.name);
    }

    /// Register a callback whose result is stored under `key` at
    /// serialization time, overriding any value set directly.
    pub fn on_serialize<T>(&mut self, key: &StateKey<T>, callback: impl Fn() -> Value + 'static) {
        self.on_serialize
            .insert(key.name.clone(), Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.snapshot_keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty() && self.on_serialize.is_empty()
    }

    /// Serialize the current payload without consuming it.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.snapshot())
            .map_err(|e| RenderCoreError::Serialization(e.to_string()))
    }

    /// Consume the payload, running the serialization callbacks.
    ///
    /// The store is left empty, so a second call returns an empty map.
    pub fn take(&mut self) -> Map<String, Value> {
        let snapshot = self.snapshot();
        self.store.clear();
        self.on_serialize.clear();
        snapshot
    }

    fn snapshot(&self) -> Map<String, Value> {
        let mut snapshot = self.store.clone();
        for (key, callback) in &self.on_serialize {
            snapshot.insert(key.clone(), callback());
        }
        snapshot
    }

    fn snapshot_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.store.keys().map(String::as_str).collect();
        for key in self.on_serialize.keys() {
            if !self.store.contains_key(key) {
                keys.push(key);
            }
        }
        keys
    }
}

impl fmt::Debug for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferState")
            .field("store", &self.store)
            .field("on_serialize", &self.on_serialize.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Build the `<script>` element markup for an already-encoded payload.
pub fn script_tag(encoded: &str) -> String {
    format!(
        r#"<script id="{TRANSFER_STATE_SCRIPT_ID}" type="application/json">{encoded}</script>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BREAKOUT: &str = "</script><script>alert('Hello&' + \"World\");";

    #[test]
    fn test_encode_simple_payload() {
        let encoded = encode(&serde_json::json!({"test": 10})).unwrap();
        assert_eq!(encoded, "{&q;test&q;:10}");
    }

    #[test]
    fn test_encode_cannot_break_out_of_script() {
        let encoded = encode(&serde_json::json!({"testString": BREAKOUT})).unwrap();
        assert_eq!(
            encoded,
            "{&q;testString&q;:&q;&l;/script&g;&l;script&g;alert(&s;Hello&a;&s; + \\&q;World\\&q;);&q;}"
        );
        assert!(!encoded.contains("</script>"));
        assert!(!encoded.contains('"'));
        assert!(!encoded.contains('\''));
    }

    #[test]
    fn test_decode_inverts_encode() {
        let original = serde_json::json!({"s": BREAKOUT, "amp": "&q; & &a;", "n": [1, 2]});
        let decoded: Value = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_unescape_leaves_unknown_ampersands() {
        assert_eq!(unescape_html("a &amp; b &"), "a &amp; b &");
        assert_eq!(unescape_html(&escape_html("&a;")), "&a;");
    }

    #[test]
    fn test_encode_payload_too_large() {
        let large = "x".repeat(MAX_TRANSFER_STATE_SIZE + 1);
        let result = encode(&serde_json::json!({"large": large}));
        assert!(matches!(result, Err(RenderCoreError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_state_set_get_typed() {
        let key = make_state_key::<u32>("test");
        let mut state = TransferState::new();
        assert!(state.is_empty());
        state.set(&key, &10).unwrap();
        assert!(state.has_key(&key));
        assert_eq!(state.get(&key), Some(10));
        assert_eq!(state.len(), 1);

        let wrong_type = make_state_key::<String>("test");
        assert_eq!(state.get(&wrong_type), None);

        state.remove(&key);
        assert!(!state.has_key(&key));
    }

    #[test]
    fn test_on_serialize_runs_at_take() {
        let key = make_state_key::<String>("late");
        let mut state = TransferState::new();
        state.on_serialize(&key, || Value::String("computed".to_string()));
        assert!(!state.is_empty());

        let payload = state.take();
        assert_eq!(payload.get("late"), Some(&Value::String("computed".to_string())));
    }

    #[test]
    fn test_take_consumes_payload_once() {
        let key = make_state_key::<bool>("flag");
        let mut state = TransferState::new();
        state.set(&key, &true).unwrap();

        assert_eq!(state.take().len(), 1);
        assert!(state.is_empty());
        assert!(state.take().is_empty());
    }

    #[test]
    fn test_to_json_does_not_consume() {
        let mut state = TransferState::new();
        state.set_raw("k", serde_json::json!("v"));
        assert_eq!(state.to_json().unwrap(), r#"{"k":"v"}"#);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_script_tag_shape() {
        assert_eq!(
            script_tag("{&q;test&q;:10}"),
            r#"<script id="transfer-state" type="application/json">{&q;test&q;:10}</script>"#
        );
    }
}

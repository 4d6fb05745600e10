use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use storyforge_core::error::{Result, StoryforgeError};

/// Key the engine writes when a run terminates on a node failure.
pub const ERROR_KEY: &str = "error";

/// The state record threaded through every node of a run.
///
/// Keys are field names; values are JSON. Reads never fail: every typed
/// accessor returns a documented default for absent or mistyped keys
/// (`""`, `0`, `false`, empty list). Node outputs are partial records merged
/// by key overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryState {
    data: BTreeMap<String, Value>,
}

impl StoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state record from a JSON object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                data: map.into_iter().collect(),
            }),
            Value::Null => Ok(Self::new()),
            other => Err(StoryforgeError::Config(format!(
                "state record must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Builder-style insert, handy for partial outputs.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Get a raw value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// String field, `""` when absent.
    pub fn get_str(&self, key: &str) -> &str {
        self.data.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }

    /// Unsigned integer field, `0` when absent.
    pub fn get_u64(&self, key: &str) -> u64 {
        self.data.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
    }

    /// Boolean field, `false` when absent.
    pub fn get_bool(&self, key: &str) -> bool {
        self.data.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// List field, empty when absent.
    pub fn get_list(&self, key: &str) -> &[Value] {
        self.data
            .get(key)
            .and_then(|v| v.as_array())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Object field, `{}` when absent.
    pub fn get_object(&self, key: &str) -> Value {
        match self.data.get(key) {
            Some(v @ Value::Object(_)) => v.clone(),
            _ => Value::Object(Default::default()),
        }
    }

    /// List of strings, skipping non-string entries.
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        self.get_list(key)
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// Set a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Merge a partial record into this one (last write wins per key, no deep merge).
    pub fn merge(&mut self, partial: StoryState) {
        for (k, v) in partial.data {
            self.data.insert(k, v);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The failure message of a run that terminated on a node error.
    pub fn error(&self) -> Option<&str> {
        self.data.get(ERROR_KEY).and_then(|v| v.as_str())
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.data.clone().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_for_absent_keys() {
        let state = StoryState::new();
        assert_eq!(state.get_str("title"), "");
        assert_eq!(state.get_u64("revision_count"), 0);
        assert!(!state.get_bool("human_approved"));
        assert!(state.get_list("chapters").is_empty());
        assert_eq!(state.get_object("analysis"), json!({}));
        assert!(state.error().is_none());
    }

    #[test]
    fn test_mistyped_values_fall_back() {
        let state = StoryState::new()
            .with("revision_count", "two")
            .with("chapters", json!({"not": "a list"}));
        assert_eq!(state.get_u64("revision_count"), 0);
        assert!(state.get_list("chapters").is_empty());
    }

    #[test]
    fn test_merge_overwrites_only_given_keys() {
        let mut state = StoryState::new().with("a", "1").with("b", "2");
        state.merge(StoryState::new().with("b", "overwritten").with("c", "3"));

        assert_eq!(state.get_str("a"), "1");
        assert_eq!(state.get_str("b"), "overwritten");
        assert_eq!(state.get_str("c"), "3");
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut state = StoryState::new().with("analysis", json!({"moral": "m", "characters": ["fox"]}));
        state.merge(StoryState::new().with("analysis", json!({"moral": "new"})));
        assert_eq!(state.get("analysis"), Some(&json!({"moral": "new"})));
    }

    #[test]
    fn test_merge_twice_equals_once() {
        let partial = StoryState::new().with("title", "The Fox").with("revision_count", 1);

        let mut once = StoryState::new().with("prompt", "p");
        once.merge(partial.clone());

        let mut twice = StoryState::new().with("prompt", "p");
        twice.merge(partial.clone());
        twice.merge(partial);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_from_json() {
        let state = StoryState::from_json(json!({"genre": "Terror"})).unwrap();
        assert_eq!(state.get_str("genre"), "Terror");
        assert!(StoryState::from_json(json!(null)).unwrap().is_empty());
        assert!(StoryState::from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let state = StoryState::new().with("title", "T").with("chapters", json!([{"title": "c1"}]));
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.starts_with('{'));
        let parsed: StoryState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}

//! Execution context with dotted-path lookup and template rendering.
//!
//! `ExecutionContext` is the key/value state threaded through a workflow
//! execution. Step outputs are merged into it, templates are rendered against
//! it, and its total serialized size is capped.

use flowgate_types::workflow::ContextMap;
use serde_json::Value;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Mutable execution state owned by a single run loop.
///
/// Parallel branches receive a clone and never write back directly; the
/// coordinator merges their results after the join.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    values: ContextMap,
    max_bytes: usize,
}

impl ExecutionContext {
    pub fn new(values: ContextMap, max_bytes: usize) -> Self {
        Self { values, max_bytes }
    }

    pub fn values(&self) -> &ContextMap {
        &self.values
    }

    /// Owned copy of the current values, for snapshots and persistence.
    pub fn snapshot(&self) -> ContextMap {
        self.values.clone()
    }

    pub fn into_values(self) -> ContextMap {
        self.values
    }

    /// Resolve a dotted path (`customer.address.city`) against the context.
    ///
    /// Numeric segments index into arrays (`items.0.sku`).
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Merge a step result into the context, key by key.
    ///
    /// Fails without modifying the context if the result would push the
    /// serialized size past the cap.
    pub fn merge(&mut self, output: ContextMap) -> Result<(), ContextError> {
        let mut merged = self.values.clone();
        merged.extend(output);
        let size = serialized_size(&merged)?;
        if size > self.max_bytes {
            return Err(ContextError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        self.values = merged;
        Ok(())
    }

    /// Insert a single key (same size rules as `merge`).
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<(), ContextError> {
        let mut single = ContextMap::new();
        single.insert(key.into(), value);
        self.merge(single)
    }

    /// Serialized size of the whole context in bytes.
    pub fn total_size(&self) -> Result<usize, ContextError> {
        serialized_size(&self.values)
    }

    /// Check an initial context against the size cap.
    pub fn check_size(&self) -> Result<(), ContextError> {
        let size = self.total_size()?;
        if size > self.max_bytes {
            return Err(ContextError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    /// Render `{{ path }}` placeholders against the context.
    ///
    /// Whitespace inside the braces is optional. Strings are inserted as-is,
    /// other values as compact JSON. A placeholder naming a missing field is
    /// an error; nothing is left unresolved.
    pub fn render(&self, template: &str) -> Result<String, ContextError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| ContextError::UnterminatedPlaceholder(template.to_string()))?;
            let path = after[..end].trim();
            if path.is_empty() {
                return Err(ContextError::EmptyPlaceholder(template.to_string()));
            }
            let value = self
                .lookup(path)
                .ok_or_else(|| ContextError::MissingField(path.to_string()))?;
            out.push_str(&value_to_string(value));
            rest = &after[end + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Render every string inside a JSON value, recursively.
    pub fn render_value(&self, value: &Value) -> Result<Value, ContextError> {
        Ok(match value {
            Value::String(s) => Value::String(self.render(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render_value(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut rendered = ContextMap::new();
                for (k, v) in map {
                    rendered.insert(k.clone(), self.render_value(v)?);
                }
                Value::Object(rendered)
            }
            other => other.clone(),
        })
    }
}

fn serialized_size(values: &ContextMap) -> Result<usize, ContextError> {
    serde_json::to_vec(values)
        .map(|bytes| bytes.len())
        .map_err(|e| ContextError::Serialize(e.to_string()))
}

/// Convert a JSON value to the text inserted into a rendered template.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("template references missing field '{0}'")]
    MissingField(String),

    #[error("unterminated placeholder in template: {0}")]
    UnterminatedPlaceholder(String),

    #[error("empty placeholder in template: {0}")]
    EmptyPlaceholder(String),

    #[error("execution context size ({size} bytes) exceeds maximum ({max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("context serialization failed: {0}")]
    Serialize(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> ExecutionContext {
        let Value::Object(map) = value else {
            panic!("context fixture must be an object");
        };
        ExecutionContext::new(map, 1024 * 1024)
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let c = ctx(json!({
            "customer": { "name": "Ada", "tags": ["vip", "eu"] },
            "count": 3
        }));
        assert_eq!(c.lookup("customer.name"), Some(&json!("Ada")));
        assert_eq!(c.lookup("customer.tags.1"), Some(&json!("eu")));
        assert_eq!(c.lookup("count"), Some(&json!(3)));
        assert!(c.lookup("customer.email").is_none());
        assert!(c.lookup("count.value").is_none());
    }

    #[test]
    fn render_substitutes_nested_fields() {
        let c = ctx(json!({ "user": { "name": "Ada" }, "n": 2 }));
        let out = c.render("Hello {{ user.name }}, you have {{n}} tasks").unwrap();
        assert_eq!(out, "Hello Ada, you have 2 tasks");
    }

    #[test]
    fn render_missing_field_is_error() {
        let c = ctx(json!({ "a": 1 }));
        let err = c.render("value: {{ b }}").unwrap_err();
        assert!(matches!(err, ContextError::MissingField(ref f) if f == "b"));
    }

    #[test]
    fn render_unterminated_placeholder_is_error() {
        let c = ctx(json!({ "a": 1 }));
        assert!(matches!(
            c.render("{{ a"),
            Err(ContextError::UnterminatedPlaceholder(_))
        ));
    }

    #[test]
    fn render_without_placeholders_is_identity() {
        let c = ctx(json!({}));
        assert_eq!(c.render("plain text").unwrap(), "plain text");
    }

    #[test]
    fn render_value_recurses() {
        let c = ctx(json!({ "id": "42" }));
        let rendered = c
            .render_value(&json!({ "path": "/items/{{ id }}", "list": ["{{id}}", 7] }))
            .unwrap();
        assert_eq!(rendered, json!({ "path": "/items/42", "list": ["42", 7] }));
    }

    #[test]
    fn merge_overwrites_keys() {
        let mut c = ctx(json!({ "a": 1, "b": 2 }));
        let Value::Object(out) = json!({ "b": 3, "c": 4 }) else { unreachable!() };
        c.merge(out).unwrap();
        assert_eq!(c.values().get("b"), Some(&json!(3)));
        assert_eq!(c.values().len(), 3);
    }

    #[test]
    fn merge_rejects_oversized_context_and_keeps_old_values() {
        let mut c = ExecutionContext::new(ContextMap::new(), 64);
        c.insert("small", json!("ok")).unwrap();

        let err = c.insert("big", json!("x".repeat(200))).unwrap_err();
        assert!(matches!(err, ContextError::TooLarge { max: 64, .. }));
        assert!(c.values().get("big").is_none());
        assert_eq!(c.values().get("small"), Some(&json!("ok")));
    }
}

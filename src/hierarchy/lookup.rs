//! Name lookup over a persisted hierarchy document.

use serde_json::Value;

/// Find the first object whose `"name"` equals `target`, at any depth.
///
/// Traversal is preorder (an object before its members, array items in
/// order) with an explicit stack, so deeply nested input cannot overflow the
/// call stack. Returns `None` when nothing matches.
#[must_use]
pub fn find<'a>(root_scope: &'a Value, target: &str) -> Option<&'a Value> {
    let mut stack = vec![root_scope];
    while let Some(value) = stack.pop() {
        match value {
            Value::Object(map) => {
                if map.get("name").and_then(Value::as_str) == Some(target) {
                    return Some(value);
                }
                stack.extend(map.values().rev().filter(|v| is_container(v)));
            }
            Value::Array(items) => {
                stack.extend(items.iter().rev().filter(|v| is_container(v)));
            }
            _ => {}
        }
    }
    None
}

const fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

//! Edit types: the content algorithm a document's `type` selects.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Content algorithm for one document type
pub trait EditType: Send + Sync {
    fn name(&self) -> &str;

    /// Content of a freshly created document's root snapshot
    fn create(&self) -> Value;

    /// Apply a changeset to head content, returning the new content
    fn apply(&self, content: &Value, changeset: &Value) -> Result<Value, String>;
}

/// Registered edit types keyed by name
#[derive(Clone, Default)]
pub struct EditTypes {
    types: BTreeMap<String, Arc<dyn EditType>>,
}

impl EditTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `plaintext` type
    pub fn builtin() -> Self {
        let mut types = Self::new();
        types.register(Arc::new(PlainText));
        types
    }

    pub fn register(&mut self, edit_type: Arc<dyn EditType>) {
        self.types.insert(edit_type.name().to_string(), edit_type);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EditType>> {
        self.types.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for EditTypes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.types.keys()).finish()
    }
}

pub const PLAINTEXT: &str = "plaintext";

/// Plain text edited with a list of components: a string inserts, a positive
/// integer retains that many characters, `{"d": n}` deletes `n` characters.
/// Characters past the last component are retained.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

enum Component<'a> {
    Insert(&'a str),
    Retain(usize),
    Delete(usize),
}

fn parse_component(value: &Value) -> Result<Component<'_>, String> {
    match value {
        Value::String(text) => Ok(Component::Insert(text)),
        Value::Number(n) => match n.as_u64() {
            Some(count) if count > 0 => Ok(Component::Retain(count as usize)),
            _ => Err(format!("retain count must be a positive integer, got {}", n)),
        },
        Value::Object(obj) => match obj.get("d").and_then(Value::as_u64) {
            Some(count) if count > 0 && obj.len() == 1 => Ok(Component::Delete(count as usize)),
            _ => Err("delete component must be {\"d\": <positive integer>}".to_string()),
        },
        other => Err(format!("unsupported text operation component: {}", other)),
    }
}

impl EditType for PlainText {
    fn name(&self) -> &str {
        PLAINTEXT
    }

    fn create(&self) -> Value {
        Value::String(String::new())
    }

    fn apply(&self, content: &Value, changeset: &Value) -> Result<Value, String> {
        let text = content
            .as_str()
            .ok_or_else(|| "plaintext content must be a string".to_string())?;
        let components = changeset
            .as_array()
            .ok_or_else(|| "plaintext changeset must be an array of components".to_string())?;

        let chars: Vec<char> = text.chars().collect();
        let mut cursor = 0;
        let mut out = String::with_capacity(text.len());

        for component in components {
            match parse_component(component)? {
                Component::Insert(s) => out.push_str(s),
                Component::Retain(n) => {
                    let end = cursor + n;
                    if end > chars.len() {
                        return Err(format!("retain of {} runs past the end of the document", n));
                    }
                    out.extend(&chars[cursor..end]);
                    cursor = end;
                }
                Component::Delete(n) => {
                    if cursor + n > chars.len() {
                        return Err(format!("delete of {} runs past the end of the document", n));
                    }
                    cursor += n;
                }
            }
        }
        out.extend(&chars[cursor..]);
        Ok(Value::String(out))
    }
}

//! Runtime values and the render-time data context

use std::collections::{BTreeMap, HashMap};

/// A runtime value in the template
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Lookup of a variable or field that does not exist. Renders as the
    /// empty string instead of failing the render.
    Undefined,
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    /// Already-escaped markup that must not be HTML-escaped again
    Safe(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) | Value::Safe(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Dict(d) => !d.is_empty(),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Plain-text form of a scalar. Lists and dicts render as JSON.
    pub fn render_to_string(&self) -> String {
        match self {
            Value::Undefined | Value::None => String::new(),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) | Value::Safe(s) => s.clone(),
            Value::List(_) | Value::Dict(_) => self.to_json().to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Undefined | Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) | Value::Safe(s) => Json::String(s.clone()),
            Value::List(l) => Json::Array(l.iter().map(Value::to_json).collect()),
            Value::Dict(d) => Json::Object(
                d.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Field lookup; anything missing is [`Value::Undefined`]
    pub fn field(&self, name: &str) -> Value {
        match self {
            Value::Dict(map) => map.get(name).cloned().unwrap_or(Value::Undefined),
            Value::List(list) => name
                .parse::<usize>()
                .ok()
                .and_then(|i| list.get(i).cloned())
                .unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        }
    }

    /// Index lookup (`$xs[0]`, `$xs[-1]`, `$map['key']`, `$s[0]`)
    pub fn index(&self, idx: &Value) -> Value {
        match (self, idx) {
            (Value::List(list), Value::Int(i)) => resolve_index(*i, list.len())
                .and_then(|i| list.get(i).cloned())
                .unwrap_or(Value::Undefined),
            (Value::Dict(map), key) => map
                .get(&key.render_to_string())
                .cloned()
                .unwrap_or(Value::Undefined),
            (Value::String(s), Value::Int(i)) => {
                let len = s.chars().count();
                resolve_index(*i, len)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Undefined)
            }
            _ => Value::Undefined,
        }
    }
}

fn resolve_index(i: i64, len: usize) -> Option<usize> {
    if i < 0 {
        let back = usize::try_from(i.unsigned_abs()).ok()?;
        len.checked_sub(back)
    } else {
        usize::try_from(i).ok()
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::None, Value::Undefined | Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
        (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
        (Value::String(a) | Value::Safe(a), Value::String(b) | Value::Safe(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Dict(a), Value::Dict(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => false,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a) | Value::Safe(a), Value::String(b) | Value::Safe(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Dict(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// Render-time variables (innermost scope last)
#[derive(Debug, Clone)]
pub struct Context {
    scopes: Vec<HashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    /// Build a context from a JSON object; non-objects give an empty context
    pub fn from_json(data: serde_json::Value) -> Self {
        let mut ctx = Self::new();
        if let serde_json::Value::Object(map) = data {
            for (k, v) in map {
                ctx.set(k, Value::from(v));
            }
        }
        ctx
    }

    /// Builder-style [`Context::set`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    /// Set a variable in the current scope
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    /// Get a variable (searches all scopes)
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Push a new scope
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Pop the innermost scope
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl From<serde_json::Value> for Context {
    fn from(data: serde_json::Value) -> Self {
        Context::from_json(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion() {
        let value = Value::from(json!({"n": 1, "f": 1.5, "xs": [true, null], "s": "x"}));
        assert_eq!(value.field("n"), Value::Int(1));
        assert_eq!(value.field("f"), Value::Float(1.5));
        assert_eq!(
            value.field("xs"),
            Value::List(vec![Value::Bool(true), Value::None])
        );
        assert_eq!(value.field("missing"), Value::Undefined);
    }

    #[test]
    fn test_index_lookup() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(list.index(&Value::Int(0)), Value::Int(1));
        assert_eq!(list.index(&Value::Int(-1)), Value::Int(3));
        assert_eq!(list.index(&Value::Int(9)), Value::Undefined);
        assert_eq!(list.index(&Value::Int(-9)), Value::Undefined);
        assert_eq!(
            Value::from("héllo").index(&Value::Int(1)),
            Value::String("é".to_string())
        );
    }

    #[test]
    fn test_scopes() {
        let mut ctx = Context::new().with("x", 1i64);
        ctx.push_scope();
        ctx.set("x", Value::Int(2));
        assert_eq!(ctx.get("x"), Some(&Value::Int(2)));
        ctx.pop_scope();
        assert_eq!(ctx.get("x"), Some(&Value::Int(1)));
        ctx.pop_scope();
        assert_eq!(ctx.get("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
    }
}

//! Template-global functions and filters
//!
//! Both tables are filled once when the engine starts and read-only after
//! that. The compiler rejects calls to names that are not in them, so the
//! renderer never meets an unknown callable.

use super::value::{Value, compare_values};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A global function: `#[name(args)]`
pub type FunctionFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// A filter: `#[value | name(args)]`
pub type FilterFn = Arc<dyn Fn(Value, &[Value]) -> Result<Value, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Functions {
    functions: BTreeMap<String, FunctionFn>,
    filters: BTreeMap<String, FilterFn>,
}

impl std::fmt::Debug for Functions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Functions")
            .field("functions", &self.function_names())
            .field("filters", &self.filter_names())
            .finish()
    }
}

impl Functions {
    /// Empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables pre-filled with the built-in functions and filters
    pub fn with_builtins() -> Self {
        let mut fns = Self::new();

        fns.register_function("count", count);
        fns.register_function("range", range);
        fns.register_function("json", |args| {
            Ok(Value::String(
                args.first().map(Value::to_json).unwrap_or_default().to_string(),
            ))
        });
        fns.register_function("max", |args| Ok(extreme(args, std::cmp::Ordering::Greater)));
        fns.register_function("min", |args| Ok(extreme(args, std::cmp::Ordering::Less)));

        fns.register_filter("upper", |v, _| {
            Ok(Value::String(v.render_to_string().to_uppercase()))
        });
        fns.register_filter("lower", |v, _| {
            Ok(Value::String(v.render_to_string().to_lowercase()))
        });
        fns.register_filter("capitalize", |v, _| {
            Ok(Value::String(capitalize(&v.render_to_string())))
        });
        fns.register_filter("title", |v, _| {
            let s = v.render_to_string();
            Ok(Value::String(
                s.split_whitespace()
                    .map(capitalize)
                    .collect::<Vec<_>>()
                    .join(" "),
            ))
        });
        fns.register_filter("trim", |v, _| {
            Ok(Value::String(v.render_to_string().trim().to_string()))
        });
        fns.register_filter("length", |v, _| count(&[v]));
        fns.register_filter("first", |v, _| {
            Ok(match v {
                Value::List(mut l) if !l.is_empty() => l.swap_remove(0),
                Value::String(s) => s
                    .chars()
                    .next()
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Undefined),
                Value::Safe(s) => s
                    .chars()
                    .next()
                    .map(|c| Value::Safe(c.to_string()))
                    .unwrap_or(Value::Undefined),
                _ => Value::Undefined,
            })
        });
        fns.register_filter("last", |v, _| {
            Ok(match v {
                Value::List(mut l) => l.pop().unwrap_or(Value::Undefined),
                Value::String(s) => s
                    .chars()
                    .last()
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Undefined),
                Value::Safe(s) => s
                    .chars()
                    .last()
                    .map(|c| Value::Safe(c.to_string()))
                    .unwrap_or(Value::Undefined),
                _ => Value::Undefined,
            })
        });
        fns.register_filter("reverse", |v, _| {
            Ok(match v {
                Value::List(mut l) => {
                    l.reverse();
                    Value::List(l)
                }
                Value::String(s) => Value::String(s.chars().rev().collect()),
                other => other,
            })
        });
        fns.register_filter("sort", sort);
        fns.register_filter("join", |v, args| {
            let sep = args
                .first()
                .map(|v| v.render_to_string())
                .unwrap_or_default();
            Ok(match v {
                Value::List(l) => Value::String(
                    l.iter()
                        .map(|v| v.render_to_string())
                        .collect::<Vec<_>>()
                        .join(&sep),
                ),
                other => other,
            })
        });
        fns.register_filter("default", |v, args| {
            let empty = match &v {
                Value::Undefined | Value::None => true,
                Value::String(s) => s.is_empty(),
                _ => false,
            };
            Ok(if empty {
                args.first().cloned().unwrap_or(Value::Undefined)
            } else {
                v
            })
        });
        fns.register_filter("escape", |v, _| {
            Ok(Value::Safe(super::security::escape(&v)))
        });
        fns.register_filter("raw", |v, _| {
            Ok(match v {
                Value::Safe(s) => Value::Safe(s),
                other => Value::Safe(other.render_to_string()),
            })
        });
        fns.register_filter("json", |v, _| Ok(Value::String(v.to_json().to_string())));

        fns
    }

    pub fn register_function<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn register_filter<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(f));
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionFn> {
        self.functions.get(name)
    }

    pub fn filter(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.filters.keys().cloned().collect()
    }
}

fn count(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Int(match args.first() {
        Some(Value::String(s)) | Some(Value::Safe(s)) => s.chars().count() as i64,
        Some(Value::List(l)) => l.len() as i64,
        Some(Value::Dict(d)) => d.len() as i64,
        _ => 0,
    }))
}

/// `range(end)` or `range(start, end)`, end exclusive
fn range(args: &[Value]) -> Result<Value, String> {
    let (start, end) = match args {
        [Value::Int(end)] => (0, *end),
        [Value::Int(start), Value::Int(end)] => (*start, *end),
        _ => return Err("range expects one or two integers".to_string()),
    };
    if end.saturating_sub(start) > 100_000 {
        return Err(format!("range({start}, {end}) is too large"));
    }
    Ok(Value::List((start..end).map(Value::Int).collect()))
}

fn extreme(args: &[Value], want: std::cmp::Ordering) -> Value {
    let items: &[Value] = match args {
        [Value::List(l)] => l,
        _ => args,
    };
    items
        .iter()
        .cloned()
        .reduce(|best, v| {
            if compare_values(&v, &best) == Some(want) {
                v
            } else {
                best
            }
        })
        .unwrap_or(Value::Undefined)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}

/// `sort`, or `sort('field')` to sort a list of dicts by a field
fn sort(value: Value, args: &[Value]) -> Result<Value, String> {
    let Value::List(mut list) = value else {
        return Ok(value);
    };
    match args.first() {
        Some(Value::String(attr)) => list.sort_by(|a, b| {
            let (a, b) = (a.field(attr), b.field(attr));
            match (a.is_undefined(), b.is_undefined()) {
                (false, false) => compare_values(&a, &b).unwrap_or(std::cmp::Ordering::Equal),
                (false, true) => std::cmp::Ordering::Less,
                (true, false) => std::cmp::Ordering::Greater,
                (true, true) => std::cmp::Ordering::Equal,
            }
        }),
        _ => list.sort_by(|a, b| compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal)),
    }
    Ok(Value::List(list))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(name: &str, value: Value, args: &[Value]) -> Value {
        let fns = Functions::with_builtins();
        (fns.filter(name).unwrap())(value, args).unwrap()
    }

    #[test]
    fn test_string_filters() {
        assert_eq!(filter("upper", "ana".into(), &[]), Value::from("ANA"));
        assert_eq!(
            filter("title", "hello big world".into(), &[]),
            Value::from("Hello Big World")
        );
        assert_eq!(filter("trim", "  x ".into(), &[]), Value::from("x"));
    }

    #[test]
    fn test_first_and_last_of_safe_strings() {
        let safe = filter("raw", "<b>".into(), &[]);
        assert_eq!(filter("first", safe.clone(), &[]), Value::Safe("<".to_string()));
        assert_eq!(filter("last", safe, &[]), Value::Safe(">".to_string()));
        assert_eq!(filter("first", "ab".into(), &[]), Value::from("a"));
    }

    #[test]
    fn test_default_filter() {
        assert_eq!(
            filter("default", Value::Undefined, &[Value::from("anon")]),
            Value::from("anon")
        );
        assert_eq!(
            filter("default", "bob".into(), &[Value::from("anon")]),
            Value::from("bob")
        );
    }

    #[test]
    fn test_sort_by_field() {
        let people = Value::from(serde_json::json!([
            {"name": "b"}, {"name": "a"}, {"other": 1}
        ]));
        let sorted = filter("sort", people, &[Value::from("name")]);
        let names: Vec<_> = match sorted {
            Value::List(l) => l.iter().map(|p| p.field("name")).collect(),
            _ => panic!("expected list"),
        };
        assert_eq!(
            names,
            vec![Value::from("a"), Value::from("b"), Value::Undefined]
        );
    }

    #[test]
    fn test_builtin_functions() {
        let fns = Functions::with_builtins();
        let range = fns.function("range").unwrap();
        assert_eq!(
            range(&[Value::Int(1), Value::Int(4)]).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert!(range(&[Value::from("x")]).is_err());

        let max = fns.function("max").unwrap();
        assert_eq!(
            max(&[Value::Int(3), Value::Int(9), Value::Int(1)]).unwrap(),
            Value::Int(9)
        );
    }
}

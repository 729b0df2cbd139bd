//! Output escaping and the callable deny-list
//!
//! Every `#[...]` emission goes through [`escape`]. Function and filter
//! names are checked against [`DENIED_FUNCTIONS`] first; a denied name can
//! never be called, even if something registered it.

use super::ast::Expr;
use super::functions::Functions;
use super::value::Value;

/// Names that are never callable from a template: process execution,
/// filesystem writes and dynamic code execution.
pub const DENIED_FUNCTIONS: &[&str] = &[
    // process execution
    "exec",
    "system",
    "shell_exec",
    "passthru",
    "proc_open",
    "popen",
    "pcntl_exec",
    "spawn",
    "command",
    // filesystem writes
    "file_put_contents",
    "fopen",
    "fwrite",
    "fputs",
    "unlink",
    "rmdir",
    "mkdir",
    "rename",
    "copy",
    "chmod",
    "chown",
    "touch",
    "tempnam",
    "move_uploaded_file",
    // dynamic code execution
    "eval",
    "assert",
    "create_function",
    "call_user_func",
    "call_user_func_array",
    "include",
    "include_once",
    "require",
    "require_once",
    "load",
    "dlopen",
];

/// Whether `name` is on the deny-list
pub fn is_denied(name: &str) -> bool {
    DENIED_FUNCTIONS
        .iter()
        .any(|denied| denied.eq_ignore_ascii_case(name))
}

/// Deny-list first, then the registered function table
pub fn is_allowed_function(name: &str, functions: &Functions) -> bool {
    !is_denied(name) && functions.has_function(name)
}

/// A callable an expression is not allowed to reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// On the deny-list, as a function or a filter
    Blocked(String),
    UnknownFunction(String),
    UnknownFilter(String),
}

/// Check every call and filter in `expr`. Deny-list hits are reported before
/// unregistered names, wherever they appear in the expression.
pub fn check_expr(expr: &Expr, functions: &Functions) -> Option<Violation> {
    let mut blocked = None;
    let mut unknown_function = None;
    let mut unknown_filter = None;

    expr.walk(&mut |e| match e {
        Expr::Call { name, .. } => {
            if is_denied(name) {
                blocked.get_or_insert_with(|| name.clone());
            } else if !functions.has_function(name) {
                unknown_function.get_or_insert_with(|| name.clone());
            }
        }
        Expr::Filter { name, .. } => {
            if is_denied(name) {
                blocked.get_or_insert_with(|| name.clone());
            } else if !functions.has_filter(name) {
                unknown_filter.get_or_insert_with(|| name.clone());
            }
        }
        _ => {}
    });

    blocked
        .map(Violation::Blocked)
        .or(unknown_function.map(Violation::UnknownFunction))
        .or(unknown_filter.map(Violation::UnknownFilter))
}

/// HTML-escape a value for output. Undefined and null become the empty
/// string, lists and dicts are JSON-encoded first, safe values pass through.
pub fn escape(value: &Value) -> String {
    match value {
        Value::Safe(s) => s.clone(),
        Value::List(_) | Value::Dict(_) => escape_html(&value.to_json().to_string()),
        other => escape_html(&other.render_to_string()),
    }
}

/// Entity-escape `& < > " '`
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_script() {
        let out = escape(&Value::from("<script>alert('x')</script>"));
        assert_eq!(
            out,
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"
        );
        assert!(!out.contains("<script>"));
    }

    #[test]
    fn test_escape_structures_as_json() {
        let list = Value::List(vec![Value::from("<b>"), Value::Int(1)]);
        assert_eq!(escape(&list), "[&quot;&lt;b&gt;&quot;,1]");
    }

    #[test]
    fn test_escape_undefined_and_safe() {
        assert_eq!(escape(&Value::Undefined), "");
        assert_eq!(escape(&Value::None), "");
        assert_eq!(escape(&Value::Safe("<b>ok</b>".to_string())), "<b>ok</b>");
    }

    #[test]
    fn test_check_expr_order() {
        let functions = Functions::with_builtins();
        let expr = crate::template::expr::parse_expr("nope($x) ~ exec('ls') | shout").unwrap();
        assert_eq!(
            check_expr(&expr, &functions),
            Some(Violation::Blocked("exec".to_string()))
        );

        let expr = crate::template::expr::parse_expr("$x | shout ~ nope()").unwrap();
        assert_eq!(
            check_expr(&expr, &functions),
            Some(Violation::UnknownFunction("nope".to_string()))
        );

        let expr = crate::template::expr::parse_expr("$name | upper | trim").unwrap();
        assert_eq!(check_expr(&expr, &functions), None);
    }

    #[test]
    fn test_deny_list_wins_over_registration() {
        let mut functions = Functions::with_builtins();
        functions.register_function("exec", |_| Ok(Value::None));
        assert!(is_denied("EXEC"));
        assert!(!is_allowed_function("exec", &functions));
        assert!(is_allowed_function("count", &functions));
        assert!(!is_allowed_function("nope", &functions));
    }
}

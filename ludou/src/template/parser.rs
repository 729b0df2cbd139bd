//! Node tree construction
//!
//! Turns the span inventory from the lexer into a nested [`Node`] tree. Every
//! expression is parsed and checked against the callable tables here, so a
//! template that parses is free of blocked and unknown callables.

use super::ast::{Branch, Expr, ForeachNode, IfNode, Literal, Node, SectionNode, YieldNode};
use super::directive::{Arity, DirectiveRegistry};
use super::error::{
    BlockedFunctionError, Result, TemplateError, TemplateSource, UnknownDirectiveError,
    UnknownFilterError, UnknownFunctionError,
};
use super::expr::{ExprError, parse_args, parse_expr};
use super::functions::Functions;
use super::lexer::{self, DirectiveSpan, SpanKind};
use super::security::{self, Violation};
use std::ops::Range;

/// A single template file, before inheritance is resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTemplate {
    /// Layout named by `#extends`, with the directive's span
    pub extends: Option<(String, Range<usize>)>,
    pub nodes: Vec<Node>,
}

/// Scan and parse a template source
pub fn parse(
    source: &TemplateSource,
    directives: &DirectiveRegistry,
    functions: &Functions,
) -> Result<ParsedTemplate> {
    let spans = lexer::scan(source, directives)?;
    Parser {
        source,
        directives,
        functions,
    }
    .build(&spans)
}

enum FrameKind {
    Root,
    If {
        branches: Vec<Branch>,
        /// Condition of the branch being filled; `None` once inside `#else`
        pending: Option<Expr>,
    },
    Foreach {
        iterable: Expr,
        key: Option<String>,
        value: String,
    },
    Section {
        name: String,
    },
}

struct Frame {
    kind: FrameKind,
    nodes: Vec<Node>,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
        }
    }
}

struct Parser<'a> {
    source: &'a TemplateSource,
    directives: &'a DirectiveRegistry,
    functions: &'a Functions,
}

impl Parser<'_> {
    fn build(&self, spans: &[DirectiveSpan]) -> Result<ParsedTemplate> {
        let text = self.source.source.as_str();
        let mut stack = vec![Frame::new(FrameKind::Root)];
        let mut extends = None;
        let mut cursor = 0;

        for span in spans {
            push_text(top(&mut stack), &text[cursor..span.start]);
            cursor = span.end;

            match span.kind {
                SpanKind::Escape => push_text(top(&mut stack), "#"),
                SpanKind::Comment => {
                    let body = span.args.clone().unwrap_or_default();
                    top(&mut stack).nodes.push(Node::Comment(body));
                }
                SpanKind::Expression => {
                    let expr = self.expression(span)?;
                    top(&mut stack).nodes.push(Node::Emit(expr));
                }
                SpanKind::If => {
                    let condition = self.expression(span)?;
                    stack.push(Frame::new(FrameKind::If {
                        branches: Vec::new(),
                        pending: Some(condition),
                    }));
                }
                SpanKind::ElseIf | SpanKind::Else => {
                    let next = match span.kind {
                        SpanKind::ElseIf => Some(self.expression(span)?),
                        _ => None,
                    };
                    let frame = top(&mut stack);
                    let body = std::mem::take(&mut frame.nodes);
                    let FrameKind::If { branches, pending } = &mut frame.kind else {
                        return Err(self.error(span, "`#else` outside of `#if`"));
                    };
                    match pending.take() {
                        Some(condition) => branches.push(Branch { condition, body }),
                        None => {
                            return Err(self.error(
                                span,
                                format!("`#{}` after `#else` in the same `#if`", span.name),
                            ));
                        }
                    }
                    *pending = next;
                }
                SpanKind::EndIf => {
                    let frame = self.pop(&mut stack, span)?;
                    let FrameKind::If {
                        mut branches,
                        pending,
                    } = frame.kind
                    else {
                        return Err(self.error(span, "`#endif` without `#if`"));
                    };
                    let otherwise = match pending {
                        Some(condition) => {
                            branches.push(Branch {
                                condition,
                                body: frame.nodes,
                            });
                            None
                        }
                        None => Some(frame.nodes),
                    };
                    top(&mut stack)
                        .nodes
                        .push(Node::If(IfNode { branches, otherwise }));
                }
                SpanKind::Foreach => {
                    let (iterable, key, value) = self.foreach_header(span)?;
                    stack.push(Frame::new(FrameKind::Foreach {
                        iterable,
                        key,
                        value,
                    }));
                }
                SpanKind::EndForeach => {
                    let frame = self.pop(&mut stack, span)?;
                    let FrameKind::Foreach {
                        iterable,
                        key,
                        value,
                    } = frame.kind
                    else {
                        return Err(self.error(span, "`#endforeach` without `#foreach`"));
                    };
                    top(&mut stack).nodes.push(Node::Foreach(ForeachNode {
                        iterable,
                        key,
                        value,
                        body: frame.nodes,
                    }));
                }
                SpanKind::Section => {
                    let name = self.section_name(span)?;
                    stack.push(Frame::new(FrameKind::Section { name }));
                }
                SpanKind::EndSection => {
                    let frame = self.pop(&mut stack, span)?;
                    let FrameKind::Section { name } = frame.kind else {
                        return Err(self.error(span, "`#endsection` without `#section`"));
                    };
                    top(&mut stack).nodes.push(Node::Section(SectionNode {
                        name,
                        body: frame.nodes,
                    }));
                }
                SpanKind::Extends => {
                    let mut args = self.string_args(span, 1, 1)?;
                    extends = args.pop().map(|layout| (layout, span.range()));
                }
                SpanKind::Yield => {
                    let mut args = self.string_args(span, 1, 2)?;
                    let default = if args.len() == 2 { args.pop() } else { None };
                    let name = args.pop().unwrap_or_default();
                    top(&mut stack)
                        .nodes
                        .push(Node::Yield(YieldNode { name, default }));
                }
                SpanKind::Connect => {
                    let mut args = self.string_args(span, 1, 1)?;
                    let partial = args.pop().unwrap_or_default();
                    top(&mut stack).nodes.push(Node::Connect(partial));
                }
                SpanKind::Custom => {
                    let node = self.custom(span)?;
                    match node {
                        Node::Text(t) => push_text(top(&mut stack), &t),
                        other => top(&mut stack).nodes.push(other),
                    }
                }
            }
        }
        push_text(top(&mut stack), &text[cursor..]);

        // The lexer guarantees balance, so only the root frame is left
        let nodes = stack.pop().map(|f| f.nodes).unwrap_or_default();
        Ok(ParsedTemplate { extends, nodes })
    }

    fn pop(&self, stack: &mut Vec<Frame>, span: &DirectiveSpan) -> Result<Frame> {
        if stack.len() < 2 {
            return Err(self.error(span, format!("`#{}` without an opening directive", span.name)));
        }
        stack
            .pop()
            .ok_or_else(|| self.error(span, "directive stack underflow"))
    }

    fn error(&self, span: &DirectiveSpan, message: impl Into<String>) -> TemplateError {
        self.source.syntax_error(message, span.range())
    }

    fn expr_error(&self, span: &DirectiveSpan, what: &str, err: ExprError) -> TemplateError {
        let at = (span.args_start + err.offset).min(self.source.source.len());
        let end = (at + 1).min(self.source.source.len()).max(at);
        self.source
            .syntax_error(format!("invalid {what}: {}", err.message), at..end)
    }

    /// Parse and security-check the span's argument as one expression
    fn expression(&self, span: &DirectiveSpan) -> Result<Expr> {
        let args = span.args.as_deref().unwrap_or_default();
        let what = match span.kind {
            SpanKind::Expression => "expression",
            _ => "condition",
        };
        let expr = parse_expr(args).map_err(|e| self.expr_error(span, what, e))?;
        self.check(&expr, span)?;
        Ok(expr)
    }

    fn check(&self, expr: &Expr, span: &DirectiveSpan) -> Result<()> {
        match security::check_expr(expr, self.functions) {
            None => Ok(()),
            Some(violation) => Err(self.violation(violation, span)),
        }
    }

    fn violation(&self, violation: Violation, span: &DirectiveSpan) -> TemplateError {
        let name = match &violation {
            Violation::Blocked(n) | Violation::UnknownFunction(n) | Violation::UnknownFilter(n) => {
                n.clone()
            }
        };
        let range = span
            .args
            .as_deref()
            .and_then(|args| find_word(args, &name))
            .map(|offset| {
                let start = span.args_start + offset;
                start..start + name.len()
            })
            .unwrap_or_else(|| span.range());
        let path = self.source.name.clone();
        let line = self.source.line_of(range.start);
        let src = self.source.named_source();

        match violation {
            Violation::Blocked(_) => BlockedFunctionError {
                name,
                path,
                line,
                span: range.into(),
                src,
            }
            .into(),
            Violation::UnknownFunction(_) => UnknownFunctionError {
                name,
                known_functions: self.functions.function_names(),
                path,
                line,
                span: range.into(),
                src,
            }
            .into(),
            Violation::UnknownFilter(_) => UnknownFilterError {
                name,
                known_filters: self.functions.filter_names(),
                path,
                line,
                span: range.into(),
                src,
            }
            .into(),
        }
    }

    /// `$items as $item` or `$map as $key => $value`
    fn foreach_header(&self, span: &DirectiveSpan) -> Result<(Expr, Option<String>, String)> {
        const USAGE: &str = "`#foreach` expects `$items as $item` or `$map as $key => $value`";
        let args = span.args.as_deref().unwrap_or_default();
        let Some(split) = find_as_keyword(args) else {
            return Err(self.error(span, USAGE));
        };

        let iterable =
            parse_expr(&args[..split]).map_err(|e| self.expr_error(span, "loop source", e))?;
        self.check(&iterable, span)?;

        let bindings = &args[split + 2..];
        let mut names = bindings.split("=>").map(binding_name);
        let (key, value) = match (names.next(), names.next(), names.next()) {
            (Some(Some(value)), None, None) => (None, value),
            (Some(Some(key)), Some(Some(value)), None) => (Some(key), value),
            _ => return Err(self.error(span, USAGE)),
        };
        Ok((iterable, key, value))
    }

    fn section_name(&self, span: &DirectiveSpan) -> Result<String> {
        let args = span.args.as_deref().unwrap_or_default().trim();
        if args.starts_with(['\'', '"']) {
            let mut names = self.string_args(span, 1, 1)?;
            return Ok(names.pop().unwrap_or_default());
        }
        Ok(args.to_string())
    }

    /// Arguments that must all be string literals, between `min` and `max` of them
    fn string_args(&self, span: &DirectiveSpan, min: usize, max: usize) -> Result<Vec<String>> {
        let args = span.args.as_deref().unwrap_or_default();
        let exprs = parse_args(args).map_err(|e| self.expr_error(span, "argument", e))?;
        if exprs.len() < min || exprs.len() > max {
            return Err(self.error(
                span,
                format!(
                    "`#{}` expects {} quoted name{}",
                    span.name,
                    if min == max {
                        min.to_string()
                    } else {
                        format!("{min} to {max}")
                    },
                    if max == 1 { "" } else { "s" }
                ),
            ));
        }
        exprs
            .into_iter()
            .map(|expr| match expr {
                Expr::Literal(Literal::Str(s)) => Ok(s),
                _ => Err(self.error(
                    span,
                    format!("`#{}` arguments must be quoted strings", span.name),
                )),
            })
            .collect()
    }

    fn custom(&self, span: &DirectiveSpan) -> Result<Node> {
        let Some(definition) = self.directives.get(&span.name) else {
            return Err(UnknownDirectiveError {
                name: span.name.clone(),
                known: self.directives.names(),
                path: self.source.name.clone(),
                line: self.source.line_of(span.start),
                span: span.range().into(),
                src: self.source.named_source(),
            }
            .into());
        };

        match (definition.arity, &span.args) {
            (Arity::None, Some(_)) => {
                return Err(self.error(span, format!("`#{}` takes no arguments", span.name)));
            }
            (Arity::Required, None) => {
                return Err(self.error(span, format!("`#{}` requires arguments", span.name)));
            }
            _ => {}
        }

        let node = definition
            .handler
            .compile(span.args.as_deref().unwrap_or_default())
            .map_err(|message| self.error(span, format!("`#{}`: {message}", span.name)))?;

        let mut violation = None;
        node.walk_exprs(&mut |expr| {
            if violation.is_none() {
                violation = security::check_expr(expr, self.functions);
            }
        });
        match violation {
            Some(v) => Err(self.violation(v, span)),
            None => Ok(node),
        }
    }
}

fn top(stack: &mut [Frame]) -> &mut Frame {
    // The root frame is never popped while spans remain
    let last = stack.len() - 1;
    &mut stack[last]
}

/// Append literal text, merging with a preceding text node
fn push_text(frame: &mut Frame, text: &str) {
    if text.is_empty() {
        return;
    }
    match frame.nodes.last_mut() {
        Some(Node::Text(prev)) => prev.push_str(text),
        _ => frame.nodes.push(Node::Text(text.to_string())),
    }
}

/// `$name` → `name`
fn binding_name(text: &str) -> Option<String> {
    let name = text.trim().strip_prefix('$')?;
    let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| name.to_string())
}

/// Offset of the last top-level `as` keyword surrounded by whitespace
fn find_as_keyword(args: &str) -> Option<usize> {
    let bytes = args.as_bytes();
    let mut depth = 0i32;
    let mut quote = None;
    let mut found = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth -= 1,
                b'a' if depth == 0
                    && bytes.get(i + 1) == Some(&b's')
                    && i > 0
                    && bytes[i - 1].is_ascii_whitespace()
                    && bytes.get(i + 2).is_some_and(|c| c.is_ascii_whitespace()) =>
                {
                    found = Some(i);
                }
                _ => {}
            },
        }
        i += 1;
    }
    found
}

/// Offset of `word` in `text` where it is not part of a longer identifier
fn find_word(text: &str, word: &str) -> Option<usize> {
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'$';
    let bytes = text.as_bytes();
    text.match_indices(word).map(|(i, _)| i).find(|&i| {
        let before = i.checked_sub(1).map(|j| bytes[j]);
        let after = bytes.get(i + word.len()).copied();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ast::BinaryOp;

    fn parse_str(text: &str) -> Result<ParsedTemplate> {
        let source = TemplateSource::new("test", text);
        parse(&source, &DirectiveRegistry::new(), &Functions::with_builtins())
    }

    #[test]
    fn test_text_and_emit() {
        let parsed = parse_str("Hello #[$name | upper]!").unwrap();
        assert_eq!(parsed.extends, None);
        assert_eq!(parsed.nodes.len(), 3);
        assert_eq!(parsed.nodes[0], Node::Text("Hello ".to_string()));
        assert!(matches!(&parsed.nodes[1], Node::Emit(Expr::Filter { name, .. }) if name == "upper"));
    }

    #[test]
    fn test_if_chain() {
        let parsed = parse_str("#if($a)A#elseif($b)B#else C#endif").unwrap();
        let Node::If(node) = &parsed.nodes[0] else {
            panic!("expected if node");
        };
        assert_eq!(node.branches.len(), 2);
        assert_eq!(node.branches[1].body, vec![Node::Text("B".to_string())]);
        assert_eq!(node.otherwise, Some(vec![Node::Text(" C".to_string())]));
    }

    #[test]
    fn test_elseif_after_else() {
        let err = parse_str("#if($a)#else#elseif($b)#endif").unwrap_err();
        assert!(err.to_string().contains("after `#else`"));
    }

    #[test]
    fn test_foreach_bindings() {
        let parsed = parse_str("#foreach($m as $k => $v)#[$k]#endforeach").unwrap();
        let Node::Foreach(node) = &parsed.nodes[0] else {
            panic!("expected foreach node");
        };
        assert_eq!(node.key.as_deref(), Some("k"));
        assert_eq!(node.value, "v");

        let parsed = parse_str("#foreach(range(1, 3) as $i)#endforeach").unwrap();
        let Node::Foreach(node) = &parsed.nodes[0] else {
            panic!("expected foreach node");
        };
        assert!(matches!(&node.iterable, Expr::Call { name, .. } if name == "range"));

        assert!(parse_str("#foreach($xs)#endforeach").is_err());
    }

    #[test]
    fn test_extends_and_sections() {
        let parsed = parse_str("#extends['layouts.app']\n#section body\nHi #[$x]\n#endsection").unwrap();
        assert_eq!(parsed.extends.as_ref().map(|(n, _)| n.as_str()), Some("layouts.app"));
        assert!(matches!(&parsed.nodes[1], Node::Section(s) if s.name == "body"));
    }

    #[test]
    fn test_yield_default() {
        let parsed = parse_str("#yield('title', 'Home')").unwrap();
        assert_eq!(
            parsed.nodes[0],
            Node::Yield(YieldNode {
                name: "title".to_string(),
                default: Some("Home".to_string())
            })
        );
        assert!(parse_str("#yield($x)").is_err());
    }

    #[test]
    fn test_escape_merges_into_text() {
        let parsed = parse_str("a \\#[b] c").unwrap();
        assert_eq!(parsed.nodes, vec![Node::Text("a #[b] c".to_string())]);
    }

    #[test]
    fn test_security_violations() {
        assert!(matches!(
            parse_str("#[exec('rm -rf /')]"),
            Err(TemplateError::BlockedFunction(_))
        ));
        assert!(matches!(
            parse_str("#if(system('x'))#endif"),
            Err(TemplateError::BlockedFunction(_))
        ));
        assert!(matches!(
            parse_str("#[nope()]"),
            Err(TemplateError::UnknownFunction(_))
        ));
        assert!(matches!(
            parse_str("#[$x | shout]"),
            Err(TemplateError::UnknownFilter(_))
        ));
    }

    #[test]
    fn test_blocked_span_points_at_name() {
        let Err(TemplateError::BlockedFunction(err)) = parse_str("ab #[ eval('1') ]") else {
            panic!("expected blocked function error");
        };
        assert_eq!(err.span.offset(), 6);
        assert_eq!(err.span.len(), 4);
    }

    #[test]
    fn test_unknown_directive() {
        let err = parse_str("#widget('x')").unwrap_err();
        assert!(matches!(err, TemplateError::UnknownDirective(ref e) if e.name == "widget"));
    }

    #[test]
    fn test_malformed_expression() {
        let err = parse_str("line\n#[$a +]").unwrap_err();
        assert!(matches!(err, TemplateError::Syntax(ref e) if e.line == 2));
    }

    #[test]
    fn test_custom_directive_lowering() {
        let mut directives = DirectiveRegistry::new();
        directives
            .register("double", Arity::Required, |args: &str| -> Result<Node, String> {
                let expr = parse_expr(args).map_err(|e| e.message)?;
                Ok(Node::Emit(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(expr),
                    right: Box::new(Expr::Literal(Literal::Int(2))),
                }))
            })
            .unwrap();
        let functions = Functions::with_builtins();

        let source = TemplateSource::new("t", "#double($n)");
        let parsed = parse(&source, &directives, &functions).unwrap();
        assert!(matches!(parsed.nodes[0], Node::Emit(Expr::Binary { .. })));

        let source = TemplateSource::new("t", "#double(exec('x'))");
        assert!(matches!(
            parse(&source, &directives, &functions),
            Err(TemplateError::BlockedFunction(_))
        ));
    }
}

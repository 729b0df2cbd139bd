//! Directive scanner
//!
//! Locates every `#[...]` marker, `#directive`, DSL comment and `\#` escape
//! in the raw text and checks that block directives are balanced. Nothing
//! is evaluated here; the result is an inventory of [`DirectiveSpan`]s in
//! document order, and the text between spans is literal output.

use super::directive::DirectiveRegistry;
use super::error::{Result, TemplateSource};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// `#[expr]`
    Expression,
    If,
    ElseIf,
    Else,
    EndIf,
    Foreach,
    EndForeach,
    Extends,
    Section,
    EndSection,
    Yield,
    Connect,
    /// `#-- ... --#`
    Comment,
    /// `\#`, a literal `#`
    Escape,
    /// A directive that is not part of the grammar; resolved by the registry
    Custom,
}

impl SpanKind {
    fn directive_name(self) -> &'static str {
        match self {
            SpanKind::Expression => "#[",
            SpanKind::If => "#if",
            SpanKind::ElseIf => "#elseif",
            SpanKind::Else => "#else",
            SpanKind::EndIf => "#endif",
            SpanKind::Foreach => "#foreach",
            SpanKind::EndForeach => "#endforeach",
            SpanKind::Extends => "#extends",
            SpanKind::Section => "#section",
            SpanKind::EndSection => "#endsection",
            SpanKind::Yield => "#yield",
            SpanKind::Connect => "#connect",
            SpanKind::Comment => "#--",
            SpanKind::Escape => "\\#",
            SpanKind::Custom => "#",
        }
    }

    /// Opening directive that a closing one pairs with
    fn opener(self) -> Option<SpanKind> {
        match self {
            SpanKind::EndIf => Some(SpanKind::If),
            SpanKind::EndForeach => Some(SpanKind::Foreach),
            SpanKind::EndSection => Some(SpanKind::Section),
            _ => None,
        }
    }

    fn closer(self) -> Option<SpanKind> {
        match self {
            SpanKind::If => Some(SpanKind::EndIf),
            SpanKind::Foreach => Some(SpanKind::EndForeach),
            SpanKind::Section => Some(SpanKind::EndSection),
            _ => None,
        }
    }
}

/// A located directive or expression marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveSpan {
    pub kind: SpanKind,
    /// Directive name without `#` (empty for expressions, comments, escapes)
    pub name: String,
    /// Raw argument text: expression body, parenthesized arguments, the
    /// bare section name, or the comment body
    pub args: Option<String>,
    /// Byte offset of the leading `#` (or `\`)
    pub start: usize,
    /// Byte offset just past the span
    pub end: usize,
    /// Byte offset where `args` starts in the source
    pub args_start: usize,
}

impl DirectiveSpan {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Scan `source` into directive spans and check directive balance
pub fn scan(source: &TemplateSource, directives: &DirectiveRegistry) -> Result<Vec<DirectiveSpan>> {
    let spans = Scanner {
        source,
        text: source.source.as_str(),
        directives,
    }
    .scan()?;
    check_structure(source, &spans)?;
    Ok(spans)
}

struct Scanner<'a> {
    source: &'a TemplateSource,
    text: &'a str,
    directives: &'a DirectiveRegistry,
}

impl Scanner<'_> {
    fn scan(&self) -> Result<Vec<DirectiveSpan>> {
        let bytes = self.text.as_bytes();
        let mut spans = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'\\' if bytes.get(i + 1) == Some(&b'#') => {
                    spans.push(DirectiveSpan {
                        kind: SpanKind::Escape,
                        name: String::new(),
                        args: None,
                        start: i,
                        end: i + 2,
                        args_start: i + 2,
                    });
                    i += 2;
                }
                b'#' => match self.directive_at(i)? {
                    Some(span) => {
                        i = span.end;
                        spans.push(span);
                    }
                    None => i += 1,
                },
                _ => i += 1,
            }
        }

        Ok(spans)
    }

    /// Try to read a directive at `start` (which holds a `#`)
    fn directive_at(&self, start: usize) -> Result<Option<DirectiveSpan>> {
        let bytes = self.text.as_bytes();
        let after = start + 1;

        if bytes.get(after) == Some(&b'[') {
            let Some(close) = find_closing(bytes, after, b'[', b']') else {
                return Err(self
                    .source
                    .syntax_error("unclosed expression marker `#[`", start..start + 2));
            };
            let inner = &self.text[after + 1..close];
            if inner.trim().is_empty() {
                return Err(self
                    .source
                    .syntax_error("empty expression marker", start..close + 1));
            }
            return Ok(Some(DirectiveSpan {
                kind: SpanKind::Expression,
                name: String::new(),
                args: Some(inner.to_string()),
                start,
                end: close + 1,
                args_start: after + 1,
            }));
        }

        if self.text[after..].starts_with("--") {
            let body_start = after + 2;
            let Some(rel) = self.text[body_start..].find("--#") else {
                return Err(self
                    .source
                    .syntax_error("unclosed comment `#--`", start..body_start));
            };
            return Ok(Some(DirectiveSpan {
                kind: SpanKind::Comment,
                name: String::new(),
                args: Some(self.text[body_start..body_start + rel].to_string()),
                start,
                end: body_start + rel + 3,
                args_start: body_start,
            }));
        }

        let name_end = ident_end(bytes, after);
        if name_end == after {
            return Ok(None);
        }
        let name = &self.text[after..name_end];

        let kind = match name {
            "if" => SpanKind::If,
            "elseif" => SpanKind::ElseIf,
            "else" => SpanKind::Else,
            "endif" => SpanKind::EndIf,
            "foreach" => SpanKind::Foreach,
            "endforeach" => SpanKind::EndForeach,
            "extends" => SpanKind::Extends,
            "section" => SpanKind::Section,
            "endsection" => SpanKind::EndSection,
            "yield" => SpanKind::Yield,
            "connect" => SpanKind::Connect,
            _ => SpanKind::Custom,
        };

        let span = |args: Option<(usize, usize)>, end: usize| DirectiveSpan {
            kind,
            name: name.to_string(),
            args: args.map(|(s, e)| self.text[s..e].to_string()),
            start,
            end,
            args_start: args.map(|(s, _)| s).unwrap_or(end),
        };

        match kind {
            SpanKind::Else | SpanKind::EndIf | SpanKind::EndForeach | SpanKind::EndSection => {
                Ok(Some(span(None, name_end)))
            }
            SpanKind::If
            | SpanKind::ElseIf
            | SpanKind::Foreach
            | SpanKind::Yield
            | SpanKind::Connect => match self.parenthesized(start, skip_blanks(bytes, name_end), b'(', b')')? {
                Some((args, end)) => Ok(Some(span(Some(args), end))),
                None => Err(self.source.syntax_error(
                    format!("`#{name}` requires a parenthesized argument"),
                    start..name_end,
                )),
            },
            SpanKind::Extends => {
                let open_at = skip_blanks(bytes, name_end);
                let parsed = match bytes.get(open_at) {
                    Some(b'[') => self.parenthesized(start, open_at, b'[', b']')?,
                    _ => self.parenthesized(start, open_at, b'(', b')')?,
                };
                match parsed {
                    Some((args, end)) => Ok(Some(span(Some(args), end))),
                    None => Err(self.source.syntax_error(
                        "`#extends` requires a layout name, as in #extends['layouts.app']",
                        start..name_end,
                    )),
                }
            }
            SpanKind::Section => {
                let open_at = skip_blanks(bytes, name_end);
                if let Some((args, end)) = self.parenthesized(start, open_at, b'(', b')')? {
                    return Ok(Some(span(Some(args), end)));
                }
                let name_start = skip_blanks(bytes, name_end);
                let mut j = name_start;
                while j < bytes.len()
                    && (bytes[j].is_ascii_alphanumeric() || matches!(bytes[j], b'_' | b'.' | b'-'))
                {
                    j += 1;
                }
                if j == name_start {
                    return Err(self
                        .source
                        .syntax_error("`#section` requires a name", start..name_end));
                }
                Ok(Some(span(Some((name_start, j)), j)))
            }
            _ => {
                // Custom directives need `(` right after the name, or a
                // registration, to be told apart from `#fff` or `#top`
                if bytes.get(name_end) == Some(&b'(') {
                    let parsed = self.parenthesized(start, name_end, b'(', b')')?;
                    Ok(parsed.map(|(args, end)| span(Some(args), end)))
                } else if self.directives.is_custom(name) {
                    Ok(Some(span(None, name_end)))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Read a bracketed argument whose opening delimiter is at `open_at`.
    /// Returns the inner range and the offset past the closing delimiter,
    /// or `None` if `open_at` does not hold `open`.
    fn parenthesized(
        &self,
        start: usize,
        open_at: usize,
        open: u8,
        close: u8,
    ) -> Result<Option<((usize, usize), usize)>> {
        let bytes = self.text.as_bytes();
        if bytes.get(open_at) != Some(&open) {
            return Ok(None);
        }
        match find_closing(bytes, open_at, open, close) {
            Some(close_at) => Ok(Some(((open_at + 1, close_at), close_at + 1))),
            None => Err(self.source.syntax_error(
                format!("unclosed `{}`", open as char),
                start..open_at + 1,
            )),
        }
    }
}

fn ident_end(bytes: &[u8], start: usize) -> usize {
    let mut j = start;
    if j < bytes.len() && (bytes[j].is_ascii_alphabetic() || bytes[j] == b'_') {
        j += 1;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
            j += 1;
        }
    }
    j
}

fn skip_blanks(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && matches!(bytes[i], b' ' | b'\t') {
        i += 1;
    }
    i
}

/// Find the delimiter closing the one at `open_at`, honouring nesting and
/// quoted strings
fn find_closing(bytes: &[u8], open_at: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open_at;

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
            None => {
                if b == b'\'' || b == b'"' {
                    quote = Some(b);
                } else if b == open {
                    depth += 1;
                } else if b == close {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
            }
        }
        i += 1;
    }
    None
}

/// Block directives must nest properly, `#else`/`#elseif` must sit inside an
/// `#if`, and `#extends` may appear at most once, before any other directive.
fn check_structure(source: &TemplateSource, spans: &[DirectiveSpan]) -> Result<()> {
    let mut open: Vec<&DirectiveSpan> = Vec::new();
    let mut seen_directive = false;
    let mut extends: Option<&DirectiveSpan> = None;

    for span in spans {
        match span.kind {
            SpanKind::Comment | SpanKind::Escape => continue,
            SpanKind::Extends => {
                if let Some(first) = extends {
                    return Err(source.syntax_error(
                        format!(
                            "`#extends` may appear only once (first used on line {})",
                            source.line_of(first.start)
                        ),
                        span.range(),
                    ));
                }
                if seen_directive {
                    return Err(source.syntax_error(
                        "`#extends` must be the first directive in the template",
                        span.range(),
                    ));
                }
                extends = Some(span);
            }
            SpanKind::If | SpanKind::Foreach | SpanKind::Section => open.push(span),
            SpanKind::ElseIf | SpanKind::Else => {
                if open.last().map(|s| s.kind) != Some(SpanKind::If) {
                    return Err(source.syntax_error(
                        format!("`{}` without a matching `#if`", span.kind.directive_name()),
                        span.range(),
                    ));
                }
            }
            SpanKind::EndIf | SpanKind::EndForeach | SpanKind::EndSection => {
                let expected = span.kind.opener();
                match open.pop() {
                    Some(opener) if Some(opener.kind) == expected => {}
                    Some(opener) => {
                        return Err(source.syntax_error(
                            format!(
                                "`{}` closes `{}` opened on line {}",
                                span.kind.directive_name(),
                                opener.kind.directive_name(),
                                source.line_of(opener.start)
                            ),
                            span.range(),
                        ));
                    }
                    None => {
                        return Err(source.syntax_error(
                            format!(
                                "`{}` without a matching opening directive",
                                span.kind.directive_name()
                            ),
                            span.range(),
                        ));
                    }
                }
            }
            _ => {}
        }
        seen_directive = true;
    }

    if let Some(unclosed) = open.first() {
        let count = |kind: SpanKind| spans.iter().filter(|s| s.kind == kind).count();
        let closer = unclosed.kind.closer().unwrap_or(SpanKind::EndIf);
        return Err(source.syntax_error(
            format!(
                "unclosed `{}`: {} opened, {} closed",
                unclosed.kind.directive_name(),
                count(unclosed.kind),
                count(closer)
            ),
            unclosed.range(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::error::TemplateError;

    fn kinds(text: &str) -> Vec<SpanKind> {
        let source = TemplateSource::new("test", text);
        scan(&source, &DirectiveRegistry::new())
            .unwrap()
            .into_iter()
            .map(|s| s.kind)
            .collect()
    }

    fn syntax_message(text: &str) -> String {
        let source = TemplateSource::new("test", text);
        match scan(&source, &DirectiveRegistry::new()) {
            Err(TemplateError::Syntax(e)) => e.message,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_expression_with_nested_brackets() {
        let source = TemplateSource::new("test", "[#[$xs[0] | join(']')]]");
        let spans = scan(&source, &DirectiveRegistry::new()).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].args.as_deref(), Some("$xs[0] | join(']')"));
        assert_eq!(spans[0].start, 1);
        assert_eq!(&source.source[spans[0].end..], "]");
    }

    #[test]
    fn test_block_directives() {
        assert_eq!(
            kinds("#if($a)x#elseif($b)y#else z#endif"),
            vec![
                SpanKind::If,
                SpanKind::ElseIf,
                SpanKind::Else,
                SpanKind::EndIf
            ]
        );
        assert_eq!(
            kinds("#foreach($xs as $x)#[$x]#endforeach"),
            vec![SpanKind::Foreach, SpanKind::Expression, SpanKind::EndForeach]
        );
    }

    #[test]
    fn test_section_forms() {
        let source = TemplateSource::new("test", "#section body\nhi\n#endsection#section('x')#endsection");
        let spans = scan(&source, &DirectiveRegistry::new()).unwrap();
        assert_eq!(spans[0].args.as_deref(), Some("body"));
        assert_eq!(spans[2].args.as_deref(), Some("'x'"));
    }

    #[test]
    fn test_plain_hashes_are_text() {
        assert!(kinds("<a href=\"#top\">top</a> color: #fff; #1").is_empty());
        assert_eq!(kinds("\\#[not]"), vec![SpanKind::Escape]);
        assert_eq!(kinds("a #-- note #[x] --# b"), vec![SpanKind::Comment]);
    }

    #[test]
    fn test_unbalanced_if() {
        let msg = syntax_message("#if($a) #if($b) x #endif");
        assert_eq!(msg, "unclosed `#if`: 2 opened, 1 closed");
    }

    #[test]
    fn test_mismatched_closer() {
        let msg = syntax_message("#foreach($xs as $x)\n#endif");
        assert_eq!(msg, "`#endif` closes `#foreach` opened on line 1");
    }

    #[test]
    fn test_extends_rules() {
        assert_eq!(
            syntax_message("#extends['a']\n#extends['b']"),
            "`#extends` may appear only once (first used on line 1)"
        );
        assert_eq!(
            syntax_message("#[$x]#extends['a']"),
            "`#extends` must be the first directive in the template"
        );
        assert_eq!(kinds("#-- layout --#\n#extends['a']"), vec![
            SpanKind::Comment,
            SpanKind::Extends
        ]);
    }

    #[test]
    fn test_malformed_markers() {
        assert_eq!(syntax_message("x #[$a"), "unclosed expression marker `#[`");
        assert_eq!(syntax_message("#[  ]"), "empty expression marker");
        assert_eq!(
            syntax_message("#if $a"),
            "`#if` requires a parenthesized argument"
        );
        assert_eq!(syntax_message("#else"), "`#else` without a matching `#if`");
    }

    #[test]
    fn test_custom_directive_spans() {
        let mut registry = DirectiveRegistry::new();
        registry
            .register("csrf", super::super::directive::Arity::None, |_: &str| {
                Ok::<_, String>(super::super::ast::Node::Text(String::new()))
            })
            .unwrap();
        let source = TemplateSource::new("test", "#csrf #money($price) #nope");
        let spans = scan(&source, &registry).unwrap();
        let names: Vec<_> = spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["csrf", "money"]);
    }
}

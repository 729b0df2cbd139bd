//! Artifact optimizer
//!
//! Rewrites a node list without changing what it renders, apart from
//! whitespace and HTML comments:
//!
//! - DSL comment nodes are dropped
//! - `#[...]` markers over a constant literal become escaped text, and
//!   `#if` branches with a constant condition are resolved
//! - adjacent text nodes are merged
//! - HTML comments are removed (conditional comments `<!--[` are kept)
//! - whitespace runs collapse to one character, a newline if the run had one
//!
//! Text inside `<pre>`, `<textarea>`, `<script>` and `<style>` is left alone.
//! Whether text is inside one of them is tracked in render order, through
//! `#if` branches, loop bodies and the sections a `#yield` renders. Where it
//! cannot be known at compile time, text is kept as written.
//! Running the optimizer on its own output changes nothing.

use super::ast::{Expr, IfNode, Literal, Node, SectionNode};
use super::security;
use super::value::Value;
use std::collections::{HashMap, HashSet};

/// Optimize a node list on its own. Sections it yields are unknown, so
/// nothing after a `#yield` is minified.
pub fn optimize(nodes: Vec<Node>) -> Vec<Node> {
    let mut sections = Sections::unknown();
    minify_to_fixpoint(prepare(nodes), Region::Markup, &mut sections)
}

/// Optimize a compiled template: its body, then every section override in
/// the region of the places it is rendered
pub fn optimize_artifact(
    body: Vec<Node>,
    sections: Vec<SectionNode>,
) -> (Vec<Node>, Vec<SectionNode>) {
    let body = prepare(body);
    let mut sections: Vec<SectionNode> = sections
        .into_iter()
        .map(|mut section| {
            section.body = prepare(section.body);
            section
        })
        .collect();

    // the first definition of a name is the one that renders
    let mut captured = HashSet::new();
    let live: Vec<bool> = sections
        .iter()
        .map(|s| captured.insert(s.name.clone()))
        .collect();

    let mut nested = HashSet::new();
    for (section, _) in sections.iter().zip(&live).filter(|(_, live)| **live) {
        referenced(&section.body, &mut nested);
    }

    let mut table = Sections {
        opaque: opaque_sections(&sections, &live),
        captured: Some(captured),
        sites: HashMap::new(),
    };
    let body = minify_to_fixpoint(body, Region::Markup, &mut table);
    let sites = std::mem::take(&mut table.sites);

    for (section, live) in sections.iter_mut().zip(live) {
        let start = sites
            .get(&section.name)
            .filter(|_| live && !nested.contains(&section.name))
            .and_then(|regions| uniform(regions))
            .unwrap_or(Region::Unknown);
        section.body = minify_to_fixpoint(std::mem::take(&mut section.body), start, &mut table);
    }
    (body, sections)
}

fn prepare(nodes: Vec<Node>) -> Vec<Node> {
    merge_text(fold(nodes))
}

fn minify_to_fixpoint(mut nodes: Vec<Node>, start: Region, sections: &mut Sections) -> Vec<Node> {
    loop {
        sections.sites.clear();
        let mut region = start;
        let next = minify(nodes.clone(), &mut region, sections);
        if next == nodes {
            return nodes;
        }
        nodes = next;
    }
}

/// Drop comments and evaluate what is constant
fn fold(nodes: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Comment(_) => {}
            Node::Emit(Expr::Literal(lit)) => {
                out.push(Node::Text(security::escape(&literal_value(&lit))));
            }
            Node::If(IfNode {
                branches,
                otherwise,
            }) => {
                let mut kept = Vec::new();
                let mut otherwise = otherwise;
                for mut branch in branches {
                    match constant_truth(&branch.condition) {
                        Some(false) => {}
                        Some(true) => {
                            otherwise = Some(branch.body);
                            break;
                        }
                        None => {
                            branch.body = fold(branch.body);
                            kept.push(branch);
                        }
                    }
                }
                let otherwise = otherwise.map(fold);
                if kept.is_empty() {
                    out.extend(otherwise.unwrap_or_default());
                } else {
                    out.push(Node::If(IfNode {
                        branches: kept,
                        otherwise,
                    }));
                }
            }
            Node::Foreach(mut node) => {
                node.body = fold(node.body);
                out.push(Node::Foreach(node));
            }
            Node::Section(mut node) => {
                node.body = fold(node.body);
                out.push(Node::Section(node));
            }
            other => out.push(other),
        }
    }
    out
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::None,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::String(s.clone()),
    }
}

fn constant_truth(expr: &Expr) -> Option<bool> {
    match expr {
        Expr::Literal(lit) => Some(literal_value(lit).is_truthy()),
        _ => None,
    }
}

fn merge_text(nodes: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes {
        let node = map_bodies(node, merge_text);
        if let Node::Text(t) = &node {
            if t.is_empty() {
                continue;
            }
            if let Some(Node::Text(prev)) = out.last_mut() {
                prev.push_str(t);
                continue;
            }
        }
        out.push(node);
    }
    out
}

/// Apply `f` to every child node list of `node`
fn map_bodies(node: Node, f: fn(Vec<Node>) -> Vec<Node>) -> Node {
    match node {
        Node::If(IfNode {
            branches,
            otherwise,
        }) => Node::If(IfNode {
            branches: branches
                .into_iter()
                .map(|mut b| {
                    b.body = f(b.body);
                    b
                })
                .collect(),
            otherwise: otherwise.map(f),
        }),
        Node::Foreach(mut node) => {
            node.body = f(node.body);
            Node::Foreach(node)
        }
        Node::Section(mut node) => {
            node.body = f(node.body);
            Node::Section(node)
        }
        other => other,
    }
}

/// Elements whose text content is whitespace- and comment-sensitive
const RAW_ELEMENTS: &[&str] = &["pre", "textarea", "script", "style"];

/// Built-in callables whose result is escaped when emitted
const PLAIN_CALLABLES: &[&str] = &[
    "count", "range", "json", "max", "min", "upper", "lower", "capitalize", "title", "trim",
    "length", "first", "last", "reverse", "sort", "join", "default", "escape",
];

/// Where text sits relative to the raw elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Markup,
    /// Inside a raw element, until its closing tag
    Raw(&'static str),
    /// Depends on data or on sections only known at render time
    Unknown,
}

/// What the minifier knows about the sections a `#yield` renders
struct Sections {
    /// Names with an override; `None` when the overrides are not known
    captured: Option<HashSet<String>>,
    /// Overrides that can open or close a raw element
    opaque: HashSet<String>,
    /// Region at each place an override is rendered
    sites: HashMap<String, Vec<Region>>,
}

impl Sections {
    fn unknown() -> Self {
        Self {
            captured: None,
            opaque: HashSet::new(),
            sites: HashMap::new(),
        }
    }

    /// Region after the override of `name` rendered at `region`, or `None`
    /// when nothing overrides it
    fn enter(&mut self, name: &str, region: Region) -> Option<Region> {
        let captured = self.captured.as_ref()?;
        if !captured.contains(name) {
            return None;
        }
        self.sites.entry(name.to_string()).or_default().push(region);
        Some(if self.opaque.contains(name) {
            Region::Unknown
        } else {
            region
        })
    }

    fn after_section(&mut self, name: &str, region: Region) -> Option<Region> {
        match self.captured {
            None => Some(Region::Unknown),
            Some(_) => self.enter(name, region),
        }
    }
}

fn uniform(regions: &[Region]) -> Option<Region> {
    let first = *regions.first()?;
    regions.iter().all(|r| *r == first).then_some(first)
}

/// Live overrides whose rendering can move in or out of a raw element
fn opaque_sections(sections: &[SectionNode], live: &[bool]) -> HashSet<String> {
    let mut opaque = HashSet::new();
    loop {
        let before = opaque.len();
        for (section, _) in sections.iter().zip(live).filter(|(_, live)| **live) {
            if !opaque.contains(&section.name) && changes_region(&section.body, &opaque) {
                opaque.insert(section.name.clone());
            }
        }
        if opaque.len() == before {
            return opaque;
        }
    }
}

fn changes_region(nodes: &[Node], opaque: &HashSet<String>) -> bool {
    nodes.iter().any(|node| match node {
        Node::Text(text) => mentions_raw_element(text),
        Node::Emit(expr) => may_emit_markup(expr),
        Node::If(node) => {
            node.branches
                .iter()
                .any(|b| changes_region(&b.body, opaque))
                || node
                    .otherwise
                    .as_deref()
                    .is_some_and(|body| changes_region(body, opaque))
        }
        Node::Foreach(node) => changes_region(&node.body, opaque),
        Node::Section(node) => opaque.contains(&node.name) || changes_region(&node.body, opaque),
        Node::Yield(node) => opaque.contains(&node.name),
        Node::Connect(_) | Node::Comment(_) => false,
    })
}

/// Section names yielded or defined inside `nodes`
fn referenced(nodes: &[Node], names: &mut HashSet<String>) {
    for node in nodes {
        match node {
            Node::Yield(node) => {
                names.insert(node.name.clone());
            }
            Node::Section(node) => {
                names.insert(node.name.clone());
                referenced(&node.body, names);
            }
            Node::If(node) => {
                for branch in &node.branches {
                    referenced(&branch.body, names);
                }
                if let Some(body) = &node.otherwise {
                    referenced(body, names);
                }
            }
            Node::Foreach(node) => referenced(&node.body, names),
            _ => {}
        }
    }
}

fn mentions_raw_element(text: &str) -> bool {
    text.match_indices('<').any(|(i, _)| {
        RAW_ELEMENTS
            .iter()
            .any(|el| tag_at(&text[i..], el, false).is_some() || tag_at(&text[i..], el, true).is_some())
    })
}

/// Whether an emitted value can carry unescaped markup
fn may_emit_markup(expr: &Expr) -> bool {
    let mut markup = false;
    expr.walk(&mut |e| {
        if let Expr::Call { name, .. } | Expr::Filter { name, .. } = e {
            markup |= !PLAIN_CALLABLES.contains(&name.as_str());
        }
    });
    markup
}

/// Strip HTML comments and collapse whitespace, tracking raw elements in
/// render order across nodes
fn minify(nodes: Vec<Node>, region: &mut Region, sections: &mut Sections) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Text(text) => {
                let text = match *region {
                    Region::Unknown => text,
                    _ => minify_text(&text, region),
                };
                if !text.is_empty() {
                    out.push(Node::Text(text));
                }
            }
            Node::Emit(expr) => {
                if may_emit_markup(&expr) {
                    *region = Region::Unknown;
                }
                out.push(Node::Emit(expr));
            }
            Node::If(IfNode {
                branches,
                otherwise,
            }) => {
                let entry = *region;
                let mut exits = Vec::with_capacity(branches.len() + 1);
                let branches = branches
                    .into_iter()
                    .map(|mut b| {
                        let mut r = entry;
                        b.body = minify(b.body, &mut r, sections);
                        exits.push(r);
                        b
                    })
                    .collect();
                let otherwise = match otherwise {
                    Some(body) => {
                        let mut r = entry;
                        let body = minify(body, &mut r, sections);
                        exits.push(r);
                        Some(body)
                    }
                    None => {
                        exits.push(entry);
                        None
                    }
                };
                *region = uniform(&exits).unwrap_or(Region::Unknown);
                out.push(Node::If(IfNode {
                    branches,
                    otherwise,
                }));
            }
            Node::Foreach(mut node) => {
                let entry = *region;
                let mut exit = entry;
                let body = minify(node.body.clone(), &mut exit, sections);
                if exit == entry {
                    node.body = body;
                } else {
                    // later iterations start where the previous one ended
                    *region = Region::Unknown;
                    node.body = minify(node.body, region, sections);
                }
                out.push(Node::Foreach(node));
            }
            Node::Section(mut node) => {
                match sections.after_section(&node.name, *region) {
                    Some(after) => {
                        // the override renders here, not this body
                        let mut unused = Region::Unknown;
                        node.body = minify(node.body, &mut unused, sections);
                        *region = after;
                    }
                    None => node.body = minify(node.body, region, sections),
                }
                out.push(Node::Section(node));
            }
            Node::Yield(node) => {
                if let Some(after) = sections.after_section(&node.name, *region) {
                    *region = after;
                }
                out.push(Node::Yield(node));
            }
            other => out.push(other),
        }
    }
    out
}

fn minify_text(text: &str, region: &mut Region) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if let Region::Raw(element) = *region {
            if let Some(len) = tag_at(rest, element, true) {
                *region = Region::Markup;
                out.push_str(&rest[..len]);
                rest = &rest[len..];
            } else {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
            continue;
        }

        if rest.starts_with("<!--") && !rest.starts_with("<!--[") {
            if let Some(end) = rest[4..].find("-->") {
                rest = &rest[4 + end + 3..];
                continue;
            }
        }

        if c == '<' {
            if let Some((element, len)) = RAW_ELEMENTS
                .iter()
                .find_map(|el| tag_at(rest, el, false).map(|len| (*el, len)))
            {
                *region = Region::Raw(element);
                out.push_str(&rest[..len]);
                rest = &rest[len..];
                continue;
            }
        }

        if c.is_whitespace() {
            let run_len = rest
                .char_indices()
                .find(|(_, ch)| !ch.is_whitespace())
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let run = &rest[..run_len];
            out.push(if run.contains('\n') { '\n' } else { ' ' });
            rest = &rest[run_len..];
            continue;
        }

        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}

/// Length of `<element` (or `</element` when `closing`) at the start of
/// `text`, if the name is followed by a delimiter
fn tag_at(text: &str, element: &str, closing: bool) -> Option<usize> {
    let prefix = if closing { "</" } else { "<" };
    let name_end = prefix.len() + element.len();
    if !text.starts_with(prefix) || !text.get(prefix.len()..name_end)?.eq_ignore_ascii_case(element) {
        return None;
    }
    match text[name_end..].chars().next() {
        None => Some(name_end),
        Some(c) if c == '>' || c == '/' || c.is_whitespace() => Some(name_end),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ast::{Branch, YieldNode};

    fn text(s: &str) -> Node {
        Node::Text(s.to_string())
    }

    #[test]
    fn test_comments_and_whitespace() {
        let nodes = vec![
            text("<p>  hello <!-- note -->\n\n  world</p>"),
            Node::Comment("dsl".to_string()),
            text("   <!--[if IE]>x<![endif]-->"),
        ];
        assert_eq!(
            optimize(nodes),
            vec![text("<p> hello\nworld</p> <!--[if IE]>x<![endif]-->")]
        );
    }

    #[test]
    fn test_raw_elements_untouched() {
        let nodes = vec![
            text("<pre>\n  a   b\n</pre>   <script>\n var x = 1;  <!-- y --></script>"),
            Node::Emit(Expr::Var("x".to_string())),
            text("  z"),
        ];
        let out = optimize(nodes);
        assert_eq!(
            out[0],
            text("<pre>\n  a   b\n</pre> <script>\n var x = 1;  <!-- y --></script>")
        );
        assert_eq!(out[2], text(" z"));
    }

    #[test]
    fn test_constant_folding() {
        let nodes = vec![
            text("a"),
            Node::Emit(Expr::Literal(Literal::Str("<b>".to_string()))),
            Node::If(IfNode {
                branches: vec![
                    Branch {
                        condition: Expr::Literal(Literal::Bool(false)),
                        body: vec![text("no")],
                    },
                    Branch {
                        condition: Expr::Literal(Literal::Int(1)),
                        body: vec![text("yes")],
                    },
                ],
                otherwise: Some(vec![text("else")]),
            }),
        ];
        assert_eq!(optimize(nodes), vec![text("a&lt;b&gt;yes")]);
    }

    #[test]
    fn test_dynamic_branches_kept() {
        let nodes = vec![Node::If(IfNode {
            branches: vec![
                Branch {
                    condition: Expr::Var("a".to_string()),
                    body: vec![text("x   y")],
                },
                Branch {
                    condition: Expr::Literal(Literal::Bool(true)),
                    body: vec![text("t")],
                },
                Branch {
                    condition: Expr::Var("b".to_string()),
                    body: vec![text("never")],
                },
            ],
            otherwise: None,
        })];
        let out = optimize(nodes);
        let Node::If(node) = &out[0] else {
            panic!("expected if");
        };
        assert_eq!(node.branches.len(), 1);
        assert_eq!(node.branches[0].body, vec![text("x y")]);
        assert_eq!(node.otherwise, Some(vec![text("t")]));
    }

    #[test]
    fn test_idempotent() {
        let nodes = vec![
            text("<!<!-- x -->-- y -->  a\t\tb "),
            Node::Emit(Expr::Literal(Literal::Str("  ".to_string()))),
            text(" <textarea> keep  </textarea>"),
        ];
        let once = optimize(nodes);
        assert_eq!(optimize(once.clone()), once);
        assert_eq!(once, vec![text(" a b <textarea> keep  </textarea>")]);
    }

    #[test]
    fn test_region_after_branches() {
        let branch = |body: &str| Branch {
            condition: Expr::Var("a".to_string()),
            body: vec![text(body)],
        };
        let balanced = vec![
            Node::If(IfNode {
                branches: vec![branch("<pre> x </pre>")],
                otherwise: None,
            }),
            text("  a   b"),
        ];
        assert_eq!(optimize(balanced)[1], text(" a b"));

        let open = vec![
            Node::If(IfNode {
                branches: vec![branch("<pre>")],
                otherwise: None,
            }),
            text("  a   b"),
        ];
        assert_eq!(optimize(open)[1], text("  a   b"));
    }

    #[test]
    fn test_text_after_unknown_yield_is_kept() {
        let yield_node = Node::Yield(YieldNode {
            name: "x".to_string(),
            default: None,
        });
        let nodes = vec![text("a   b"), yield_node.clone(), text("  c   d")];
        assert_eq!(
            optimize(nodes),
            vec![text("a b"), yield_node, text("  c   d")]
        );
    }

    #[test]
    fn test_section_minified_in_its_yield_region() {
        let yield_node = |name: &str| {
            Node::Yield(YieldNode {
                name: name.to_string(),
                default: None,
            })
        };
        let section = |name: &str, body: &str| SectionNode {
            name: name.to_string(),
            body: vec![text(body)],
        };
        let body = vec![
            text("<pre>"),
            yield_node("code"),
            text("</pre>  <p>"),
            yield_node("note"),
            text("</p>"),
        ];
        let (body, sections) = optimize_artifact(
            body,
            vec![section("code", "a   b"), section("note", "x   y"), section("note", "old   one")],
        );
        assert_eq!(body[2], text("</pre> <p>"));
        assert_eq!(sections[0].body, vec![text("a   b")]);
        assert_eq!(sections[1].body, vec![text("x y")]);
        assert_eq!(sections[2].body, vec![text("old   one")]);
    }
}

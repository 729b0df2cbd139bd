//! Artifact execution
//!
//! All state a render needs lives in [`Renderer`], which is created per
//! call: the variable scopes and the section table. Nothing is shared
//! between concurrent renders.

use super::ast::{BinaryOp, Expr, Literal, Node, UnaryOp};
use super::compiler::CompiledArtifact;
use super::error::{RenderError, Result};
use super::functions::Functions;
use super::security;
use super::value::{Context, Value, compare_values, values_equal};
use std::collections::HashMap;

/// Section name → the section body that overrides it
#[derive(Debug, Default)]
pub struct SectionTable<'a> {
    captured: HashMap<&'a str, &'a [Node]>,
}

impl<'a> SectionTable<'a> {
    /// Capture the overrides of an artifact. The first definition of a name
    /// wins, which is the most-derived one.
    pub fn capture(artifact: &'a CompiledArtifact) -> Self {
        let mut captured = HashMap::new();
        for section in &artifact.sections {
            captured
                .entry(section.name.as_str())
                .or_insert(section.body.as_slice());
        }
        Self { captured }
    }

    pub fn get(&self, name: &str) -> Option<&'a [Node]> {
        self.captured.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.captured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }
}

/// Render an artifact against a data context
pub fn render(artifact: &CompiledArtifact, functions: &Functions, ctx: &Context) -> Result<String> {
    let mut renderer = Renderer {
        template: &artifact.name,
        functions,
        ctx: ctx.clone(),
        sections: SectionTable::capture(artifact),
        active: Vec::new(),
    };
    let mut out = String::new();
    renderer.render_nodes(&artifact.body, &mut out)?;
    Ok(out)
}

struct Renderer<'a> {
    template: &'a str,
    functions: &'a Functions,
    ctx: Context,
    sections: SectionTable<'a>,
    /// Sections being rendered, so an override that yields its own name
    /// renders empty instead of recursing
    active: Vec<&'a str>,
}

impl<'a> Renderer<'a> {
    fn render_nodes(&mut self, nodes: &'a [Node], out: &mut String) -> Result<()> {
        for node in nodes {
            self.render_node(node, out)?;
        }
        Ok(())
    }

    fn render_node(&mut self, node: &'a Node, out: &mut String) -> Result<()> {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Comment(_) => {}
            Node::Emit(expr) => {
                let value = self.eval(expr)?;
                out.push_str(&security::escape(&value));
            }
            Node::If(node) => {
                for branch in &node.branches {
                    if self.eval(&branch.condition)?.is_truthy() {
                        return self.render_nodes(&branch.body, out);
                    }
                }
                if let Some(otherwise) = &node.otherwise {
                    self.render_nodes(otherwise, out)?;
                }
            }
            Node::Foreach(node) => {
                let items: Vec<(Value, Value)> = match self.eval(&node.iterable)? {
                    Value::List(list) => list
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (Value::Int(i as i64), v))
                        .collect(),
                    Value::Dict(map) => map
                        .into_iter()
                        .map(|(k, v)| (Value::String(k), v))
                        .collect(),
                    _ => Vec::new(),
                };
                let count = items.len();
                for (i, (key, value)) in items.into_iter().enumerate() {
                    self.ctx.push_scope();
                    if let Some(key_name) = &node.key {
                        self.ctx.set(key_name.as_str(), key);
                    }
                    self.ctx.set(node.value.as_str(), value);
                    self.ctx.set("loop", loop_value(i, count));
                    let result = self.render_nodes(&node.body, out);
                    self.ctx.pop_scope();
                    result?;
                }
            }
            Node::Section(section) => {
                let body = self
                    .sections
                    .get(&section.name)
                    .unwrap_or(section.body.as_slice());
                self.render_section(&section.name, body, out)?;
            }
            Node::Yield(node) => match self.sections.get(&node.name) {
                Some(body) => self.render_section(&node.name, body, out)?,
                None => {
                    if let Some(default) = &node.default {
                        out.push_str(&security::escape_html(default));
                    }
                }
            },
            // Partials are spliced in at compile time
            Node::Connect(_) => {}
        }
        Ok(())
    }

    fn render_section(&mut self, name: &'a str, body: &'a [Node], out: &mut String) -> Result<()> {
        if self.active.contains(&name) {
            return Ok(());
        }
        self.active.push(name);
        let result = self.render_nodes(body, out);
        self.active.pop();
        result
    }

    fn eval(&self, expr: &Expr) -> Result<Value> {
        Ok(match expr {
            Expr::Literal(lit) => match lit {
                Literal::Null => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::String(s.clone()),
            },
            Expr::List(items) => Value::List(
                items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Expr::Var(name) => self.ctx.get(name).cloned().unwrap_or(Value::Undefined),
            Expr::Field { base, field } => self.eval(base)?.field(field),
            Expr::Index { base, index } => {
                let base = self.eval(base)?;
                base.index(&self.eval(index)?)
            }
            Expr::Call { name, args } => {
                let args = self.eval_args(args)?;
                // The parser rejects denied and unregistered names; this
                // guards artifacts decoded from a cache
                let function = match self.functions.function(name) {
                    Some(f) if security::is_allowed_function(name, self.functions) => f,
                    _ => return Err(self.error(name, "function is not available")),
                };
                function(&args).map_err(|message| self.error(name, message))?
            }
            Expr::Filter { expr, name, args } => {
                let value = self.eval(expr)?;
                let args = self.eval_args(args)?;
                let filter = match self.functions.filter(name) {
                    Some(f) if !security::is_denied(name) => f,
                    _ => return Err(self.error(name, "filter is not available")),
                };
                filter(value, &args).map_err(|message| self.error(name, message))?
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => match value {
                        Value::Int(i) => Value::Int(i.wrapping_neg()),
                        Value::Float(f) => Value::Float(-f),
                        _ => Value::Undefined,
                    },
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right)?,
        })
    }

    fn eval_args(&self, args: &[Expr]) -> Result<Vec<Value>> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value> {
        // Short-circuit for and/or
        match op {
            BinaryOp::And => {
                let left = self.eval(left)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                return self.eval(right);
            }
            BinaryOp::Or => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                return self.eval(right);
            }
            _ => {}
        }

        let left = self.eval(left)?;
        let right = self.eval(right)?;

        Ok(match op {
            BinaryOp::Eq => Value::Bool(values_equal(&left, &right)),
            BinaryOp::Ne => Value::Bool(!values_equal(&left, &right)),
            BinaryOp::Lt => Value::Bool(compare_values(&left, &right).is_some_and(|o| o.is_lt())),
            BinaryOp::Le => Value::Bool(compare_values(&left, &right).is_some_and(|o| o.is_le())),
            BinaryOp::Gt => Value::Bool(compare_values(&left, &right).is_some_and(|o| o.is_gt())),
            BinaryOp::Ge => Value::Bool(compare_values(&left, &right).is_some_and(|o| o.is_ge())),
            BinaryOp::Concat => {
                Value::String(format!("{}{}", left.render_to_string(), right.render_to_string()))
            }
            BinaryOp::Add => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
                (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
                (Value::Int(a), Value::Float(b)) => Value::Float(*a as f64 + b),
                (Value::Float(a), Value::Int(b)) => Value::Float(a + *b as f64),
                (Value::String(a), Value::String(b)) => Value::String(format!("{a}{b}")),
                (Value::List(a), Value::List(b)) => {
                    let mut result = a.clone();
                    result.extend(b.iter().cloned());
                    Value::List(result)
                }
                _ => Value::Undefined,
            },
            BinaryOp::Sub => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_sub(*b)),
                (Value::Float(a), Value::Float(b)) => Value::Float(a - b),
                (Value::Int(a), Value::Float(b)) => Value::Float(*a as f64 - b),
                (Value::Float(a), Value::Int(b)) => Value::Float(a - *b as f64),
                _ => Value::Undefined,
            },
            BinaryOp::Mul => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_mul(*b)),
                (Value::Float(a), Value::Float(b)) => Value::Float(a * b),
                (Value::Int(a), Value::Float(b)) => Value::Float(*a as f64 * b),
                (Value::Float(a), Value::Int(b)) => Value::Float(a * *b as f64),
                _ => Value::Undefined,
            },
            BinaryOp::Div => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) if *b != 0 => {
                    if a.wrapping_rem(*b) == 0 {
                        Value::Int(a.wrapping_div(*b))
                    } else {
                        Value::Float(*a as f64 / *b as f64)
                    }
                }
                (Value::Float(a), Value::Float(b)) if *b != 0.0 => Value::Float(a / b),
                (Value::Int(a), Value::Float(b)) if *b != 0.0 => Value::Float(*a as f64 / b),
                (Value::Float(a), Value::Int(b)) if *b != 0 => Value::Float(a / *b as f64),
                _ => Value::Undefined,
            },
            BinaryOp::Mod => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) if *b != 0 => Value::Int(a.wrapping_rem(*b)),
                (Value::Float(a), Value::Float(b)) if *b != 0.0 => Value::Float(a % b),
                _ => Value::Undefined,
            },
            BinaryOp::And => {
                if left.is_truthy() {
                    right
                } else {
                    left
                }
            }
            BinaryOp::Or => {
                if left.is_truthy() {
                    left
                } else {
                    right
                }
            }
        })
    }

    fn error(&self, callable: &str, message: impl Into<String>) -> super::error::TemplateError {
        RenderError {
            template: self.template.to_string(),
            callable: callable.to_string(),
            message: message.into(),
        }
        .into()
    }
}

/// `$loop` inside a `#foreach` body
fn loop_value(index: usize, count: usize) -> Value {
    let mut map = std::collections::BTreeMap::new();
    map.insert("index".to_string(), Value::Int(index as i64));
    map.insert("iteration".to_string(), Value::Int(index as i64 + 1));
    map.insert("first".to_string(), Value::Bool(index == 0));
    map.insert("last".to_string(), Value::Bool(index + 1 == count));
    map.insert("count".to_string(), Value::Int(count as i64));
    Value::Dict(map)
}

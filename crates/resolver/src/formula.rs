//! Formula evaluation for computed param values
//!
//! A formula is literal text with `{{ path }}` placeholders. A path starts at
//! a named binding and walks fields (`.name`) or keys (`["type:name"]`); the
//! bracket form is needed because identity keys contain `.` and `:`.
//!
//! ```text
//! postgres://{{ needs["service.db.postgres:maindb"].params.host }}:5432
//! {{ component.name }}-{{ component.uses["volume:data"].path }}
//! ```
//!
//! Resources accept a param name directly as a shorthand for
//! `.params.<name>`, and a param renders as its value.

use crate::model::{Component, Param, ParamMap, Resource, ResourceMap};
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing or rendering a formula
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("unterminated placeholder in formula: {0}")]
    Unterminated(String),

    #[error("empty placeholder in formula: {0}")]
    EmptyExpression(String),

    #[error("invalid path '{expr}': {reason}")]
    InvalidPath { expr: String, reason: String },

    #[error("unknown binding '{0}'")]
    UnknownBinding(String),

    #[error("{on} has no field '{field}'")]
    UnknownField { field: String, on: &'static str },

    #[error("{on} has no entry '{key}'")]
    MissingKey { key: String, on: &'static str },

    #[error("'{0}' does not resolve to a single value")]
    NotScalar(String),
}

/// A value a formula path can walk through
#[derive(Debug, Clone, Copy)]
pub enum Binding<'a> {
    Component(&'a Component),
    Resources(&'a ResourceMap),
    Resource(&'a Resource),
    Params(&'a ParamMap),
    Param(&'a Param),
    Text(&'a str),
}

impl Binding<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Component(_) => "component",
            Self::Resources(_) => "resource map",
            Self::Resource(_) => "resource",
            Self::Params(_) => "param map",
            Self::Param(_) => "param",
            Self::Text(_) => "text",
        }
    }
}

/// Named bindings a formula is evaluated against
#[derive(Debug, Default)]
pub struct FormulaContext<'a> {
    bindings: Vec<(&'a str, Binding<'a>)>,
}

impl<'a> FormulaContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding; a later binding with the same name shadows an earlier one
    pub fn bind(mut self, name: &'a str, binding: Binding<'a>) -> Self {
        self.bindings.push((name, binding));
        self
    }

    /// The context used for `uses` and `provides` formulas: the component's
    /// needs as `needs`, and the component itself as `component`.
    pub fn for_component(component: &'a Component) -> Self {
        Self::new()
            .bind("needs", Binding::Resources(&component.needs))
            .bind("component", Binding::Component(component))
    }

    fn lookup(&self, name: &str) -> Option<Binding<'a>> {
        self.bindings
            .iter()
            .rev()
            .find(|(bound, _)| *bound == name)
            .map(|(_, binding)| *binding)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Key(String),
}

impl Segment {
    fn as_str(&self) -> &str {
        match self {
            Self::Field(s) | Self::Key(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Path {
    expr: String,
    root: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Placeholder(Path),
}

/// A parsed formula
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    parts: Vec<Part>,
}

impl Formula {
    /// Render the formula against `ctx`
    pub fn render(&self, ctx: &FormulaContext<'_>) -> Result<String, FormulaError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Placeholder(path) => out.push_str(path.resolve(ctx)?),
            }
        }
        Ok(out)
    }
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parts = Vec::new();
        let mut rest = input;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(Part::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| FormulaError::Unterminated(input.to_string()))?;
            let expr = after[..end].trim();
            if expr.is_empty() {
                return Err(FormulaError::EmptyExpression(input.to_string()));
            }
            parts.push(Part::Placeholder(parse_path(expr)?));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self { parts })
    }
}

/// Parse and render `formula` in one step
pub fn evaluate(formula: &str, ctx: &FormulaContext<'_>) -> Result<String, FormulaError> {
    formula.parse::<Formula>()?.render(ctx)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn parse_path(expr: &str) -> Result<Path, FormulaError> {
    let invalid = |reason: &str| FormulaError::InvalidPath {
        expr: expr.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = expr.chars().peekable();
    let mut root = String::new();
    while let Some(&c) = chars.peek() {
        if !is_ident_char(c) {
            break;
        }
        root.push(c);
        chars.next();
    }
    if root.is_empty() {
        return Err(invalid("expected a binding name"));
    }

    let mut segments = Vec::new();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut field = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    field.push(c);
                    chars.next();
                }
                if field.is_empty() {
                    return Err(invalid("expected a field name after '.'"));
                }
                segments.push(Segment::Field(field));
            }
            '[' => {
                if chars.next() != Some('"') {
                    return Err(invalid("keys must be quoted, e.g. [\"type:name\"]"));
                }
                let mut key = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    key.push(c);
                }
                if !closed || chars.next() != Some(']') {
                    return Err(invalid("unterminated key"));
                }
                segments.push(Segment::Key(key));
            }
            _ => return Err(invalid(&format!("unexpected character '{c}'"))),
        }
    }

    Ok(Path {
        expr: expr.to_string(),
        root,
        segments,
    })
}

impl Path {
    fn resolve<'a>(&self, ctx: &FormulaContext<'a>) -> Result<&'a str, FormulaError> {
        let mut current = ctx
            .lookup(&self.root)
            .ok_or_else(|| FormulaError::UnknownBinding(self.root.clone()))?;
        for segment in &self.segments {
            current = step(current, segment)?;
        }
        match current {
            Binding::Text(text) => Ok(text),
            Binding::Param(param) => Ok(param.value.as_str()),
            _ => Err(FormulaError::NotScalar(self.expr.clone())),
        }
    }
}

fn step<'a>(current: Binding<'a>, segment: &Segment) -> Result<Binding<'a>, FormulaError> {
    let unknown_field = || FormulaError::UnknownField {
        field: segment.as_str().to_string(),
        on: current.kind(),
    };
    let missing_key = || FormulaError::MissingKey {
        key: segment.as_str().to_string(),
        on: current.kind(),
    };

    match (current, segment) {
        (Binding::Component(c), Segment::Field(field)) => match field.as_str() {
            "name" => Ok(Binding::Text(&c.name)),
            "type" => Ok(Binding::Text(&c.component_type)),
            "driver" => Ok(Binding::Text(&c.driver)),
            "description" => Ok(Binding::Text(&c.description)),
            "provides" => Ok(Binding::Resources(&c.provides)),
            "uses" => Ok(Binding::Resources(&c.uses)),
            "needs" => Ok(Binding::Resources(&c.needs)),
            _ => Err(unknown_field()),
        },
        (Binding::Resources(map), _) => map
            .get(segment.as_str())
            .map(Binding::Resource)
            .ok_or_else(missing_key),
        (Binding::Resource(r), Segment::Field(field)) => match field.as_str() {
            "name" => Ok(Binding::Text(&r.name)),
            "type" => Ok(Binding::Text(&r.resource_type)),
            "params" => Ok(Binding::Params(&r.params)),
            name => r.params.get(name).map(Binding::Param).ok_or_else(missing_key),
        },
        (Binding::Resource(r), Segment::Key(key)) => {
            r.params.get(key).map(Binding::Param).ok_or_else(missing_key)
        }
        (Binding::Params(map), _) => map
            .get(segment.as_str())
            .map(Binding::Param)
            .ok_or_else(missing_key),
        (Binding::Param(p), Segment::Field(field)) => match field.as_str() {
            "name" => Ok(Binding::Text(&p.name)),
            "value" => Ok(Binding::Text(&p.value)),
            "default" => Ok(Binding::Text(p.default_value.as_deref().unwrap_or_default())),
            _ => Err(unknown_field()),
        },
        _ => Err(unknown_field()),
    }
}

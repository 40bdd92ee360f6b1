//! Path templates: compile, evaluate, materialize.
//!
//! A template is a small XPath subset relative to a context element:
//!
//! ```text
//! %{avail}Territory/{md}country
//! │└──┬───┘        └─┬┘
//! │   placeholder     bound prefix + local name
//! └ all-matches marker
//!
//! {avail}Term[@termName='SRP']/{avail}Money
//!            └──── predicate ─┘
//!
//! {avail}Asset/@contentID        (attribute-returning)
//! ```
//!
//! Steps are `.`, `..` or a qualified element name followed by any number
//! of predicates: `[@attr]`, `[@attr='v']`, `[child]`, `[child='v']`. A
//! trailing `@name` step makes the expression attribute-returning; an
//! attribute step anywhere else is a compile error.

use std::collections::BTreeMap;

use crate::error::PathError;
use crate::provenance::XmlRef;
use crate::xml::{local_part, NodeId, XmlDocument};

// =============================================================================
// Namespace Bindings
// =============================================================================

/// Prefix to namespace URI table used to resolve `{prefix}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceBindings {
    prefixes: BTreeMap<String, String>,
}

impl NamespaceBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.prefixes.insert(prefix.into(), uri.into());
    }

    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }

    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(_, u)| u.as_str() == uri)
            .map(|(p, _)| p.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prefixes.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }
}

// =============================================================================
// Compiled Expression
// =============================================================================

/// What an expression selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Element,
    Attribute,
}

impl TargetKind {
    fn describe(self) -> &'static str {
        match self {
            TargetKind::Element => "an element",
            TargetKind::Attribute => "an attribute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    HasAttribute(String),
    AttributeEquals(String, String),
    HasChild(String),
    ChildEquals(String, String),
}

impl Predicate {
    fn matches(&self, doc: &XmlDocument, node: NodeId) -> bool {
        match self {
            Predicate::HasAttribute(a) => doc.attribute(node, a).is_some(),
            Predicate::AttributeEquals(a, v) => doc.attribute(node, a) == Some(v.as_str()),
            Predicate::HasChild(c) => doc.first_child_named(node, c).is_some(),
            Predicate::ChildEquals(c, v) => doc
                .children_named(node, c)
                .any(|child| doc.text(child) == Some(v.as_str())),
        }
    }

    fn apply(&self, doc: &mut XmlDocument, node: NodeId) -> Result<(), PathError> {
        match self {
            Predicate::AttributeEquals(a, v) => doc.set_attribute(node, a, v.clone()),
            Predicate::ChildEquals(c, v) => {
                doc.add_text_child(node, c.clone(), v.clone());
            }
            Predicate::HasAttribute(a) => return Err(PathError::Unmaterializable(format!("@{}", a))),
            Predicate::HasChild(c) => return Err(PathError::Unmaterializable(c.clone())),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    SelfNode,
    Parent,
    Child { name: String, predicates: Vec<Predicate> },
}

/// A compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    steps: Vec<Step>,
    attribute: Option<String>,
    all_matches: bool,
}

/// One evaluation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub value: String,
    pub source: XmlRef,
}

impl PathExpr {
    /// Template text as written in the mapping.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn target(&self) -> TargetKind {
        if self.attribute.is_some() {
            TargetKind::Attribute
        } else {
            TargetKind::Element
        }
    }

    /// True when the template carried the `%` marker.
    pub fn allows_multiple(&self) -> bool {
        self.all_matches
    }

    /// Qualified name of the selected element or attribute.
    pub fn leaf_name(&self) -> Option<&str> {
        if let Some(attr) = &self.attribute {
            return Some(attr);
        }
        self.steps.iter().rev().find_map(|s| match s {
            Step::Child { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Local name of the leaf, used for schema lookups.
    pub fn leaf_local_name(&self) -> Option<&str> {
        self.leaf_name().map(local_part)
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Every match under `context` in document order. Never fails.
    pub fn evaluate(&self, doc: &XmlDocument, context: NodeId) -> Vec<PathMatch> {
        let nodes = self.select(doc, context);
        match &self.attribute {
            Some(attr) => nodes
                .into_iter()
                .filter_map(|n| {
                    doc.attribute(n, attr).map(|v| PathMatch {
                        value: v.to_string(),
                        source: XmlRef::attribute(n, attr),
                    })
                })
                .collect(),
            None => nodes
                .into_iter()
                .map(|n| PathMatch {
                    value: doc.text(n).unwrap_or("").to_string(),
                    source: XmlRef::element(n),
                })
                .collect(),
        }
    }

    /// Element nodes reached by the steps, deduplicated, in document order.
    pub fn select(&self, doc: &XmlDocument, context: NodeId) -> Vec<NodeId> {
        let mut current = vec![context];
        for step in &self.steps {
            let mut next = Vec::new();
            for &node in &current {
                match step {
                    Step::SelfNode => next.push(node),
                    Step::Parent => next.extend(doc.parent(node)),
                    Step::Child { name, predicates } => next.extend(
                        doc.children_named(node, name)
                            .filter(|&c| predicates.iter().all(|p| p.matches(doc, c))),
                    ),
                }
            }
            let mut seen = std::collections::HashSet::new();
            next.retain(|n| seen.insert(*n));
            current = next;
        }
        current
    }

    // =========================================================================
    // Materialization
    // =========================================================================

    /// Write `value` under `context`, creating missing elements.
    ///
    /// Single mode reuses the first matching element at each step and
    /// overwrites the leaf. All-matches mode splits `value` on commas and
    /// builds a fresh chain (from the first element step) per value.
    pub fn materialize(
        &self,
        doc: &mut XmlDocument,
        context: NodeId,
        value: &str,
    ) -> Result<Vec<XmlRef>, PathError> {
        let has_child_step = self.steps.iter().any(|s| matches!(s, Step::Child { .. }));
        if !self.all_matches || !has_child_step {
            return Ok(vec![self.materialize_one(doc, context, value, false)?]);
        }

        value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| self.materialize_one(doc, context, v, true))
            .collect()
    }

    fn materialize_one(
        &self,
        doc: &mut XmlDocument,
        context: NodeId,
        value: &str,
        fresh_chain: bool,
    ) -> Result<XmlRef, PathError> {
        let mut node = context;
        let mut fresh = fresh_chain;

        for step in &self.steps {
            node = match step {
                Step::SelfNode => node,
                Step::Parent => doc.parent(node).ok_or(PathError::NoParent)?,
                Step::Child { name, predicates } => {
                    let existing = if fresh {
                        None
                    } else {
                        let view: &XmlDocument = doc;
                        view.children_named(node, name)
                            .find(|&c| predicates.iter().all(|p| p.matches(view, c)))
                    };
                    fresh = false;
                    match existing {
                        Some(found) => found,
                        None => {
                            let created = doc.add_child(node, name.clone());
                            for predicate in predicates {
                                predicate.apply(doc, created)?;
                            }
                            created
                        }
                    }
                }
            };
        }

        match &self.attribute {
            Some(attr) => {
                doc.set_attribute(node, attr, value);
                Ok(XmlRef::attribute(node, attr))
            }
            None => {
                doc.set_text(node, value);
                Ok(XmlRef::element(node))
            }
        }
    }
}

// =============================================================================
// Compilation
// =============================================================================

/// Compile `template` against `bindings`.
pub fn compile(template: &str, bindings: &NamespaceBindings) -> Result<PathExpr, PathError> {
    let source = template.trim();
    let (all_matches, body) = match source.strip_prefix('%') {
        Some(rest) => (true, rest),
        None => (false, source),
    };

    let expanded = substitute_placeholders(body, bindings)?;
    let expanded = expanded.strip_prefix("./").unwrap_or(&expanded);
    if expanded.is_empty() {
        return Err(PathError::Empty);
    }

    let segments = split_steps(expanded);
    let mut steps = Vec::new();
    let mut attribute = None;

    for (i, segment) in segments.iter().enumerate() {
        let segment = segment.trim();
        if segment.is_empty() {
            return Err(PathError::EmptyStep(source.to_string()));
        }
        if let Some(attr) = segment.strip_prefix('@') {
            if i + 1 != segments.len() {
                return Err(PathError::AttributeNotLast(attr.to_string()));
            }
            attribute = Some(check_name(attr)?);
            continue;
        }
        steps.push(parse_step(segment)?);
    }

    Ok(PathExpr {
        source: source.to_string(),
        steps,
        attribute,
        all_matches,
    })
}

/// Compile and require a specific target kind.
pub fn compile_as(
    template: &str,
    bindings: &NamespaceBindings,
    expected: TargetKind,
) -> Result<PathExpr, PathError> {
    let expr = compile(template, bindings)?;
    if expr.target() != expected {
        return Err(PathError::TargetMismatch {
            template: template.to_string(),
            expected: expected.describe(),
            found: expr.target().describe(),
        });
    }
    Ok(expr)
}

fn substitute_placeholders(body: &str, bindings: &NamespaceBindings) -> Result<String, PathError> {
    let mut out = String::with_capacity(body.len());
    let mut quote: Option<char> = None;
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                out.push(c);
            }
            (Some(_), c) => out.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                out.push(c);
            }
            (None, '{') => {
                let mut prefix = String::new();
                let mut closed = false;
                for p in chars.by_ref() {
                    if p == '}' {
                        closed = true;
                        break;
                    }
                    prefix.push(p);
                }
                if !closed {
                    return Err(PathError::UnclosedPlaceholder(body.to_string()));
                }
                if bindings.uri(&prefix).is_none() {
                    return Err(PathError::UnboundNamespace(prefix));
                }
                out.push_str(&prefix);
                out.push(':');
            }
            (None, c) => out.push(c),
        }
    }
    Ok(out)
}

/// Split on `/` outside predicates and quotes.
fn split_steps(path: &str) -> Vec<String> {
    let mut segments = vec![String::new()];
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in path.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => {
                segments.push(String::new());
                continue;
            }
            _ => {}
        }
        if let Some(last) = segments.last_mut() {
            last.push(c);
        }
    }
    segments
}

fn parse_step(segment: &str) -> Result<Step, PathError> {
    match segment {
        "." => return Ok(Step::SelfNode),
        ".." => return Ok(Step::Parent),
        _ => {}
    }

    let (name, mut rest) = match segment.find('[') {
        Some(i) => (&segment[..i], &segment[i..]),
        None => (segment, ""),
    };
    let name = check_name(name)?;

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let close = find_predicate_end(rest).ok_or_else(|| PathError::MalformedPredicate(rest.to_string()))?;
        predicates.push(parse_predicate(&rest[1..close])?);
        rest = &rest[close + 1..];
    }

    Ok(Step::Child { name, predicates })
}

/// Index of the `]` closing the predicate that opens at `rest[0]`.
fn find_predicate_end(rest: &str) -> Option<usize> {
    if !rest.starts_with('[') {
        return None;
    }
    let mut quote: Option<char> = None;
    for (i, c) in rest.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_predicate(body: &str) -> Result<Predicate, PathError> {
    let malformed = || PathError::MalformedPredicate(body.to_string());
    let body = body.trim();
    let (is_attr, body_rest) = match body.strip_prefix('@') {
        Some(rest) => (true, rest),
        None => (false, body),
    };

    let predicate = match body_rest.split_once('=') {
        None => {
            let name = check_name(body_rest.trim()).map_err(|_| malformed())?;
            if is_attr {
                Predicate::HasAttribute(name)
            } else {
                Predicate::HasChild(name)
            }
        }
        Some((name, literal)) => {
            let name = check_name(name.trim()).map_err(|_| malformed())?;
            let value = unquote(literal.trim()).ok_or_else(malformed)?;
            if is_attr {
                Predicate::AttributeEquals(name, value)
            } else {
                Predicate::ChildEquals(name, value)
            }
        }
    };
    Ok(predicate)
}

fn unquote(literal: &str) -> Option<String> {
    let mut chars = literal.chars();
    let open = chars.next()?;
    if (open != '\'' && open != '"') || literal.len() < 2 || !literal.ends_with(open) {
        return None;
    }
    Some(literal[1..literal.len() - 1].to_string())
}

/// Accept `local` or `prefix:local` with XML-ish name characters.
fn check_name(name: &str) -> Result<String, PathError> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    };
    let ok = match name.split_once(':') {
        Some((prefix, local)) => valid_part(prefix) && valid_part(local),
        None => valid_part(name),
    };
    if ok {
        Ok(name.to_string())
    } else {
        Err(PathError::InvalidName(name.to_string()))
    }
}

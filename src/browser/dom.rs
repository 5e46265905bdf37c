//! DOM snapshot and a CSS-subset selector engine over it.
//!
//! Supported selector grammar: type (`div`, `*`), `#id`, `.class`,
//! `[attr]`, `[attr=v]`, `[attr*=v]`, `[attr^=v]`, `[attr$=v]`, `[attr~=v]`,
//! `:nth-of-type(n)`, `:first-of-type`, descendant and `>` combinators, and
//! comma-separated lists. Everything the selector generator emits parses here,
//! and is plain CSS a real browser resolves the same way.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Serializable element tree as captured from a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomNode {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Text directly inside this element, not its children.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub children: Vec<DomNode>,
}

impl DomNode {
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn child(mut self, child: DomNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = DomNode>) -> Self {
        self.children.extend(children);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unsupported selector syntax at {position} in {selector:?}")]
    Unsupported { selector: String, position: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Contains,
    Prefix,
    Suffix,
    Word,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrSelector {
    name: String,
    op: AttrOp,
    value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
    nth_of_type: Option<usize>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.ids.is_empty()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.nth_of_type.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    /// Combinator of the first part is ignored.
    parts: Vec<(Combinator, Compound)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    alternatives: Vec<Complex>,
}

impl SelectorList {
    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        let alternatives = split_top_level(selector, ',')
            .into_iter()
            .map(|part| parse_complex(selector, part))
            .collect::<Result<Vec<_>, _>>()?;

        if alternatives.is_empty() {
            return Err(SelectorError::Empty);
        }
        Ok(Self { alternatives })
    }
}

fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth -= 1,
            (None, c) if c == sep && depth == 0 => {
                parts.push(input[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn parse_complex(full: &str, input: &str) -> Result<Complex, SelectorError> {
    let chars: Vec<char> = input.chars().collect();
    let unsupported = |position: usize| SelectorError::Unsupported {
        selector: full.to_string(),
        position,
    };

    let mut parts = Vec::new();
    let mut pending = Combinator::Descendant;
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        if chars[i] == '>' {
            if parts.is_empty() {
                return Err(unsupported(i));
            }
            pending = Combinator::Child;
            i += 1;
            continue;
        }

        let (compound, next) = parse_compound(&chars, i).ok_or_else(|| unsupported(i))?;
        if compound.is_empty() {
            return Err(unsupported(i));
        }
        parts.push((pending, compound));
        pending = Combinator::Descendant;
        i = next;
    }

    if parts.is_empty() {
        return Err(SelectorError::Empty);
    }
    Ok(Complex { parts })
}

fn read_ident(chars: &[char], mut i: usize) -> (String, usize) {
    let start = i;
    while i < chars.len() && is_ident_char(chars[i]) {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}

fn parse_compound(chars: &[char], mut i: usize) -> Option<(Compound, usize)> {
    let mut compound = Compound::default();

    if chars[i] == '*' {
        i += 1;
    } else if chars[i].is_alphabetic() {
        let (tag, next) = read_ident(chars, i);
        compound.tag = Some(tag.to_ascii_lowercase());
        i = next;
    }

    while i < chars.len() {
        match chars[i] {
            '#' => {
                let (id, next) = read_ident(chars, i + 1);
                if id.is_empty() {
                    return None;
                }
                compound.ids.push(id);
                i = next;
            }
            '.' => {
                let (class, next) = read_ident(chars, i + 1);
                if class.is_empty() {
                    return None;
                }
                compound.classes.push(class);
                i = next;
            }
            '[' => {
                let (attr, next) = parse_attr(chars, i + 1)?;
                compound.attrs.push(attr);
                i = next;
            }
            ':' => {
                let (name, next) = read_ident(chars, i + 1);
                match name.as_str() {
                    "first-of-type" => {
                        compound.nth_of_type = Some(1);
                        i = next;
                    }
                    "nth-of-type" => {
                        if chars.get(next) != Some(&'(') {
                            return None;
                        }
                        let close = chars[next..].iter().position(|&c| c == ')')? + next;
                        let n: String = chars[next + 1..close].iter().collect();
                        compound.nth_of_type = Some(n.trim().parse().ok()?);
                        i = close + 1;
                    }
                    _ => return None,
                }
            }
            _ => break,
        }
    }

    Some((compound, i))
}

fn parse_attr(chars: &[char], mut i: usize) -> Option<(AttrSelector, usize)> {
    let skip_ws = |mut i: usize| {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        i
    };

    i = skip_ws(i);
    let (name, next) = read_ident(chars, i);
    if name.is_empty() {
        return None;
    }
    i = skip_ws(next);

    let op = match chars.get(i)? {
        ']' => {
            return Some((
                AttrSelector {
                    name: name.to_ascii_lowercase(),
                    op: AttrOp::Exists,
                    value: String::new(),
                },
                i + 1,
            ));
        }
        '=' => {
            i += 1;
            AttrOp::Equals
        }
        c @ ('*' | '^' | '$' | '~') => {
            if chars.get(i + 1) != Some(&'=') {
                return None;
            }
            i += 2;
            match c {
                '*' => AttrOp::Contains,
                '^' => AttrOp::Prefix,
                '$' => AttrOp::Suffix,
                _ => AttrOp::Word,
            }
        }
        _ => return None,
    };

    i = skip_ws(i);
    let value = match chars.get(i)? {
        q @ ('"' | '\'') => {
            let close = chars[i + 1..].iter().position(|c| c == q)? + i + 1;
            let value: String = chars[i + 1..close].iter().collect();
            i = close + 1;
            value
        }
        _ => {
            let (value, next) = read_ident(chars, i);
            i = next;
            value
        }
    };

    i = skip_ws(i);
    // Case-sensitivity flags are accepted and ignored.
    if matches!(chars.get(i), Some('i') | Some('s')) {
        i = skip_ws(i + 1);
    }
    if chars.get(i) != Some(&']') {
        return None;
    }

    Some((
        AttrSelector {
            name: name.to_ascii_lowercase(),
            op,
            value,
        },
        i + 1,
    ))
}

pub type NodeId = usize;

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    nth_of_type: usize,
    /// One past the last descendant in document order.
    subtree_end: NodeId,
}

/// Flattened, queryable view of a [`DomNode`] tree in document order.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
}

impl Document {
    pub fn new(root: &DomNode) -> Self {
        let mut doc = Document { nodes: Vec::new() };
        doc.push(root, None, 1);
        doc
    }

    fn push(&mut self, node: &DomNode, parent: Option<NodeId>, nth_of_type: usize) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(NodeData {
            tag: node.tag.to_ascii_lowercase(),
            attributes: node
                .attributes
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
            text: node.text.clone(),
            parent,
            children: Vec::new(),
            nth_of_type,
            subtree_end: id + 1,
        });

        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        for child in &node.children {
            let count = seen.entry(child.tag.to_ascii_lowercase()).or_insert(0);
            *count += 1;
            let child_id = self.push(child, Some(id), *count);
            self.nodes[id].children.push(child_id);
        }

        self.nodes[id].subtree_end = self.nodes.len();
        id
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn tag(&self, id: NodeId) -> &str {
        &self.nodes[id].tag
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes[id].attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self, id: NodeId) -> &BTreeMap<String, String> {
        &self.nodes[id].attributes
    }

    pub fn classes(&self, id: NodeId) -> Vec<&str> {
        self.attr(id, "class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn nth_of_type(&self, id: NodeId) -> usize {
        self.nodes[id].nth_of_type
    }

    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> {
        (id + 1)..self.nodes[id].subtree_end
    }

    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        ancestor < id && id < self.nodes[ancestor].subtree_end
    }

    /// Whitespace-collapsed text of the element and all descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for node in std::iter::once(id).chain(self.descendants(id)) {
            let text = self.nodes[node].text.trim();
            if !text.is_empty() {
                parts.push(text);
            }
        }
        parts
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// All matches in document order. Unparseable selectors match nothing.
    pub fn query_all(&self, selector: &str) -> Vec<NodeId> {
        match SelectorList::parse(selector) {
            Ok(list) => (0..self.nodes.len())
                .filter(|&id| self.matches(id, &list))
                .collect(),
            Err(err) => {
                log::debug!("Ignoring selector {:?}: {}", selector, err);
                Vec::new()
            }
        }
    }

    /// Matches among the descendants of `scope`.
    pub fn query_within(&self, scope: NodeId, selector: &str) -> Vec<NodeId> {
        match SelectorList::parse(selector) {
            Ok(list) => self
                .descendants(scope)
                .filter(|&id| self.matches(id, &list))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn query_first_within(&self, scope: NodeId, selector: &str) -> Option<NodeId> {
        self.query_within(scope, selector).into_iter().next()
    }

    pub fn count(&self, selector: &str) -> usize {
        self.query_all(selector).len()
    }

    pub fn matches(&self, id: NodeId, list: &SelectorList) -> bool {
        list.alternatives
            .iter()
            .any(|complex| self.matches_complex(id, &complex.parts, complex.parts.len() - 1))
    }

    fn matches_complex(&self, id: NodeId, parts: &[(Combinator, Compound)], index: usize) -> bool {
        if !self.matches_compound(id, &parts[index].1) {
            return false;
        }
        if index == 0 {
            return true;
        }

        match parts[index].0 {
            Combinator::Child => self
                .parent(id)
                .is_some_and(|parent| self.matches_complex(parent, parts, index - 1)),
            Combinator::Descendant => {
                let mut current = self.parent(id);
                while let Some(ancestor) = current {
                    if self.matches_complex(ancestor, parts, index - 1) {
                        return true;
                    }
                    current = self.parent(ancestor);
                }
                false
            }
        }
    }

    fn matches_compound(&self, id: NodeId, compound: &Compound) -> bool {
        let node = &self.nodes[id];

        if let Some(tag) = &compound.tag {
            if &node.tag != tag {
                return false;
            }
        }
        if let Some(n) = compound.nth_of_type {
            if node.nth_of_type != n {
                return false;
            }
        }
        if !compound
            .ids
            .iter()
            .all(|id_sel| node.attributes.get("id") == Some(id_sel))
        {
            return false;
        }
        if !compound.classes.is_empty() {
            let classes = self.classes(id);
            if !compound.classes.iter().all(|c| classes.contains(&c.as_str())) {
                return false;
            }
        }

        compound.attrs.iter().all(|attr| {
            let Some(actual) = node.attributes.get(&attr.name) else {
                return false;
            };
            match attr.op {
                AttrOp::Exists => true,
                AttrOp::Equals => actual == &attr.value,
                AttrOp::Contains => !attr.value.is_empty() && actual.contains(&attr.value),
                AttrOp::Prefix => !attr.value.is_empty() && actual.starts_with(&attr.value),
                AttrOp::Suffix => !attr.value.is_empty() && actual.ends_with(&attr.value),
                AttrOp::Word => actual.split_whitespace().any(|w| w == attr.value),
            }
        })
    }
}

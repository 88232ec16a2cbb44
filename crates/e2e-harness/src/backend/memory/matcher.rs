// Selector evaluation against a Document
//
// Supports a CSS subset (type, id, class, attribute operators, descendant,
// child and sibling combinators, a handful of pseudo-classes), an XPath
// subset (child and descendant steps, parenthesized groups, attribute,
// text, position, contains() and nested-path predicates), ARIA roles with
// accessible names, text and test-id lookups. Results are always in document order.

use super::dom::{Document, NodeId, normalize_whitespace};
use crate::error::{Error, Result};
use crate::selector::{Selector, Step, Strategy};
use std::collections::{HashMap, HashSet};

/// Resolves every step of `selector` from the document root
pub(crate) fn resolve(doc: &Document, selector: &Selector) -> Result<Vec<NodeId>> {
    let order: HashMap<NodeId, usize> = doc
        .elements()
        .into_iter()
        .enumerate()
        .map(|(i, n)| (n, i))
        .collect();

    let mut current: Option<Vec<NodeId>> = None;
    for step in selector.steps() {
        let next = match step {
            Step::Find(strategy) => {
                let scopes: Vec<Option<NodeId>> = match &current {
                    None => vec![None],
                    Some(nodes) => nodes.iter().copied().map(Some).collect(),
                };
                let mut found = HashSet::new();
                for scope in scopes {
                    found.extend(find(doc, strategy, scope)?);
                }
                sorted(found, &order)
            }
            Step::Nth(index) => {
                let nodes = current.ok_or_else(|| {
                    Error::InvalidInput("nth= must follow another selector".to_string())
                })?;
                let picked = if *index < 0 {
                    nodes.len().checked_sub(index.unsigned_abs() as usize)
                } else {
                    Some(*index as usize)
                };
                picked
                    .and_then(|i| nodes.get(i).copied())
                    .into_iter()
                    .collect()
            }
            Step::And(other) => {
                let nodes = current.unwrap_or_else(|| doc.elements());
                let others: HashSet<NodeId> = resolve(doc, other)?.into_iter().collect();
                nodes.into_iter().filter(|n| others.contains(n)).collect()
            }
            Step::Or(other) => {
                let mut union: HashSet<NodeId> = current.unwrap_or_default().into_iter().collect();
                union.extend(resolve(doc, other)?);
                sorted(union, &order)
            }
        };
        current = Some(next);
    }
    Ok(current.unwrap_or_default())
}

fn sorted(nodes: HashSet<NodeId>, order: &HashMap<NodeId, usize>) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = nodes
        .into_iter()
        .filter(|n| order.contains_key(n))
        .collect();
    nodes.sort_by_key(|n| order[n]);
    nodes
}

fn candidates(doc: &Document, scope: Option<NodeId>) -> Vec<NodeId> {
    match scope {
        None => doc.elements(),
        Some(scope) => doc.descendants(scope),
    }
}

fn find(doc: &Document, strategy: &Strategy, scope: Option<NodeId>) -> Result<Vec<NodeId>> {
    match strategy {
        Strategy::Css(css) => {
            let list = parse_css(css)?;
            Ok(candidates(doc, scope)
                .into_iter()
                .filter(|n| list.iter().any(|c| matches_complex(doc, *n, c)))
                .collect())
        }
        Strategy::XPath(xpath) => eval_xpath(doc, xpath, scope),
        Strategy::TestId(id) => Ok(candidates(doc, scope)
            .into_iter()
            .filter(|n| doc.attr(*n, "data-testid") == Some(id.as_str()))
            .collect()),
        Strategy::Text { text, exact } => Ok(find_text(doc, text, *exact, scope)),
        Strategy::Role { role, name, exact } => Ok(candidates(doc, scope)
            .into_iter()
            .filter(|n| {
                !doc.is_aria_hidden(*n)
                    && implicit_role(doc, *n).as_deref() == Some(role.as_str())
                    && name.as_ref().is_none_or(|expected| {
                        text_matches(&accessible_name(doc, *n), expected, *exact)
                    })
            })
            .collect()),
    }
}

/// CSS query from the document root, for handlers written against Document
pub(crate) fn select_css(doc: &Document, css: &str) -> Result<Vec<NodeId>> {
    find(doc, &Strategy::css(css), None)
}

fn text_matches(actual: &str, expected: &str, exact: bool) -> bool {
    let expected = normalize_whitespace(expected);
    if exact {
        actual == expected
    } else {
        actual.to_lowercase().contains(&expected.to_lowercase())
    }
}

// Text engine

fn element_text(doc: &Document, id: NodeId) -> String {
    match doc.input_type(id).as_deref() {
        Some("button" | "submit" | "reset") => doc.attr(id, "value").unwrap_or_default().to_string(),
        _ => normalize_whitespace(&doc.text_content(id)),
    }
}

/// Smallest elements whose text matches: an element is dropped when one of
/// its children matches on its own
fn find_text(doc: &Document, text: &str, exact: bool, scope: Option<NodeId>) -> Vec<NodeId> {
    let matches = |n: NodeId| {
        !matches!(
            doc.tag(n),
            Some("head" | "script" | "style" | "title" | "html" | "body" | "meta")
        ) && text_matches(&element_text(doc, n), text, exact)
    };
    candidates(doc, scope)
        .into_iter()
        .filter(|n| matches(*n) && !doc.children(*n).into_iter().any(&matches))
        .collect()
}

// Roles

pub(crate) fn implicit_role(doc: &Document, id: NodeId) -> Option<String> {
    if let Some(role) = doc.attr(id, "role") {
        return role.split_whitespace().next().map(str::to_string);
    }
    let role = match doc.tag(id)? {
        "a" | "area" if doc.attr(id, "href").is_some() => "link",
        "button" => "button",
        "input" => match doc.input_type(id)?.as_str() {
            "button" | "submit" | "reset" | "image" => "button",
            "checkbox" => "checkbox",
            "radio" => "radio",
            "range" => "slider",
            "number" => "spinbutton",
            "search" => "searchbox",
            "text" | "email" | "tel" | "url" => "textbox",
            _ => return None,
        },
        "textarea" => "textbox",
        "select" => {
            if doc.attr(id, "multiple").is_some()
                || doc
                    .attr(id, "size")
                    .and_then(|s| s.parse::<u32>().ok())
                    .is_some_and(|s| s > 1)
            {
                "listbox"
            } else {
                "combobox"
            }
        }
        "option" => "option",
        "ul" | "ol" | "menu" => "list",
        "li" => "listitem",
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
        "img" => match doc.attr(id, "alt") {
            Some("") => "presentation",
            _ => "img",
        },
        "nav" => "navigation",
        "main" => "main",
        "header" => "banner",
        "footer" => "contentinfo",
        "table" => "table",
        "tr" => "row",
        "td" => "cell",
        "th" => "columnheader",
        "dialog" => "dialog",
        "article" => "article",
        "fieldset" => "group",
        "p" => "paragraph",
        _ => return None,
    };
    Some(role.to_string())
}

const NAME_FROM_CONTENT: &[&str] = &[
    "button", "link", "heading", "option", "cell", "columnheader", "row", "tab", "menuitem",
    "checkbox", "radio", "treeitem", "tooltip",
];

pub(crate) fn accessible_name(doc: &Document, id: NodeId) -> String {
    if let Some(label) = doc.attr(id, "aria-label").filter(|l| !l.trim().is_empty()) {
        return normalize_whitespace(label);
    }
    if let Some(ids) = doc.attr(id, "aria-labelledby") {
        let text = ids
            .split_whitespace()
            .filter_map(|i| doc.by_id(i))
            .map(|n| doc.rendered_text(n))
            .collect::<Vec<_>>()
            .join(" ");
        if !text.trim().is_empty() {
            return normalize_whitespace(&text);
        }
    }
    match doc.tag(id) {
        Some("input") => match doc.input_type(id).as_deref() {
            Some("button" | "submit" | "reset") => {
                let default = match doc.input_type(id).as_deref() {
                    Some("submit") => "Submit",
                    Some("reset") => "Reset",
                    _ => "",
                };
                return doc.attr(id, "value").unwrap_or(default).to_string();
            }
            Some("image") => return doc.attr(id, "alt").unwrap_or_default().to_string(),
            _ => {
                if let Some(name) = label_name(doc, id) {
                    return name;
                }
            }
        },
        Some("select" | "textarea") => {
            if let Some(name) = label_name(doc, id) {
                return name;
            }
        }
        Some("img") => return normalize_whitespace(doc.attr(id, "alt").unwrap_or_default()),
        _ => {}
    }
    if implicit_role(doc, id).is_some_and(|r| NAME_FROM_CONTENT.contains(&r.as_str())) {
        let text = doc.rendered_text(id);
        if !text.is_empty() {
            return text;
        }
    }
    doc.attr(id, "title")
        .map(normalize_whitespace)
        .unwrap_or_default()
}

fn label_name(doc: &Document, control: NodeId) -> Option<String> {
    let text = doc
        .labels_of(control)
        .into_iter()
        .map(|l| doc.rendered_text(l))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

// CSS

#[derive(Debug, Clone, PartialEq)]
enum AttrOp {
    Exists,
    Equals(String),
    Contains(String),
    Prefix(String),
    Suffix(String),
    Word(String),
    DashPrefix(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Pseudo {
    Checked,
    Disabled,
    Enabled,
    FirstChild,
    LastChild,
    NthChild(usize),
    Not(Box<Compound>),
    Visible,
    HasText(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, AttrOp)>,
    pseudos: Vec<Pseudo>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Descendant,
    Child,
    Adjacent,
    Sibling,
}

/// A subject compound plus its ancestry, nearest first
#[derive(Debug, Clone, PartialEq)]
struct Complex {
    subject: Compound,
    ancestry: Vec<(Combinator, Compound)>,
}

struct CssParser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

fn parse_css(source: &str) -> Result<Vec<Complex>> {
    let mut parser = CssParser {
        chars: source.chars().collect(),
        pos: 0,
        source,
    };
    let mut list = vec![parser.complex()?];
    loop {
        parser.skip_ws();
        match parser.peek() {
            None => break,
            Some(',') => {
                parser.pos += 1;
                list.push(parser.complex()?);
            }
            Some(c) => return Err(parser.error(&format!("unexpected '{}'", c))),
        }
    }
    Ok(list)
}

impl CssParser<'_> {
    fn error(&self, message: &str) -> Error {
        Error::InvalidInput(format!(
            "unsupported CSS selector '{}': {}",
            self.source, message
        ))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn complex(&mut self) -> Result<Complex> {
        self.skip_ws();
        let mut compounds = vec![self.compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_ws = self.skip_ws();
            let combinator = match self.peek() {
                Some('>') => Combinator::Child,
                Some('+') => Combinator::Adjacent,
                Some('~') => Combinator::Sibling,
                Some(',') | None => break,
                Some(_) if had_ws => Combinator::Descendant,
                Some(c) => return Err(self.error(&format!("unexpected '{}'", c))),
            };
            if combinator != Combinator::Descendant {
                self.pos += 1;
                self.skip_ws();
            }
            combinators.push(combinator);
            compounds.push(self.compound()?);
        }

        let subject = compounds.pop().ok_or_else(|| self.error("empty selector"))?;
        let mut ancestry = Vec::new();
        while let Some(compound) = compounds.pop() {
            let combinator = combinators
                .pop()
                .ok_or_else(|| self.error("dangling combinator"))?;
            ancestry.push((combinator, compound));
        }
        Ok(Complex { subject, ancestry })
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn string_or_ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let mut out = String::new();
                loop {
                    match self.peek() {
                        None => return Err(self.error("unterminated string")),
                        Some('\\') => {
                            self.pos += 1;
                            if let Some(c) = self.peek() {
                                out.push(c);
                                self.pos += 1;
                            }
                        }
                        Some(c) if c == q => {
                            self.pos += 1;
                            return Ok(out);
                        }
                        Some(c) => {
                            out.push(c);
                            self.pos += 1;
                        }
                    }
                }
            }
            _ => Ok(self.ident()),
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn compound(&mut self) -> Result<Compound> {
        let mut compound = Compound::default();
        let mut empty = true;

        if self.peek() == Some('*') {
            self.pos += 1;
            empty = false;
        } else if self.peek().is_some_and(|c| c.is_alphabetic()) {
            compound.tag = Some(self.ident().to_ascii_lowercase());
            empty = false;
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.ident());
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.ident());
                }
                Some('[') => {
                    self.pos += 1;
                    self.skip_ws();
                    let name = self.ident().to_ascii_lowercase();
                    self.skip_ws();
                    let op = match self.peek() {
                        Some(']') => None,
                        Some('=') => Some(""),
                        Some('*') => Some("*"),
                        Some('^') => Some("^"),
                        Some('$') => Some("$"),
                        Some('~') => Some("~"),
                        Some('|') => Some("|"),
                        _ => return Err(self.error("bad attribute selector")),
                    };
                    let op = match op {
                        None => AttrOp::Exists,
                        Some(prefix) => {
                            self.pos += prefix.len();
                            self.expect('=')?;
                            self.skip_ws();
                            let value = self.string_or_ident()?;
                            self.skip_ws();
                            // case-sensitivity flags are accepted and ignored
                            if self.peek().is_some_and(|c| c == 'i' || c == 's') {
                                self.pos += 1;
                            }
                            match prefix {
                                "" => AttrOp::Equals(value),
                                "*" => AttrOp::Contains(value),
                                "^" => AttrOp::Prefix(value),
                                "$" => AttrOp::Suffix(value),
                                "~" => AttrOp::Word(value),
                                _ => AttrOp::DashPrefix(value),
                            }
                        }
                    };
                    self.expect(']')?;
                    compound.attrs.push((name, op));
                }
                Some(':') => {
                    self.pos += 1;
                    let name = self.ident().to_ascii_lowercase();
                    let pseudo = match name.as_str() {
                        "checked" => Pseudo::Checked,
                        "disabled" => Pseudo::Disabled,
                        "enabled" => Pseudo::Enabled,
                        "first-child" => Pseudo::FirstChild,
                        "last-child" => Pseudo::LastChild,
                        "visible" => Pseudo::Visible,
                        "nth-child" => {
                            self.expect('(')?;
                            self.skip_ws();
                            let n = self
                                .ident()
                                .parse::<usize>()
                                .map_err(|_| self.error("only numeric :nth-child(n) is supported"))?;
                            self.expect(')')?;
                            Pseudo::NthChild(n)
                        }
                        "not" => {
                            self.expect('(')?;
                            self.skip_ws();
                            let inner = self.compound()?;
                            self.expect(')')?;
                            Pseudo::Not(Box::new(inner))
                        }
                        "has-text" => {
                            self.expect('(')?;
                            self.skip_ws();
                            let text = self.string_or_ident()?;
                            self.expect(')')?;
                            Pseudo::HasText(text)
                        }
                        other => return Err(self.error(&format!("unknown pseudo-class :{}", other))),
                    };
                    compound.pseudos.push(pseudo);
                }
                _ => break,
            }
            empty = false;
        }

        if empty {
            return Err(self.error("expected a selector"));
        }
        Ok(compound)
    }
}

fn matches_compound(doc: &Document, id: NodeId, compound: &Compound) -> bool {
    let Some(tag) = doc.tag(id) else {
        return false;
    };
    if compound.tag.as_deref().is_some_and(|t| t != tag) {
        return false;
    }
    if let Some(expected) = &compound.id {
        if doc.attr(id, "id") != Some(expected.as_str()) {
            return false;
        }
    }
    if !compound.classes.iter().all(|c| doc.has_class(id, c)) {
        return false;
    }
    for (name, op) in &compound.attrs {
        let Some(value) = doc.attr(id, name) else {
            return false;
        };
        let ok = match op {
            AttrOp::Exists => true,
            AttrOp::Equals(v) => value == v,
            AttrOp::Contains(v) => value.contains(v.as_str()),
            AttrOp::Prefix(v) => value.starts_with(v.as_str()),
            AttrOp::Suffix(v) => value.ends_with(v.as_str()),
            AttrOp::Word(v) => value.split_whitespace().any(|w| w == v),
            AttrOp::DashPrefix(v) => value == v || value.starts_with(&format!("{}-", v)),
        };
        if !ok {
            return false;
        }
    }
    compound.pseudos.iter().all(|pseudo| match pseudo {
        Pseudo::Checked => {
            doc.is_checked(id)
                || (tag == "option"
                    && doc
                        .parent(id)
                        .map(|p| doc.value(p) == doc.value(id))
                        .unwrap_or(false))
        }
        Pseudo::Disabled => doc.is_disabled(id),
        Pseudo::Enabled => !doc.is_disabled(id),
        Pseudo::FirstChild => siblings(doc, id).first() == Some(&id),
        Pseudo::LastChild => siblings(doc, id).last() == Some(&id),
        Pseudo::NthChild(n) => {
            n.checked_sub(1).is_some_and(|i| siblings(doc, id).get(i) == Some(&id))
        }
        Pseudo::Not(inner) => !matches_compound(doc, id, inner),
        Pseudo::Visible => doc.is_visible(id),
        Pseudo::HasText(text) => text_matches(&normalize_whitespace(&doc.text_content(id)), text, false),
    })
}

fn siblings(doc: &Document, id: NodeId) -> Vec<NodeId> {
    doc.parent(id).map(|p| doc.children(p)).unwrap_or_default()
}

fn matches_complex(doc: &Document, id: NodeId, complex: &Complex) -> bool {
    matches_compound(doc, id, &complex.subject) && matches_ancestry(doc, id, &complex.ancestry)
}

fn matches_ancestry(doc: &Document, id: NodeId, ancestry: &[(Combinator, Compound)]) -> bool {
    let Some(((combinator, compound), rest)) = ancestry.split_first() else {
        return true;
    };
    match combinator {
        Combinator::Child => doc
            .parent(id)
            .is_some_and(|p| matches_compound(doc, p, compound) && matches_ancestry(doc, p, rest)),
        Combinator::Descendant => doc
            .ancestors(id)
            .into_iter()
            .any(|a| matches_compound(doc, a, compound) && matches_ancestry(doc, a, rest)),
        Combinator::Adjacent => {
            let sibs = siblings(doc, id);
            let pos = sibs.iter().position(|s| *s == id).unwrap_or(0);
            pos > 0 && {
                let prev = sibs[pos - 1];
                matches_compound(doc, prev, compound) && matches_ancestry(doc, prev, rest)
            }
        }
        Combinator::Sibling => {
            let sibs = siblings(doc, id);
            let pos = sibs.iter().position(|s| *s == id).unwrap_or(0);
            sibs[..pos]
                .iter()
                .any(|s| matches_compound(doc, *s, compound) && matches_ancestry(doc, *s, rest))
        }
    }
}

// XPath

#[derive(Debug, Clone, PartialEq)]
enum Axis {
    Child,
    Descendant,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Attr(String),
    Text,
    Context,
    Literal(String),
    /// Relative location path; its values are the matched nodes' string values
    Path(Vec<XStep>),
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Position(usize),
    Last,
    Exists(Operand),
    Equals(Operand, Operand),
    Contains(Operand, Operand),
    StartsWith(Operand, Operand),
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

#[derive(Debug, Clone, PartialEq)]
struct XStep {
    axis: Axis,
    name: Option<String>,
    predicates: Vec<Predicate>,
}

/// `(path)[predicates]` filtered over the whole node-set, followed by
/// further steps
#[derive(Debug, Clone, PartialEq)]
struct Group {
    steps: Vec<XStep>,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
struct XPathExpr {
    group: Option<Group>,
    steps: Vec<XStep>,
}

struct XPathParser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl XPathParser<'_> {
    fn error(&self, message: &str) -> Error {
        Error::InvalidInput(format!("unsupported XPath '{}': {}", self.source, message))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn eat(&mut self, s: &str) -> bool {
        let len = s.chars().count();
        let matches = self.chars.len() >= self.pos + len
            && self.chars[self.pos..self.pos + len].iter().copied().eq(s.chars());
        if matches {
            self.pos += len;
        }
        matches
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn name(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == ':')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn expr(&mut self) -> Result<XPathExpr> {
        self.skip_ws();
        let expr = if self.eat("(") {
            let steps = self.steps(true)?;
            self.skip_ws();
            if !self.eat(")") {
                return Err(self.error("expected ')'"));
            }
            let predicates = self.predicates()?;
            XPathExpr {
                group: Some(Group { steps, predicates }),
                steps: self.steps(false)?,
            }
        } else {
            // a leading "./" anchors at the scope, which is where evaluation starts
            if self.peek() == Some('.') && self.peek_at(1) == Some('/') {
                self.pos += 1;
            }
            XPathExpr {
                group: None,
                steps: self.steps(true)?,
            }
        };
        self.skip_ws();
        if let Some(c) = self.peek() {
            return Err(self.error(&format!("unexpected '{}'", c)));
        }
        Ok(expr)
    }

    /// Location steps; with `leading` the first step may omit its slash
    fn steps(&mut self, leading: bool) -> Result<Vec<XStep>> {
        let mut steps = Vec::new();
        loop {
            self.skip_ws();
            let axis = if self.eat("//") {
                Axis::Descendant
            } else if self.eat("/") {
                Axis::Child
            } else if steps.is_empty() && leading {
                Axis::Child
            } else {
                break;
            };
            steps.push(self.step(axis)?);
        }
        Ok(steps)
    }

    fn step(&mut self, axis: Axis) -> Result<XStep> {
        if self.eat("..") {
            return Ok(XStep {
                axis: Axis::Parent,
                name: None,
                predicates: Vec::new(),
            });
        }
        if self.eat(".") {
            return Ok(XStep {
                axis: Axis::SelfNode,
                name: None,
                predicates: Vec::new(),
            });
        }
        let name = if self.eat("*") {
            None
        } else {
            let name = self.name().to_ascii_lowercase();
            if name.is_empty() {
                return Err(self.error("expected a node name"));
            }
            Some(name)
        };
        Ok(XStep {
            axis,
            name,
            predicates: self.predicates()?,
        })
    }

    fn predicates(&mut self) -> Result<Vec<Predicate>> {
        let mut predicates = Vec::new();
        while self.eat("[") {
            self.skip_ws();
            predicates.push(self.or_expr()?);
            self.skip_ws();
            if !self.eat("]") {
                return Err(self.error("expected ']'"));
            }
        }
        Ok(predicates)
    }

    fn or_expr(&mut self) -> Result<Predicate> {
        let mut left = self.and_expr()?;
        loop {
            self.skip_ws();
            if self.eat("or ") {
                let right = self.and_expr()?;
                left = Predicate::Or(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn and_expr(&mut self) -> Result<Predicate> {
        let mut left = self.primary()?;
        loop {
            self.skip_ws();
            if self.eat("and ") {
                let right = self.primary()?;
                left = Predicate::And(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn primary(&mut self) -> Result<Predicate> {
        self.skip_ws();
        if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            let start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
            let digits: String = self.chars[start..self.pos].iter().collect();
            let n = digits
                .parse::<usize>()
                .map_err(|_| self.error("bad position"))?;
            return Ok(Predicate::Position(n));
        }
        if self.eat("last()") {
            return Ok(Predicate::Last);
        }
        for (func, make) in [
            ("contains(", Predicate::Contains as fn(Operand, Operand) -> Predicate),
            ("starts-with(", Predicate::StartsWith as fn(Operand, Operand) -> Predicate),
        ] {
            if self.eat(func) {
                let a = self.operand()?;
                self.skip_ws();
                if !self.eat(",") {
                    return Err(self.error("expected ','"));
                }
                let b = self.operand()?;
                self.skip_ws();
                if !self.eat(")") {
                    return Err(self.error("expected ')'"));
                }
                return Ok(make(a, b));
            }
        }
        if self.eat("not(") {
            let inner = self.or_expr()?;
            self.skip_ws();
            if !self.eat(")") {
                return Err(self.error("expected ')'"));
            }
            return Ok(Predicate::Not(Box::new(inner)));
        }
        let left = self.operand()?;
        self.skip_ws();
        if self.eat("=") {
            let right = self.operand()?;
            return Ok(Predicate::Equals(left, right));
        }
        Ok(Predicate::Exists(left))
    }

    fn operand(&mut self) -> Result<Operand> {
        self.skip_ws();
        if self.eat("@") {
            return Ok(Operand::Attr(self.name().to_ascii_lowercase()));
        }
        if self.eat("text()") {
            return Ok(Operand::Text);
        }
        if self.eat("normalize-space()") || self.eat("string()") {
            return Ok(Operand::Context);
        }
        match self.peek() {
            // "." alone is the context node; "./x", ".//x" and ".." are paths
            Some('.') if !matches!(self.peek_at(1), Some('/' | '.')) => {
                self.pos += 1;
                Ok(Operand::Context)
            }
            Some(c) if c == '.' || c == '*' || c.is_alphabetic() => {
                Ok(Operand::Path(self.steps(true)?))
            }
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != q) {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err(self.error("unterminated string"));
                }
                let value: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Ok(Operand::Literal(value))
            }
            _ => Err(self.error("unsupported expression")),
        }
    }
}

fn operand_values(doc: &Document, id: NodeId, operand: &Operand) -> Vec<String> {
    match operand {
        Operand::Attr(name) => doc.attr(id, name).map(str::to_string).into_iter().collect(),
        Operand::Text => doc
            .child_nodes(id)
            .iter()
            .filter_map(|c| doc.text_of_node(*c))
            .map(str::to_string)
            .collect(),
        Operand::Context => vec![normalize_whitespace(&doc.text_content(id))],
        Operand::Literal(value) => vec![value.clone()],
        Operand::Path(steps) => eval_steps(doc, steps, vec![Some(id)])
            .into_iter()
            .flatten()
            .map(|n| normalize_whitespace(&doc.text_content(n)))
            .collect(),
    }
}

fn eval_predicate(doc: &Document, id: NodeId, pos: usize, size: usize, p: &Predicate) -> bool {
    match p {
        Predicate::Position(n) => pos == *n,
        Predicate::Last => pos == size,
        Predicate::Exists(operand) => !operand_values(doc, id, operand).is_empty(),
        Predicate::Equals(a, b) => {
            let right = operand_values(doc, id, b);
            operand_values(doc, id, a)
                .iter()
                .any(|l| right.iter().any(|r| l.trim() == r.trim() || l == r))
        }
        Predicate::Contains(a, b) => {
            let needle = operand_values(doc, id, b).into_iter().next().unwrap_or_default();
            operand_values(doc, id, a)
                .into_iter()
                .next()
                .is_some_and(|hay| hay.contains(&needle))
        }
        Predicate::StartsWith(a, b) => {
            let needle = operand_values(doc, id, b).into_iter().next().unwrap_or_default();
            operand_values(doc, id, a)
                .into_iter()
                .next()
                .is_some_and(|hay| hay.starts_with(&needle))
        }
        Predicate::Not(inner) => !eval_predicate(doc, id, pos, size, inner),
        Predicate::And(a, b) => {
            eval_predicate(doc, id, pos, size, a) && eval_predicate(doc, id, pos, size, b)
        }
        Predicate::Or(a, b) => {
            eval_predicate(doc, id, pos, size, a) || eval_predicate(doc, id, pos, size, b)
        }
    }
}

/// Keeps the nodes every predicate accepts, positions counted within `nodes`
fn filter_predicates(doc: &Document, nodes: Vec<NodeId>, predicates: &[Predicate]) -> Vec<NodeId> {
    let mut filtered = nodes;
    for predicate in predicates {
        let size = filtered.len();
        filtered = filtered
            .into_iter()
            .enumerate()
            .filter(|(i, n)| eval_predicate(doc, *n, i + 1, size, predicate))
            .map(|(_, n)| n)
            .collect();
    }
    filtered
}

/// Applies `steps` to each context; `None` is the document node, whose only
/// child is `<html>`. Results are unique but not sorted.
fn eval_steps(doc: &Document, steps: &[XStep], mut contexts: Vec<Option<NodeId>>) -> Vec<Option<NodeId>> {
    let children_of = |ctx: Option<NodeId>| -> Vec<NodeId> {
        match ctx {
            None => vec![doc.root()],
            Some(n) => doc.children(n),
        }
    };

    for step in steps {
        let mut next: Vec<NodeId> = Vec::new();
        let mut seen = HashSet::new();
        for ctx in &contexts {
            // sibling groups the positional predicates are evaluated against
            let groups: Vec<Vec<NodeId>> = match step.axis {
                Axis::Child => vec![children_of(*ctx)],
                Axis::Descendant => {
                    let mut parents: Vec<Option<NodeId>> = vec![*ctx];
                    parents.extend(
                        match ctx {
                            None => doc.elements(),
                            Some(n) => doc.descendants(*n),
                        }
                        .into_iter()
                        .map(Some),
                    );
                    parents.into_iter().map(children_of).collect()
                }
                Axis::SelfNode => vec![ctx.iter().copied().collect()],
                Axis::Parent => vec![ctx.and_then(|n| doc.parent(n)).into_iter().collect()],
            };
            for group in groups {
                let named: Vec<NodeId> = group
                    .into_iter()
                    .filter(|n| {
                        step.name
                            .as_deref()
                            .is_none_or(|name| doc.tag(*n) == Some(name))
                    })
                    .collect();
                for n in filter_predicates(doc, named, &step.predicates) {
                    if seen.insert(n) {
                        next.push(n);
                    }
                }
            }
        }
        contexts = next.into_iter().map(Some).collect();
    }
    contexts
}

/// Evaluates an XPath from `scope`
fn eval_xpath(doc: &Document, source: &str, scope: Option<NodeId>) -> Result<Vec<NodeId>> {
    let mut parser = XPathParser {
        chars: source.chars().collect(),
        pos: 0,
        source,
    };
    let expr = parser.expr()?;

    let order: HashMap<NodeId, usize> = doc
        .elements()
        .into_iter()
        .enumerate()
        .map(|(i, n)| (n, i))
        .collect();

    let contexts = match &expr.group {
        Some(group) => {
            let members = eval_steps(doc, &group.steps, vec![scope]);
            let members = sorted(members.into_iter().flatten().collect(), &order);
            filter_predicates(doc, members, &group.predicates)
                .into_iter()
                .map(Some)
                .collect()
        }
        None => vec![scope],
    };
    let found = eval_steps(doc, &expr.steps, contexts);
    Ok(sorted(found.into_iter().flatten().collect(), &order))
}

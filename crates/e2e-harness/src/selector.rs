// Selector - typed query descriptors behind every Locator
//
// A Selector is an ordered chain of steps. `Find` steps narrow the scope to
// descendants of the previous result, `Nth` picks one element by position, and
// `And`/`Or` combine the current result with a second selector evaluated from
// the document root.
//
// Selectors render to Playwright's engine syntax for the remote backend and
// are matched directly by the in-memory backend.

use crate::error::{Error, Result};
use std::fmt;

/// How a single step finds elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// CSS selector, e.g. `#todo-input` or `ul > li.completed`
    Css(String),
    /// XPath expression, e.g. `//div[@id='hidden-element']/p`
    XPath(String),
    /// ARIA role plus optional accessible name
    Role {
        role: String,
        name: Option<String>,
        exact: bool,
    },
    /// `data-testid` attribute value
    TestId(String),
    /// Visible text. Exact means full, case-sensitive match after whitespace
    /// normalization; otherwise a case-insensitive substring.
    Text { text: String, exact: bool },
}

impl Strategy {
    pub fn css(selector: impl Into<String>) -> Self {
        Strategy::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Strategy::XPath(expression.into())
    }

    pub fn test_id(id: impl Into<String>) -> Self {
        Strategy::TestId(id.into())
    }

    pub fn text(text: impl Into<String>, exact: bool) -> Self {
        Strategy::Text {
            text: text.into(),
            exact,
        }
    }

    pub fn role(role: impl Into<String>, name: Option<&str>) -> Self {
        Strategy::Role {
            role: role.into(),
            name: name.map(str::to_string),
            exact: false,
        }
    }

    /// Role lookup whose accessible name must equal `name` case-sensitively
    pub fn role_exact(role: impl Into<String>, name: impl Into<String>) -> Self {
        Strategy::Role {
            role: role.into(),
            name: Some(name.into()),
            exact: true,
        }
    }

    fn render(&self) -> String {
        match self {
            Strategy::Css(css) => format!("css={}", css),
            Strategy::XPath(xpath) => format!("xpath={}", xpath),
            Strategy::TestId(id) => {
                format!("internal:testid=[data-testid={}]", quote_exact(id, true))
            }
            Strategy::Text { text, exact } => format!("internal:text={}", quote_exact(text, *exact)),
            Strategy::Role { role, name, exact } => match name {
                Some(name) => format!("internal:role={}[name={}]", role, quote_exact(name, *exact)),
                None => format!("internal:role={}", role),
            },
        }
    }
}

/// One link in a selector chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Find(Strategy),
    /// Zero-based pick; negative counts from the end (`-1` is last)
    Nth(i32),
    And(Selector),
    Or(Selector),
}

/// Ordered chain of [`Step`]s
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selector {
    steps: Vec<Step>,
}

impl Selector {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            steps: vec![Step::Find(strategy)],
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns a copy of this selector with `step` appended
    pub fn then(&self, step: Step) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// Returns `child`'s steps evaluated inside this selector's result
    pub fn scoped(&self, child: &Selector) -> Self {
        let mut steps = self.steps.clone();
        steps.extend(child.steps.iter().cloned());
        Self { steps }
    }

    /// Parses a user selector string.
    ///
    /// Accepts `css=`, `xpath=`, `text=`, `data-testid=` and `nth=` engine
    /// prefixes, `>>` chains, bare XPath starting with `/` or `(`, and quoted
    /// strings as exact text. Anything else is CSS.
    pub fn parse(input: &str) -> Result<Self> {
        let mut steps = Vec::new();
        for part in split_chain(input) {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::InvalidInput(format!("empty selector in '{}'", input)));
            }
            steps.push(parse_step(part)?);
        }
        if steps.is_empty() {
            return Err(Error::InvalidInput("empty selector".to_string()));
        }
        Ok(Self { steps })
    }

    /// Playwright engine syntax, e.g. `css=ul >> internal:text="Cherry"s >> nth=0`
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(|step| match step {
                Step::Find(strategy) => strategy.render(),
                Step::Nth(index) => format!("nth={}", index),
                Step::And(other) => format!("internal:and={}", json_string(&other.render())),
                Step::Or(other) => format!("internal:or={}", json_string(&other.render())),
            })
            .collect::<Vec<_>>()
            .join(" >> ")
    }
}

impl From<Strategy> for Selector {
    fn from(strategy: Strategy) -> Self {
        Selector::new(strategy)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Css(css) => f.write_str(css),
            Strategy::XPath(xpath) => write!(f, "xpath={}", xpath),
            Strategy::TestId(id) => write!(f, "test-id={:?}", id),
            Strategy::Text { text, exact: true } => write!(f, "text={:?}", text),
            Strategy::Text { text, exact: false } => write!(f, "text={}", text),
            Strategy::Role {
                role,
                name: Some(name),
                ..
            } => write!(f, "role={}[name={:?}]", role, name),
            Strategy::Role { role, name: None, .. } => write!(f, "role={}", role),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" >> ")?;
            }
            match step {
                Step::Find(strategy) => write!(f, "{}", strategy)?,
                Step::Nth(index) => write!(f, "nth={}", index)?,
                Step::And(other) => write!(f, "and({})", other)?,
                Step::Or(other) => write!(f, "or({})", other)?,
            }
        }
        Ok(())
    }
}

fn parse_step(part: &str) -> Result<Step> {
    if let Some(rest) = part.strip_prefix("css=") {
        return Ok(Step::Find(Strategy::css(rest.trim())));
    }
    if let Some(rest) = part.strip_prefix("xpath=") {
        return Ok(Step::Find(Strategy::xpath(rest.trim())));
    }
    if let Some(rest) = part.strip_prefix("text=") {
        return Ok(Step::Find(parse_text(rest.trim())));
    }
    if let Some(rest) = part.strip_prefix("data-testid=") {
        return Ok(Step::Find(Strategy::test_id(unquote(rest.trim()).unwrap_or(rest.trim()))));
    }
    if let Some(rest) = part.strip_prefix("nth=") {
        let index = rest
            .trim()
            .parse::<i32>()
            .map_err(|_| Error::InvalidInput(format!("invalid nth index '{}'", rest)))?;
        return Ok(Step::Nth(index));
    }
    if part.starts_with('/') || part.starts_with("(/") || part.starts_with("..") {
        return Ok(Step::Find(Strategy::xpath(part)));
    }
    if part.starts_with('"') || part.starts_with('\'') {
        return Ok(Step::Find(parse_text(part)));
    }
    Ok(Step::Find(Strategy::css(part)))
}

fn parse_text(body: &str) -> Strategy {
    match unquote(body) {
        Some(inner) => Strategy::text(inner, true),
        None => Strategy::text(body, false),
    }
}

fn unquote(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return Some(&s[1..s.len() - 1]);
        }
    }
    None
}

/// Splits on `>>` outside of quotes and brackets
fn split_chain(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match quote {
            Some(_) if c == '\\' => {
                chars.next();
            }
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '[' | '(' => depth += 1,
                ']' | ')' => depth = depth.saturating_sub(1),
                '>' if depth == 0 && matches!(chars.peek(), Some((_, '>'))) => {
                    parts.push(&input[start..i]);
                    chars.next();
                    start = i + 2;
                }
                _ => {}
            },
        }
    }
    parts.push(&input[start..]);
    parts
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn quote_exact(value: &str, exact: bool) -> String {
    format!("{}{}", json_string(value), if exact { "s" } else { "i" })
}

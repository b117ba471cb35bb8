//! Simplified ICU MessageFormat.
//!
//! Supports `{var}` interpolation, `plural` with exact `=N` clauses and
//! `other`, `select`, and arbitrary nesting. CLDR plural categories
//! (`one`, `few`, ...) are parsed but never selected.
//!
//! Formatting never fails: a template that does not parse still gets its
//! plain `{name}` placeholders substituted and is otherwise returned verbatim.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

const MAX_DEPTH: usize = 16;

/// A value that can be interpolated into a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageValue {
    /// `true` / `false`
    Bool(bool),
    /// Any numeric value; integral values render without a decimal point
    Number(f64),
    /// Free text
    Text(String),
}

impl MessageValue {
    /// Numeric view used by `plural`; numeric strings count as numbers
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for MessageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            #[allow(clippy::cast_possible_truncation)]
            Self::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for MessageValue {
                #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
                fn from(value: $ty) -> Self {
                    Self::Number(value as f64)
                }
            }
        )*
    };
}

impl_from_number!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

impl From<bool> for MessageValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for MessageValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MessageValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Named values for one `format` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageArgs(HashMap<String, MessageValue>);

impl MessageArgs {
    /// Empty argument set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<MessageValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or replace a value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<MessageValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Look up a value
    pub fn get(&self, name: &str) -> Option<&MessageValue> {
        self.0.get(name)
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no values are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for MessageArgs
where
    K: Into<String>,
    V: Into<MessageValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Build [`MessageArgs`] inline: `message_args!{"name" => "John", "count" => 3}`.
#[macro_export]
macro_rules! message_args {
    () => {
        $crate::icu::MessageArgs::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut args = $crate::icu::MessageArgs::new();
        $(
            args.set($key, $value);
        )+
        args
    }};
}

/// Why a template could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input ended inside a placeholder or clause
    #[error("unexpected end of template")]
    UnexpectedEnd,
    /// A `}` with no matching `{`
    #[error("unbalanced '}}' at byte {pos}")]
    Unbalanced {
        /// Byte offset
        pos: usize,
    },
    /// A specific character was required
    #[error("expected '{expected}' at byte {pos}")]
    Expected {
        /// Required character
        expected: char,
        /// Byte offset
        pos: usize,
    },
    /// `{}` or `{, plural ...}`
    #[error("missing argument name at byte {pos}")]
    MissingArgument {
        /// Byte offset
        pos: usize,
    },
    /// `{n, }`
    #[error("missing argument type at byte {pos}")]
    MissingType {
        /// Byte offset
        pos: usize,
    },
    /// A clause selector such as `=x` that is not valid
    #[error("invalid selector '{selector}' at byte {pos}")]
    InvalidSelector {
        /// Selector text
        selector: String,
        /// Byte offset
        pos: usize,
    },
    /// Nesting beyond the supported depth
    #[error("placeholders nested deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq)]
enum PluralSelector<'a> {
    Exact(f64),
    Keyword(&'a str),
    Other,
}

#[derive(Debug, Clone, PartialEq)]
enum Node<'a> {
    Text(&'a str),
    Pound,
    Arg(&'a str),
    Plural {
        var: &'a str,
        offset: f64,
        clauses: Vec<(PluralSelector<'a>, Vec<Node<'a>>)>,
    },
    Select {
        var: &'a str,
        clauses: Vec<(&'a str, Vec<Node<'a>>)>,
    },
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    const fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(_) => Err(ParseError::Expected {
                expected,
                pos: self.pos,
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    fn parse_document(mut self) -> Result<Vec<Node<'a>>, ParseError> {
        self.parse_nodes(false, 0)
    }

    fn parse_nodes(&mut self, in_plural: bool, depth: usize) -> Result<Vec<Node<'a>>, ParseError> {
        if depth > MAX_DEPTH {
            return Err(ParseError::TooDeep);
        }

        let mut nodes = Vec::new();
        let mut text_start = self.pos;

        while let Some(c) = self.peek() {
            match c {
                '{' => {
                    push_text(&mut nodes, &self.src[text_start..self.pos]);
                    self.pos += 1;
                    let node = self.parse_placeholder(in_plural, depth)?;
                    nodes.push(node);
                    text_start = self.pos;
                }
                '}' if depth == 0 => return Err(ParseError::Unbalanced { pos: self.pos }),
                '}' => break,
                '#' if in_plural => {
                    push_text(&mut nodes, &self.src[text_start..self.pos]);
                    self.pos += 1;
                    nodes.push(Node::Pound);
                    text_start = self.pos;
                }
                _ => self.pos += c.len_utf8(),
            }
        }

        push_text(&mut nodes, &self.src[text_start..self.pos]);
        Ok(nodes)
    }

    /// Called just after the opening `{`.
    fn parse_placeholder(&mut self, in_plural: bool, depth: usize) -> Result<Node<'a>, ParseError> {
        self.skip_ws();
        let name_pos = self.pos;
        let name = self.take_while(|c| !c.is_whitespace() && !matches!(c, ',' | '{' | '}'));
        if name.is_empty() {
            return Err(ParseError::MissingArgument { pos: name_pos });
        }

        self.skip_ws();
        match self.bump() {
            Some('}') => Ok(Node::Arg(name)),
            Some(',') => {
                self.skip_ws();
                let type_pos = self.pos;
                let kind = self.take_while(|c| c.is_alphanumeric() || c == '_');
                self.skip_ws();
                match kind {
                    "plural" | "selectordinal" => {
                        self.eat(',')?;
                        self.parse_plural(name, depth)
                    }
                    "select" => {
                        self.eat(',')?;
                        self.parse_select(name, in_plural, depth)
                    }
                    "" => Err(ParseError::MissingType { pos: type_pos }),
                    // number, date, time and friends render the raw value
                    _ => {
                        self.skip_style()?;
                        Ok(Node::Arg(name))
                    }
                }
            }
            Some(_) => Err(ParseError::Expected {
                expected: '}',
                pos: name_pos + name.len(),
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    /// Skips an optional `, style` up to and including the closing brace.
    fn skip_style(&mut self) -> Result<(), ParseError> {
        let mut open = 0usize;
        while let Some(c) = self.bump() {
            match c {
                '{' => open += 1,
                '}' if open == 0 => return Ok(()),
                '}' => open -= 1,
                _ => {}
            }
        }
        Err(ParseError::UnexpectedEnd)
    }

    fn parse_plural(&mut self, var: &'a str, depth: usize) -> Result<Node<'a>, ParseError> {
        let mut offset = 0.0;
        let mut clauses = Vec::new();

        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                None => return Err(ParseError::UnexpectedEnd),
                Some(_) => {}
            }

            let token_pos = self.pos;
            let token = self.take_while(|c| !c.is_whitespace() && !matches!(c, '{' | '}'));
            let invalid = || ParseError::InvalidSelector {
                selector: token.to_string(),
                pos: token_pos,
            };

            if let Some(raw) = token.strip_prefix("offset:") {
                offset = raw.parse().map_err(|_| invalid())?;
                continue;
            }

            let selector = match token {
                "" => {
                    return Err(ParseError::Expected {
                        expected: '{',
                        pos: token_pos,
                    })
                }
                "other" => PluralSelector::Other,
                _ => match token.strip_prefix('=') {
                    Some(raw) => PluralSelector::Exact(raw.parse().map_err(|_| invalid())?),
                    None => PluralSelector::Keyword(token),
                },
            };

            self.skip_ws();
            self.eat('{')?;
            let body = self.parse_nodes(true, depth + 1)?;
            self.eat('}')?;
            clauses.push((selector, body));
        }

        Ok(Node::Plural {
            var,
            offset,
            clauses,
        })
    }

    fn parse_select(
        &mut self,
        var: &'a str,
        in_plural: bool,
        depth: usize,
    ) -> Result<Node<'a>, ParseError> {
        let mut clauses = Vec::new();

        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                None => return Err(ParseError::UnexpectedEnd),
                Some(_) => {}
            }

            let token_pos = self.pos;
            let token = self.take_while(|c| !c.is_whitespace() && !matches!(c, '{' | '}'));
            if token.is_empty() {
                return Err(ParseError::Expected {
                    expected: '{',
                    pos: token_pos,
                });
            }

            self.skip_ws();
            self.eat('{')?;
            let body = self.parse_nodes(in_plural, depth + 1)?;
            self.eat('}')?;
            clauses.push((token, body));
        }

        Ok(Node::Select { var, clauses })
    }
}

fn push_text<'a>(nodes: &mut Vec<Node<'a>>, text: &'a str) {
    if !text.is_empty() {
        nodes.push(Node::Text(text));
    }
}

fn render(nodes: &[Node<'_>], args: &MessageArgs, pound: Option<&str>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Pound => out.push_str(pound.unwrap_or("#")),
            Node::Arg(name) => {
                if let Some(value) = args.get(name) {
                    out.push_str(&value.to_string());
                }
            }
            Node::Plural {
                var,
                offset,
                clauses,
            } => {
                let value = args.get(var);
                let number = value.and_then(MessageValue::as_number);

                let exact = number.and_then(|n| {
                    clauses.iter().find(|(selector, _)| {
                        matches!(selector, PluralSelector::Exact(x) if (*x - n).abs() < f64::EPSILON)
                    })
                });
                let chosen = exact.or_else(|| {
                    clauses
                        .iter()
                        .find(|(selector, _)| *selector == PluralSelector::Other)
                });

                if let Some((_, body)) = chosen {
                    let shown = number.map_or_else(
                        || value.map(ToString::to_string).unwrap_or_default(),
                        |n| MessageValue::Number(n - offset).to_string(),
                    );
                    render(body, args, Some(&shown), out);
                }
            }
            Node::Select { var, clauses } => {
                let key = args.get(var).map(ToString::to_string);
                let chosen = key
                    .as_deref()
                    .and_then(|key| clauses.iter().find(|(selector, _)| *selector == key))
                    .or_else(|| clauses.iter().find(|(selector, _)| *selector == "other"));

                if let Some((_, body)) = chosen {
                    render(body, args, pound, out);
                }
            }
        }
    }
}

/// Substitutes `{identifier}` placeholders, unresolved ones with nothing,
/// and leaves everything else untouched.
fn interpolate_plain(template: &str, args: &MessageArgs) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after
            .find(['{', '}'])
            .filter(|&end| after[end..].starts_with('}'))
            .and_then(|end| {
                let name = after[..end].trim();
                is_identifier(name).then(|| (end, args.get(name)))
            });

        match value {
            Some((end, value)) => {
                if let Some(value) = value {
                    out.push_str(&value.to_string());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Checks a template without formatting it.
pub fn validate(template: &str) -> Result<(), ParseError> {
    Parser::new(template).parse_document().map(|_| ())
}

/// Formats `template` with `args`.
///
/// Unresolved variables become empty strings. Malformed templates fall back
/// to plain `{name}` substitution; this function never panics.
pub fn format(template: &str, args: &MessageArgs) -> String {
    if !template.contains('{') {
        return template.to_string();
    }

    match Parser::new(template).parse_document() {
        Ok(nodes) => {
            let mut out = String::with_capacity(template.len());
            render(&nodes, args, None, &mut out);
            out
        }
        Err(error) => {
            debug!(%error, "Template did not parse, using plain interpolation");
            interpolate_plain(template, args)
        }
    }
}

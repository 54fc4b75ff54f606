//! CSS-like selector parsing.
//!
//! Supports the subset the augmentation features actually use: compound
//! simple selectors (`tag`, `#id`, `.class`, `[attr]`, `[attr=value]`) joined
//! by the descendant combinator (whitespace). Selectors are parsed once into
//! a [`Selector`] value and matched structurally by the document.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Errors from [`Selector::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("invalid selector {selector:?} at offset {offset}")]
    InvalidToken { selector: String, offset: usize },
}

/// One attribute predicate: `[name]` or `[name=value]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttrPredicate {
    pub(crate) name: String,
    pub(crate) value: Option<String>,
}

/// One compound simple selector, e.g. `div.feed-item[data-kind=short]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct SimpleSelector {
    pub(crate) tag: Option<String>,
    pub(crate) id: Option<String>,
    pub(crate) classes: Vec<String>,
    pub(crate) attrs: Vec<AttrPredicate>,
}

impl SimpleSelector {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attrs.is_empty()
    }
}

impl fmt::Display for SimpleSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tag) = &self.tag {
            write!(f, "{tag}")?;
        }
        if let Some(id) = &self.id {
            write!(f, "#{id}")?;
        }
        for class in &self.classes {
            write!(f, ".{class}")?;
        }
        for attr in &self.attrs {
            match &attr.value {
                Some(value) => write!(f, "[{}={}]", attr.name, value)?,
                None => write!(f, "[{}]", attr.name)?,
            }
        }
        Ok(())
    }
}

/// A parsed selector: a descendant chain of compound simple selectors.
///
/// The last part matches the target node; every earlier part must match some
/// ancestor, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    parts: Vec<SimpleSelector>,
    source: String,
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(
            r"^(?:([a-zA-Z][a-zA-Z0-9_-]*)|#([a-zA-Z0-9_-]+)|\.([a-zA-Z0-9_-]+)|\[([a-zA-Z][a-zA-Z0-9_-]*)(?:=([^\]]*))?\])",
        )
        .expect("Invalid selector token regex")
    })
}

impl Selector {
    /// Parse a selector string.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut parts = Vec::new();
        let mut cursor = 0;
        for compound in trimmed.split_whitespace() {
            // everything between compounds is whitespace, so the next
            // occurrence of the token is the token itself
            let start = trimmed[cursor..]
                .find(compound)
                .map_or(cursor, |found| cursor + found);
            parts.push(Self::parse_compound(trimmed, start, compound)?);
            cursor = start + compound.len();
        }

        Ok(Self {
            parts,
            source: trimmed.to_string(),
        })
    }

    fn parse_compound(
        full: &str,
        base: usize,
        compound: &str,
    ) -> Result<SimpleSelector, SelectorError> {
        let mut simple = SimpleSelector::default();
        let mut rest = compound;

        while !rest.is_empty() {
            let Some(caps) = token_regex().captures(rest) else {
                let offset = base + (compound.len() - rest.len());
                return Err(SelectorError::InvalidToken {
                    selector: full.to_string(),
                    offset,
                });
            };

            // A bare tag token is only legal as the first token of a compound
            if let Some(tag) = caps.get(1) {
                if !simple.is_empty() {
                    let offset = base + (compound.len() - rest.len());
                    return Err(SelectorError::InvalidToken {
                        selector: full.to_string(),
                        offset,
                    });
                }
                simple.tag = Some(tag.as_str().to_string());
            } else if let Some(id) = caps.get(2) {
                simple.id = Some(id.as_str().to_string());
            } else if let Some(class) = caps.get(3) {
                simple.classes.push(class.as_str().to_string());
            } else if let Some(attr) = caps.get(4) {
                simple.attrs.push(AttrPredicate {
                    name: attr.as_str().to_string(),
                    value: caps.get(5).map(|v| v.as_str().to_string()),
                });
            }

            rest = &rest[caps.get(0).map(|m| m.end()).unwrap_or(rest.len())..];
        }

        if simple.is_empty() {
            return Err(SelectorError::Empty);
        }
        Ok(simple)
    }

    pub(crate) fn parts(&self) -> &[SimpleSelector] {
        &self.parts
    }

    /// The original (trimmed) selector text.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.parts {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

//! Selector parsing
//!
//! The webhook accepts exactly one selector shape: a descendant-prefixed
//! field chain such as `..metadata.annotations`. No wildcards, filters,
//! indices or ranges. Parsing is deliberately rigid so the accepted dialect
//! cannot grow by accident.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static STARTS_WITH_RECURSIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.\.\S+$").expect("selector regex is valid"));

/// A parsed descendant selector: an ordered, non-empty field chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// Field names in order, e.g. `["metadata", "annotations"]`
    pub fields: Vec<String>,
    /// Always true in the accepted dialect; every selector starts with `..`
    pub recursive: bool,
}

impl Selector {
    /// Parse a selector from its textual form
    ///
    /// Accepts the bare form (`..a.b`) as found in config files as well as
    /// the brace-wrapped form (`{..a.b}`). Anything that does not start
    /// with exactly two dots followed by a whitespace-free field chain is
    /// rejected.
    pub fn parse(text: &str) -> Result<Self> {
        let inner = text
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .unwrap_or(text);

        if !STARTS_WITH_RECURSIVE.is_match(inner) {
            return Err(Error::selector(text, "must start with recursive `..`"));
        }

        let mut fields = Vec::new();
        for component in inner[2..].split('.') {
            if component.is_empty() {
                return Err(Error::selector(text, "empty field in selector"));
            }
            fields.push(component.to_string());
        }

        Ok(Self {
            fields,
            recursive: true,
        })
    }
}

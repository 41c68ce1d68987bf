//! Recursive path discovery
//!
//! Given a decoded JSON document and a parsed [`Selector`], enumerate every
//! concrete root-relative location whose trailing segments equal the
//! selector's field chain. Traversal is depth-first pre-order and matches
//! on visit: once a location matches, the engine records it and does not
//! descend further into that subtree.
//!
//! Discovered locations are returned as JSON Pointers, so keys containing
//! `/` or `~` render escaped and the resulting patch paths are valid
//! RFC 6901.

use jsonptr::{PointerBuf, Token};
use serde_json::Value;

use crate::selector::Selector;

/// Enumerate every location in `doc` whose path ends with the selector's
/// field chain
///
/// Mapping children contribute their key as a segment; sequence children
/// contribute their decimal index. Scalars and nulls are leaves. A selector
/// deeper than the document, or a scalar document, yields no results; that
/// is not an error.
pub fn find_paths(doc: &Value, selector: &Selector) -> Vec<PointerBuf> {
    let mut found = Vec::new();
    let mut path_so_far = Vec::new();
    walk(doc, selector, &mut path_so_far, &mut found);
    found
}

fn walk(
    node: &Value,
    selector: &Selector,
    path_so_far: &mut Vec<String>,
    found: &mut Vec<PointerBuf>,
) {
    if tail_matches(path_so_far, &selector.fields) {
        found.push(PointerBuf::from_tokens(
            path_so_far.iter().map(|s| Token::from(s.as_str())),
        ));
        return;
    }
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                path_so_far.push(key.clone());
                walk(child, selector, path_so_far, found);
                path_so_far.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path_so_far.push(index.to_string());
                walk(child, selector, path_so_far, found);
                path_so_far.pop();
            }
        }
        // scalars and null are leaves
        _ => {}
    }
}

fn tail_matches(path_so_far: &[String], fields: &[String]) -> bool {
    if fields.is_empty() || path_so_far.len() < fields.len() {
        return false;
    }
    path_so_far
        .iter()
        .rev()
        .zip(fields.iter().rev())
        .all(|(segment, field)| segment == field)
}

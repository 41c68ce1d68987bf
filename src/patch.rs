//! Patch construction
//!
//! Turns the configured selectors for a resource kind into a JSON Patch of
//! `add` operations carrying the requesting username. `add` replaces the
//! member when it already exists, so repeated admission of the same object
//! converges instead of accumulating.

use json_patch::{AddOperation, PatchOperation};
use jsonptr::Token;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::paths::find_paths;
use crate::selector::Selector;

/// Build the JSON Patch for one admitted object
///
/// Resolves the config entry for `resource` (falling back to `alltypes`),
/// applies the never-overwrite account filter, and emits one `add` per
/// location discovered by each configured selector, at
/// `<location>/<annotation_key>` with `username` as the value.
///
/// A selector that matches nothing contributes no operations; a selector
/// that fails to parse aborts the whole patch.
pub fn build_patch(
    username: &str,
    resource: &str,
    doc: &Value,
    config: &Config,
    annotation_key: &str,
) -> Result<Vec<PatchOperation>> {
    let mut patch = Vec::new();

    let Some(entry) = config.entry_for(resource) else {
        debug!(resource = %resource, "no config entry or alltypes fallback, emitting empty patch");
        return Ok(patch);
    };

    for pattern in &entry.never_overwrite_accounts {
        match Regex::new(pattern) {
            Ok(rx) if rx.is_match(username) => {
                info!(
                    username = %username,
                    pattern = %pattern,
                    "username matches neverOverwriteAccounts, skipping decoration"
                );
                return Ok(patch);
            }
            Ok(_) => {
                debug!(username = %username, pattern = %pattern, "neverOverwriteAccounts pattern does not match");
            }
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "invalid neverOverwriteAccounts regex, treating as non-matching");
            }
        }
    }

    for raw_selector in &entry.paths {
        let selector = Selector::parse(raw_selector)?;
        for mut path in find_paths(doc, &selector) {
            path.push_back(Token::from(annotation_key));
            patch.push(PatchOperation::Add(AddOperation {
                path,
                value: Value::String(username.to_string()),
            }));
        }
    }

    Ok(patch)
}

//! Decoration config
//!
//! Maps a resource kind (the `resource` field of the admission request, e.g.
//! `tfjobs` or `pods`) to the selectors to decorate and the accounts that
//! must never be overwritten. Loaded once at startup from a YAML file and
//! immutable for the process lifetime.
//!
//! ```yaml
//! configs:
//!   alltypes:
//!     paths: ["..metadata.annotations"]
//!     neverOverwriteAccounts: ["system:serviceaccount:\\S+"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ALL_TYPES;

/// Per-kind decoration entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct KindEntry {
    /// Descendant selectors resolved against the admitted object
    #[serde(default)]
    pub paths: Vec<String>,

    /// Regex patterns matched against the requesting username; a match
    /// suppresses decoration for the whole request
    #[serde(default)]
    pub never_overwrite_accounts: Vec<String>,
}

/// The full decoration config, keyed by resource kind
///
/// The reserved key `alltypes` is the fallback for kinds with no explicit
/// entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Resource kind (or `alltypes`) to entry
    #[serde(default)]
    pub configs: BTreeMap<String, KindEntry>,
}

impl Config {
    /// Load the config from a YAML file, rejecting unknown keys
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::config_for(path.display().to_string(), e.to_string()))?;
        Self::from_yaml(&data)
            .map_err(|e| Error::config_for(path.display().to_string(), e.to_string()))
    }

    /// Decode the config from YAML text
    pub fn from_yaml(data: &str) -> Result<Self> {
        serde_yaml::from_str(data).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Resolve the entry for a resource kind, falling back to `alltypes`
    ///
    /// Returns `None` when neither the kind nor `alltypes` is configured;
    /// the patch builder then emits the empty patch.
    pub fn entry_for(&self, resource: &str) -> Option<&KindEntry> {
        self.configs
            .get(resource)
            .or_else(|| self.configs.get(ALL_TYPES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
configs:
  alltypes:
    paths: ["..metadata.annotations"]
    neverOverwriteAccounts: ["system:serviceaccount:\\S+"]
  tfjobs:
    paths: ["..template"]
"#;

    #[test]
    fn decodes_sample_config() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.configs.len(), 2);
        let tfjobs = &config.configs["tfjobs"];
        assert_eq!(tfjobs.paths, vec!["..template"]);
        assert!(tfjobs.never_overwrite_accounts.is_empty());
        let alltypes = &config.configs["alltypes"];
        assert_eq!(
            alltypes.never_overwrite_accounts,
            vec![r"system:serviceaccount:\S+"]
        );
    }

    #[test]
    fn explicit_entry_wins_over_alltypes() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let entry = config.entry_for("tfjobs").unwrap();
        assert_eq!(entry.paths, vec!["..template"]);
    }

    #[test]
    fn unknown_kind_falls_back_to_alltypes() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let entry = config.entry_for("deployments").unwrap();
        assert_eq!(entry.paths, vec!["..metadata.annotations"]);
    }

    #[test]
    fn missing_kind_and_fallback_resolves_to_nothing() {
        let config = Config::from_yaml("configs:\n  pods:\n    paths: []\n").unwrap();
        assert!(config.entry_for("deployments").is_none());
    }

    /// Strict decode: a typo like `path:` instead of `paths:` must fail
    /// loudly instead of silently decorating nothing.
    #[test]
    fn unknown_keys_are_rejected() {
        let bad = "configs:\n  pods:\n    path: [\"..metadata\"]\n";
        assert!(Config::from_yaml(bad).is_err());

        let bad_top = "config:\n  pods:\n    paths: []\n";
        assert!(Config::from_yaml(bad_top).is_err());
    }

    #[test]
    fn empty_document_yields_empty_config() {
        let config = Config::from_yaml("configs: {}").unwrap();
        assert!(config.configs.is_empty());
        assert!(config.entry_for("pods").is_none());
    }
}

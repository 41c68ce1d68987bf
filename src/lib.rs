//! Kubernetes mutating admission webhook that decorates admitted objects
//! with the identity of the submitter.
//!
//! For every admitted object the webhook resolves a set of configured
//! descendant selectors (e.g. `..metadata.annotations`) against the object
//! tree and returns a JSON Patch that inserts the requesting username under
//! each discovered location.

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod patch;
pub mod paths;
pub mod selector;
pub mod webhook;

pub use error::{Error, Result};

/// Annotation key appended to every discovered path unless overridden
/// with `--username-annotation-key`.
pub const USER_ANNOTATION: &str = "iddecorator.username";

/// Reserved configuration key used as the fallback entry when a request's
/// resource kind has no explicit entry.
pub const ALL_TYPES: &str = "alltypes";

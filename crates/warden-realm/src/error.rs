// error.rs — Error types for confinement environments.
//
// Two families live here. `ConstructionError`, `RealmError`, `ShimError` and
// `PolicyViolationError` are host-side failures of the engine itself.
// `BoundaryError` is the sanitized form of a failure raised by confined code:
// plain data, always built fresh on the host side.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_policy::ShimKind;

use crate::realm::Lifecycle;

/// Message carried by every opaque boundary error.
pub const OPAQUE_MESSAGE: &str = "unknown error";

/// The closed set of standard error kinds. Unrecognized names map to
/// [`ErrorKind::Error`], the generic kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Error,
    EvalError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    #[serde(rename = "URIError")]
    UriError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Error,
        ErrorKind::EvalError,
        ErrorKind::RangeError,
        ErrorKind::ReferenceError,
        ErrorKind::SyntaxError,
        ErrorKind::TypeError,
        ErrorKind::UriError,
    ];

    /// The constructor name confined code sees.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::UriError => "URIError",
        }
    }

    /// Map an error name onto the closed set; anything else is generic.
    pub fn from_name(name: &str) -> ErrorKind {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .unwrap_or(ErrorKind::Error)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A sanitized failure that crossed out of a confined environment.
///
/// Only primitive-coerced strings are stored; nothing here refers back into
/// the environment that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryError {
    pub kind: ErrorKind,
    pub message: String,
    /// Opaque trace text; empty when diagnostics are tamed.
    pub trace: String,
    /// Set when the raw error's own fields could not be read safely.
    #[serde(default)]
    pub opaque: bool,
}

impl BoundaryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: trace.into(),
            opaque: false,
        }
    }

    /// The fallback used when a raw error is hostile.
    pub fn opaque() -> Self {
        Self {
            kind: ErrorKind::Error,
            message: OPAQUE_MESSAGE.to_string(),
            trace: String::new(),
            opaque: true,
        }
    }

    pub fn is_opaque(&self) -> bool {
        self.opaque
    }
}

impl fmt::Display for BoundaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for BoundaryError {}

/// A taming shim could not be applied.
#[derive(Debug, Error)]
pub enum ShimError {
    /// The capability the shim rewrites is missing from this environment.
    #[error("{shim} shim unsupported: capability '{capability}' is not present")]
    Unsupported {
        shim: ShimKind,
        capability: &'static str,
    },

    /// The environment was in the wrong state for shimming.
    #[error(transparent)]
    Realm(#[from] RealmError),
}

/// Structural misuse of an environment under construction.
#[derive(Debug, Error)]
pub enum RealmError {
    /// A lifecycle transition was skipped or reordered.
    #[error("invalid lifecycle transition from {from} to {to}")]
    Lifecycle { from: Lifecycle, to: Lifecycle },

    /// A structural mutation was attempted after sealing.
    #[error("cannot {operation}: environment is sealed")]
    Sealed { operation: &'static str },

    /// A binding name was empty or already taken by the environment.
    #[error("cannot define global '{name}': {reason}")]
    InvalidBinding { name: String, reason: String },
}

/// Building an environment failed; no environment exists.
#[derive(Debug, Error)]
pub enum ConstructionError {
    /// A shim could not apply.
    #[error("shim failed: {0}")]
    Shim(#[from] ShimError),

    /// The bootstrap program raised an error.
    #[error("bootstrap evaluation failed: {0}")]
    Bootstrap(BoundaryError),

    /// The bootstrap program completed with something other than a table of
    /// bindings.
    #[error("bootstrap produced no bindings: {0}")]
    BootstrapShape(String),

    /// A lifecycle step was misordered.
    #[error(transparent)]
    Realm(#[from] RealmError),
}

/// A sealed environment exposes a path its policy does not license.
///
/// Never expected under correct pruning; raised by audits.
#[derive(Debug, Error)]
#[error("{} unlicensed path(s) reachable, e.g. '{}'", .paths.len(), .paths.first().map(String::as_str).unwrap_or("?"))]
pub struct PolicyViolationError {
    pub paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_names() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_name(kind.name()), kind);
        }
        assert_eq!(ErrorKind::from_name("URIError"), ErrorKind::UriError);
        assert_eq!(ErrorKind::from_name("HostileError"), ErrorKind::Error);
        assert_eq!(ErrorKind::from_name(""), ErrorKind::Error);
    }

    #[test]
    fn opaque_error_shape() {
        let err = BoundaryError::opaque();
        assert!(err.is_opaque());
        assert_eq!(err.message, OPAQUE_MESSAGE);
        assert_eq!(err.kind, ErrorKind::Error);
        assert!(err.trace.is_empty());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = BoundaryError::new(ErrorKind::TypeError, "bad", "");
        assert_eq!(err.to_string(), "TypeError: bad");
        let bare = BoundaryError::new(ErrorKind::RangeError, "", "");
        assert_eq!(bare.to_string(), "RangeError");
    }

    #[test]
    fn boundary_error_serializes_as_plain_data() {
        let err = BoundaryError::new(ErrorKind::UriError, "malformed", "at <program>");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "URIError");
        assert_eq!(json["message"], "malformed");
        assert_eq!(json["opaque"], false);
    }
}

//! # warden-policy
//!
//! Capability policies and construction options for Warden confinement
//! environments.
//!
//! A [`CapabilityPolicy`] is the static, versioned table of ambient bindings
//! allowed to survive into a confined environment. [`resolve`] combines it
//! with [`ConfinementOptions`] into an [`EffectivePolicy`]: a private,
//! possibly widened copy plus the list of taming shims to apply.
//!
//! ## Key invariants
//!
//! - **Default deny**: a binding the policy does not name is pruned.
//! - **Snapshot per construction**: resolution never mutates the base policy.
//! - **Forward compatible**: unknown options are ignored, not rejected.

pub mod capability;
pub mod config;
pub mod error;
pub mod options;
pub mod resolve;

pub use capability::{CapabilityPolicy, PolicyNode};
pub use config::{PolicySource, WardenConfig};
pub use error::PolicyError;
pub use options::{CapabilityMode, ConfinementOptions, ShimKind};
pub use resolve::{resolve, EffectivePolicy, DIAGNOSTIC_HOOKS};

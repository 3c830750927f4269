//! # warden-realm
//!
//! Confinement environments: isolated execution contexts whose ambient
//! capability graph has been tamed, pruned to a policy, and sealed.
//!
//! Build one with [`EnvironmentBuilder`] from an
//! [`EffectivePolicy`](warden_policy::EffectivePolicy), then run code through
//! [`ConfinementEnvironment::evaluate`]. Failures raised by confined code come
//! back as [`BoundaryError`] values: plain data, never a reference into the
//! environment.
//!
//! ```no_run
//! use warden_realm::{confine, Endowments};
//! use warden_policy::{resolve, CapabilityPolicy, ConfinementOptions};
//!
//! let policy = CapabilityPolicy::default_policy().unwrap();
//! let env = confine(&resolve(&ConfinementOptions::default(), &policy)).unwrap();
//! let out = env.evaluate("x * 2", &Endowments::new().with("x", 21.0)).unwrap();
//! assert_eq!(out.as_f64(), Some(42.0));
//! ```
//!
//! ## Key invariants
//!
//! - **Prune before seal**: the lifecycle is `Building → ShimsApplied →
//!   BootstrapEvaluated → Pruned → Sealed`, strictly in order.
//! - **Sealed means immutable**: the sealed graph lives in a read-only arena;
//!   every evaluation writes to a private overlay that is discarded after the
//!   call.
//! - **Endowments are per call**: they are visible to one evaluation only.
//! - **Errors are copied, never shared**: boundary errors hold only strings.

pub mod audit;
pub mod builder;
pub mod error;
pub mod gateway;
pub mod host;
mod interp;
mod intrinsics;
mod marshal;
pub mod natives;
pub mod prune;
pub mod realm;
pub mod seal;
pub mod shims;
pub mod syntax;
pub mod value;

pub use builder::EnvironmentBuilder;
pub use error::{
    BoundaryError, ConstructionError, ErrorKind, PolicyViolationError, RealmError, ShimError,
    OPAQUE_MESSAGE,
};
pub use gateway::ConfinementEnvironment;
pub use host::{BufferedOutput, Endowments, HostFunction, HostValue, OutputLevel, OutputSink, TracingOutput};
pub use prune::{prune, PruneReport};
pub use realm::{Lifecycle, Realm, BOOTSTRAP_SOURCE};
pub use seal::{seal, SealReport};
pub use shims::{shim_for, TamingShim};

/// Build a sealed environment with the default output sink.
pub fn confine(
    effective: &warden_policy::EffectivePolicy,
) -> Result<ConfinementEnvironment, ConstructionError> {
    EnvironmentBuilder::new(effective.clone()).build()
}

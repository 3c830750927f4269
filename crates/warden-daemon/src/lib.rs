//! # warden-daemon
//!
//! A small session daemon hosting Warden's capability protocol on a Unix
//! socket.
//!
//! Each accepted connection gets one session speaking newline-delimited
//! JSON. Sessions see two facets: a public facet with no operations and a
//! private facet whose only operation, `shutdown`, stops the accept loop.
//! When the loop stops, the listener closes and the socket file is removed.
//!
//! The confinement engine itself (`warden-realm`) does not depend on this
//! crate; the daemon is one possible host for it.

pub mod error;
pub mod protocol;
pub mod server;

pub use error::DaemonError;
pub use protocol::{dispatch, handle_line, Facet, Request, Response, ShutdownHandle};
pub use server::{Daemon, DaemonConfig};

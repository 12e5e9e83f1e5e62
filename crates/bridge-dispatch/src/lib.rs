//! Dispatch layer: ingress admission and worker pools, the pending-state
//! store, command/callback routing, and the progress reporter.

pub mod ingress;
pub mod pending;
pub mod progress;
pub mod router;

pub use ingress::{IngressConfig, IngressError, IngressPool, WorkItem};
pub use pending::PendingStore;
pub use progress::ProgressReporter;
pub use router::{dispatch_callback, dispatch_command, CallbackKind};

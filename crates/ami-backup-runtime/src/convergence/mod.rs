//! Waiting for asynchronous provider operations to converge.
//!
//! [`ConvergencePoller`] is the only retry loop in the workflow. The two
//! checks are probes over provider state plugged into it.

mod checks;
mod poller;

pub use checks::{ImageStateCheck, OvershootPolicy, SnapshotConvergenceCheck};
pub use poller::{ConvergencePoller, Probe};

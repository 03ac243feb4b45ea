//! vmpool-scaler — the control loops of the vmpool autoscaler.
//!
//! Five singleton loops share one scheduling skeleton ([`JobRunner`]) and
//! jointly drive the VM lifecycle:
//!
//! - [`Provisioner`] grows the scale set to pool capacity, partitions new
//!   VMs into warm and cold, and publishes gateway routes;
//! - [`Reconciler`] converges the state store onto the cloud inventory;
//! - [`Simulator`] drives synthetic `Available → Reserved` transitions;
//! - [`Starter`] boots reserved VMs and marks them `Unavailable`;
//! - [`Cleaner`] deletes consumed or aged-out VMs.
//!
//! The loops never talk to each other: coordination happens only through
//! the state store and the scale set, and every invariant is re-established
//! by re-running a loop, never by cross-loop locking.

pub mod cleaner;
pub mod provisioner;
pub mod reconciler;
pub mod schedule;
pub mod simulator;
pub mod starter;

pub use cleaner::Cleaner;
pub use provisioner::Provisioner;
pub use reconciler::Reconciler;
pub use schedule::{Job, JobRunner, JobTimings};
pub use simulator::Simulator;
pub use starter::Starter;

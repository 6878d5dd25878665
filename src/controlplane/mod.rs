//! Conversion Control Plane Module
//!
//! Everything that drives a conversion against the cluster: the condition
//! poller and its conditions, the copy launchers, the migration namespace,
//! the discovery of candidates and the orchestrating state machine.

pub mod conditions;
pub mod launchers;
pub mod namespace;
pub mod orchestrator;
pub mod picker;
pub mod poller;

pub use launchers::*;
pub use namespace::*;
pub use orchestrator::*;
pub use picker::*;
pub use poller::*;

//! Network reachability gate.
//!
//! A failed probe is remembered for a cool-down period during which the
//! gate answers "down" without probing again, bounding probe traffic
//! during an outage.

mod gate;
mod probe;

pub use gate::{ConnectivityGate, GateConfig, GateDecision};
pub use probe::{HttpProbe, Probe, ProbeFuture};

mod record;
mod registry;
#[cfg(test)]
mod registry_test;

pub use record::{ForwardTarget, ListenPort, PortType};
pub use registry::{PortChange, PortChangeKind, PortError, PortEvents, PortRegistry};

mod endpoint;
mod error;
mod hooks;
mod pump;
mod tunnel;

pub use endpoint::{EndpointPair, SinkStream, SourceStream};
pub use error::{HookError, RelayError};
pub use hooks::{Acceptance, PassthroughHooks, RelayHooks};
pub use pump::{Pump, PumpHandle, PumpSummary, PumpTimeouts, StopReason};
pub use tunnel::Tunnel;

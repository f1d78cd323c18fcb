//! STUN/TURN client plumbing: wire format, credentials and the allocation
//! state machine.

pub mod error;
pub mod stun;
pub mod turn;

pub use error::{AllocationError, NatError, NatResult};
pub use turn::{probe, AllocationResult, AllocationSession, AllocationState, TurnProbeConfig};

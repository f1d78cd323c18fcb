// src/nat/turn/mod.rs
//! TURN client side (RFC 5766): allocation over TCP and a single
//! CreatePermission.

pub mod allocation;
pub mod config;
pub mod probe;

pub use allocation::{
    Allocation, AllocationResult, AllocationSession, AllocationState, ProbeFailure, SessionAuth,
};
pub use config::{TurnProbeConfig, DEFAULT_TIMEOUT, DEFAULT_TURN_PORT};
pub use probe::probe;

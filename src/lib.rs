//! TURN allocation probe library (lib.rs)
//!
//! Speaks just enough STUN/TURN over TCP to learn whether a relay server
//! will hand out an allocation, with optional long-term credentials and a
//! follow-up CreatePermission.

#![warn(clippy::all)]

pub mod nat;

// Re-export main types
pub use nat::{
    probe,
    AllocationResult,
    AllocationSession,
    AllocationState,
    TurnProbeConfig,
};

// Re-export error types
pub use nat::error::{AllocationError, NatError, NatResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging system with custom configuration
///
/// `RUST_LOG` wins over `level` when set. Calling this twice is harmless.
///
/// # Arguments
/// * `level` - Log level (trace/debug/info/warn/error) or a full filter directive
///
/// # Example
/// ```
/// turn_probe::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Reduce verbosity of dependencies
    for directive in ["tokio=warn", "runtime=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(true),
        )
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging("debug");
        init_logging("not a [valid filter");
    }
}

//! # Utilities Module
//!
//! ## Role
//! Cross-cutting helpers that don't belong in domain-specific modules.
//!
//! ## Sub-modules
//! - `telemetry`: Atomic progress counters and the heartbeat thread
//! - `threading`: Rayon thread pool configuration
//! - `workspace`: Pre-allocated lane buffers for the decoding kernel

pub mod telemetry;
pub mod threading;
pub mod workspace;

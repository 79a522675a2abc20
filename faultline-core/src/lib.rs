//! Faultline Core - segment model and fault-injection effect chain
//!
//! This crate provides the building blocks for validating a reliable byte
//! stream transport built on an unreliable datagram channel: the fixed-size
//! segment model, the composable effects that observe, mutate, delay,
//! duplicate or drop segments, record/replay of segment traces, and the
//! byte-stream helpers scenarios use on top of a Transport Socket.

pub mod config;
pub mod effects;
pub mod errors;
pub mod io;
pub mod segment;
pub mod tracing_setup;
pub mod transport;

// Re-export main types for convenient access
pub use config::HarnessConfig;
pub use effects::{Activation, Effect, EffectStack, Handler, SegmentHandler};
pub use errors::{EffectError, FaultlineError, InvariantViolation, Result};
pub use io::{StreamReader, StreamWriter};
pub use segment::{Segment, SegmentHeader};
pub use transport::{
    ClientSocket, ServerSocket, SocketConfig, TransportError, TransportFactory, TransportSocket,
};

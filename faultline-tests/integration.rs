//! Integration tests for Faultline
//!
//! These tests fork real worker processes through the orchestrator and drive
//! the conformance suite against a stub transport. Tests that fork are
//! serialised so their workers never interleave.

#[path = "style.rs"]
mod style;

#[path = "integration/orchestrator_lifecycle.rs"]
mod orchestrator_lifecycle;

#[path = "integration/barrier_rendezvous.rs"]
mod barrier_rendezvous;

#[path = "integration/suite_runs.rs"]
mod suite_runs;

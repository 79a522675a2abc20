//! Faultline Harness - Isolated execution of transport fault scenarios
//!
//! Runs the roles of a scenario in forked worker processes under one
//! deadline, and ships the graded conformance suite plus the command-line
//! driver a transport implementation plugs its factory into.

pub mod driver;
pub mod orchestrator;
pub mod suite;

pub use driver::{Cli, main_with};
pub use orchestrator::{
    OrchestratorError, Role, RoleBarrier, RoleContext, RunReport, WorkerSettings, run_roles,
};
pub use suite::{Scenario, ScenarioContext, Suite};

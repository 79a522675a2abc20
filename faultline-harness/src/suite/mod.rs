//! Graded conformance suite for a transport implementation.
//!
//! Scenarios are numbered by difficulty from 00 to 99. Each pairs a client
//! role with a server role, installs effects on one or both lossy layers and
//! asserts on the byte stream the peer observes. Many come in a `shutdown`
//! form, where the client terminates the connection, and a `no_shutdown`
//! form, where both roles meet at a barrier instead.

mod scenarios;

use std::sync::Arc;
use std::time::Duration;

use faultline_core::config::{EffectDefaults, HarnessConfig};
use faultline_core::io::StreamWriter;
use faultline_core::transport::{SocketConfig, TransportFactory};

use crate::orchestrator::{OrchestratorError, Role, RunReport, WorkerSettings, run_roles};

/// Builds the roles of a scenario.
pub type BuildRoles<F> = fn(&ScenarioContext<F>) -> Result<Vec<Role>, OrchestratorError>;

/// What every scenario's roles are built from.
pub struct ScenarioContext<F> {
    /// Factory the roles create their sockets with
    pub factory: Arc<F>,
    /// Socket configuration with the worker overrides applied
    pub socket: SocketConfig,
    /// Writer honouring the configured send back-off
    pub writer: StreamWriter,
    /// Parameters of the installed effects
    pub effects: EffectDefaults,
}

impl<F> ScenarioContext<F> {
    /// Returns the socket configuration with a different window.
    pub fn with_window(&self, window: u8) -> SocketConfig {
        SocketConfig {
            window,
            ..self.socket
        }
    }
}

/// One numbered scenario of the suite.
pub struct Scenario<F> {
    /// Unique name, prefixed with the difficulty
    pub name: &'static str,
    /// Difficulty from 00 (basic framing) to 99
    pub difficulty: u8,
    /// Deadline, or `None` for the configured default
    pub timeout: Option<Duration>,
    build: BuildRoles<F>,
}

impl<F> Scenario<F> {
    fn new(
        name: &'static str,
        difficulty: u8,
        timeout: Option<Duration>,
        build: BuildRoles<F>,
    ) -> Self {
        Self {
            name,
            difficulty,
            timeout,
            build,
        }
    }
}

/// Ordered collection of scenarios bound to one transport.
pub struct Suite<F> {
    factory: Arc<F>,
    config: HarnessConfig,
    scenarios: Vec<Scenario<F>>,
}

impl<F: TransportFactory + 'static> Suite<F> {
    /// Creates the full suite for `factory`.
    pub fn new(factory: F, config: HarnessConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            config,
            scenarios: scenarios::all(),
        }
    }

    /// Returns every scenario in difficulty order.
    pub fn scenarios(&self) -> &[Scenario<F>] {
        &self.scenarios
    }

    /// Returns the scenarios whose name contains any of `filters`, or all of
    /// them when no filter is given.
    pub fn select<S: AsRef<str>>(&self, filters: &[S]) -> Vec<&Scenario<F>> {
        self.scenarios
            .iter()
            .filter(|scenario| {
                filters.is_empty()
                    || filters
                        .iter()
                        .any(|filter| scenario.name.contains(filter.as_ref()))
            })
            .collect()
    }

    /// Returns the deadline `scenario` runs under.
    pub fn timeout(&self, scenario: &Scenario<F>) -> Duration {
        scenario.timeout.unwrap_or(self.config.run.timeout)
    }

    /// Runs one scenario in fresh worker processes.
    ///
    /// # Errors
    ///
    /// - `OrchestratorError` - If setting up the roles fails, a role fails or the deadline passes
    pub fn run(
        &self,
        scenario: &Scenario<F>,
        settings: &WorkerSettings,
    ) -> Result<RunReport, OrchestratorError> {
        let ctx = ScenarioContext {
            factory: Arc::clone(&self.factory),
            socket: settings.apply(self.config.socket.socket_config()),
            writer: StreamWriter::with_backoff(self.config.run.send_backoff),
            effects: self.config.effects.clone(),
        };
        let roles = (scenario.build)(&ctx)?;
        tracing::info!(scenario = scenario.name, "starting scenario");
        run_roles(roles, self.timeout(scenario), settings)
    }
}

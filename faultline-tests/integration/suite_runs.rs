//! Suite selection and runs against a stub transport.

use bytes::Bytes;
use faultline_core::config::HarnessConfig;
use faultline_core::effects::{EffectStack, Probe};
use faultline_core::transport::{
    ClientSocket, ServerSocket, SocketConfig, TransportError, TransportFactory, TransportSocket,
};
use faultline_harness::orchestrator::{OrchestratorError, WorkerSettings};
use faultline_harness::suite::Suite;
use serial_test::serial;

/// Transport whose every operation is still unimplemented.
struct StubTransport;

struct StubSocket {
    config: SocketConfig,
    effects: EffectStack,
}

impl StubSocket {
    fn new(config: &SocketConfig) -> Self {
        let (probe, _log) = Probe::new();
        Self {
            config: *config,
            effects: EffectStack::new(Box::new(probe)),
        }
    }
}

impl TransportSocket for StubSocket {
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.config.not_implemented("send")?;
        Ok(data.len())
    }

    fn recv(&mut self) -> Result<Bytes, TransportError> {
        self.config.not_implemented("recv")?;
        Ok(Bytes::new())
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        self.config.not_implemented("shutdown")
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.config.not_implemented("close")
    }

    fn effects(&self) -> &EffectStack {
        &self.effects
    }
}

impl ClientSocket for StubSocket {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.config.not_implemented("connect")
    }
}

impl ServerSocket for StubSocket {
    fn accept(&mut self) -> Result<(), TransportError> {
        self.config.not_implemented("accept")
    }
}

impl TransportFactory for StubTransport {
    type Client = StubSocket;
    type Server = StubSocket;

    fn client(&self, config: &SocketConfig) -> Result<Self::Client, TransportError> {
        Ok(StubSocket::new(config))
    }

    fn server(&self, config: &SocketConfig) -> Result<Self::Server, TransportError> {
        Ok(StubSocket::new(config))
    }
}

fn suite() -> Suite<StubTransport> {
    Suite::new(StubTransport, HarnessConfig::default())
}

#[test]
fn test_scenarios_ordered_by_difficulty() {
    let suite = suite();
    let difficulties: Vec<u8> = suite.scenarios().iter().map(|s| s.difficulty).collect();
    let mut sorted = difficulties.clone();
    sorted.sort_unstable();
    assert_eq!(difficulties, sorted);
    assert_eq!(suite.scenarios()[0].name, "00_segment_length");
    assert!(difficulties.iter().all(|&d| d < 100));
}

#[test]
fn test_scenario_names_unique_and_prefixed() {
    let suite = suite();
    let mut names: Vec<&str> = suite.scenarios().iter().map(|s| s.name).collect();
    for scenario in suite.scenarios() {
        assert!(
            scenario.name.starts_with(&format!("{:02}_", scenario.difficulty)),
            "{} is not prefixed with its difficulty",
            scenario.name
        );
    }
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), suite.scenarios().len());
}

#[test]
fn test_select_without_filters_keeps_all() {
    let suite = suite();
    let none: &[&str] = &[];
    assert_eq!(suite.select(none).len(), suite.scenarios().len());
}

#[test]
fn test_select_by_substring() {
    let suite = suite();
    let names: Vec<&str> = suite
        .select(&["drop_every_other_ack", "90_"])
        .iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(
        names,
        [
            "70_drop_every_other_ack",
            "70_drop_every_other_ack_no_shutdown",
            "90_reconnect"
        ]
    );
    assert!(suite.select(&["no_such_scenario"]).is_empty());
}

#[test]
fn test_shutdown_variants_come_in_pairs() {
    let suite = suite();
    for scenario in suite.select(&["_no_shutdown"]) {
        let base = scenario.name.trim_end_matches("_no_shutdown");
        assert!(
            suite.scenarios().iter().any(|s| s.name == base),
            "{} has no shutdown counterpart",
            scenario.name
        );
    }
}

#[test]
fn test_timeout_falls_back_to_config() {
    let mut config = HarnessConfig::default();
    config.run.timeout = std::time::Duration::from_secs(7);
    let suite = Suite::new(StubTransport, config);

    let connect = suite.select(&["10_connect"])[0];
    assert_eq!(suite.timeout(connect), std::time::Duration::from_secs(7));
    let large = suite.select(&["40_large"])[0];
    assert_eq!(suite.timeout(large), std::time::Duration::from_secs(60));
}

#[test]
#[serial]
fn test_unimplemented_transport_fails_connect() {
    let suite = suite();
    let connect = suite.select(&["10_connect"])[0];

    let err = suite.run(connect, &WorkerSettings::default()).unwrap_err();

    assert!(
        matches!(err, OrchestratorError::RoleFailed { .. }),
        "expected a role failure, got {err:?}"
    );
}

#[test]
#[serial]
fn test_suppressed_not_implemented_lets_connect_pass() {
    let suite = suite();
    let connect = suite.select(&["10_connect"])[0];
    let settings = WorkerSettings {
        suppress_not_implemented: true,
        ..WorkerSettings::default()
    };

    let report = suite.run(connect, &settings).unwrap();

    assert_eq!(report.workers.len(), 2);
}

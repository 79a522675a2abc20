//! Lifecycle of forked workers: success, timeout, crash and cleanup.

use std::time::{Duration, Instant};

use faultline_core::effects::{EffectStack, Probe, SegmentLengthGuard};
use faultline_core::segment::Segment;
use faultline_harness::orchestrator::{
    OrchestratorError, Role, RoleContext, WorkerExit, WorkerRecord, WorkerSettings, run_roles,
};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serial_test::serial;

fn hang(_: &RoleContext) -> anyhow::Result<()> {
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}

fn assert_all_gone(workers: &[WorkerRecord]) {
    for worker in workers {
        assert!(
            kill(Pid::from_raw(worker.pid), None).is_err(),
            "worker {worker} is still alive"
        );
    }
}

#[test]
#[serial]
fn test_all_roles_complete() {
    let roles = vec![
        Role::new("a", |_: &RoleContext| Ok(())),
        Role::new("b", |_: &RoleContext| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        }),
    ];

    let report = run_roles(roles, Duration::from_secs(5), &WorkerSettings::default()).unwrap();

    let names: Vec<_> = report.workers.iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    assert!(report.workers.iter().all(|w| w.exit == WorkerExit::Code(0)));
    assert_all_gone(&report.workers);
}

#[test]
#[serial]
fn test_timeout_kills_outstanding_roles() {
    let roles = vec![
        Role::new("a", |_: &RoleContext| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        }),
        Role::new("b", hang),
    ];

    let started = Instant::now();
    let err = run_roles(roles, Duration::from_secs(1), &WorkerSettings::default()).unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    match &err {
        OrchestratorError::TimedOut {
            outstanding,
            timeout,
            ..
        } => {
            assert_eq!(outstanding, &["b".to_string()]);
            assert_eq!(*timeout, Duration::from_secs(1));
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(err.user_message().contains("T I M E O U T"));
    assert_eq!(err.workers()[0].exit, WorkerExit::Code(0));
    assert_eq!(err.workers()[1].exit, WorkerExit::Signaled("SIGKILL".to_string()));
    assert_all_gone(err.workers());
}

#[test]
#[serial]
fn test_monitor_violation_fails_role_and_kills_peer() {
    let roles = vec![
        Role::new("a", |_: &RoleContext| {
            let (probe, _log) = Probe::new();
            let stack = EffectStack::new(Box::new(probe));
            let guard = stack.activate(SegmentLengthGuard::new);
            stack.send_segment(Segment::from_bytes(vec![0u8; 12]))?;
            guard.deactivate()?;
            Ok(())
        }),
        Role::new("b", hang),
    ];

    let err = run_roles(roles, Duration::from_secs(5), &WorkerSettings::default()).unwrap_err();

    match &err {
        OrchestratorError::RoleFailed { role, .. } => assert_eq!(role, "a"),
        other => panic!("expected role a to fail, got {other:?}"),
    }
    assert!(!err.is_timeout());
    assert!(err.user_message().contains("C R A S H"));
    assert_eq!(err.workers()[0].exit, WorkerExit::Code(1));
    assert_eq!(err.workers()[1].exit, WorkerExit::Signaled("SIGKILL".to_string()));
    assert_all_gone(err.workers());
}

#[test]
#[serial]
fn test_panicking_role_fails_run() {
    let roles = vec![
        Role::new("calm", hang),
        Role::new("panicky", |_: &RoleContext| -> anyhow::Result<()> {
            panic!("role gave up");
        }),
    ];

    let err = run_roles(roles, Duration::from_secs(5), &WorkerSettings::default()).unwrap_err();

    match &err {
        OrchestratorError::RoleFailed { role, .. } => assert_eq!(role, "panicky"),
        other => panic!("expected the panicking role to fail, got {other:?}"),
    }
    assert_all_gone(err.workers());
}

#[test]
#[serial]
fn test_exit_without_report_is_vanished() {
    let roles = vec![Role::new("quitter", |_: &RoleContext| -> anyhow::Result<()> {
        std::process::exit(0);
    })];

    let err = run_roles(roles, Duration::from_secs(5), &WorkerSettings::default()).unwrap_err();

    match &err {
        OrchestratorError::RoleVanished { role, .. } => assert_eq!(role, "quitter"),
        other => panic!("expected the role to vanish, got {other:?}"),
    }
    assert!(err.user_message().contains("exited without reporting"));
    assert_eq!(err.workers()[0].exit, WorkerExit::Code(0));
}

#[test]
#[serial]
fn test_settings_reach_every_worker() {
    let settings = WorkerSettings {
        suppress_not_implemented: true,
        ..WorkerSettings::default()
    };
    let check = |ctx: &RoleContext| -> anyhow::Result<()> {
        anyhow::ensure!(ctx.settings.suppress_not_implemented, "settings lost in {}", ctx.name);
        Ok(())
    };
    let roles = vec![Role::new("first", check), Role::new("second", check)];

    run_roles(roles, Duration::from_secs(5), &settings).unwrap();
}
